//! OER (Octet Encoding Rules) の最小実装
//!
//! ## 可変長オクテット列
//! ```text
//! len < 128:  [len: u8][bytes...]
//! len >= 128: [0x80 | n: u8][len: n bytes BE][bytes...]
//! ```
//!
//! 整数は固定長 big-endian。

use alloc::vec::Vec;

use crate::error::PacketError;

/// バイト列を先頭から読み進めるリーダー
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    /// 残りバイト数
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// 読み残しがないことを確認する
    pub fn finish(&self) -> Result<(), PacketError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(PacketError::TrailingBytes)
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, PacketError> {
        let (&first, rest) = self.buf.split_first().ok_or(PacketError::UnexpectedEof)?;
        self.buf = rest;
        Ok(first)
    }

    pub fn read_u64(&mut self) -> Result<u64, PacketError> {
        let bytes = self.read_array::<8>()?;
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], PacketError> {
        if self.buf.len() < len {
            return Err(PacketError::UnexpectedEof);
        }
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(head)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// 可変長の長さプレフィックスを読む
    pub fn read_length(&mut self) -> Result<usize, PacketError> {
        let first = self.read_u8()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }

        let n = (first & 0x7F) as usize;
        if n == 0 || n > core::mem::size_of::<usize>() {
            return Err(PacketError::InvalidLength);
        }
        let len = self
            .read_bytes(n)?
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        // 128 未満を長形式で書くのは非正規
        if len < 0x80 {
            return Err(PacketError::InvalidLength);
        }
        Ok(len)
    }

    /// 可変長オクテット列を読む
    pub fn read_var_octet_string(&mut self) -> Result<&'a [u8], PacketError> {
        let len = self.read_length()?;
        self.read_bytes(len)
    }
}

/// 長さプレフィックスを書き込む
pub fn put_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
        return;
    }
    let be = len.to_be_bytes();
    let skip = be.iter().take_while(|&&b| b == 0).count();
    buf.push(0x80 | (be.len() - skip) as u8);
    buf.extend_from_slice(&be[skip..]);
}

/// 可変長オクテット列を書き込む
pub fn put_var_octet_string(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_length(buf, bytes.len());
    buf.extend_from_slice(bytes);
}
