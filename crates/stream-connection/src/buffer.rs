//! 受信データバッファ
//!
//! StreamData フレームを offset 順に並べ直し、連続した部分だけを
//! アプリケーションに渡す。

use std::collections::{BTreeMap, VecDeque};

/// 受信バイトストリームのバッファ
///
/// ## 責任
/// - 重複した範囲（再送）を捨てる
/// - 先行して届いた範囲を保留し、欠けた部分が届いたら結合する
/// - 読み出し可能なデータを `read_available()` で渡す
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    /// 読み出し可能なデータ
    readable: VecDeque<u8>,
    /// 次に期待する offset
    next_offset: u64,
    /// 先行して届いたデータ（offset → bytes）
    pending: BTreeMap<u64, Vec<u8>>,
    /// 受信した総バイト数（重複を除く、統計用）
    total_received: u64,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// offset 付きのデータを取り込む
    pub fn apply(&mut self, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if offset > self.next_offset {
            self.pending.entry(offset).or_insert_with(|| data.to_vec());
            return;
        }
        self.append_from(offset, data);

        // 保留していたものが連続したら取り込む
        while let Some((&pending_offset, _)) = self.pending.first_key_value() {
            if pending_offset > self.next_offset {
                break;
            }
            if let Some(chunk) = self.pending.remove(&pending_offset) {
                self.append_from(pending_offset, &chunk);
            }
        }
    }

    /// `offset <= next_offset` のデータのうち未受信の末尾だけを追加する
    fn append_from(&mut self, offset: u64, data: &[u8]) {
        let end = offset + data.len() as u64;
        if end <= self.next_offset {
            return;
        }
        let skip = (self.next_offset - offset) as usize;
        self.readable.extend(data[skip..].iter().copied());
        self.total_received += (data.len() - skip) as u64;
        self.next_offset = end;
    }

    /// 読み取れるデータをすべて返す
    pub fn read_available(&mut self) -> Vec<u8> {
        self.readable.drain(..).collect()
    }

    pub fn has_pending_read(&self) -> bool {
        !self.readable.is_empty()
    }

    pub fn total_received_bytes(&self) -> u64 {
        self.total_received
    }
}
