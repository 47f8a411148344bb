//! ILPv4 パケット
//!
//! ## Envelope
//! ```text
//! [type: u8][contents: var-octet-string]
//! ```
//!
//! ## Prepare (type 12)
//! ```text
//! [amount: u64 BE][expiresAt: 17 bytes "YYYYMMDDHHmmSSfff"][executionCondition: 32 bytes]
//! [destination: var-octet-string][data: var-octet-string]
//! ```
//!
//! ## Fulfill (type 13)
//! ```text
//! [fulfillment: 32 bytes][data: var-octet-string]
//! ```
//!
//! ## Reject (type 14)
//! ```text
//! [code: 3 bytes][triggeredBy: var-octet-string][message: var-octet-string][data: var-octet-string]
//! ```

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use chrono::{DateTime, NaiveDate, Utc};

use crate::address::Address;
use crate::error::PacketError;
use crate::error_code::ErrorCode;
use crate::oer::{put_var_octet_string, Reader};

const TIMESTAMP_LEN: usize = 17;
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// パケット種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Prepare = 12,
    Fulfill = 13,
    Reject = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            12 => Ok(PacketType::Prepare),
            13 => Ok(PacketType::Fulfill),
            14 => Ok(PacketType::Reject),
            other => Err(PacketError::UnexpectedType(other)),
        }
    }
}

/// Envelope を剥がして contents を返す
fn open_envelope(bytes: &[u8], expected: PacketType) -> Result<&[u8], PacketError> {
    let mut reader = Reader::new(bytes);
    let packet_type = reader.read_u8()?;
    if packet_type != expected as u8 {
        return Err(PacketError::UnexpectedType(packet_type));
    }
    let contents = reader.read_var_octet_string()?;
    reader.finish()?;
    Ok(contents)
}

fn seal_envelope(packet_type: PacketType, contents: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(contents.len() + 4);
    buf.push(packet_type as u8);
    put_var_octet_string(&mut buf, contents);
    buf
}

fn encode_timestamp(time: &DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

fn decode_timestamp(bytes: &[u8; TIMESTAMP_LEN]) -> Result<DateTime<Utc>, PacketError> {
    if !bytes.iter().all(u8::is_ascii_digit) {
        return Err(PacketError::InvalidTimestamp);
    }
    let field = |range: core::ops::Range<usize>| {
        bytes[range]
            .iter()
            .fold(0u32, |acc, &b| acc * 10 + (b - b'0') as u32)
    };

    NaiveDate::from_ymd_opt(field(0..4) as i32, field(4..6), field(6..8))
        .and_then(|date| {
            date.and_hms_milli_opt(field(8..10), field(10..12), field(12..14), field(14..17))
        })
        .map(|naive| naive.and_utc())
        .ok_or(PacketError::InvalidTimestamp)
}

fn decode_address(bytes: &[u8]) -> Result<Address, PacketError> {
    let text = core::str::from_utf8(bytes).map_err(|_| PacketError::InvalidAddress)?;
    Address::new(text)
}

/// ILP Prepare パケット
#[derive(Debug, Clone, PartialEq)]
pub struct Prepare {
    pub amount: u64,
    pub expires_at: DateTime<Utc>,
    pub execution_condition: [u8; 32],
    pub destination: Address,
    pub data: Vec<u8>,
}

impl Prepare {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut reader = Reader::new(open_envelope(bytes, PacketType::Prepare)?);

        let amount = reader.read_u64()?;
        let expires_at = decode_timestamp(&reader.read_array::<TIMESTAMP_LEN>()?)?;
        let execution_condition = reader.read_array::<32>()?;
        let destination = decode_address(reader.read_var_octet_string()?)?;
        let data = reader.read_var_octet_string()?.to_vec();
        reader.finish()?;

        Ok(Prepare {
            amount,
            expires_at,
            execution_condition,
            destination,
            data,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let destination = self.destination.as_bytes();
        let mut contents =
            Vec::with_capacity(8 + TIMESTAMP_LEN + 32 + destination.len() + self.data.len() + 8);
        contents.extend_from_slice(&self.amount.to_be_bytes());
        contents.extend_from_slice(encode_timestamp(&self.expires_at).as_bytes());
        contents.extend_from_slice(&self.execution_condition);
        put_var_octet_string(&mut contents, destination);
        put_var_octet_string(&mut contents, &self.data);
        seal_envelope(PacketType::Prepare, &contents)
    }
}

/// ILP Fulfill パケット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fulfill {
    pub fulfillment: [u8; 32],
    pub data: Vec<u8>,
}

impl Fulfill {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut reader = Reader::new(open_envelope(bytes, PacketType::Fulfill)?);
        let fulfillment = reader.read_array::<32>()?;
        let data = reader.read_var_octet_string()?.to_vec();
        reader.finish()?;
        Ok(Fulfill { fulfillment, data })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut contents = Vec::with_capacity(32 + self.data.len() + 4);
        contents.extend_from_slice(&self.fulfillment);
        put_var_octet_string(&mut contents, &self.data);
        seal_envelope(PacketType::Fulfill, &contents)
    }
}

/// ILP Reject パケット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    pub code: ErrorCode,
    /// Reject を生成したノードのアドレス（不明なら空文字列としてエンコード）
    pub triggered_by: Option<Address>,
    pub message: String,
    pub data: Vec<u8>,
}

impl Reject {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut reader = Reader::new(open_envelope(bytes, PacketType::Reject)?);

        let code =
            ErrorCode::new(reader.read_array::<3>()?).ok_or(PacketError::InvalidErrorCode)?;
        let triggered_by = match reader.read_var_octet_string()? {
            [] => None,
            bytes => Some(decode_address(bytes)?),
        };
        let message = core::str::from_utf8(reader.read_var_octet_string()?)
            .map_err(|_| PacketError::InvalidUtf8)?
            .to_string();
        let data = reader.read_var_octet_string()?.to_vec();
        reader.finish()?;

        Ok(Reject {
            code,
            triggered_by,
            message,
            data,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let triggered_by = self
            .triggered_by
            .as_ref()
            .map(Address::as_bytes)
            .unwrap_or_default();
        let mut contents =
            Vec::with_capacity(3 + triggered_by.len() + self.message.len() + self.data.len() + 12);
        contents.extend_from_slice(self.code.as_bytes());
        put_var_octet_string(&mut contents, triggered_by);
        put_var_octet_string(&mut contents, self.message.as_bytes());
        put_var_octet_string(&mut contents, &self.data);
        seal_envelope(PacketType::Reject, &contents)
    }
}

/// 任意の ILP パケット
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Prepare(Prepare),
    Fulfill(Fulfill),
    Reject(Reject),
}

impl Packet {
    /// 先頭バイト（パケット種別）を返す
    pub fn peek_type(bytes: &[u8]) -> Option<u8> {
        bytes.first().copied()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let type_byte = Self::peek_type(bytes).ok_or(PacketError::UnexpectedEof)?;
        match PacketType::try_from(type_byte)? {
            PacketType::Prepare => Prepare::from_bytes(bytes).map(Packet::Prepare),
            PacketType::Fulfill => Fulfill::from_bytes(bytes).map(Packet::Fulfill),
            PacketType::Reject => Reject::from_bytes(bytes).map(Packet::Reject),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Packet::Prepare(p) => p.to_bytes(),
            Packet::Fulfill(f) => f.to_bytes(),
            Packet::Reject(r) => r.to_bytes(),
        }
    }
}

impl From<Prepare> for Packet {
    fn from(p: Prepare) -> Self {
        Packet::Prepare(p)
    }
}

impl From<Fulfill> for Packet {
    fn from(f: Fulfill) -> Self {
        Packet::Fulfill(f)
    }
}

impl From<Reject> for Packet {
    fn from(r: Reject) -> Self {
        Packet::Reject(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_prepare() -> Prepare {
        Prepare {
            amount: 107,
            expires_at: Utc.with_ymd_and_hms(2017, 12, 23, 1, 21, 40).unwrap()
                + chrono::Duration::milliseconds(549),
            execution_condition: [0x11; 32],
            destination: Address::new("example.alice").unwrap(),
            data: alloc::vec![0xAB; 300],
        }
    }

    #[test]
    fn test_prepare_roundtrip() {
        let prepare = sample_prepare();
        let bytes = prepare.to_bytes();
        assert_eq!(bytes[0], 12);
        assert_eq!(Prepare::from_bytes(&bytes).unwrap(), prepare);
    }

    #[test]
    fn test_prepare_timestamp_encoding() {
        let bytes = sample_prepare().to_bytes();
        // type(1) + 長形式の長さ(3) + amount(8) の後に expiresAt
        assert_eq!(&bytes[12..29], b"20171223012140549");
    }

    #[test]
    fn test_prepare_rejects_other_types() {
        let fulfill = Fulfill {
            fulfillment: [0; 32],
            data: Vec::new(),
        };
        assert_eq!(
            Prepare::from_bytes(&fulfill.to_bytes()),
            Err(PacketError::UnexpectedType(13))
        );
    }

    #[test]
    fn test_prepare_invalid_timestamp() {
        let mut bytes = sample_prepare().to_bytes();
        // 月を 13 にする
        bytes[16] = b'1';
        bytes[17] = b'3';
        assert_eq!(Prepare::from_bytes(&bytes), Err(PacketError::InvalidTimestamp));
    }

    #[test]
    fn test_reject_without_triggered_by() {
        let reject = Reject {
            code: ErrorCode::F02_UNREACHABLE,
            triggered_by: None,
            message: String::new(),
            data: Vec::new(),
        };
        let bytes = reject.to_bytes();
        // [14][len=6]["F02"][0][0][0]
        assert_eq!(bytes, alloc::vec![14, 6, b'F', b'0', b'2', 0, 0, 0]);
        assert_eq!(Reject::from_bytes(&bytes).unwrap(), reject);
    }

    #[test]
    fn test_packet_dispatch() {
        let reject = Reject {
            code: ErrorCode::F99_APPLICATION_ERROR,
            triggered_by: Some(Address::new("g.example").unwrap()),
            message: "nope".to_string(),
            data: alloc::vec![1, 2, 3],
        };
        match Packet::from_bytes(&reject.to_bytes()).unwrap() {
            Packet::Reject(r) => assert_eq!(r, reject),
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_packet_unknown_type() {
        assert_eq!(Packet::from_bytes(&[99, 0]), Err(PacketError::UnexpectedType(99)));
        assert_eq!(Packet::from_bytes(&[]), Err(PacketError::UnexpectedEof));
    }

    #[test]
    fn test_trailing_bytes_after_envelope() {
        let mut bytes = sample_prepare().to_bytes();
        bytes.push(0);
        assert_eq!(Prepare::from_bytes(&bytes), Err(PacketError::TrailingBytes));
    }
}
