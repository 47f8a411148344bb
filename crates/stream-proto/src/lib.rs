//! # stream-proto
//!
//! Prepare の data フィールドに暗号化して載せる STREAM パケットの Protobuf 定義と
//! エンコード/デコードユーティリティ。
//!
//! ## StreamPacket の役割
//!
//! - `sequence`: 送信側が付ける連番
//! - `kind`: このパケットが Prepare / Fulfill / Reject のどれに載っているか
//! - `prepare_amount`: 受信側が観測した Prepare の金額（レスポンスで返す）
//! - `frames`: コネクション制御・データフレームの列
//!
//! ## フレーム
//!
//! - `ConnectionNewAddress`: クライアントが自分のアドレスをサーバーに伝える
//! - `StreamData`: アプリケーションデータ
//! - `ConnectionClose`: コネクション終了

#![no_std]
extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

pub mod error;

pub use error::ProtoError;

/// STREAM プロトコルバージョン
pub const STREAM_PROTOCOL_VERSION: u32 = 1;

/// パケットが載っている ILP パケットの種別
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PacketKind {
    Prepare = 0,
    Fulfill = 1,
    Reject = 2,
}

/// コネクション終了理由
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CloseReason {
    NoError = 0,
    InternalError = 1,
    ApplicationError = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamPacket {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(uint64, tag = "2")]
    pub sequence: u64,
    #[prost(enumeration = "PacketKind", tag = "3")]
    pub kind: i32,
    #[prost(uint64, tag = "4")]
    pub prepare_amount: u64,
    #[prost(message, repeated, tag = "5")]
    pub frames: Vec<Frame>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Frame {
    #[prost(oneof = "frame::Body", tags = "1, 2, 3")]
    pub body: Option<frame::Body>,
}

pub mod frame {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        ConnectionClose(super::ConnectionClose),
        #[prost(message, tag = "2")]
        ConnectionNewAddress(super::ConnectionNewAddress),
        #[prost(message, tag = "3")]
        StreamData(super::StreamData),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectionClose {
    #[prost(enumeration = "CloseReason", tag = "1")]
    pub reason: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectionNewAddress {
    #[prost(string, tag = "1")]
    pub source_account: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamData {
    #[prost(uint64, tag = "1")]
    pub stream_id: u64,
    #[prost(uint64, tag = "2")]
    pub offset: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
}

/// StreamPacket の構築・エンコード・デコードユーティリティ
impl StreamPacket {
    /// 送信用パケットを組み立てる
    pub fn new(sequence: u64, kind: PacketKind, prepare_amount: u64, frames: Vec<Frame>) -> Self {
        StreamPacket {
            version: STREAM_PROTOCOL_VERSION,
            sequence,
            kind: kind as i32,
            prepare_amount,
            frames,
        }
    }

    /// バイト列から StreamPacket をデコードする
    ///
    /// # エラー
    /// - `ProtoError::DecodeFailed`: protobuf デコード失敗
    /// - `ProtoError::InvalidProtocolVersion`: バージョン不一致
    /// - `ProtoError::UnknownPacketKind`: kind が未知の値
    pub fn decode_from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        use prost::Message;
        let packet = StreamPacket::decode(bytes).map_err(ProtoError::DecodeFailed)?;

        if packet.version != STREAM_PROTOCOL_VERSION {
            return Err(ProtoError::InvalidProtocolVersion(packet.version));
        }
        if PacketKind::try_from(packet.kind).is_err() {
            return Err(ProtoError::UnknownPacketKind(packet.kind));
        }

        Ok(packet)
    }

    /// StreamPacket をバイト列にエンコードする
    pub fn encode_to_bytes(&self) -> Vec<u8> {
        use prost::Message;
        self.encode_to_vec()
    }

    /// kind を enum で返す（decode_from_bytes で検証済み）
    pub fn packet_kind(&self) -> PacketKind {
        PacketKind::try_from(self.kind).unwrap_or(PacketKind::Prepare)
    }

    /// フレーム本体を順に返す
    pub fn bodies(&self) -> impl Iterator<Item = &frame::Body> {
        self.frames.iter().filter_map(|f| f.body.as_ref())
    }
}

impl Frame {
    pub fn connection_close(reason: CloseReason, message: &str) -> Self {
        Frame {
            body: Some(frame::Body::ConnectionClose(ConnectionClose {
                reason: reason as i32,
                message: String::from(message),
            })),
        }
    }

    pub fn connection_new_address(source_account: &str) -> Self {
        Frame {
            body: Some(frame::Body::ConnectionNewAddress(ConnectionNewAddress {
                source_account: String::from(source_account),
            })),
        }
    }

    pub fn stream_data(stream_id: u64, offset: u64, data: Vec<u8>) -> Self {
        Frame {
            body: Some(frame::Body::StreamData(StreamData {
                stream_id,
                offset,
                data,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_with_frames_roundtrip() {
        let packet = StreamPacket::new(
            7,
            PacketKind::Prepare,
            0,
            alloc::vec![
                Frame::connection_new_address("test.alice"),
                Frame::stream_data(1, 0, alloc::vec![1, 2, 3]),
            ],
        );

        let decoded = StreamPacket::decode_from_bytes(&packet.encode_to_bytes()).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.packet_kind(), PacketKind::Prepare);

        let bodies: Vec<_> = decoded.bodies().collect();
        assert!(matches!(
            bodies[0],
            frame::Body::ConnectionNewAddress(a) if a.source_account == "test.alice"
        ));
        assert!(matches!(bodies[1], frame::Body::StreamData(d) if d.data == [1, 2, 3]));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut packet = StreamPacket::new(1, PacketKind::Fulfill, 10, Vec::new());
        packet.version = 9;
        assert!(matches!(
            StreamPacket::decode_from_bytes(&packet.encode_to_bytes()),
            Err(ProtoError::InvalidProtocolVersion(9))
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut packet = StreamPacket::new(1, PacketKind::Reject, 0, Vec::new());
        packet.kind = 42;
        assert!(matches!(
            StreamPacket::decode_from_bytes(&packet.encode_to_bytes()),
            Err(ProtoError::UnknownPacketKind(42))
        ));
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(StreamPacket::decode_from_bytes(&[0xFF, 0xFF, 0xFF]).is_err());
    }
}
