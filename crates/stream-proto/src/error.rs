//! stream-proto エラー型

/// Protobuf エンコード/デコードのエラー
#[derive(Debug)]
pub enum ProtoError {
    /// Protobuf デコード失敗
    DecodeFailed(prost::DecodeError),
    /// プロトコルバージョン不一致
    InvalidProtocolVersion(u32),
    /// 未知のパケット種別
    UnknownPacketKind(i32),
}

impl core::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtoError::DecodeFailed(e) => write!(f, "Proto decode failed: {}", e),
            ProtoError::InvalidProtocolVersion(v) => {
                write!(f, "Invalid protocol version: {} (expected {})", v, super::STREAM_PROTOCOL_VERSION)
            }
            ProtoError::UnknownPacketKind(k) => write!(f, "Unknown packet kind: {}", k),
        }
    }
}
