//! ilp-packet エラー型

/// パケットのエンコード/デコードエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// バイト列が途中で終わっている
    UnexpectedEof,
    /// 想定と異なるパケット種別
    UnexpectedType(u8),
    /// 可変長フィールドの長さ表現が不正
    InvalidLength,
    /// パケット末尾に余分なバイトがある
    TrailingBytes,
    /// ILP アドレスとして不正
    InvalidAddress,
    /// expiresAt のフォーマットが不正
    InvalidTimestamp,
    /// エラーコードが 3 文字の ASCII ではない
    InvalidErrorCode,
    /// UTF-8 として不正な文字列
    InvalidUtf8,
}

impl core::fmt::Display for PacketError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PacketError::UnexpectedEof => write!(f, "Unexpected end of packet"),
            PacketError::UnexpectedType(t) => write!(f, "Unexpected packet type: {}", t),
            PacketError::InvalidLength => write!(f, "Invalid length prefix"),
            PacketError::TrailingBytes => write!(f, "Trailing bytes after packet"),
            PacketError::InvalidAddress => write!(f, "Invalid ILP address"),
            PacketError::InvalidTimestamp => write!(f, "Invalid expiresAt timestamp"),
            PacketError::InvalidErrorCode => write!(f, "Invalid error code"),
            PacketError::InvalidUtf8 => write!(f, "Invalid UTF-8 string"),
        }
    }
}
