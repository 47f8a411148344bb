//! ilp-stream のエラー型
//!
//! ここに現れるのは呼び出し元に同期的に返すエラーだけ。
//! パケット処理中の失敗はすべて Reject に変換され、ここには出てこない。

use ilp_packet::PacketError;
use stream_connection::{ConnectionError, PluginError};
use stream_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// タグが `[A-Za-z0-9_-]+` に一致しない
    #[error("connection tag contains invalid characters: {0:?}")]
    InvalidTag(String),

    /// `listen()` 前にアドレスを発行しようとした
    #[error("server is not listening")]
    NotListening,

    /// 終了済みのサーバー
    #[error("server is closed")]
    Closed,

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// 自アドレスの取得（ILDCP）に失敗した
    #[error("address discovery failed: {0}")]
    Discovery(String),

    /// 発行したアドレスが ILP アドレスとして不正（自アドレスが長すぎる等）
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

// no_std クレートのエラーは std::error::Error を実装しないので手で変換する
impl From<CryptoError> for StreamError {
    fn from(e: CryptoError) -> Self {
        StreamError::Crypto(e)
    }
}

impl From<PacketError> for StreamError {
    fn from(e: PacketError) -> Self {
        StreamError::InvalidAddress(e.to_string())
    }
}
