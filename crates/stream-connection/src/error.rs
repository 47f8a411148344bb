//! プラグイン・コネクションのエラー型

use ilp_packet::ErrorCode;
use thiserror::Error;

/// プラグイン（トランスポート）のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("plugin is not connected")]
    NotConnected,
    #[error("a data handler is already registered")]
    HandlerAlreadyRegistered,
    #[error("transport error: {0}")]
    Transport(String),
}

/// コネクションがパケット処理に失敗したときの結果
///
/// `Protocol` はそのまま Reject パケットになる。
/// `Internal` は想定外の失敗で、呼び出し側がログに残して既定の Reject に落とす。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("ILP error {code}: {message}")]
    Protocol {
        code: ErrorCode,
        message: String,
        data: Vec<u8>,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ConnectionError {
    /// data なしのプロトコルエラー
    pub fn protocol(code: ErrorCode, message: impl Into<String>) -> Self {
        ConnectionError::Protocol {
            code,
            message: message.into(),
            data: Vec::new(),
        }
    }

    /// F02 Unreachable（理由は一切含めない）
    pub fn unreachable() -> Self {
        Self::protocol(ErrorCode::F02_UNREACHABLE, "")
    }

    /// F06 Unexpected Payment
    pub fn unexpected_payment() -> Self {
        Self::protocol(ErrorCode::F06_UNEXPECTED_PAYMENT, "")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ConnectionError::Internal(message.into())
    }

    /// プロトコルエラーならそのコード
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ConnectionError::Protocol { code, .. } => Some(*code),
            ConnectionError::Internal(_) => None,
        }
    }
}

impl From<PluginError> for ConnectionError {
    fn from(e: PluginError) -> Self {
        ConnectionError::Internal(e.to_string())
    }
}

impl From<stream_crypto::CryptoError> for ConnectionError {
    fn from(e: stream_crypto::CryptoError) -> Self {
        ConnectionError::Internal(e.to_string())
    }
}
