//! ILP エラーコード（Reject パケットの code フィールド）
//!
//! 3 文字の ASCII。先頭文字がクラスを表す:
//! - `F`: Final（再送しても成功しない）
//! - `T`: Temporary
//! - `R`: Relative（期限切れ等）

/// ILP エラーコード
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode([u8; 3]);

impl ErrorCode {
    pub const F00_BAD_REQUEST: ErrorCode = ErrorCode(*b"F00");
    pub const F01_INVALID_PACKET: ErrorCode = ErrorCode(*b"F01");
    pub const F02_UNREACHABLE: ErrorCode = ErrorCode(*b"F02");
    pub const F06_UNEXPECTED_PAYMENT: ErrorCode = ErrorCode(*b"F06");
    pub const F99_APPLICATION_ERROR: ErrorCode = ErrorCode(*b"F99");
    pub const T00_INTERNAL_ERROR: ErrorCode = ErrorCode(*b"T00");
    pub const R00_TRANSFER_TIMED_OUT: ErrorCode = ErrorCode(*b"R00");

    /// 3 バイトからエラーコードを作る
    ///
    /// 英大文字 1 文字 + 英数字 2 文字のみ受け付ける。
    pub fn new(bytes: [u8; 3]) -> Option<Self> {
        let valid = bytes[0].is_ascii_uppercase()
            && bytes[1..].iter().all(|b| b.is_ascii_alphanumeric());
        valid.then_some(ErrorCode(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // new() で ASCII のみ通しているので常に成功する
        core::str::from_utf8(&self.0).unwrap_or("F00")
    }

    /// エラークラス（'F' / 'T' / 'R'）
    pub fn class(&self) -> char {
        self.0[0] as char
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ErrorCode({})", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(ErrorCode::F02_UNREACHABLE.as_str(), "F02");
        assert_eq!(ErrorCode::T00_INTERNAL_ERROR.class(), 'T');
    }

    #[test]
    fn test_new_validates() {
        assert_eq!(ErrorCode::new(*b"F99"), Some(ErrorCode::F99_APPLICATION_ERROR));
        assert!(ErrorCode::new(*b"f00").is_none());
        assert!(ErrorCode::new(*b"F0 ").is_none());
    }
}
