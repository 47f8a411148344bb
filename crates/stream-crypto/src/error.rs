//! 暗号エラー型

/// 暗号操作のエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// 鍵・トークンの長さが不正
    InvalidLength { expected: usize, actual: usize },
    /// Base64 デコードに失敗
    InvalidBase64,
    /// OS の乱数源が利用できない
    RandomUnavailable,
    /// 暗号化に失敗
    EncryptionFailed,
    /// 復号に失敗（認証タグ検証失敗を含む）
    DecryptionFailed,
    /// 暗号文が短すぎる（nonce + tag に満たない）
    CiphertextTooShort,
}

impl core::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CryptoError::InvalidLength { expected, actual } => {
                write!(f, "Invalid length: expected {} bytes, got {}", expected, actual)
            }
            CryptoError::InvalidBase64 => write!(f, "Invalid Base64 encoding"),
            CryptoError::RandomUnavailable => write!(f, "Secure random source unavailable"),
            CryptoError::EncryptionFailed => write!(f, "Encryption failed"),
            CryptoError::DecryptionFailed => write!(f, "Decryption failed (authentication tag mismatch)"),
            CryptoError::CiphertextTooShort => write!(f, "Ciphertext too short"),
        }
    }
}
