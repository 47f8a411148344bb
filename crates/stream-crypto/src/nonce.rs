//! ペイロード暗号化用 Nonce
//!
//! ## 構造（12バイト）
//! ```text
//! bytes[0..12] = CSPRNG から取得したランダム値
//! ```
//!
//! 暗号文の先頭にそのまま付与して送信する。
//! 鍵はコネクションごとに固定なので、nonce の再利用を避けるため毎回ランダムに生成する。

use crate::error::CryptoError;

/// Nonce の長さ（バイト）
pub const NONCE_LEN: usize = 12;

/// AES-128-OCB3 の nonce（12バイト）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamNonce([u8; NONCE_LEN]);

impl StreamNonce {
    /// ランダムな Nonce を生成する
    ///
    /// # エラー
    /// - `CryptoError::RandomUnavailable`: OS の乱数源が使えない
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut bytes).map_err(|_| CryptoError::RandomUnavailable)?;
        Ok(StreamNonce(bytes))
    }

    /// 暗号化ペイロードの先頭 12 バイトから Nonce を復元する
    pub fn from_payload_prefix(bytes: &[u8]) -> Option<Self> {
        let prefix: [u8; NONCE_LEN] = bytes.get(..NONCE_LEN)?.try_into().ok()?;
        Some(StreamNonce(prefix))
    }

    /// AES-OCB3 の nonce 引数として使用する
    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}
