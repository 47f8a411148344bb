//! Fulfillment / Condition
//!
//! ```text
//! fulfillment_key = HMAC-SHA256(shared_secret, "ilp_stream_fulfillment")
//! fulfillment     = HMAC-SHA256(fulfillment_key, prepare.data)
//! condition       = SHA-256(fulfillment)
//! ```
//!
//! 送信側は共有鍵を知っているので、Prepare の data から condition を計算できる。
//! condition を乱数にした Prepare は受信側で fulfill できない（データ専用パケット）。

use sha2::{Digest, Sha256};

use crate::error::CryptoError;
use crate::secret::{hmac_sha256, SharedSecret};

const FULFILLMENT_GENERATION_STRING: &[u8] = b"ilp_stream_fulfillment";

/// Prepare の data に対する fulfillment を計算する
pub fn fulfillment_for(shared_secret: &SharedSecret, data: &[u8]) -> [u8; 32] {
    let key = hmac_sha256(shared_secret.as_bytes(), FULFILLMENT_GENERATION_STRING);
    hmac_sha256(&key, data)
}

/// fulfillment から execution condition を計算する
pub fn condition_for(fulfillment: &[u8; 32]) -> [u8; 32] {
    Sha256::digest(fulfillment).into()
}

/// 誰にも fulfill できない乱数 condition
pub fn random_condition() -> Result<[u8; 32], CryptoError> {
    let mut condition = [0u8; 32];
    getrandom::getrandom(&mut condition).map_err(|_| CryptoError::RandomUnavailable)?;
    Ok(condition)
}
