//! # stream-crypto
//!
//! STREAM コネクションの資格情報導出と暗号プリミティブ。
//! `no_std` + `alloc` 環境で動作する。
//!
//! ## 役割
//!
//! - サーバーシークレットとトークンから共有鍵を導出する（状態を持たない）
//! - 共有鍵で Prepare の data を AES-128-OCB3 で暗号化/復号する
//! - 復号の成否を「このトークンは本当に発行したものか」の判定に使う
//! - fulfillment / condition の計算
//!
//! ## 暗号化ペイロード
//!
//! ```text
//! [nonce: 12bytes][ciphertext + auth_tag(16): variable]
//! ```

#![no_std]
extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

mod cipher;
mod error;
mod fulfillment;
mod nonce;
mod secret;

pub use cipher::{decrypt, encrypt, PayloadCipher, MIN_CIPHERTEXT_LEN, TAG_LEN};
pub use error::CryptoError;
pub use fulfillment::{condition_for, fulfillment_for, random_condition};
pub use nonce::{StreamNonce, NONCE_LEN};
pub use secret::{
    derive_shared_secret, ServerSecret, SharedSecret, Token, SERVER_SECRET_LEN,
    SHARED_SECRET_LEN, TOKEN_LEN,
};

/// バイト列を URL-safe Base64（パディングなし）にエンコードする
pub fn encode_base64url(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// URL-safe Base64（パディングなし）文字列をデコードする
pub fn decode_base64url(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    use base64::Engine as _;
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| CryptoError::InvalidBase64)
}
