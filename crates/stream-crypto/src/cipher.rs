//! AES-128-OCB3 ペイロード暗号
//!
//! ILP Prepare の data フィールドに載せる STREAM パケットを暗号化/復号する。
//! 復号失敗は「この共有鍵で作られた暗号文ではない」ことを意味し、
//! サーバーは初回パケットの認証にこれをそのまま使う。

use alloc::vec::Vec;

use aead::{Aead, KeyInit};
use aes::Aes128;
use ocb3::Ocb3;

use crate::error::CryptoError;
use crate::nonce::{StreamNonce, NONCE_LEN};
use crate::secret::{hmac_sha256, SharedSecret};

/// AES-128-OCB3 (12バイト nonce, 16バイト tag) の型エイリアス
type Aes128Ocb3 = Ocb3<Aes128>;

/// 認証タグの長さ（バイト）
pub const TAG_LEN: usize = 16;

/// 暗号化ペイロードの最小長: nonce(12) + tag(16)
pub const MIN_CIPHERTEXT_LEN: usize = NONCE_LEN + TAG_LEN;

const ENCRYPTION_KEY_STRING: &[u8] = b"ilp_stream_encryption";

/// 共有鍵から導出した暗号鍵を保持する AEAD
///
/// ## 暗号化ペイロード構造
/// ```text
/// [nonce: 12bytes][ciphertext + auth_tag: variable]
/// ```
pub struct PayloadCipher {
    cipher: Aes128Ocb3,
}

impl PayloadCipher {
    /// 共有鍵から暗号鍵を導出して初期化する
    ///
    /// 暗号鍵 = HMAC-SHA256(shared_secret, "ilp_stream_encryption") の先頭 16 バイト
    pub fn new(shared_secret: &SharedSecret) -> Self {
        let derived = hmac_sha256(shared_secret.as_bytes(), ENCRYPTION_KEY_STRING);
        let mut key = [0u8; 16];
        key.copy_from_slice(&derived[..16]);
        PayloadCipher {
            cipher: Aes128Ocb3::new((&key).into()),
        }
    }

    /// 平文を暗号化する
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = StreamNonce::random()?;
        let ciphertext = self
            .cipher
            .encrypt(nonce.as_bytes().into(), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(nonce.as_bytes());
        payload.extend_from_slice(&ciphertext);
        Ok(payload)
    }

    /// 暗号化ペイロードを復号する
    ///
    /// 別の共有鍵で作られたもの・改ざんされたものは必ず失敗する（壊れた平文は返さない）。
    ///
    /// # エラー
    /// - `CryptoError::CiphertextTooShort`: nonce + tag に満たない
    /// - `CryptoError::DecryptionFailed`: 認証タグ検証失敗
    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if payload.len() < MIN_CIPHERTEXT_LEN {
            return Err(CryptoError::CiphertextTooShort);
        }
        let nonce =
            StreamNonce::from_payload_prefix(payload).ok_or(CryptoError::CiphertextTooShort)?;

        self.cipher
            .decrypt(nonce.as_bytes().into(), &payload[NONCE_LEN..])
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// 共有鍵で平文を暗号化する
pub fn encrypt(shared_secret: &SharedSecret, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    PayloadCipher::new(shared_secret).encrypt(plaintext)
}

/// 共有鍵で認証付き復号を行う
pub fn decrypt(shared_secret: &SharedSecret, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    PayloadCipher::new(shared_secret).decrypt(payload)
}
