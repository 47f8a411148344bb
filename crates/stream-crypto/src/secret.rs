//! サーバーシークレット・トークン・共有鍵
//!
//! ## 鍵導出
//! ```text
//! keygen       = HMAC-SHA256(server_secret, "ilp_stream_shared_secret")
//! shared_secret = HMAC-SHA256(keygen, token)
//! ```
//!
//! 共有鍵はトークンの生バイト列のみから決まる。タグ（`~tag`）は入力にしない。
//! サーバーは発行済みトークンを一切記憶しない。

use alloc::string::String;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;
use crate::{decode_base64url, encode_base64url};

/// サーバーシークレットの長さ（バイト）
pub const SERVER_SECRET_LEN: usize = 32;

/// 共有鍵の長さ（バイト）
pub const SHARED_SECRET_LEN: usize = 32;

/// トークンの長さ（バイト）。Base64url で 24 文字になる
pub const TOKEN_LEN: usize = 18;

const SHARED_SECRET_GENERATION_STRING: &[u8] = b"ilp_stream_shared_secret";

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256
pub(crate) fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    // HMAC は任意長の鍵を受け付けるので、ここは失敗しない
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).map_err(|_| CryptoError::RandomUnavailable)?;
    Ok(bytes)
}

fn fixed_from_slice<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidLength {
        expected: N,
        actual: bytes.len(),
    })
}

/// サーバーシークレット
///
/// サーバー生成時に一度だけ作られ、外部に送信されることはない。
/// 再起動をまたいで同じアドレスを有効にしたい場合は呼び出し側が保存して渡す。
#[derive(Clone, PartialEq, Eq)]
pub struct ServerSecret([u8; SERVER_SECRET_LEN]);

impl ServerSecret {
    /// CSPRNG から新しいシークレットを生成する
    pub fn random() -> Result<Self, CryptoError> {
        random_bytes().map(ServerSecret)
    }

    pub fn from_bytes(bytes: [u8; SERVER_SECRET_LEN]) -> Self {
        ServerSecret(bytes)
    }

    /// Base64url（パディングなし）文字列から復元する
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = decode_base64url(encoded)?;
        fixed_from_slice(&bytes).map(ServerSecret)
    }

    pub fn as_bytes(&self) -> &[u8; SERVER_SECRET_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        encode_base64url(&self.0)
    }
}

impl core::fmt::Debug for ServerSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("ServerSecret(..)")
    }
}

/// コネクション単位の共有鍵
///
/// `(ServerSecret, Token)` から決定的に導出される。
/// コネクション層はこの鍵でペイロードの暗号化と fulfillment 生成を行う。
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; SHARED_SECRET_LEN]);

impl SharedSecret {
    pub fn from_bytes(bytes: [u8; SHARED_SECRET_LEN]) -> Self {
        SharedSecret(bytes)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = decode_base64url(encoded)?;
        fixed_from_slice(&bytes).map(SharedSecret)
    }

    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        encode_base64url(&self.0)
    }
}

impl core::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// 発行ごとに生成されるランダムトークン
///
/// サーバーには保存されない。アドレスの中にテキスト形式で埋め込まれ、
/// 受信時にアドレスから復元される。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token([u8; TOKEN_LEN]);

impl Token {
    /// CSPRNG から新しいトークンを生成する
    pub fn random() -> Result<Self, CryptoError> {
        random_bytes().map(Token)
    }

    /// アドレス中のテキスト形式（Base64url, パディングなし）から復元する
    ///
    /// # エラー
    /// - `CryptoError::InvalidBase64`: Base64 デコード失敗
    /// - `CryptoError::InvalidLength`: 18 バイト以外
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = decode_base64url(encoded)?;
        fixed_from_slice(&bytes).map(Token)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }

    /// アドレスに埋め込むテキスト形式
    pub fn to_base64(&self) -> String {
        encode_base64url(&self.0)
    }
}

/// `(server_secret, token)` から共有鍵を導出する
///
/// 純粋関数。レジストリ等の状態を一切参照しないため、
/// 初めて見るクライアントの認証にも事前状態が不要。
pub fn derive_shared_secret(server_secret: &ServerSecret, token: &Token) -> SharedSecret {
    let keygen = hmac_sha256(server_secret.as_bytes(), SHARED_SECRET_GENERATION_STRING);
    SharedSecret(hmac_sha256(&keygen, token.as_bytes()))
}
