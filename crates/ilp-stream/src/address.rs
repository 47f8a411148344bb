//! ケイパビリティアドレス
//!
//! 宛先アドレスそのものにコネクションを開くための資格情報を埋め込む。
//! サーバーは発行したトークンを保存しない。
//!
//! ```text
//! <sourceAccount>.<token>[~<tag>][.<任意の後続セグメント>]
//!                 └──── ConnectionId ────┘
//!
//! token: 18 バイトの乱数を Base64url（パディングなし）でエンコード
//! tag:   [A-Za-z0-9_-]+ 運用上の識別用。共有鍵には影響しない
//! ```

use std::fmt;

use ilp_packet::Address;
use stream_crypto::{derive_shared_secret, CryptoError, ServerSecret, SharedSecret, Token};

use crate::error::StreamError;

/// トークンとタグの区切り文字
pub const TAG_SEPARATOR: char = '~';

/// コネクション識別子（`token` または `token~tag`）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// トークンとタグから識別子を組み立てる
    ///
    /// # エラー
    /// - `StreamError::InvalidTag`: タグが `[A-Za-z0-9_-]+` に一致しない
    pub fn new(token: &Token, tag: Option<&str>) -> Result<Self, StreamError> {
        let mut id = token.to_base64();
        if let Some(tag) = tag {
            validate_tag(tag)?;
            id.push(TAG_SEPARATOR);
            id.push_str(tag);
        }
        Ok(ConnectionId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// トークン部分のテキスト
    pub fn token_str(&self) -> &str {
        match self.0.split_once(TAG_SEPARATOR) {
            Some((token, _)) => token,
            None => &self.0,
        }
    }

    /// タグ部分（無ければ None）
    pub fn tag(&self) -> Option<&str> {
        self.0.split_once(TAG_SEPARATOR).map(|(_, tag)| tag)
    }

    /// トークンをバイト列に戻す
    ///
    /// 正しく Base64url デコードできなければ偽造アドレスとみなしてよい。
    pub fn token(&self) -> Result<Token, CryptoError> {
        Token::from_base64(self.token_str())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// タグが `[A-Za-z0-9_-]+` に一致するか検査する
pub fn validate_tag(tag: &str) -> Result<(), StreamError> {
    let valid = !tag.is_empty()
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(StreamError::InvalidTag(tag.to_string()))
    }
}

/// クライアントに渡す資格情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub destination_account: Address,
    pub shared_secret: SharedSecret,
}

/// 新しい宛先アドレスと共有鍵を発行する
///
/// # 引数
/// - `server_secret`: サーバーシークレット
/// - `source_account`: サーバー自身の ILP アドレス
/// - `tag`: 任意のタグ
///
/// # エラー
/// - `StreamError::InvalidTag`: タグが不正（状態は何も変わらない）
/// - `StreamError::Crypto`: 乱数生成に失敗
/// - `StreamError::InvalidAddress`: 組み立てたアドレスが長すぎる
pub fn issue(
    server_secret: &ServerSecret,
    source_account: &Address,
    tag: Option<&str>,
) -> Result<Credentials, StreamError> {
    // 乱数を消費する前にタグを検査する
    if let Some(tag) = tag {
        validate_tag(tag)?;
    }
    let token = Token::random()?;
    let connection_id = ConnectionId::new(&token, tag)?;

    Ok(Credentials {
        destination_account: source_account.with_suffix(connection_id.as_str())?,
        // タグ付きの文字列ではなく生のトークンから導出する
        shared_secret: derive_shared_secret(server_secret, &token),
    })
}

/// 宛先アドレスからコネクション識別子を取り出す
///
/// `source_account.` の後ろの最初のセグメントが識別子。
/// プレフィックスが一致しない、または最初のセグメントが空なら None。
pub fn parse(destination: &Address, source_account: &Address) -> Option<ConnectionId> {
    let rest = destination.strip_prefix(source_account)?;
    let first = rest.split('.').next()?;
    if first.is_empty() {
        return None;
    }
    Some(ConnectionId(first.to_string()))
}
