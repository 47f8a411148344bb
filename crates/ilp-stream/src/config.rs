//! サーバー/クライアントの設定
//!
//! JSON から読み込める。鍵はすべて Base64url（パディングなし）。
//!
//! ```json
//! { "server_secret": "AAAA...32 bytes..." }
//! { "destination_account": "g.example.<token>~tag", "shared_secret": "..." }
//! ```

use ilp_packet::Address;
use serde::{Deserialize, Serialize};
use stream_crypto::{ServerSecret, SharedSecret};

use crate::address::Credentials;
use crate::error::StreamError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 再起動をまたいで同じアドレスを有効にしたい場合に指定する。
    /// 省略時は起動ごとに乱数で生成される
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_secret: Option<String>,
}

impl ServerConfig {
    pub fn from_json(json: &str) -> Result<Self, StreamError> {
        serde_json::from_str(json).map_err(|e| StreamError::InvalidConfig(e.to_string()))
    }

    /// サーバーシークレットを得る（未指定なら生成する）
    pub fn server_secret(&self) -> Result<ServerSecret, StreamError> {
        match &self.server_secret {
            Some(encoded) => ServerSecret::from_base64(encoded)
                .map_err(|e| StreamError::InvalidConfig(format!("server_secret: {}", e))),
            None => Ok(ServerSecret::random()?),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub destination_account: String,
    pub shared_secret: String,
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, StreamError> {
        serde_json::from_str(json).map_err(|e| StreamError::InvalidConfig(e.to_string()))
    }

    /// サーバーが発行した資格情報から作る
    pub fn from_credentials(credentials: &Credentials) -> Self {
        ClientConfig {
            destination_account: credentials.destination_account.to_string(),
            shared_secret: credentials.shared_secret.to_base64(),
        }
    }

    pub fn to_json(&self) -> Result<String, StreamError> {
        serde_json::to_string(self).map_err(|e| StreamError::InvalidConfig(e.to_string()))
    }

    pub fn destination_account(&self) -> Result<Address, StreamError> {
        Address::new(&self.destination_account)
            .map_err(|e| StreamError::InvalidConfig(format!("destination_account: {}", e)))
    }

    pub fn shared_secret(&self) -> Result<SharedSecret, StreamError> {
        SharedSecret::from_base64(&self.shared_secret)
            .map_err(|e| StreamError::InvalidConfig(format!("shared_secret: {}", e)))
    }
}
