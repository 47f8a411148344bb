//! ILP アドレス
//!
//! ```text
//! <scheme>.<segment>.<segment>...
//! scheme:  g | private | example | peer | self | test | test1 | test2 | test3 | local
//! segment: [A-Za-z0-9_~-]+
//! ```
//!
//! 全体は 1023 バイト以下。

use alloc::string::{String, ToString};

use crate::error::PacketError;

/// アドレスの最大長（バイト）
pub const MAX_ADDRESS_LEN: usize = 1023;

const SCHEMES: &[&str] = &[
    "g", "private", "example", "peer", "self", "test", "test1", "test2", "test3", "local",
];

/// 検証済みの ILP アドレス
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '~' || c == '-'
}

impl Address {
    /// 文字列を検証して Address を作る
    ///
    /// # エラー
    /// - `PacketError::InvalidAddress`: 長さ・scheme・セグメントのいずれかが不正
    pub fn new(address: &str) -> Result<Self, PacketError> {
        if address.is_empty() || address.len() > MAX_ADDRESS_LEN {
            return Err(PacketError::InvalidAddress);
        }

        let mut segments = address.split('.');
        let scheme = segments.next().unwrap_or_default();
        if !SCHEMES.contains(&scheme) {
            return Err(PacketError::InvalidAddress);
        }
        for segment in segments {
            if segment.is_empty() || !segment.chars().all(is_segment_char) {
                return Err(PacketError::InvalidAddress);
            }
        }

        Ok(Address(address.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// 先頭セグメント（`g`, `test` など）
    pub fn scheme(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    /// `self + "." + suffix` を作る
    pub fn with_suffix(&self, suffix: &str) -> Result<Address, PacketError> {
        let mut joined = String::with_capacity(self.0.len() + 1 + suffix.len());
        joined.push_str(&self.0);
        joined.push('.');
        joined.push_str(suffix);
        Address::new(&joined)
    }

    /// `self` が `prefix` の配下（`prefix.` で始まる）なら残りの部分を返す
    pub fn strip_prefix<'a>(&'a self, prefix: &Address) -> Option<&'a str> {
        self.0
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
    }
}

impl core::fmt::Display for Address {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for Address {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::new(s)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
