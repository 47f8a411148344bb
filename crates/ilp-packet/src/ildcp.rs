//! ILDCP (Interledger Dynamic Configuration Protocol)
//!
//! 自ノードの ILP アドレスを上流から取得するための 1 往復のプロトコル。
//!
//! ```text
//! Request:  Prepare { destination: "peer.config", amount: 0,
//!                     executionCondition: SHA-256(32 zero bytes), data: [] }
//! Response: Fulfill { fulfillment: 32 zero bytes,
//!                     data: [clientAddress: var-octet-string][assetScale: u8]
//!                           [assetCode: var-octet-string] }
//! ```

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use chrono::{DateTime, Utc};

use crate::address::Address;
use crate::error::PacketError;
use crate::oer::{put_var_octet_string, Reader};
use crate::packet::{Fulfill, Prepare};

/// ILDCP の宛先アドレス
pub const ILDCP_DESTINATION: &str = "peer.config";

/// peer プロトコル共通の fulfillment（32 バイトのゼロ）
pub const PEER_PROTOCOL_FULFILLMENT: [u8; 32] = [0u8; 32];

/// SHA-256(PEER_PROTOCOL_FULFILLMENT)
pub const PEER_PROTOCOL_CONDITION: [u8; 32] = [
    0x66, 0x68, 0x7a, 0xad, 0xf8, 0x62, 0xbd, 0x77, 0x6c, 0x8f, 0xc1, 0x8b, 0x8e, 0x9f, 0x8e,
    0x20, 0x08, 0x97, 0x14, 0x85, 0x6e, 0xe2, 0x33, 0xb3, 0x90, 0x2a, 0x59, 0x1d, 0x0d, 0x5f,
    0x29, 0x25,
];

/// ILDCP リクエスト
#[derive(Debug, Clone, PartialEq)]
pub struct IldcpRequest {
    pub expires_at: DateTime<Utc>,
}

impl IldcpRequest {
    pub fn new(expires_at: DateTime<Utc>) -> Self {
        IldcpRequest { expires_at }
    }

    pub fn to_prepare(&self) -> Result<Prepare, PacketError> {
        Ok(Prepare {
            amount: 0,
            expires_at: self.expires_at,
            execution_condition: PEER_PROTOCOL_CONDITION,
            destination: Address::new(ILDCP_DESTINATION)?,
            data: Vec::new(),
        })
    }

    /// 受信した Prepare が ILDCP リクエストか
    pub fn is_request(prepare: &Prepare) -> bool {
        prepare.destination.as_str() == ILDCP_DESTINATION
    }
}

/// ILDCP レスポンス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IldcpResponse {
    pub client_address: Address,
    pub asset_scale: u8,
    pub asset_code: String,
}

impl IldcpResponse {
    pub fn from_fulfill(fulfill: &Fulfill) -> Result<Self, PacketError> {
        let mut reader = Reader::new(&fulfill.data);
        let address = core::str::from_utf8(reader.read_var_octet_string()?)
            .map_err(|_| PacketError::InvalidAddress)?;
        let client_address = Address::new(address)?;
        let asset_scale = reader.read_u8()?;
        let asset_code = core::str::from_utf8(reader.read_var_octet_string()?)
            .map_err(|_| PacketError::InvalidUtf8)?
            .to_string();
        reader.finish()?;

        Ok(IldcpResponse {
            client_address,
            asset_scale,
            asset_code,
        })
    }

    pub fn to_fulfill(&self) -> Fulfill {
        let mut data = Vec::new();
        put_var_octet_string(&mut data, self.client_address.as_bytes());
        data.push(self.asset_scale);
        put_var_octet_string(&mut data, self.asset_code.as_bytes());
        Fulfill {
            fulfillment: PEER_PROTOCOL_FULFILLMENT,
            data,
        }
    }
}
