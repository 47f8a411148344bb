//! # ilp-packet
//!
//! ILPv4 パケットの OER エンコード/デコード。
//!
//! STREAM のコネクション層が扱うのは Prepare（リクエスト）と、
//! それに対する Fulfill / Reject（レスポンス）の 3 種類のみ。
//!
//! ## パケットの流れ
//!
//! ```text
//! 送信側 ── Prepare ──▶ 受信側
//!        ◀── Fulfill / Reject ──
//! ```
//!
//! アドレス取得用の ILDCP もここで扱う。

#![no_std]
extern crate alloc;

pub mod address;
pub mod error;
pub mod error_code;
pub mod ildcp;
pub mod oer;
pub mod packet;

pub use address::Address;
pub use error::PacketError;
pub use error_code::ErrorCode;
pub use ildcp::{IldcpRequest, IldcpResponse};
pub use packet::{Fulfill, Packet, PacketType, Prepare, Reject};
