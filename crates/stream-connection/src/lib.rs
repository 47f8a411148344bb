//! # stream-connection
//!
//! 1 つのプラグイン上に多重化される論理コネクションの契約と、その参照実装。
//!
//! ## 構成
//!
//! ```text
//! Plugin            (plugin)     - 生パケットの送受信
//! Connection        (この lib)   - サーバー/クライアントが扱う論理コネクションの契約
//! StreamConnection  (connection) - 暗号化フレームを使う参照実装
//! LoopbackPlugin    (loopback)   - プロセス内でプラグイン 2 つを直結する実装
//! ```
//!
//! ## Connection の契約
//!
//! - `build`: 共有鍵・役割・タグ・自アドレス・プラグインから構築する
//! - `connect`: 接続シーケンスを実行する
//! - `process_packet`: 受信した Prepare を処理し、Fulfill またはエラーを返す
//! - `end`: コネクションを終了する
//! - `closed`: 終了を一度だけ観測できる future

use std::future::Future;
use std::sync::Arc;

use ilp_packet::{Address, Fulfill, Prepare};
use stream_crypto::SharedSecret;

pub mod buffer;
pub mod connection;
pub mod error;
pub mod loopback;
pub mod plugin;

pub use buffer::ReceiveBuffer;
pub use connection::{ConnectionStats, StreamConnection};
pub use error::{ConnectionError, PluginError};
pub use loopback::LoopbackPlugin;
pub use plugin::{data_handler, DataHandler, Plugin};

/// Prepare の有効期限（秒）
pub const PREPARE_EXPIRY_SECS: i64 = 30;

/// コネクションの役割
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

/// コネクション構築時のオプション
#[derive(Clone)]
pub struct ConnectionOptions {
    pub plugin: Arc<dyn Plugin>,
    /// 自分の ILP アドレス
    pub source_account: Address,
    /// 相手の ILP アドレス（サーバー側は最初は不明）
    pub destination_account: Option<Address>,
    pub shared_secret: SharedSecret,
    pub role: Role,
    /// サーバーが発行時に付けたタグ（運用上の識別用）
    pub connection_tag: Option<String>,
}

/// サーバー/クライアントが扱う論理コネクション
pub trait Connection: Send + Sync + Sized + 'static {
    fn build(options: ConnectionOptions) -> Result<Self, ConnectionError>;

    fn connect(&self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn process_packet(
        &self,
        prepare: Prepare,
    ) -> impl Future<Output = Result<Fulfill, ConnectionError>> + Send;

    fn end(&self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// コネクションが終了したら完了する future
    ///
    /// 既に終了していれば即座に完了する。
    fn closed(&self) -> impl Future<Output = ()> + Send + 'static;

    fn is_closed(&self) -> bool;
}
