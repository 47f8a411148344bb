//! # ilp-stream
//!
//! Interledger 上の STREAM のコネクション確立と受信パケットの多重化。
//!
//! ## 構成
//!
//! ```text
//! Server            (server)    - 1 つのプラグイン上で多数のコネクションを振り分ける
//!   ├── Registry    (registry)  - 識別子 → コネクション、終了済み集合
//!   └── issue/parse (address)   - トークンを埋め込んだケイパビリティアドレス
//! connect           (client)    - 1 つのプラグインに 1 つのコネクションを直結する
//! translate                     - 処理結果 → Fulfill / Reject
//! fetch_source_account (discovery) - ILDCP で自アドレスを取得する
//! ```
//!
//! ## 使い方
//!
//! ```no_run
//! # async fn run(server_plugin: std::sync::Arc<dyn ilp_stream::Plugin>,
//! #              client_plugin: std::sync::Arc<dyn ilp_stream::Plugin>) -> Result<(), ilp_stream::StreamError> {
//! use ilp_stream::{create_connection, create_server, ClientConfig, ServerConfig};
//!
//! let server = create_server(server_plugin, &ServerConfig::default()).await?;
//! let credentials = server.generate_address_and_secret(Some("alice"))?;
//!
//! let client = create_connection(client_plugin, &ClientConfig::from_credentials(&credentials)).await?;
//! client.send(b"hello").await?;
//!
//! let accepted = server.accept_connection().await?;
//! assert_eq!(accepted.read_available(), b"hello");
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod server;
pub mod translate;

pub use address::{issue, parse, validate_tag, ConnectionId, Credentials};
pub use client::{connect, create_connection};
pub use config::{ClientConfig, ServerConfig};
pub use discovery::fetch_source_account;
pub use error::StreamError;
pub use server::{create_server, ConnectionListener, Server, ServerState};
pub use translate::DEFAULT_REJECT_CODE;

pub use ilp_packet::{Address, ErrorCode};
pub use stream_connection::{
    Connection, ConnectionError, ConnectionOptions, LoopbackPlugin, Plugin, PluginError, Role,
    StreamConnection,
};
pub use stream_crypto::{ServerSecret, SharedSecret};
