//! クライアント: 1 つのプラグインに 1 つのコネクションを直結する
//!
//! クライアントは相手が 1 つだけなので多重化は不要。
//!
//! ```text
//! plugin.connect → ILDCP で自アドレス取得 → Connection::build(Client)
//!   → 受信ハンドラ登録 → 終了監視（ハンドラ解除 + 切断）→ connection.connect()
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use ilp_packet::{Address, Prepare};
use stream_connection::{data_handler, Connection, ConnectionOptions, Plugin, Role, StreamConnection};
use stream_crypto::SharedSecret;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::discovery::fetch_source_account;
use crate::error::StreamError;
use crate::translate;

/// 設定からサーバーに接続する
///
/// # エラー
/// - `StreamError::InvalidConfig`: 宛先アドレスまたは共有鍵が不正
/// - その他は [`connect`] と同じ
pub async fn create_connection(
    plugin: Arc<dyn Plugin>,
    config: &ClientConfig,
) -> Result<Arc<StreamConnection>, StreamError> {
    connect(plugin, config.destination_account()?, config.shared_secret()?).await
}

/// サーバーに接続し、コネクションを返す
///
/// 戻った時点でサーバーは最初のパケットを復号して応答している
/// （サーバー側のコネクションは作成済み）。
///
/// # 引数
/// - `plugin`: このコネクション専用のプラグイン
/// - `destination_account`: サーバーが発行した宛先アドレス
/// - `shared_secret`: サーバーが発行した共有鍵
///
/// # エラー
/// - `StreamError::Plugin`: 接続またはハンドラ登録に失敗
/// - `StreamError::Discovery`: 自アドレスの取得に失敗
/// - `StreamError::Connection`: サーバーとの接続シーケンスに失敗
pub async fn connect<C: Connection>(
    plugin: Arc<dyn Plugin>,
    destination_account: Address,
    shared_secret: SharedSecret,
) -> Result<Arc<C>, StreamError> {
    plugin.connect().await?;
    let source_account = fetch_source_account(plugin.as_ref()).await?;

    let connection = Arc::new(C::build(ConnectionOptions {
        plugin: Arc::clone(&plugin),
        source_account: source_account.clone(),
        destination_account: Some(destination_account.clone()),
        shared_secret,
        role: Role::Client,
        connection_tag: None,
    })?);

    // ハンドラは Weak で持つ（plugin → handler → connection → plugin の循環を避ける）
    let weak = Arc::downgrade(&connection);
    let handler_source = source_account.clone();
    let registered = plugin.register_data_handler(data_handler(move |data: Vec<u8>| {
        let weak: Weak<C> = weak.clone();
        let source = handler_source.clone();
        async move {
            let handled = AssertUnwindSafe(handle_data(weak, data, &source))
                .catch_unwind()
                .await;
            handled.unwrap_or_else(|_| {
                error!("panic while handling packet");
                translate::reject_internal(Some(&source))
            })
        }
    }));
    if let Err(e) = registered {
        if let Err(disconnect_error) = plugin.disconnect().await {
            debug!(error = %disconnect_error, "error disconnecting plugin after failed registration");
        }
        return Err(e.into());
    }

    let closed = connection.closed();
    let watched_plugin = Arc::clone(&plugin);
    tokio::spawn(async move {
        closed.await;
        watched_plugin.deregister_data_handler();
        if let Err(e) = watched_plugin.disconnect().await {
            warn!(error = %e, "error disconnecting plugin");
        }
        debug!("client plugin disconnected");
    });

    if let Err(e) = connection.connect().await {
        // 終了させれば監視タスクがハンドラ解除と切断を行う
        if let Err(end_error) = connection.end().await {
            debug!(error = %end_error, "error ending connection after failed connect");
        }
        return Err(e.into());
    }

    info!(source = %source_account, destination = %destination_account, "client connected");
    Ok(connection)
}

async fn handle_data<C: Connection>(connection: Weak<C>, data: Vec<u8>, source: &Address) -> Vec<u8> {
    let prepare = match Prepare::from_bytes(&data) {
        Ok(prepare) => prepare,
        Err(e) => {
            debug!(error = %e, "received malformed packet");
            return translate::reject_malformed(&data, Some(source));
        }
    };
    match connection.upgrade() {
        Some(connection) => {
            let outcome = connection.process_packet(prepare).await;
            translate::outcome_to_bytes(outcome, Some(source))
        }
        None => translate::reject_unreachable(Some(source)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_connection::{LoopbackPlugin, PluginError};

    #[tokio::test]
    async fn test_failed_registration_disconnects_plugin() {
        let (client_plugin, _server_plugin) = LoopbackPlugin::pair(
            Address::new("test.client").unwrap(),
            Address::new("test.server").unwrap(),
        );
        client_plugin
            .register_data_handler(data_handler(|data: Vec<u8>| async move { data }))
            .unwrap();

        let result = connect::<StreamConnection>(
            client_plugin.clone(),
            Address::new("test.server.abc").unwrap(),
            SharedSecret::from_bytes([3; 32]),
        )
        .await;

        assert!(matches!(
            result,
            Err(StreamError::Plugin(PluginError::HandlerAlreadyRegistered))
        ));
        assert!(!client_plugin.is_connected());
    }
}
