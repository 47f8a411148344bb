//! サーバー: 1 つのプラグイン上に多数のコネクションを多重化する
//!
//! ## 状態遷移
//!
//! ```text
//! Unconnected ──listen()──► Listening ──close()──► Closed
//! ```
//!
//! ## 受信パケットの処理
//!
//! ```text
//! bytes ─Prepare デコード─┬─ 失敗 → F00 Reject
//!                         ▼
//!        destination から ConnectionId を取り出す ── 失敗 → F02
//!                         ▼
//!        ┌─ closed に含まれる ──────────────────────→ F02
//!        ├─ 登録済み ────────────────────────────────→ そのコネクションへ
//!        └─ 未登録（初回） token → 共有鍵 → 復号試行 ── 失敗 → F02
//!                         ▼  (ここまでレジストリのロック内)
//!             build → insert → 受理通知 → yield 1 回 → 終了監視を登録
//!                         ▼
//!        process_packet → Fulfill / Reject
//! ```
//!
//! 初回接触の処理（検索から登録まで）はロックを保持したまま await せずに行うので、
//! 同じ識別子への 2 つ目のパケットは必ず登録済みのエントリを見る。
//! Listening でなければ同じロックの中で F02 にする。close() は Closed への遷移と
//! 開いているコネクション一覧の取得を同じロックの中で行う。
//!
//! ロックの順序は registry → state。

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use futures::FutureExt;
use ilp_packet::{Address, Prepare};
use serde::Serialize;
use stream_connection::{
    data_handler, Connection, ConnectionError, ConnectionOptions, Plugin, Role, StreamConnection,
};
use stream_crypto::{derive_shared_secret, ServerSecret};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::address::{self, ConnectionId, Credentials};
use crate::config::ServerConfig;
use crate::error::StreamError;
use crate::registry::{Entry, Registry};
use crate::translate;

/// 受理通知のリスナー
pub type ConnectionListener<C> = Arc<dyn Fn(Arc<C>) + Send + Sync>;

/// サーバーの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Unconnected,
    Listening,
    Closed,
}

/// 初回接触の解決結果
enum Resolved<C> {
    Existing(Arc<C>),
    New(ConnectionId, Arc<C>),
    Unreachable,
}

struct Inner<C> {
    plugin: Arc<dyn Plugin>,
    server_secret: ServerSecret,
    state: Mutex<ServerState>,
    /// 一度設定したら変わらない
    source_account: OnceLock<Address>,
    registry: Mutex<Registry<C>>,
    listeners: Mutex<Vec<ConnectionListener<C>>>,
    /// accept_connection() でまだ取り出されていない、開いているコネクション
    pending: Mutex<VecDeque<(ConnectionId, Arc<C>)>>,
    accept_notify: Notify,
    /// listen() と close() を直列化する
    lifecycle: tokio::sync::Mutex<()>,
}

/// STREAM サーバー
///
/// `Clone` は同じサーバーへのハンドルを増やすだけ。
pub struct Server<C: Connection = StreamConnection> {
    inner: Arc<Inner<C>>,
}

impl<C: Connection> Clone for Server<C> {
    fn clone(&self) -> Self {
        Server {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// ロックを取る（panic で汚染されていても中身を使う）
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<C: Connection> Server<C> {
    /// ランダムなサーバーシークレットでサーバーを作る
    ///
    /// # エラー
    /// - `StreamError::Crypto`: 乱数生成に失敗
    pub fn new(plugin: Arc<dyn Plugin>) -> Result<Self, StreamError> {
        Ok(Self::with_secret(plugin, ServerSecret::random()?))
    }

    /// 指定したサーバーシークレットでサーバーを作る
    ///
    /// 再起動前に発行したアドレスも受け付けられる（終了済みの記録は失われる）。
    pub fn with_secret(plugin: Arc<dyn Plugin>, server_secret: ServerSecret) -> Self {
        Server {
            inner: Arc::new(Inner {
                plugin,
                server_secret,
                state: Mutex::new(ServerState::Unconnected),
                source_account: OnceLock::new(),
                registry: Mutex::new(Registry::new()),
                listeners: Mutex::new(Vec::new()),
                pending: Mutex::new(VecDeque::new()),
                accept_notify: Notify::new(),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn from_config(plugin: Arc<dyn Plugin>, config: &ServerConfig) -> Result<Self, StreamError> {
        Ok(Self::with_secret(plugin, config.server_secret()?))
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.inner.state)
    }

    /// 自分の ILP アドレス（listen() 前は None）
    pub fn source_account(&self) -> Option<Address> {
        self.inner.source_account.get().cloned()
    }

    /// 開いているコネクションの数
    pub fn connection_count(&self) -> usize {
        lock(&self.inner.registry).open_count()
    }

    /// 受信ハンドラを登録し、プラグインを接続して自アドレスを取得する
    ///
    /// 既に Listening でプラグインも接続済みなら何もしない。
    ///
    /// # エラー
    /// - `StreamError::Closed`: close() 済み
    /// - `StreamError::Plugin`: ハンドラ登録または接続に失敗
    /// - `StreamError::Discovery`: 自アドレスの取得に失敗
    pub async fn listen(&self) -> Result<(), StreamError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let state = self.state();
        match state {
            ServerState::Closed => return Err(StreamError::Closed),
            ServerState::Listening if self.inner.plugin.is_connected() => return Ok(()),
            _ => {}
        }

        if state == ServerState::Unconnected {
            let weak = Arc::downgrade(&self.inner);
            self.inner
                .plugin
                .register_data_handler(data_handler(move |data: Vec<u8>| {
                    let weak: Weak<Inner<C>> = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(inner) => inner.handle_data_guarded(data).await,
                            None => translate::reject_unreachable(None),
                        }
                    }
                }))?;
        }

        if let Err(e) = self.connect_and_discover().await {
            if state == ServerState::Unconnected {
                self.inner.plugin.deregister_data_handler();
            }
            return Err(e);
        }

        *lock(&self.inner.state) = ServerState::Listening;
        info!(
            address = %self.source_account().map(|a| a.to_string()).unwrap_or_default(),
            "server listening"
        );
        Ok(())
    }

    async fn connect_and_discover(&self) -> Result<(), StreamError> {
        self.inner.plugin.connect().await?;
        if self.inner.source_account.get().is_none() {
            let address = crate::discovery::fetch_source_account(self.inner.plugin.as_ref()).await?;
            // listen() は直列化されているので未設定のはず
            let _ = self.inner.source_account.set(address);
        }
        Ok(())
    }

    /// すべてのコネクションを終了し、プラグインを切断する
    ///
    /// # エラー
    /// - `StreamError::Plugin`: 切断に失敗（状態は Closed になる）
    pub async fn close(&self) -> Result<(), StreamError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let connections: Vec<(ConnectionId, Arc<C>)> = {
            let registry = lock(&self.inner.registry);
            let mut state = lock(&self.inner.state);
            if *state == ServerState::Closed {
                return Ok(());
            }
            *state = ServerState::Closed;
            registry.open_entries()
        };
        lock(&self.inner.pending).clear();
        self.inner.accept_notify.notify_waiters();

        for (id, connection) in connections {
            if let Err(e) = connection.end().await {
                warn!(connection = %id, error = %e, "error while ending connection");
            }
            self.inner.forget(&id);
        }

        self.inner.plugin.deregister_data_handler();
        let result = self.inner.plugin.disconnect().await;
        info!("server closed");
        result.map_err(StreamError::from)
    }

    /// 新しい宛先アドレスと共有鍵を発行する
    ///
    /// # 引数
    /// - `tag`: 任意のタグ（`[A-Za-z0-9_-]+`）
    ///
    /// # エラー
    /// - `StreamError::NotListening`: listen() 前、または close() 後
    /// - `StreamError::InvalidTag`: タグが不正
    pub fn generate_address_and_secret(&self, tag: Option<&str>) -> Result<Credentials, StreamError> {
        let source_account = match (self.state(), self.inner.source_account.get()) {
            (ServerState::Listening, Some(address)) => address,
            _ => return Err(StreamError::NotListening),
        };
        address::issue(&self.inner.server_secret, source_account, tag)
    }

    /// 新しいコネクションを受理したときに呼ばれるリスナーを追加する
    ///
    /// リスナーは最初のパケットがコネクションに渡される前に同期的に呼ばれる。
    pub fn on_connection<F>(&self, listener: F)
    where
        F: Fn(Arc<C>) + Send + Sync + 'static,
    {
        lock(&self.inner.listeners).push(Arc::new(listener));
    }

    /// 次に受理したコネクションを待つ
    ///
    /// 取り出される前に終了したコネクションは返さない。
    ///
    /// # エラー
    /// - `StreamError::Closed`: サーバーが閉じられた
    pub async fn accept_connection(&self) -> Result<Arc<C>, StreamError> {
        loop {
            // 確認より先に作っておけば、確認後の通知も取りこぼさない
            let notified = self.inner.accept_notify.notified();
            if self.state() == ServerState::Closed {
                return Err(StreamError::Closed);
            }
            let next = lock(&self.inner.pending).pop_front();
            if let Some((_, connection)) = next {
                return Ok(connection);
            }
            notified.await;
        }
    }

    /// 受信したパケットを処理してレスポンスを返す
    ///
    /// プラグインに登録したハンドラと同じ処理。決して失敗しない。
    pub async fn handle_data(&self, data: Vec<u8>) -> Vec<u8> {
        Arc::clone(&self.inner).handle_data_guarded(data).await
    }
}

impl<C: Connection> Inner<C> {
    /// panic も含めて、どんな失敗も Reject に変換する
    async fn handle_data_guarded(self: Arc<Self>, data: Vec<u8>) -> Vec<u8> {
        match AssertUnwindSafe(self.handle_data(data)).catch_unwind().await {
            Ok(response) => response,
            Err(_) => {
                error!("panic while handling packet");
                translate::reject_internal(self.source_account.get())
            }
        }
    }

    async fn handle_data(self: &Arc<Self>, data: Vec<u8>) -> Vec<u8> {
        let prepare = match Prepare::from_bytes(&data) {
            Ok(prepare) => prepare,
            Err(e) => {
                debug!(error = %e, "received malformed packet");
                return translate::reject_malformed(&data, self.source_account.get());
            }
        };

        // listen() 完了前はどの宛先も解決できない
        let Some(source_account) = self.source_account.get() else {
            return translate::reject_unreachable(None);
        };
        let Some(id) = address::parse(&prepare.destination, source_account) else {
            debug!(destination = %prepare.destination, "destination is not under our address");
            return translate::reject_unreachable(Some(source_account));
        };

        let connection = match self.resolve(&id, &prepare, source_account) {
            Ok(Resolved::Existing(connection)) => connection,
            Ok(Resolved::New(id, connection)) => {
                self.accepted(id, &connection).await;
                connection
            }
            Ok(Resolved::Unreachable) => return translate::reject_unreachable(Some(source_account)),
            Err(e) => return translate::outcome_to_bytes(Err(e), Some(source_account)),
        };

        let outcome = connection.process_packet(prepare).await;
        translate::outcome_to_bytes(outcome, Some(source_account))
    }

    /// 識別子からコネクションを解決する（初回ならここで作って登録する）
    ///
    /// レジストリのロックを最後まで保持する。
    fn resolve(
        &self,
        id: &ConnectionId,
        prepare: &Prepare,
        source_account: &Address,
    ) -> Result<Resolved<C>, ConnectionError> {
        let mut registry = lock(&self.registry);

        if *lock(&self.state) != ServerState::Listening {
            debug!(connection = %id, "packet while not listening");
            return Ok(Resolved::Unreachable);
        }
        if registry.is_closed(id) {
            debug!(connection = %id, "packet for closed connection");
            return Ok(Resolved::Unreachable);
        }
        if let Some(entry) = registry.get(id) {
            return Ok(Resolved::Existing(Arc::clone(&entry.connection)));
        }

        // 復号できることが「このサーバーが発行したトークン」であることの唯一の証明
        let Ok(token) = id.token() else {
            debug!(connection = %id, "token in destination is not decodable");
            return Ok(Resolved::Unreachable);
        };
        let shared_secret = derive_shared_secret(&self.server_secret, &token);
        if stream_crypto::decrypt(&shared_secret, &prepare.data).is_err() {
            debug!(connection = %id, "unable to decrypt first packet, token was not issued here");
            return Ok(Resolved::Unreachable);
        }

        let connection = Arc::new(C::build(ConnectionOptions {
            plugin: Arc::clone(&self.plugin),
            source_account: source_account.clone(),
            destination_account: None,
            shared_secret: shared_secret.clone(),
            role: Role::Server,
            connection_tag: id.tag().map(str::to_string),
        })?);
        registry
            .insert(
                id.clone(),
                Entry {
                    connection: Arc::clone(&connection),
                    shared_secret,
                },
            )
            .map_err(|dup| ConnectionError::internal(format!("connection {} already exists", dup.0)))?;

        Ok(Resolved::New(id.clone(), connection))
    }

    /// 受理通知 → yield → 終了監視の登録
    async fn accepted(self: &Arc<Self>, id: ConnectionId, connection: &Arc<C>) {
        info!(connection = %id, tag = id.tag().unwrap_or(""), "accepted new connection");

        let listeners: Vec<ConnectionListener<C>> = lock(&self.listeners).clone();
        for listener in listeners {
            let conn = Arc::clone(connection);
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(conn))).is_err() {
                error!(connection = %id, "connection listener panicked");
            }
        }
        lock(&self.pending).push_back((id.clone(), Arc::clone(connection)));
        self.accept_notify.notify_one();

        // リスナーが登録した購読が最初のデータより先に効くように 1 回だけ譲る
        tokio::task::yield_now().await;

        let closed = connection.closed();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            closed.await;
            if let Some(inner) = weak.upgrade() {
                inner.forget(&id);
                debug!(connection = %id, "connection removed");
            }
        });
    }

    /// 終了したコネクションへの参照をすべて手放し、識別子を終了済みにする
    fn forget(&self, id: &ConnectionId) {
        lock(&self.pending).retain(|(pending, _)| pending != id);
        lock(&self.registry).remove_and_close(id);
    }
}

/// サーバーを作って listen() まで済ませる
pub async fn create_server(
    plugin: Arc<dyn Plugin>,
    config: &ServerConfig,
) -> Result<Server<StreamConnection>, StreamError> {
    let server = Server::from_config(plugin, config)?;
    server.listen().await?;
    Ok(server)
}
