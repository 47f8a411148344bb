//! ilp-stream 統合テスト
//!
//! ループバックプラグインでサーバーとクライアントを直結し、
//! アドレス発行 → 初回接触 → データ交換 → 終了 までを通してテストする。

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use ilp_packet::{Packet, Prepare, Reject};
use ilp_stream::{
    create_connection, create_server, Address, ClientConfig, Connection, ConnectionError,
    ConnectionOptions, ErrorCode, LoopbackPlugin, Plugin, Role, Server, ServerConfig,
    ServerSecret, SharedSecret, StreamConnection, DEFAULT_REJECT_CODE,
};
use tokio::sync::watch;

// ==============================================================
// ヘルパー
// ==============================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn plugins() -> (Arc<LoopbackPlugin>, Arc<LoopbackPlugin>) {
    LoopbackPlugin::pair(
        Address::new("test.server").unwrap(),
        Address::new("test.client").unwrap(),
    )
}

/// 共有鍵で暗号化した任意のペイロードを持つ Prepare
fn prepare_to(destination: &Address, secret: &SharedSecret, payload: &[u8]) -> Vec<u8> {
    Prepare {
        amount: 0,
        expires_at: Utc::now() + chrono::Duration::seconds(30),
        execution_condition: [0u8; 32],
        destination: destination.clone(),
        data: stream_crypto::encrypt(secret, payload).unwrap(),
    }
    .to_bytes()
}

fn expect_reject(bytes: &[u8]) -> Reject {
    match Packet::from_bytes(bytes).unwrap() {
        Packet::Reject(reject) => reject,
        other => panic!("expected reject, got {:?}", other),
    }
}

/// 条件が満たされるまで待つ（バックグラウンドタスクの完了待ち）
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

async fn listening_server() -> (Server, Arc<LoopbackPlugin>, Arc<LoopbackPlugin>) {
    init_tracing();
    let (server_plugin, client_plugin) = plugins();
    let server = create_server(server_plugin.clone(), &ServerConfig::default())
        .await
        .unwrap();
    (server, server_plugin, client_plugin)
}

// ==============================================================
// エンドツーエンド
// ==============================================================

#[tokio::test]
async fn test_end_to_end_data_exchange() {
    let (server, _server_plugin, client_plugin) = listening_server().await;
    let credentials = server.generate_address_and_secret(Some("alice")).unwrap();

    let client = create_connection(client_plugin, &ClientConfig::from_credentials(&credentials))
        .await
        .unwrap();

    // 接続が返った時点でサーバー側のコネクションは作成済み
    let accepted = server.accept_connection().await.unwrap();
    assert_eq!(accepted.connection_tag(), Some("alice"));
    assert_eq!(accepted.destination_account().unwrap().as_str(), "test.client");
    assert_eq!(server.connection_count(), 1);

    client.send(b"hello ").await.unwrap();
    client.send(b"server").await.unwrap();
    assert_eq!(accepted.read_available(), b"hello server");

    accepted.send(b"hi client").await.unwrap();
    assert_eq!(client.read_available(), b"hi client");
}

#[tokio::test]
async fn test_connections_share_one_plugin() {
    let (server, server_plugin, _client_plugin) = listening_server().await;

    // 2 つのアドレス宛てのパケットを同じサーバーに直接渡す
    let a = server.generate_address_and_secret(Some("a")).unwrap();
    let b = server.generate_address_and_secret(Some("b")).unwrap();

    let response_a = server
        .handle_data(prepare_to(&a.destination_account, &a.shared_secret, b"x"))
        .await;
    let response_b = server
        .handle_data(prepare_to(&b.destination_account, &b.shared_secret, b"y"))
        .await;

    // 復号はできるがフレームではないので F06 で拒否されるが、コネクションは作られる
    assert_eq!(expect_reject(&response_a).code, ErrorCode::F06_UNEXPECTED_PAYMENT);
    assert_eq!(expect_reject(&response_b).code, ErrorCode::F06_UNEXPECTED_PAYMENT);
    assert_eq!(server.connection_count(), 2);
    assert!(server_plugin.has_data_handler());
}

// ==============================================================
// 認証と到達不能
// ==============================================================

#[tokio::test]
async fn test_forged_token_is_unreachable() {
    let (server, _server_plugin, _client_plugin) = listening_server().await;

    // 別のサーバーシークレットで作ったトークンを、こちらのアドレス配下に付ける
    let forged_token = stream_crypto::Token::random().unwrap();
    let forged_secret =
        stream_crypto::derive_shared_secret(&ServerSecret::from_bytes([1; 32]), &forged_token);
    let forged_destination =
        Address::new(&format!("test.server.{}", forged_token.to_base64())).unwrap();

    let forged = server
        .handle_data(prepare_to(&forged_destination, &forged_secret, b"hi"))
        .await;
    let reject = expect_reject(&forged);
    assert_eq!(reject.code, ErrorCode::F02_UNREACHABLE);
    assert_eq!(server.connection_count(), 0);

    // 理由によらずワイヤ上は同一
    let garbage = server
        .handle_data(prepare_to(
            &Address::new("test.server.garbage").unwrap(),
            &forged_secret,
            b"hi",
        ))
        .await;
    let wrong_prefix = server
        .handle_data(prepare_to(
            &Address::new("test.elsewhere.abc").unwrap(),
            &forged_secret,
            b"hi",
        ))
        .await;
    assert_eq!(forged, garbage);
    assert_eq!(forged, wrong_prefix);
}

#[tokio::test]
async fn test_closed_connection_never_reopens() {
    let (server, _server_plugin, client_plugin) = listening_server().await;
    let credentials = server.generate_address_and_secret(None).unwrap();

    let client = create_connection(client_plugin, &ClientConfig::from_credentials(&credentials))
        .await
        .unwrap();
    let accepted = server.accept_connection().await.unwrap();

    client.end().await.unwrap();
    accepted.closed().await;
    wait_until(|| server.connection_count() == 0).await;

    // 同じアドレス・同じ鍵でも二度と開かない
    for _ in 0..3 {
        let response = server
            .handle_data(prepare_to(
                &credentials.destination_account,
                &credentials.shared_secret,
                b"again",
            ))
            .await;
        assert_eq!(expect_reject(&response).code, ErrorCode::F02_UNREACHABLE);
    }
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_malformed_packet_is_bad_request() {
    let (server, _server_plugin, _client_plugin) = listening_server().await;

    let response = server.handle_data(vec![14, 3, 1, 2, 3]).await;
    let reject = expect_reject(&response);
    assert_eq!(reject.code, ErrorCode::F00_BAD_REQUEST);
    assert_eq!(
        reject.message,
        "Expected an ILP Prepare packet (type 12), but got packet with type: 14"
    );
    assert_eq!(reject.triggered_by, server.source_account());

    // listen() 前でも同じ種類の Reject
    let (unlistened_plugin, _) = plugins();
    let unlistened: Server = Server::new(unlistened_plugin).unwrap();
    let reject = expect_reject(&unlistened.handle_data(vec![1, 2, 3]).await);
    assert_eq!(reject.code, ErrorCode::F00_BAD_REQUEST);
    assert_eq!(reject.triggered_by, None);
}

// ==============================================================
// 受理通知と順序
// ==============================================================

#[tokio::test]
async fn test_same_connection_is_reused() {
    let (server, _server_plugin, client_plugin) = listening_server().await;
    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notifications);
    server.on_connection(move |_conn| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let credentials = server.generate_address_and_secret(Some("reuse")).unwrap();
    let client = create_connection(client_plugin, &ClientConfig::from_credentials(&credentials))
        .await
        .unwrap();
    let accepted = server.accept_connection().await.unwrap();

    client.send(b"1").await.unwrap();
    client.send(b"2").await.unwrap();

    assert_eq!(notifications.load(Ordering::SeqCst), 1);
    assert_eq!(server.connection_count(), 1);
    assert_eq!(accepted.read_available(), b"12");
}

#[tokio::test]
async fn test_concurrent_first_packets_create_one_connection() {
    let (server, _server_plugin, _client_plugin) = listening_server().await;
    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notifications);
    server.on_connection(move |_conn| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let credentials = server.generate_address_and_secret(None).unwrap();
    let first = prepare_to(&credentials.destination_account, &credentials.shared_secret, b"1");
    let second = prepare_to(&credentials.destination_account, &credentials.shared_secret, b"2");

    // 1 つ目が yield している間に 2 つ目が届く
    let (_, _) = tokio::join!(server.handle_data(first), server.handle_data(second));

    assert_eq!(notifications.load(Ordering::SeqCst), 1);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_listener_runs_before_first_packet() {
    let (server, _server_plugin, client_plugin) = listening_server().await;
    let seen_before_data = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&seen_before_data);
    server.on_connection(move |conn: Arc<StreamConnection>| {
        *seen.lock().unwrap() = Some(conn.stats().packets_received);
    });

    let credentials = server.generate_address_and_secret(None).unwrap();
    create_connection(client_plugin, &ClientConfig::from_credentials(&credentials))
        .await
        .unwrap();
    let accepted = server.accept_connection().await.unwrap();

    assert_eq!(*seen_before_data.lock().unwrap(), Some(0));
    assert_eq!(accepted.stats().packets_received, 1);
}

#[tokio::test]
async fn test_panicking_listener_does_not_break_delivery() {
    let (server, _server_plugin, client_plugin) = listening_server().await;
    server.on_connection(|_conn: Arc<StreamConnection>| panic!("listener failure"));

    let credentials = server.generate_address_and_secret(None).unwrap();
    let client = create_connection(client_plugin, &ClientConfig::from_credentials(&credentials))
        .await
        .unwrap();
    client.send(b"still works").await.unwrap();

    let accepted = server.accept_connection().await.unwrap();
    assert_eq!(accepted.read_available(), b"still works");
}

// ==============================================================
// 終了
// ==============================================================

#[tokio::test]
async fn test_client_disconnects_plugin_when_connection_ends() {
    let (server, _server_plugin, client_plugin) = listening_server().await;
    let credentials = server.generate_address_and_secret(None).unwrap();

    let client = create_connection(
        client_plugin.clone(),
        &ClientConfig::from_credentials(&credentials),
    )
    .await
    .unwrap();
    assert!(client_plugin.has_data_handler());

    client.end().await.unwrap();
    wait_until(|| !client_plugin.is_connected() && !client_plugin.has_data_handler()).await;
}

#[tokio::test]
async fn test_server_close_ends_every_connection() {
    let (server, server_plugin, client_plugin) = listening_server().await;
    let credentials = server.generate_address_and_secret(None).unwrap();

    let client = create_connection(
        client_plugin.clone(),
        &ClientConfig::from_credentials(&credentials),
    )
    .await
    .unwrap();
    let accepted = server.accept_connection().await.unwrap();

    server.close().await.unwrap();
    assert!(accepted.is_closed());
    assert_eq!(server.connection_count(), 0);
    assert!(!server_plugin.is_connected());

    // クライアントは ConnectionClose を受け取って終了する
    client.closed().await;
    wait_until(|| !client_plugin.is_connected()).await;
}

#[tokio::test]
async fn test_first_contact_after_close_is_unreachable() {
    let (server, _server_plugin, _client_plugin) = listening_server().await;
    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notifications);
    server.on_connection(move |_conn| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let credentials = server.generate_address_and_secret(None).unwrap();

    server.close().await.unwrap();
    let response = server
        .handle_data(prepare_to(
            &credentials.destination_account,
            &credentials.shared_secret,
            b"late",
        ))
        .await;

    assert_eq!(expect_reject(&response).code, ErrorCode::F02_UNREACHABLE);
    assert_eq!(server.state(), ilp_stream::ServerState::Closed);
    assert_eq!(server.connection_count(), 0);
    assert_eq!(notifications.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_ended_connection_is_released_without_accept() {
    let (server, _server_plugin, client_plugin) = listening_server().await;
    let seen = Arc::new(Mutex::new(Weak::new()));
    let slot = Arc::clone(&seen);
    server.on_connection(move |conn: Arc<StreamConnection>| {
        *slot.lock().unwrap() = Arc::downgrade(&conn);
    });

    let credentials = server.generate_address_and_secret(None).unwrap();
    let client = create_connection(client_plugin, &ClientConfig::from_credentials(&credentials))
        .await
        .unwrap();
    assert!(seen.lock().unwrap().upgrade().is_some());

    // accept_connection() を一度も呼ばずに終了させる
    client.end().await.unwrap();
    wait_until(|| server.connection_count() == 0).await;
    assert!(seen.lock().unwrap().upgrade().is_none());

    // 終了済みのコネクションは受理キューからも消えている
    let next = tokio::time::timeout(Duration::from_millis(20), server.accept_connection()).await;
    assert!(next.is_err());
}

#[tokio::test]
async fn test_connect_to_unknown_address_fails() {
    let (server, _server_plugin, client_plugin) = listening_server().await;
    let credentials = server.generate_address_and_secret(None).unwrap();

    // 鍵だけ違う
    let config = ClientConfig {
        destination_account: credentials.destination_account.to_string(),
        shared_secret: SharedSecret::from_bytes([9; 32]).to_base64(),
    };
    let err = create_connection(client_plugin.clone(), &config)
        .await
        .unwrap_err();
    match err {
        ilp_stream::StreamError::Connection(ConnectionError::Protocol { code, .. }) => {
            assert_eq!(code, ErrorCode::F02_UNREACHABLE)
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(server.connection_count(), 0);
    wait_until(|| !client_plugin.is_connected()).await;
}

// ==============================================================
// コネクションが内部で失敗した場合
// ==============================================================

/// タグで失敗の仕方を切り替えるコネクション
struct FaultyConnection {
    tag: Option<String>,
    closed_tx: watch::Sender<bool>,
    /// 受理通知のリスナーが spawn したタスクが立てる
    spawned_task_ran: AtomicBool,
    /// 最初のパケットが届いた時点の spawned_task_ran
    ran_before_first_packet: Mutex<Option<bool>>,
}

impl Connection for FaultyConnection {
    fn build(options: ConnectionOptions) -> Result<Self, ConnectionError> {
        assert_eq!(options.role, Role::Server);
        let (closed_tx, _) = watch::channel(false);
        Ok(FaultyConnection {
            tag: options.connection_tag,
            closed_tx,
            spawned_task_ran: AtomicBool::new(false),
            ran_before_first_packet: Mutex::new(None),
        })
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn process_packet(&self, _prepare: Prepare) -> Result<ilp_packet::Fulfill, ConnectionError> {
        let ran = self.spawned_task_ran.load(Ordering::SeqCst);
        self.ran_before_first_packet.lock().unwrap().get_or_insert(ran);
        match self.tag.as_deref() {
            Some("panic") => panic!("connection bug"),
            Some("protocol") => Err(ConnectionError::Protocol {
                code: ErrorCode::F99_APPLICATION_ERROR,
                message: "custom".to_string(),
                data: vec![1, 2, 3],
            }),
            _ => Err(ConnectionError::internal("database unavailable")),
        }
    }

    async fn end(&self) -> Result<(), ConnectionError> {
        self.closed_tx.send_replace(true);
        Ok(())
    }

    fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.closed_tx.subscribe();
        async move {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }
}

async fn faulty_server() -> Server<FaultyConnection> {
    init_tracing();
    let (plugin, _) = plugins();
    let server: Server<FaultyConnection> = Server::new(plugin as Arc<dyn Plugin>).unwrap();
    server.listen().await.unwrap();
    server
}

#[tokio::test]
async fn test_internal_fault_becomes_default_reject() {
    let server = faulty_server().await;
    let credentials = server.generate_address_and_secret(None).unwrap();

    let response = server
        .handle_data(prepare_to(&credentials.destination_account, &credentials.shared_secret, b"x"))
        .await;
    let reject = expect_reject(&response);
    assert_eq!(reject.code, DEFAULT_REJECT_CODE);
    assert!(reject.message.is_empty());
    assert!(reject.data.is_empty());
    assert_eq!(reject.triggered_by, server.source_account());
}

#[tokio::test]
async fn test_protocol_error_is_forwarded() {
    let server = faulty_server().await;
    let credentials = server.generate_address_and_secret(Some("protocol")).unwrap();

    let response = server
        .handle_data(prepare_to(&credentials.destination_account, &credentials.shared_secret, b"x"))
        .await;
    let reject = expect_reject(&response);
    assert_eq!(reject.code, ErrorCode::F99_APPLICATION_ERROR);
    assert_eq!(reject.message, "custom");
    assert_eq!(reject.data, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_panicking_connection_becomes_default_reject() {
    let server = faulty_server().await;
    let credentials = server.generate_address_and_secret(Some("panic")).unwrap();
    let observed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&observed);
    server.on_connection(move |_conn| flag.store(true, Ordering::SeqCst));

    let response = server
        .handle_data(prepare_to(&credentials.destination_account, &credentials.shared_secret, b"x"))
        .await;
    assert_eq!(expect_reject(&response).code, DEFAULT_REJECT_CODE);
    assert!(observed.load(Ordering::SeqCst));

    // サーバーは引き続き動作する
    let again = server
        .handle_data(prepare_to(&credentials.destination_account, &credentials.shared_secret, b"y"))
        .await;
    assert_eq!(expect_reject(&again).code, DEFAULT_REJECT_CODE);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_task_spawned_by_listener_runs_before_first_packet() {
    let server = faulty_server().await;
    server.on_connection(|conn: Arc<FaultyConnection>| {
        tokio::spawn(async move {
            conn.spawned_task_ran.store(true, Ordering::SeqCst);
        });
    });
    let credentials = server.generate_address_and_secret(Some("ordering")).unwrap();

    server
        .handle_data(prepare_to(&credentials.destination_account, &credentials.shared_secret, b"x"))
        .await;

    let accepted = server.accept_connection().await.unwrap();
    assert_eq!(*accepted.ran_before_first_packet.lock().unwrap(), Some(true));
}
