//! プロセス内ループバックプラグイン
//!
//! 2 つのプラグインを直結し、片方の `send_data` をもう片方のデータハンドラに
//! そのまま渡す。ILDCP リクエストはネットワークに出さずに自分のアドレスで応答する。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use ilp_packet::{Address, ErrorCode, IldcpRequest, IldcpResponse, Prepare, Reject};
use tracing::trace;

use crate::error::PluginError;
use crate::plugin::{DataHandler, Plugin};

/// ILDCP で返す既定の資産
const DEFAULT_ASSET_CODE: &str = "XRP";
const DEFAULT_ASSET_SCALE: u8 = 9;

/// ループバックプラグイン
pub struct LoopbackPlugin {
    /// ILDCP で返す自分のアドレス
    address: Address,
    asset_code: String,
    asset_scale: u8,
    connected: AtomicBool,
    handler: Mutex<Option<DataHandler>>,
    peer: OnceLock<Weak<LoopbackPlugin>>,
}

impl LoopbackPlugin {
    /// 直結されたプラグインの組を作る
    ///
    /// # 引数
    /// - `a`: 1 つ目のプラグインのアドレス
    /// - `b`: 2 つ目のプラグインのアドレス
    pub fn pair(a: Address, b: Address) -> (Arc<LoopbackPlugin>, Arc<LoopbackPlugin>) {
        let first = Arc::new(Self::unlinked(a));
        let second = Arc::new(Self::unlinked(b));
        // 作ったばかりなので必ず未設定
        let _ = first.peer.set(Arc::downgrade(&second));
        let _ = second.peer.set(Arc::downgrade(&first));
        (first, second)
    }

    fn unlinked(address: Address) -> Self {
        LoopbackPlugin {
            address,
            asset_code: DEFAULT_ASSET_CODE.to_string(),
            asset_scale: DEFAULT_ASSET_SCALE,
            connected: AtomicBool::new(false),
            handler: Mutex::new(None),
            peer: OnceLock::new(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn has_data_handler(&self) -> bool {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// 相手から届いたパケットを自分のハンドラに渡す
    async fn deliver(&self, data: Vec<u8>) -> Vec<u8> {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) if self.is_connected() => handler(data).await,
            _ => self.reject(ErrorCode::F02_UNREACHABLE, "no handler registered"),
        }
    }

    fn reject(&self, code: ErrorCode, message: &str) -> Vec<u8> {
        Reject {
            code,
            triggered_by: Some(self.address.clone()),
            message: message.to_string(),
            data: Vec::new(),
        }
        .to_bytes()
    }

    fn answer_ildcp(&self) -> Vec<u8> {
        IldcpResponse {
            client_address: self.address.clone(),
            asset_scale: self.asset_scale,
            asset_code: self.asset_code.clone(),
        }
        .to_fulfill()
        .to_bytes()
    }
}

impl Plugin for LoopbackPlugin {
    fn connect(&self) -> BoxFuture<'_, Result<(), PluginError>> {
        self.connected.store(true, Ordering::SeqCst);
        futures::future::ready(Ok(())).boxed()
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), PluginError>> {
        self.connected.store(false, Ordering::SeqCst);
        futures::future::ready(Ok(())).boxed()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send_data(&self, data: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>, PluginError>> {
        async move {
            if !self.is_connected() {
                return Err(PluginError::NotConnected);
            }
            if let Ok(prepare) = Prepare::from_bytes(&data) {
                if IldcpRequest::is_request(&prepare) {
                    trace!(address = %self.address, "answering ILDCP request locally");
                    return Ok(self.answer_ildcp());
                }
            }
            let peer = self
                .peer
                .get()
                .and_then(Weak::upgrade)
                .ok_or_else(|| PluginError::Transport("peer plugin is gone".to_string()))?;
            Ok(peer.deliver(data).await)
        }
        .boxed()
    }

    fn register_data_handler(&self, handler: DataHandler) -> Result<(), PluginError> {
        let mut slot = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(PluginError::HandlerAlreadyRegistered);
        }
        *slot = Some(handler);
        Ok(())
    }

    fn deregister_data_handler(&self) {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
