//! プラグイン（トランスポート）の契約
//!
//! プラグインは生のパケットバイト列を相手ネットワークとやり取りする。
//! リクエスト 1 つに対してレスポンス 1 つを返す同期的な往復モデル。
//!
//! ```text
//! send_data(Prepare bytes)            → Fulfill / Reject bytes   (送信方向)
//! data_handler(Prepare bytes).await   → Fulfill / Reject bytes   (受信方向)
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::PluginError;

/// 受信パケットのハンドラ
///
/// プラグインは受信した Prepare をこのハンドラに渡し、返されたバイト列を
/// レスポンスとして相手に返す。ハンドラ自体は失敗しない（失敗は Reject で表す）。
pub type DataHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Vec<u8>> + Send + Sync>;

/// トランスポートの抽象
pub trait Plugin: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<(), PluginError>>;

    fn disconnect(&self) -> BoxFuture<'_, Result<(), PluginError>>;

    fn is_connected(&self) -> bool;

    /// パケットを送信してレスポンスを待つ
    fn send_data(&self, data: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>, PluginError>>;

    /// 受信ハンドラを登録する（同時に登録できるのは 1 つだけ）
    fn register_data_handler(&self, handler: DataHandler) -> Result<(), PluginError>;

    fn deregister_data_handler(&self);
}

/// クロージャから DataHandler を作る
pub fn data_handler<F, Fut>(f: F) -> DataHandler
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Vec<u8>> + Send + 'static,
{
    Arc::new(move |data| Box::pin(f(data)))
}
