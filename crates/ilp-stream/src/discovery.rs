//! 自アドレスの取得（ILDCP）

use chrono::Utc;
use ilp_packet::{Address, IldcpRequest, IldcpResponse, Packet};
use stream_connection::{Plugin, PREPARE_EXPIRY_SECS};
use tracing::debug;

use crate::error::StreamError;

/// 上流に ILDCP リクエストを送り、自分の ILP アドレスを取得する
///
/// # エラー
/// - `StreamError::Plugin`: 送信失敗
/// - `StreamError::Discovery`: Reject された、またはレスポンスが不正
pub async fn fetch_source_account(plugin: &dyn Plugin) -> Result<Address, StreamError> {
    let expires_at = Utc::now() + chrono::Duration::seconds(PREPARE_EXPIRY_SECS);
    let request = IldcpRequest::new(expires_at).to_prepare()?;

    let response = plugin.send_data(request.to_bytes()).await?;
    match Packet::from_bytes(&response) {
        Ok(Packet::Fulfill(fulfill)) => {
            let info = IldcpResponse::from_fulfill(&fulfill)
                .map_err(|e| StreamError::Discovery(e.to_string()))?;
            debug!(
                address = %info.client_address,
                asset_code = %info.asset_code,
                asset_scale = info.asset_scale,
                "discovered own address"
            );
            Ok(info.client_address)
        }
        Ok(Packet::Reject(reject)) => Err(StreamError::Discovery(format!(
            "request rejected: {} {}",
            reject.code, reject.message
        ))),
        Ok(Packet::Prepare(_)) => Err(StreamError::Discovery(
            "unexpected Prepare in response".to_string(),
        )),
        Err(e) => Err(StreamError::Discovery(e.to_string())),
    }
}
