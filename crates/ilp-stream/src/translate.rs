//! コネクションの処理結果 → ワイヤ上のレスポンス
//!
//! | 結果                               | レスポンス                                 |
//! |------------------------------------|--------------------------------------------|
//! | `Ok(Fulfill)`                      | Fulfill（そのまま）                         |
//! | `Err(Protocol { code, message, data })` | Reject（code / message / data をそのまま） |
//! | `Err(Internal(_))`                 | Reject（既定コード、空 message、空 data）   |
//!
//! Reject の `triggeredBy` は常にサーバー/クライアント自身のアドレス
//! （未取得なら空文字列）。

use ilp_packet::{Address, ErrorCode, Fulfill, Packet, PacketType, Reject};
use stream_connection::ConnectionError;
use tracing::error;

/// 想定外の失敗に使う Reject コード
pub const DEFAULT_REJECT_CODE: ErrorCode = ErrorCode::F00_BAD_REQUEST;

/// Prepare としてデコードできない入力への Reject message
pub fn malformed_message(bytes: &[u8]) -> String {
    match Packet::peek_type(bytes) {
        // 種別は合っているが中身が壊れている
        Some(packet_type) if packet_type == PacketType::Prepare as u8 => {
            "Invalid ILP Prepare packet (type 12)".to_string()
        }
        Some(packet_type) => format!(
            "Expected an ILP Prepare packet (type 12), but got packet with type: {}",
            packet_type
        ),
        None => "Expected an ILP Prepare packet (type 12), but got an empty packet".to_string(),
    }
}

pub fn reject(
    code: ErrorCode,
    message: impl Into<String>,
    data: Vec<u8>,
    triggered_by: Option<&Address>,
) -> Vec<u8> {
    Reject {
        code,
        triggered_by: triggered_by.cloned(),
        message: message.into(),
        data,
    }
    .to_bytes()
}

/// デコードできない入力への Reject（F00）
pub fn reject_malformed(bytes: &[u8], triggered_by: Option<&Address>) -> Vec<u8> {
    reject(
        ErrorCode::F00_BAD_REQUEST,
        malformed_message(bytes),
        Vec::new(),
        triggered_by,
    )
}

/// 到達不能（F02）
///
/// 理由（パース失敗・終了済み・偽造トークン）によらず同一のバイト列になる。
pub fn reject_unreachable(triggered_by: Option<&Address>) -> Vec<u8> {
    reject(ErrorCode::F02_UNREACHABLE, "", Vec::new(), triggered_by)
}

/// 想定外の失敗への既定 Reject
pub fn reject_internal(triggered_by: Option<&Address>) -> Vec<u8> {
    reject(DEFAULT_REJECT_CODE, "", Vec::new(), triggered_by)
}

/// コネクションの処理結果をレスポンスのバイト列にする
///
/// `Internal` の中身はログにだけ残し、ワイヤには出さない。
pub fn outcome_to_bytes(
    outcome: Result<Fulfill, ConnectionError>,
    triggered_by: Option<&Address>,
) -> Vec<u8> {
    match outcome {
        Ok(fulfill) => fulfill.to_bytes(),
        Err(ConnectionError::Protocol {
            code,
            message,
            data,
        }) => reject(code, message, data, triggered_by),
        Err(ConnectionError::Internal(reason)) => {
            error!(reason = %reason, "error while handling packet");
            reject_internal(triggered_by)
        }
    }
}
