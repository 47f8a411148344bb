//! STREAM コネクションの参照実装
//!
//! Prepare の data に暗号化した `StreamPacket` を載せてやり取りする。
//!
//! ## 受信処理
//!
//! ```text
//! Prepare.data ─復号→ StreamPacket ─フレーム適用→ レスポンス StreamPacket ─暗号化→
//!   condition 一致: Fulfill { fulfillment, data }
//!   不一致        : Reject F99 { data }   (データ専用パケット)
//! ```
//!
//! 復号・デコードできない Prepare は F06 で拒否する。

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use ilp_packet::{Address, ErrorCode, Fulfill, Packet, Prepare};
use serde::Serialize;
use stream_crypto::{condition_for, fulfillment_for, random_condition, PayloadCipher, SharedSecret};
use stream_proto::{frame, CloseReason, Frame, PacketKind, StreamPacket};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::plugin::Plugin;
use crate::{Connection, ConnectionOptions, ReceiveBuffer, Role, PREPARE_EXPIRY_SECS};

/// アプリケーションデータを載せるストリーム ID
const DATA_STREAM_ID: u64 = 1;

/// 可変状態
struct ConnectionState {
    /// 相手のアドレス（サーバー側は ConnectionNewAddress で知る）
    destination_account: Option<Address>,
    /// 次に送信する StreamPacket の sequence
    next_sequence: u64,
    /// 送信済みデータの offset
    send_offset: u64,
    incoming: ReceiveBuffer,
    /// fulfill した Prepare の金額の合計
    total_received_amount: u64,
    packets_sent: u64,
    packets_received: u64,
}

/// STREAM コネクション
pub struct StreamConnection {
    plugin: std::sync::Arc<dyn Plugin>,
    source_account: Address,
    role: Role,
    connection_tag: Option<String>,
    shared_secret: SharedSecret,
    cipher: PayloadCipher,
    state: Mutex<ConnectionState>,
    /// true になったら終了（一度 true になったら戻らない）
    closed_tx: watch::Sender<bool>,
}

/// コネクション統計
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub role: Role,
    pub connection_tag: Option<String>,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub total_received_amount: u64,
    pub total_received_bytes: u64,
    pub closed: bool,
}

impl StreamConnection {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn connection_tag(&self) -> Option<&str> {
        self.connection_tag.as_deref()
    }

    pub fn source_account(&self) -> &Address {
        &self.source_account
    }

    pub fn destination_account(&self) -> Option<Address> {
        self.state().destination_account.clone()
    }

    /// アプリケーションデータを相手に送る
    pub async fn send(&self, data: &[u8]) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::internal("connection is closed"));
        }
        let offset = {
            let mut state = self.state();
            let offset = state.send_offset;
            state.send_offset += data.len() as u64;
            offset
        };
        self.send_frames(vec![Frame::stream_data(DATA_STREAM_ID, offset, data.to_vec())])
            .await
            .map(|_| ())
    }

    /// 受信済みのデータをすべて読み出す
    pub fn read_available(&self) -> Vec<u8> {
        self.state().incoming.read_available()
    }

    pub fn has_pending_read(&self) -> bool {
        self.state().incoming.has_pending_read()
    }

    /// fulfill した金額の合計
    pub fn total_received(&self) -> u64 {
        self.state().total_received_amount
    }

    pub fn stats(&self) -> ConnectionStats {
        let state = self.state();
        ConnectionStats {
            role: self.role,
            connection_tag: self.connection_tag.clone(),
            packets_sent: state.packets_sent,
            packets_received: state.packets_received,
            total_received_amount: state.total_received_amount,
            total_received_bytes: state.incoming.total_received_bytes(),
            closed: self.is_closed(),
        }
    }

    /// 統計を JSON 文字列で返す
    pub fn stats_json(&self) -> String {
        serde_json::to_string(&self.stats()).unwrap_or_default()
    }

    // ===== Private メソッド =====

    fn mark_closed(&self, reason: &str) {
        let was_closed = self.closed_tx.send_replace(true);
        if !was_closed {
            info!(
                role = ?self.role,
                tag = self.connection_tag.as_deref().unwrap_or(""),
                reason,
                "connection closed"
            );
        }
    }

    /// フレームを暗号化して送り、相手の暗号化レスポンスを返す
    ///
    /// condition は乱数なので相手は fulfill できない。
    /// 相手が復号できた場合は F99 Reject に暗号化レスポンスが載って返ってくる。
    async fn send_frames(&self, frames: Vec<Frame>) -> Result<StreamPacket, ConnectionError> {
        let (destination, sequence) = {
            let mut state = self.state();
            let destination = state
                .destination_account
                .clone()
                .ok_or_else(|| ConnectionError::internal("destination account is not known yet"))?;
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.packets_sent += 1;
            (destination, sequence)
        };

        let packet = StreamPacket::new(sequence, PacketKind::Prepare, 0, frames);
        let prepare = Prepare {
            amount: 0,
            expires_at: Utc::now() + chrono::Duration::seconds(PREPARE_EXPIRY_SECS),
            execution_condition: random_condition()?,
            destination,
            data: self.cipher.encrypt(&packet.encode_to_bytes())?,
        };

        let response = self.plugin.send_data(prepare.to_bytes()).await?;
        match Packet::from_bytes(&response) {
            Ok(Packet::Fulfill(fulfill)) => self.open_response(&fulfill.data, sequence),
            Ok(Packet::Reject(reject)) => {
                self.open_response(&reject.data, sequence).map_err(|_| {
                    debug!(code = %reject.code, message = %reject.message, "packet rejected by remote");
                    ConnectionError::Protocol {
                        code: reject.code,
                        message: reject.message,
                        data: reject.data,
                    }
                })
            }
            Ok(Packet::Prepare(_)) => Err(ConnectionError::internal("received a Prepare as response")),
            Err(e) => Err(ConnectionError::internal(format!("invalid response packet: {}", e))),
        }
    }

    /// 相手の暗号化レスポンスを開く
    fn open_response(&self, data: &[u8], sequence: u64) -> Result<StreamPacket, ConnectionError> {
        let plaintext = self
            .cipher
            .decrypt(data)
            .map_err(|_| ConnectionError::internal("response is not decryptable"))?;
        let packet = StreamPacket::decode_from_bytes(&plaintext)
            .map_err(|e| ConnectionError::internal(e.to_string()))?;
        if packet.sequence != sequence || packet.packet_kind() == PacketKind::Prepare {
            return Err(ConnectionError::internal("response does not match the request"));
        }
        Ok(packet)
    }

    /// 受信フレームを状態に反映する。ConnectionClose を含んでいたら true
    fn apply_frames(&self, packet: &StreamPacket) -> bool {
        let mut state = self.state();
        state.packets_received += 1;

        let mut close = false;
        for body in packet.bodies() {
            match body {
                frame::Body::ConnectionNewAddress(new_address) => {
                    match Address::new(&new_address.source_account) {
                        Ok(address) => {
                            debug!(address = %address, "remote announced its address");
                            state.destination_account = Some(address);
                        }
                        Err(_) => warn!(
                            address = %new_address.source_account,
                            "ignoring invalid address in ConnectionNewAddress"
                        ),
                    }
                }
                frame::Body::StreamData(data) => {
                    state.incoming.apply(data.offset, &data.data);
                }
                frame::Body::ConnectionClose(_) => close = true,
            }
        }
        close
    }
}

impl Connection for StreamConnection {
    fn build(options: ConnectionOptions) -> Result<Self, ConnectionError> {
        if options.role == Role::Client && options.destination_account.is_none() {
            return Err(ConnectionError::internal(
                "client connections require a destination account",
            ));
        }
        let (closed_tx, _) = watch::channel(false);

        Ok(StreamConnection {
            plugin: options.plugin,
            source_account: options.source_account,
            role: options.role,
            connection_tag: options.connection_tag,
            cipher: PayloadCipher::new(&options.shared_secret),
            shared_secret: options.shared_secret,
            state: Mutex::new(ConnectionState {
                destination_account: options.destination_account,
                next_sequence: 1,
                send_offset: 0,
                incoming: ReceiveBuffer::new(),
                total_received_amount: 0,
                packets_sent: 0,
                packets_received: 0,
            }),
            closed_tx,
        })
    }

    /// クライアントは自分のアドレスを送り、サーバーの暗号化レスポンスを受け取った時点で完了する
    async fn connect(&self) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::internal("connection is closed"));
        }
        match self.role {
            Role::Server => Ok(()),
            Role::Client => {
                let source = self.source_account.to_string();
                self.send_frames(vec![Frame::connection_new_address(&source)])
                    .await
                    .map(|_| ())
            }
        }
    }

    async fn process_packet(&self, prepare: Prepare) -> Result<Fulfill, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::protocol(
                ErrorCode::F99_APPLICATION_ERROR,
                "connection is closed",
            ));
        }

        let plaintext = self.cipher.decrypt(&prepare.data).map_err(|e| {
            debug!(error = %e, "unable to decrypt prepare data");
            ConnectionError::unexpected_payment()
        })?;
        let packet = StreamPacket::decode_from_bytes(&plaintext).map_err(|e| {
            debug!(error = %e, "unable to decode stream packet");
            ConnectionError::unexpected_payment()
        })?;
        if packet.packet_kind() != PacketKind::Prepare {
            return Err(ConnectionError::unexpected_payment());
        }

        let close = self.apply_frames(&packet);

        let fulfillment = fulfillment_for(&self.shared_secret, &prepare.data);
        let fulfillable = condition_for(&fulfillment) == prepare.execution_condition;
        let kind = if fulfillable {
            PacketKind::Fulfill
        } else {
            PacketKind::Reject
        };
        let response = StreamPacket::new(packet.sequence, kind, prepare.amount, Vec::new());
        let data = self.cipher.encrypt(&response.encode_to_bytes())?;

        if fulfillable {
            let mut state = self.state();
            state.total_received_amount = state.total_received_amount.saturating_add(prepare.amount);
        }
        if close {
            self.mark_closed("remote closed the connection");
        }

        if fulfillable {
            Ok(Fulfill { fulfillment, data })
        } else {
            Err(ConnectionError::Protocol {
                code: ErrorCode::F99_APPLICATION_ERROR,
                message: String::new(),
                data,
            })
        }
    }

    /// 相手のアドレスが分かっていれば ConnectionClose を送ってから終了する（送信失敗はログのみ）
    async fn end(&self) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Ok(());
        }
        if self.destination_account().is_some() {
            let close = Frame::connection_close(CloseReason::NoError, "");
            if let Err(e) = self.send_frames(vec![close]).await {
                warn!(error = %e, "failed to notify remote of connection close");
            }
        }
        self.mark_closed("closed locally");
        Ok(())
    }

    fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.closed_tx.subscribe();
        async move {
            loop {
                let closed = *rx.borrow_and_update();
                if closed {
                    return;
                }
                // Sender が drop された場合もコネクションは終わっている
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

/// 共有鍵と暗号器は出さない
impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("role", &self.role)
            .field("connection_tag", &self.connection_tag)
            .field("source_account", &self.source_account)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
