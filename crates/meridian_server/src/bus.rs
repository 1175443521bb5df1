//! Realtime bus: one logical WebSocket connection per API account.
//!
//! Bots connect to `/api/discord/ws`. A clear-snipe request broadcasts a
//! `SNIPEDEL` to every other account and collects `SNIPEDEL_ACK` replies in
//! the KV hash `snipedel_ack:{sig}` for up to two seconds.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use meridian_error::{JsonError, MeridianResult};
use meridian_kv::{KeyedLocks, KvStore, SharedKv};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Longest wait for acknowledgements.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);

const ACK_POLL: Duration = Duration::from_millis(20);
const ACK_KEY_TTL: Duration = Duration::from_secs(60);
const DELETED_FIELD: &str = "deleted_items";
const USER_FIELD_PREFIX: &str = "user:";

/// Requests from this account are broadcast to it as well.
pub const LOOPBACK_ACCOUNT: &str = "test";

/// KV hash collecting acknowledgements for `sig`.
pub fn ack_key(sig: &str) -> String {
    format!("snipedel_ack:{}", sig)
}

/// Bus operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpCode {
    /// Server to client: drop the snipe cache of a channel
    #[serde(rename = "SNIPEDEL")]
    SnipeDelete,
    /// Client to server: a snipe deletion was carried out
    #[serde(rename = "SNIPEDEL_ACK")]
    SnipeDeleteAck,
}

/// Broadcast payload of a clear-snipe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnipeDeleteRequest {
    /// Channel whose snipes are dropped
    pub channel_id: u64,
    /// Account that asked
    pub api_username: String,
    /// Request signature acknowledgements refer to
    pub sig: String,
}

/// Acknowledgement sent back by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnipeAck {
    /// Signature of the request being acknowledged
    pub sig: String,
    /// Snipes the client dropped
    #[serde(default)]
    pub deleted_items: Option<i64>,
}

/// Payload of a bus frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusPayload {
    /// A clear-snipe request
    Delete(SnipeDeleteRequest),
    /// An acknowledgement
    Ack(SnipeAck),
}

/// One frame on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsocketMessage {
    /// Operation
    pub op: OpCode,
    /// Payload
    #[serde(default)]
    pub data: Option<BusPayload>,
}

/// Result of a clear-snipe broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionConfirmation {
    /// Request signature
    pub sig: String,
    /// Whether any account acknowledged
    pub confirmed: bool,
    /// Accounts that acknowledged, in arrival order
    pub confirmed_by: Vec<String>,
    /// Snipes dropped across all accounts
    pub deleted_items: i64,
}

struct Connection {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// Receiving end of one registered connection.
#[derive(Debug)]
pub struct BusConnection {
    account: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<String>,
}

impl BusConnection {
    /// Account the connection belongs to.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Connection id, unique within the bus.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next outgoing frame. `None` once the bus dropped the connection.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Hub of live connections keyed by account.
pub struct RealtimeBus {
    kv: SharedKv,
    connections: Mutex<HashMap<String, Vec<Connection>>>,
    next_id: AtomicU64,
    locks: KeyedLocks,
    ack_timeout: Duration,
}

impl std::fmt::Debug for RealtimeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeBus")
            .field("accounts", &self.connections.lock().len())
            .field("ack_timeout", &self.ack_timeout)
            .finish_non_exhaustive()
    }
}

impl RealtimeBus {
    /// Empty bus over the KV.
    pub fn new(kv: SharedKv) -> Self {
        Self {
            kv,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            locks: KeyedLocks::new(),
            ack_timeout: ACK_TIMEOUT,
        }
    }

    /// Override the acknowledgement wait.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Register a connection for `account`.
    pub fn connect(&self, account: &str) -> BusConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut connections = self.connections.lock();
        let sockets = connections.entry(account.to_string()).or_default();
        sockets.push(Connection { id, tx });
        tracing::info!(account, sockets = sockets.len(), "Account connected to realtime bus");
        BusConnection {
            account: account.to_string(),
            id,
            rx,
        }
    }

    /// Drop a connection.
    pub fn disconnect(&self, account: &str, id: u64) {
        let mut connections = self.connections.lock();
        if let Some(sockets) = connections.get_mut(account) {
            sockets.retain(|c| c.id != id);
            if sockets.is_empty() {
                connections.remove(account);
            }
        }
        tracing::info!(account, "Account disconnected from realtime bus");
    }

    /// Accounts with at least one live connection.
    pub fn accounts(&self) -> Vec<String> {
        let mut accounts: Vec<String> = self.connections.lock().keys().cloned().collect();
        accounts.sort();
        accounts
    }

    /// Send `message` to every connection except those of `exclude`.
    ///
    /// The loopback account is never excluded. Returns how many
    /// connections the frame was queued on; closed ones are dropped.
    pub fn broadcast(&self, message: &WebsocketMessage, exclude: Option<&str>) -> MeridianResult<usize> {
        let text = serde_json::to_string(message).map_err(|e| JsonError::new(e.to_string()))?;
        let exclude = exclude.filter(|name| *name != LOOPBACK_ACCOUNT);

        let mut sent = 0;
        let mut connections = self.connections.lock();
        for (account, sockets) in connections.iter_mut() {
            if exclude == Some(account.as_str()) {
                continue;
            }
            sockets.retain(|c| {
                let open = c.tx.send(text.clone()).is_ok();
                if open {
                    sent += 1;
                }
                open
            });
        }
        connections.retain(|_, sockets| !sockets.is_empty());
        Ok(sent)
    }

    /// Record `account`'s acknowledgement.
    ///
    /// Each account counts once; its deleted items are added to the total.
    /// Acknowledgements for a request that is not awaiting replies are dropped.
    #[tracing::instrument(skip(self, ack), fields(sig = %ack.sig))]
    pub async fn acknowledge(&self, account: &str, ack: &SnipeAck) -> MeridianResult<()> {
        let key = ack_key(&ack.sig);
        if !self.kv.exists(&key).await? {
            tracing::debug!(account, "Acknowledgement for unknown request ignored");
            return Ok(());
        }
        let field = format!("{}{}", USER_FIELD_PREFIX, account);
        if !self.kv.hset_nx(&key, &field, "1").await? {
            tracing::debug!(account, "Duplicate acknowledgement ignored");
            return Ok(());
        }
        self.kv.expire(&key, ACK_KEY_TTL).await?;
        self.kv
            .hincr_by(&key, DELETED_FIELD, ack.deleted_items.unwrap_or(0))
            .await?;
        tracing::debug!(account, deleted = ?ack.deleted_items, "Acknowledgement recorded");
        Ok(())
    }

    /// Broadcast a snipe deletion for `channel_id` and wait for acknowledgements.
    ///
    /// Concurrent calls for one channel run one at a time. The wait ends when
    /// every other connected account acknowledged or after the ack timeout;
    /// the acknowledgement hash is always removed.
    #[tracing::instrument(skip(self))]
    pub async fn clear_snipe(&self, channel_id: u64, requester: &str) -> MeridianResult<DeletionConfirmation> {
        let _guard = self.locks.lock(&format!("snipe:{}", channel_id)).await;
        let sig = uuid::Uuid::new_v4().simple().to_string();
        let key = ack_key(&sig);
        self.kv.del(&key).await?;
        self.kv.hset(&key, DELETED_FIELD, "0").await?;
        self.kv.expire(&key, ACK_KEY_TTL).await?;

        let request = WebsocketMessage {
            op: OpCode::SnipeDelete,
            data: Some(BusPayload::Delete(SnipeDeleteRequest {
                channel_id,
                api_username: requester.to_string(),
                sig: sig.clone(),
            })),
        };
        let expected = self
            .accounts()
            .iter()
            .filter(|account| account.as_str() != requester)
            .count();
        let sent = self.broadcast(&request, Some(requester))?;
        tracing::warn!(channel_id, sig = %sig, sent, expected, "Issued snipe deletion");

        let mut confirmation = DeletionConfirmation {
            sig,
            ..Default::default()
        };
        let collected = tokio::time::timeout(
            self.ack_timeout,
            self.collect_acks(&key, expected, &mut confirmation),
        )
        .await;
        let cleanup = self.kv.del(&key).await;

        match collected {
            Ok(result) => result?,
            Err(_) => tracing::debug!(
                confirmed_by = confirmation.confirmed_by.len(),
                expected,
                "Acknowledgement wait timed out"
            ),
        }
        cleanup?;
        Ok(confirmation)
    }

    async fn collect_acks(
        &self,
        key: &str,
        expected: usize,
        confirmation: &mut DeletionConfirmation,
    ) -> MeridianResult<()> {
        while confirmation.confirmed_by.len() < expected {
            tokio::time::sleep(ACK_POLL).await;
            let fields = self.kv.hgetall(key).await?;
            let mut arrived: Vec<&str> = fields
                .keys()
                .filter_map(|field| field.strip_prefix(USER_FIELD_PREFIX))
                .filter(|account| !confirmation.confirmed_by.iter().any(|c| c == account))
                .collect();
            arrived.sort_unstable();
            confirmation
                .confirmed_by
                .extend(arrived.into_iter().map(str::to_string));
            if let Some(total) = fields.get(DELETED_FIELD).and_then(|v| v.parse().ok()) {
                confirmation.deleted_items = total;
            }
            confirmation.confirmed = !confirmation.confirmed_by.is_empty();
        }
        Ok(())
    }

    /// Pump one upgraded socket until it closes.
    pub async fn serve(self: Arc<Self>, socket: WebSocket, account: String) {
        let mut connection = self.connect(&account);
        let id = connection.id();
        let (mut sink, mut stream) = socket.split();

        let writer = tokio::spawn(async move {
            while let Some(text) = connection.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_frame(&account, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(account = %account, error = %e, "Socket read failed");
                    break;
                }
            }
        }

        writer.abort();
        self.disconnect(&account, id);
    }

    async fn handle_frame(&self, account: &str, text: &str) {
        tracing::debug!(account, frame = %text, "Received bus frame");
        let message: WebsocketMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(account, error = %e, "Ignoring malformed frame");
                return;
            }
        };
        if let (OpCode::SnipeDeleteAck, Some(BusPayload::Ack(ack))) = (message.op, &message.data) {
            if let Err(e) = self.acknowledge(account, ack).await {
                tracing::warn!(account, error = %e, "Failed to record acknowledgement");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_use_wire_names() {
        let frame = WebsocketMessage {
            op: OpCode::SnipeDeleteAck,
            data: Some(BusPayload::Ack(SnipeAck {
                sig: "abc".into(),
                deleted_items: Some(2),
            })),
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"SNIPEDEL_ACK\""));
        let back: WebsocketMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_ack_without_count_parses() {
        let frame: WebsocketMessage =
            serde_json::from_str(r#"{"op":"SNIPEDEL_ACK","data":{"sig":"s1"}}"#).unwrap();
        assert_eq!(
            frame.data,
            Some(BusPayload::Ack(SnipeAck {
                sig: "s1".into(),
                deleted_items: None
            }))
        );
    }

    #[test]
    fn test_delete_request_is_not_an_ack() {
        let frame: WebsocketMessage = serde_json::from_str(
            r#"{"op":"SNIPEDEL","data":{"channel_id":5,"api_username":"bot","sig":"s"}}"#,
        )
        .unwrap();
        assert!(matches!(frame.data, Some(BusPayload::Delete(_))));
    }
}
