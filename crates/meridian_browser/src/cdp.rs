//! Minimal DevTools protocol connection over a websocket.
//!
//! Commands are JSON objects `{id, method, params}`; the browser answers with
//! `{id, result}` or `{id, error}` and pushes events as `{method, params}`.
//! A reader task routes answers to their waiting caller and fans events out
//! over a broadcast channel.

use futures_util::{SinkExt, StreamExt};
use meridian_error::{BrowserError, BrowserErrorKind, MeridianResult};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 1024;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

/// A protocol event pushed by the browser.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// Event name, e.g. `Network.responseReceived`
    pub method: String,
    /// Event payload
    pub params: Value,
}

/// An open DevTools websocket.
pub struct CdpConnection {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    events: broadcast::Sender<CdpEvent>,
    next_id: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for CdpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpConnection")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl CdpConnection {
    /// Connect to a DevTools websocket URL.
    #[tracing::instrument]
    pub async fn connect(url: &str) -> MeridianResult<Self> {
        let (ws_stream, _) = connect_async(url).await.map_err(|e| {
            tracing::error!(error = %e, "DevTools connection failed");
            BrowserError::new(BrowserErrorKind::Connection(e.to_string()))
        })?;
        let (mut sink, mut stream) = ws_stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::warn!(error = %e, "DevTools write failed");
                    break;
                }
            }
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let reader = {
            let pending = pending.clone();
            let events = events.clone();
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    let text = match frame {
                        Ok(Message::Text(text)) => text.as_str().to_string(),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "DevTools read failed");
                            break;
                        }
                    };
                    route_frame(&text, &pending, &events);
                }
                pending.lock().clear();
                tracing::debug!("DevTools connection closed");
            })
        };

        tracing::debug!("DevTools connection established");
        Ok(Self {
            outgoing,
            pending,
            events,
            next_id: AtomicU64::new(1),
            tasks: vec![writer, reader],
        })
    }

    /// Send a command and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> MeridianResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let frame = json!({ "id": id, "method": method, "params": params });
        if self.outgoing.send(Message::text(frame.to_string())).is_err() {
            self.pending.lock().remove(&id);
            return Err(BrowserError::new(BrowserErrorKind::Closed(method.to_string())).into());
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(BrowserError::new(BrowserErrorKind::Protocol {
                method: method.to_string(),
                message,
            })
            .into()),
            Ok(Err(_)) => Err(BrowserError::new(BrowserErrorKind::Closed(method.to_string())).into()),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(BrowserError::new(BrowserErrorKind::Timeout(method.to_string())).into())
            }
        }
    }

    /// Subscribe to events pushed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn route_frame(text: &str, pending: &Pending, events: &broadcast::Sender<CdpEvent>) {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        tracing::warn!("Discarding non-JSON DevTools frame");
        return;
    };

    if let Some(id) = frame.get("id").and_then(Value::as_u64) {
        let Some(waiter) = pending.lock().remove(&id) else {
            return;
        };
        let outcome = match frame.get("error") {
            Some(error) => Err(error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string()),
            None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = waiter.send(outcome);
        return;
    }

    if let Some(method) = frame.get("method").and_then(Value::as_str) {
        let _ = events.send(CdpEvent {
            method: method.to_string(),
            params: frame.get("params").cloned().unwrap_or(Value::Null),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_route_frame_answers_and_events() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events, mut rx) = broadcast::channel(8);

        let (ok_tx, ok_rx) = oneshot::channel();
        let (err_tx, err_rx) = oneshot::channel();
        pending.lock().insert(1, ok_tx);
        pending.lock().insert(2, err_tx);

        route_frame(r#"{"id":1,"result":{"frameId":"F"}}"#, &pending, &events);
        route_frame(r#"{"id":2,"error":{"code":-32000,"message":"No target"}}"#, &pending, &events);
        route_frame(r#"{"method":"Page.loadEventFired","params":{"timestamp":1.5}}"#, &pending, &events);

        assert_eq!(ok_rx.await.unwrap().unwrap()["frameId"], "F");
        assert_eq!(err_rx.await.unwrap().unwrap_err(), "No target");
        assert_eq!(rx.recv().await.unwrap().method, "Page.loadEventFired");
        assert!(pending.lock().is_empty());
    }
}
