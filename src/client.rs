//! Long-lived duplex JSON channel to one chain endpoint.
//!
//! Outbound requests get a locally allocated monotone id; replies carrying a
//! known id are routed back to the registered callback exactly once, every
//! other inbound frame is handed to the push callback supplied at
//! construction. The connection task reconnects with exponential backoff and
//! fires the connect callback after every successful (re)connect so the
//! listener layer can replay its subscriptions. Pending reply callbacks do
//! not survive a reconnect.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, Weak,
    },
    time::{Duration, Instant},
};

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

/// Invoked once with the reply frame for a correlated request.
pub type ReplyCallback = Box<dyn FnOnce(Value) + Send>;
/// Invoked for every uncorrelated (push) frame.
pub type PushCallback = Arc<dyn Fn(Value) + Send + Sync>;
/// Invoked after every successful connect, including reconnects.
pub type ConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// The transport seam between listeners/federator and the network.
pub trait Wire: Send + Sync {
    /// Fire-and-forget send; returns the allocated request id.
    fn send(&self, command: &str, params: Value) -> Result<u32>;

    /// Send and deliver the reply to `on_reply` exactly once.
    fn send_with_callback(
        &self,
        command: &str,
        params: Value,
        on_reply: ReplyCallback,
    ) -> Result<u32>;

    fn shutdown(&self);
}

const RECONNECT_BASE_DELAY_SECS: u64 = 2;
const MAX_RECONNECT_DELAY_SECS: u64 = 60;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

struct Pending {
    on_reply: ReplyCallback,
    issued_at: Instant,
}

pub struct WebsocketClient {
    url: String,
    next_id: AtomicU32,
    outbound: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<u32, Pending>>,
    stop: watch::Sender<bool>,
}

impl WebsocketClient {
    /// Open a client and start its connection task. The returned handle owns
    /// the transport; dropping every handle stops the task.
    pub fn connect(
        url: String,
        on_push: PushCallback,
        on_connect: ConnectCallback,
    ) -> Arc<WebsocketClient> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        let client = Arc::new(WebsocketClient {
            url,
            next_id: AtomicU32::new(1),
            outbound,
            pending: Mutex::new(HashMap::new()),
            stop,
        });
        tokio::spawn(Self::connection_loop(
            Arc::downgrade(&client),
            outbound_rx,
            stop_rx,
            on_push,
            on_connect,
        ));
        client
    }

    fn enqueue(&self, command: &str, params: Value, on_reply: Option<ReplyCallback>) -> Result<u32> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = build_frame(id, command, params)?;
        if let Some(on_reply) = on_reply {
            self.pending.lock().unwrap().insert(
                id,
                Pending {
                    on_reply,
                    issued_at: Instant::now(),
                },
            );
        }
        if self.outbound.send(frame).is_err() {
            self.pending.lock().unwrap().remove(&id);
            return Err(anyhow!("transport closed"));
        }
        Ok(id)
    }

    fn take_pending(&self, id: u32) -> Option<ReplyCallback> {
        self.pending.lock().unwrap().remove(&id).map(|p| p.on_reply)
    }

    fn expire_stale_requests(&self) {
        let mut pending = self.pending.lock().unwrap();
        pending.retain(|id, p| {
            let keep = p.issued_at.elapsed() < REQUEST_TIMEOUT;
            if !keep {
                warn!(request_id = id, "request timed out with no reply; dropping");
            }
            keep
        });
    }

    fn fail_pending(&self, reason: &str) {
        let mut pending = self.pending.lock().unwrap();
        if !pending.is_empty() {
            warn!(count = pending.len(), reason, "dropping pending request callbacks");
            pending.clear();
        }
    }

    async fn connection_loop(
        client: Weak<WebsocketClient>,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        mut stop_rx: watch::Receiver<bool>,
        on_push: PushCallback,
        on_connect: ConnectCallback,
    ) {
        let url = match client.upgrade() {
            Some(c) => c.url.clone(),
            None => return,
        };
        let mut attempts = 0u32;
        loop {
            if *stop_rx.borrow() {
                return;
            }
            match connect_async(url.as_str()).await {
                Ok((stream, _)) => {
                    attempts = 0;
                    info!(%url, "connected to chain endpoint");
                    on_connect();
                    let (mut write, mut read) = stream.split();
                    let mut sweep = tokio::time::interval(TIMEOUT_SWEEP_INTERVAL);
                    loop {
                        tokio::select! {
                            Some(frame) = outbound_rx.recv() => {
                                trace!(%url, %frame, "outbound frame");
                                if let Err(e) = write.send(Message::Text(frame.into())).await {
                                    warn!(%url, error = %e, "write failed; reconnecting");
                                    break;
                                }
                            }
                            inbound = read.next() => match inbound {
                                Some(Ok(Message::Text(text))) => {
                                    if !Self::route_frame(&client, text.as_ref(), &on_push) {
                                        return;
                                    }
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = write.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    warn!(%url, "connection closed by peer");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(%url, error = %e, "read failed; reconnecting");
                                    break;
                                }
                            },
                            _ = sweep.tick() => {
                                match client.upgrade() {
                                    Some(c) => c.expire_stale_requests(),
                                    None => return,
                                }
                            }
                            _ = stop_rx.changed() => {
                                let _ = write.send(Message::Close(None)).await;
                                return;
                            }
                        }
                    }
                    match client.upgrade() {
                        Some(c) => c.fail_pending("connection lost"),
                        None => return,
                    }
                }
                Err(e) => {
                    debug!(%url, error = %e, "connect failed");
                }
            }
            attempts += 1;
            let delay = backoff_delay_secs(attempts);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                _ = stop_rx.changed() => return,
            }
        }
    }

    /// Route one inbound frame; returns false when the owning client is gone.
    fn route_frame(client: &Weak<WebsocketClient>, text: &str, on_push: &PushCallback) -> bool {
        let Some(client) = client.upgrade() else {
            return false;
        };
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "unparseable frame from chain endpoint; dropping");
                return true;
            }
        };
        match parse_request_id(&frame).and_then(|id| client.take_pending(id)) {
            Some(on_reply) => {
                trace!("frame answers a pending request");
                on_reply(frame);
            }
            None => on_push(frame),
        }
        true
    }
}

impl Wire for WebsocketClient {
    fn send(&self, command: &str, params: Value) -> Result<u32> {
        self.enqueue(command, params, None)
    }

    fn send_with_callback(
        &self,
        command: &str,
        params: Value,
        on_reply: ReplyCallback,
    ) -> Result<u32> {
        self.enqueue(command, params, Some(on_reply))
    }

    fn shutdown(&self) {
        let _ = self.stop.send(true);
    }
}

fn build_frame(id: u32, command: &str, params: Value) -> Result<String> {
    let mut frame = match params {
        Value::Object(_) => params,
        Value::Null => json!({}),
        other => return Err(anyhow!("request params must be an object, got {other}")),
    };
    let obj = frame.as_object_mut().unwrap();
    obj.insert("id".into(), json!(id));
    obj.insert("command".into(), json!(command));
    Ok(serde_json::to_string(&frame)?)
}

fn parse_request_id(frame: &Value) -> Option<u32> {
    frame.get("id")?.as_u64()?.try_into().ok()
}

fn backoff_delay_secs(attempts: u32) -> u64 {
    std::cmp::min(
        RECONNECT_BASE_DELAY_SECS.saturating_mul(1 << attempts.min(6)),
        MAX_RECONNECT_DELAY_SECS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_carries_id_and_command() {
        let frame = build_frame(42, "subscribe", json!({"streams": ["ledger"]})).unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["id"], 42);
        assert_eq!(parsed["command"], "subscribe");
        assert_eq!(parsed["streams"][0], "ledger");
    }

    #[test]
    fn null_params_become_empty_object() {
        let frame = build_frame(1, "server_info", Value::Null).unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["command"], "server_info");
    }

    #[test]
    fn non_object_params_rejected() {
        assert!(build_frame(1, "subscribe", json!([1, 2])).is_err());
    }

    #[test]
    fn request_id_parsing() {
        assert_eq!(parse_request_id(&json!({"id": 7, "result": {}})), Some(7));
        assert_eq!(parse_request_id(&json!({"type": "transaction"})), None);
        assert_eq!(parse_request_id(&json!({"id": "seven"})), None);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay_secs(1), 4);
        assert!(backoff_delay_secs(2) > backoff_delay_secs(1));
        assert_eq!(backoff_delay_secs(30), MAX_RECONNECT_DELAY_SECS);
    }
}
