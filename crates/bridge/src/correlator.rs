//! Request/response correlation over the shared inbound stream.
//!
//! Every outbound command registers an entry in a correlation table; the
//! inbound dispatch loop evaluates the table once per message and removes
//! settled entries. Entries are independent, so concurrent requests share
//! the stream without cross-interference.

use crate::error::{BridgeError, BridgeResult};
use crate::transport::MessagePublisher;
use fimp_proto::{cmd_topic, evt_topic, CommandEnvelope, IncomingMessage, ValueType};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, warn};

/// Default wait for a correlated response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for the bulk state fetch, which is much heavier server-side.
pub const BULK_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How a pending entry matched an inbound message.
enum MatchOutcome {
    Resolve(&'static str),
    Reject(&'static str),
    Miss,
}

struct PendingRequest {
    uid: String,
    evt_topic: String,
    service: String,
    loose: bool,
    tx: oneshot::Sender<BridgeResult<IncomingMessage>>,
}

impl PendingRequest {
    fn evaluate(&self, msg: &IncomingMessage) -> MatchOutcome {
        if msg.corid.as_deref() == Some(self.uid.as_str()) {
            return if msg.is_error_report() {
                MatchOutcome::Reject("uid")
            } else {
                MatchOutcome::Resolve("uid")
            };
        }

        if msg.topic.as_deref() == Some(self.evt_topic.as_str()) {
            return if msg.is_error_report() {
                MatchOutcome::Reject("topic")
            } else {
                MatchOutcome::Resolve("topic")
            };
        }

        if self.loose && msg.is_event() && msg.serv.as_deref() == Some(self.service.as_str()) {
            return MatchOutcome::Resolve("event type prefix and service");
        }

        MatchOutcome::Miss
    }
}

/// Pending-request table shared between senders and the inbound loop.
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn register(
        &self,
        uid: String,
        evt_topic: String,
        service: String,
        loose: bool,
    ) -> oneshot::Receiver<BridgeResult<IncomingMessage>> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingRequest {
            uid: uid.clone(),
            evt_topic,
            service,
            loose,
            tx,
        };
        self.pending.lock().unwrap().insert(uid, entry);
        rx
    }

    fn remove(&self, uid: &str) {
        self.pending.lock().unwrap().remove(uid);
    }

    /// Evaluate every pending entry against an inbound message, settling
    /// and removing the ones that match.
    pub fn dispatch(&self, msg: &IncomingMessage) {
        let mut pending = self.pending.lock().unwrap();

        let matched: Vec<String> = pending
            .iter()
            .filter(|(_, entry)| !matches!(entry.evaluate(msg), MatchOutcome::Miss))
            .map(|(uid, _)| uid.clone())
            .collect();

        for uid in matched {
            let Some(entry) = pending.remove(&uid) else {
                continue;
            };
            match entry.evaluate(msg) {
                MatchOutcome::Resolve(via) => {
                    debug!(uid = %uid, via, "received response for pending request");
                    let _ = entry.tx.send(Ok(msg.clone()));
                }
                MatchOutcome::Reject(via) => {
                    warn!(uid = %uid, via, "received error report for pending request");
                    let _ = entry.tx.send(Err(BridgeError::Communication(
                        "device reported an error".to_string(),
                    )));
                }
                MatchOutcome::Miss => {}
            }
        }
    }
}

/// Parameters of one correlated FIMP command.
pub struct FimpRequest<'a> {
    pub address: &'a str,
    pub service: &'a str,
    pub cmd: &'a str,
    pub val: Value,
    pub val_t: ValueType,
    pub timeout: Duration,
    pub loose_match: bool,
}

impl<'a> FimpRequest<'a> {
    pub fn new(address: &'a str, service: &'a str, cmd: &'a str, val: Value, val_t: ValueType) -> Self {
        Self {
            address,
            service,
            cmd,
            val,
            val_t,
            timeout: DEFAULT_TIMEOUT,
            loose_match: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Accept any event of the requested service as the response. Only the
    /// session-start handshake needs this; its response shape cannot be
    /// predicted.
    pub fn loose(mut self) -> Self {
        self.loose_match = true;
        self
    }
}

/// Builds envelopes, publishes them, and awaits the correlated response.
pub struct FimpCommander {
    household_id: String,
    table: Arc<CorrelationTable>,
    active: RwLock<Option<Arc<dyn MessagePublisher>>>,
}

impl FimpCommander {
    pub fn new(household_id: impl Into<String>, table: Arc<CorrelationTable>) -> Self {
        Self {
            household_id: household_id.into(),
            table,
            active: RwLock::new(None),
        }
    }

    pub fn table(&self) -> &Arc<CorrelationTable> {
        &self.table
    }

    /// Swap the publisher new commands go out on. The previous connection
    /// stays addressable by in-flight requests already holding it.
    pub async fn set_active(&self, publisher: Arc<dyn MessagePublisher>) {
        *self.active.write().await = Some(publisher);
    }

    /// Send on the currently active connection.
    pub async fn send(&self, request: FimpRequest<'_>) -> BridgeResult<IncomingMessage> {
        let publisher = self
            .active
            .read()
            .await
            .clone()
            .ok_or_else(|| BridgeError::Transport("no active connection".to_string()))?;
        self.send_on(publisher, request).await
    }

    /// Send on an explicit connection (used during session establishment,
    /// before the connection is promoted to active).
    pub async fn send_on(
        &self,
        publisher: Arc<dyn MessagePublisher>,
        request: FimpRequest<'_>,
    ) -> BridgeResult<IncomingMessage> {
        let envelope = CommandEnvelope::new(request.service, request.cmd, request.val, request.val_t);
        let uid = envelope.uid.clone();
        let topic = cmd_topic(&self.household_id, request.address);
        let payload = serde_json::to_vec(&envelope)
            .map_err(|e| BridgeError::Communication(format!("cannot encode command: {e}")))?;

        let rx = self.table.register(
            uid.clone(),
            evt_topic(request.address),
            request.service.to_string(),
            request.loose_match,
        );

        debug!(
            address = request.address,
            service = request.service,
            cmd = request.cmd,
            uid = %uid,
            "sending FIMP message"
        );

        if let Err(e) = publisher.publish(&topic, payload).await {
            self.table.remove(&uid);
            return Err(e);
        }

        match tokio::time::timeout(request.timeout, rx).await {
            Ok(Ok(settled)) => settled,
            Ok(Err(_)) => Err(BridgeError::Communication(
                "request abandoned before a response arrived".to_string(),
            )),
            Err(_) => {
                self.table.remove(&uid);
                warn!(
                    service = request.service,
                    cmd = request.cmd,
                    "timeout waiting for FIMP response"
                );
                Err(BridgeError::Communication(format!(
                    "timeout waiting for response (service: {}, cmd: {})",
                    request.service, request.cmd
                )))
            }
        }
    }
}
