//! MQTT transport: connection wrapper, frame decoding, and the publisher
//! seam the correlator sends through.

use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use fimp_proto::IncomingMessage;
use flate2::read::GzDecoder;
use rumqttc::{AsyncClient, QoS};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Anything outbound commands can be published through.
///
/// The live implementation is [`FimpConnection`]; tests substitute a
/// recording publisher.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> BridgeResult<()>;
}

/// Lifecycle of one transport connection across a resync cycle.
///
/// A connection is created, subscribed, handshaken and promoted to
/// active; when a newer connection takes over it drains in-flight
/// requests for a grace window and is then retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Subscribing,
    SessionStarting,
    FetchingState,
    Active,
    DrainingOld,
    Retired,
}

/// One MQTT connection to the cloud broker proxy.
pub struct FimpConnection {
    client: AsyncClient,
    closed: AtomicBool,
    phase: Mutex<SessionPhase>,
}

impl FimpConnection {
    pub fn new(client: AsyncClient) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
            phase: Mutex::new(SessionPhase::Idle),
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().unwrap()
    }

    /// Advance the lifecycle state machine.
    pub fn advance(&self, to: SessionPhase) {
        let mut phase = self.phase.lock().unwrap();
        debug!(from = ?*phase, to = ?to, "session phase transition");
        *phase = to;
    }

    /// Subscribe at delivery-acknowledged quality.
    pub async fn subscribe(&self, topic: &str) -> BridgeResult<()> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| BridgeError::Transport(format!("subscribe to {topic} failed: {e}")))
    }

    /// Disconnect and mark the connection closed so its poll loop ends.
    pub async fn shutdown(&self) -> BridgeResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.client
            .disconnect()
            .await
            .map_err(|e| BridgeError::Transport(format!("disconnect failed: {e}")))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagePublisher for FimpConnection {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> BridgeResult<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BridgeError::Transport(format!("publish to {topic} failed: {e}")))
    }
}

/// Decode an inbound frame: gunzip, then parse JSON.
///
/// Frames that fail either step are expected noise on the shared topics,
/// not errors; they are dropped after a debug log.
pub fn decode_frame(payload: &[u8]) -> Option<IncomingMessage> {
    let mut decoder = GzDecoder::new(payload);
    let mut raw = Vec::new();
    if let Err(e) = decoder.read_to_end(&mut raw) {
        debug!(len = payload.len(), error = %e, "dropping frame that does not decompress");
        return None;
    }

    match serde_json::from_slice(&raw) {
        Ok(msg) => Some(msg),
        Err(e) => {
            debug!(error = %e, "dropping frame that does not parse");
            None
        }
    }
}
