//! Session lifecycle management.
//!
//! Each resync cycle builds a fresh transport connection, walks it through
//! the lifecycle state machine (connect, subscribe, session handshake,
//! bulk state fetch), then atomically promotes it to active. The
//! previously active connection stays addressable for a grace window so
//! in-flight correlated requests can finish, and is then retired. A
//! connection that fails before promotion is tracked in a pending-shutdown
//! slot and closed at the start of the next cycle, so no connection leaks
//! even on handshake failure.

use crate::correlator::{FimpCommander, FimpRequest, BULK_FETCH_TIMEOUT};
use crate::error::BridgeResult;
use crate::registry::AccessoryRegistry;
use crate::transport::{decode_frame, FimpConnection, MessagePublisher, SessionPhase};
use fimp_proto::{ValueType, RESPONSE_TOPIC};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Transport};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Address of the cloud bridge application handling session handshakes.
const SESSION_BRIDGE_ADDRESS: &str = "/rt:app/rn:clbridge/ad:1";

/// Address of the state store answering bulk fetches.
const STATE_STORE_ADDRESS: &str = "/rt:app/rn:vinculum/ad:1";

/// How long a replaced connection keeps draining in-flight requests.
const OLD_CONNECTION_GRACE: Duration = Duration::from_secs(15);

/// Owns the transport connections and drives resync cycles.
pub struct SessionManager {
    household_id: String,
    bifrost_host: String,
    email: String,
    /// Stable per-process client device id sent in the session handshake.
    device_id: String,
    commander: Arc<FimpCommander>,
    registry: Arc<AccessoryRegistry>,
    active: Mutex<Option<Arc<FimpConnection>>>,
    pending_shutdown: Mutex<Option<Arc<FimpConnection>>>,
}

impl SessionManager {
    pub fn new(
        household_id: impl Into<String>,
        bifrost_host: impl Into<String>,
        email: impl Into<String>,
        commander: Arc<FimpCommander>,
        registry: Arc<AccessoryRegistry>,
    ) -> Self {
        Self {
            household_id: household_id.into(),
            bifrost_host: bifrost_host.into(),
            email: email.into(),
            device_id: Uuid::new_v4().to_string(),
            commander,
            registry,
            active: Mutex::new(None),
            pending_shutdown: Mutex::new(None),
        }
    }

    /// Phase of the currently active connection.
    pub async fn active_phase(&self) -> SessionPhase {
        match self.active.lock().await.as_ref() {
            Some(connection) => connection.phase(),
            None => SessionPhase::Idle,
        }
    }

    /// Run one resync cycle with a fresh household token.
    pub async fn resync(&self, household_token: &str) -> BridgeResult<()> {
        self.shutdown_abandoned().await;

        let (connection, eventloop) = self.connect(household_token);
        let connection = Arc::new(connection);
        connection.advance(SessionPhase::Connecting);

        // Track as pending shutdown until promoted, so a failure anywhere
        // below still gets the connection closed on the next cycle.
        *self.pending_shutdown.lock().await = Some(Arc::clone(&connection));
        self.spawn_inbound_loop(Arc::clone(&connection), eventloop);

        connection.advance(SessionPhase::Subscribing);
        for topic in self.subscription_topics(household_token) {
            connection.subscribe(&topic).await?;
        }

        connection.advance(SessionPhase::SessionStarting);
        self.start_session(&connection, household_token).await?;
        debug!("started a new FIMP session");

        connection.advance(SessionPhase::FetchingState);
        self.fetch_devices_state(&connection).await?;
        debug!("fetched bulk device state");

        self.promote(connection).await;
        Ok(())
    }

    /// Close a connection from a previous cycle that never became active.
    async fn shutdown_abandoned(&self) {
        let abandoned = self.pending_shutdown.lock().await.take();
        if let Some(connection) = abandoned {
            debug!("shutting down the old connection that failed to initialize");
            if let Err(e) = connection.shutdown().await {
                error!(
                    error = %e,
                    "failed to shut down the old connection that failed to initialize; \
                     this leaks a connection until the bridge is restarted"
                );
            }
        }
    }

    fn connect(&self, household_token: &str) -> (FimpConnection, EventLoop) {
        let url = format!(
            "wss://{}/proxy?token_hash={}",
            self.bifrost_host,
            urlencoding::encode(household_token)
        );
        let mut options = MqttOptions::new(household_token, url, 443);
        options.set_transport(Transport::wss_with_default_config());
        options.set_keep_alive(Duration::from_secs(60));
        options.set_max_packet_size(10 * 1024 * 1024, 10 * 1024 * 1024);

        let (client, eventloop) = AsyncClient::new(options, 64);
        (FimpConnection::new(client), eventloop)
    }

    fn subscription_topics(&self, household_token: &str) -> [String; 3] {
        [
            format!("{}_{household_token}/#", self.household_id),
            format!("{}/+/+/+/rn:cloud_adapter/#", self.household_id),
            format!("{}/{RESPONSE_TOPIC}", self.household_id),
        ]
    }

    /// Poll the connection's event loop, decode frames, and feed them to
    /// the correlation table and the accessory registry.
    fn spawn_inbound_loop(&self, connection: Arc<FimpConnection>, mut eventloop: EventLoop) {
        let commander = Arc::clone(&self.commander);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Some(msg) = decode_frame(&publish.payload) else {
                            continue;
                        };
                        commander.table().dispatch(&msg);
                        if msg.is_state_report() {
                            registry.dispatch_report(&msg);
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        debug!("connected to FIMP API");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connection.is_closed() {
                            debug!("inbound loop ended for a retired connection");
                            break;
                        }
                        warn!(error = %e, "transport poll error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    async fn start_session(
        &self,
        connection: &Arc<FimpConnection>,
        household_token: &str,
    ) -> BridgeResult<()> {
        debug!("starting/refreshing FIMP session");
        let val = json!({
            "token": household_token,
            "client-id": household_token,
            "username": self.email,
            "device-id": self.device_id,
            "compression": "gzip",
        });
        self.commander
            .send_on(
                Arc::clone(connection) as Arc<dyn MessagePublisher>,
                // The handshake response shape is unpredictable; accept
                // any event of the session-bridge service.
                FimpRequest::new(
                    SESSION_BRIDGE_ADDRESS,
                    "clbridge",
                    "cmd.session.start",
                    val,
                    ValueType::StrMap,
                )
                .loose(),
            )
            .await
            .map(|_| ())
    }

    async fn fetch_devices_state(&self, connection: &Arc<FimpConnection>) -> BridgeResult<()> {
        debug!("triggering devices state fetch");
        self.commander
            .send_on(
                Arc::clone(connection) as Arc<dyn MessagePublisher>,
                FimpRequest::new(
                    STATE_STORE_ADDRESS,
                    "vinculum",
                    "cmd.pd7.request",
                    json!({"cmd": "get", "component": "state"}),
                    ValueType::Object,
                )
                .with_timeout(BULK_FETCH_TIMEOUT),
            )
            .await
            .map(|_| ())
    }

    /// Swap the new connection in as active and retire the previous one
    /// after the drain grace window.
    async fn promote(&self, connection: Arc<FimpConnection>) {
        *self.pending_shutdown.lock().await = None;

        let previous = {
            let mut active = self.active.lock().await;
            active.replace(Arc::clone(&connection))
        };
        self.commander
            .set_active(Arc::clone(&connection) as Arc<dyn MessagePublisher>)
            .await;
        connection.advance(SessionPhase::Active);

        match previous {
            Some(old) => {
                debug!("switched connections, new requests use the updated one");
                old.advance(SessionPhase::DrainingOld);
                tokio::spawn(async move {
                    tokio::time::sleep(OLD_CONNECTION_GRACE).await;
                    debug!("shutting down the old connection");
                    if let Err(e) = old.shutdown().await {
                        warn!(error = %e, "failed to shut down the old connection");
                    }
                    old.advance(SessionPhase::Retired);
                });
            }
            None => {
                info!("started FIMP session and initialized all state");
            }
        }
    }
}
