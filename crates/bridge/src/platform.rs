//! Platform controller.
//!
//! Boot sequence: authenticate, resolve the household, then run resync
//! cycles — exchange a fresh household token, re-discover devices, rebuild
//! accessories, and re-establish the transport session. The first cycle's
//! failure is fatal for setup; periodic failures are logged and retried on
//! the next interval.

use crate::accessory::AccessoryWrapper;
use crate::config::BridgeConfig;
use crate::correlator::{CorrelationTable, FimpCommander};
use crate::error::{BridgeError, BridgeResult};
use crate::hub::HubAccessory;
use crate::identity::{AuthTokens, IdentityClient};
use crate::mapping;
use crate::registry::AccessoryRegistry;
use crate::session::SessionManager;
use fimp_proto::Device;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Top-level bridge runtime.
pub struct Platform {
    config: BridgeConfig,
    identity: Arc<IdentityClient>,
    registry: Arc<AccessoryRegistry>,
}

impl Platform {
    /// Validate configuration and assemble the platform. A configuration
    /// error here disables the instance; nothing has been started yet.
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        let identity = Arc::new(IdentityClient::new(
            config.hosts.clone(),
            config.oauth.clone(),
        ));
        Ok(Self {
            config,
            identity,
            registry: Arc::new(AccessoryRegistry::new()),
        })
    }

    pub fn registry(&self) -> &Arc<AccessoryRegistry> {
        &self.registry
    }

    /// Authenticate, discover, and keep the bridge running. Only failures
    /// during initial setup return; the periodic loop never exits.
    pub async fn run(&self) -> BridgeResult<()> {
        let tokens = self
            .identity
            .authenticate(&self.config.email, &self.config.password)
            .await?;
        let tokens = Arc::new(RwLock::new(tokens));
        self.spawn_token_refresh(Arc::clone(&tokens));

        let household_id = self.resolve_household(&tokens).await?;
        info!(household = %household_id, "using household");

        let table = Arc::new(CorrelationTable::new());
        let commander = Arc::new(FimpCommander::new(household_id.clone(), table));
        let session = Arc::new(SessionManager::new(
            household_id.clone(),
            self.config.hosts.bifrost.clone(),
            self.config.email.clone(),
            Arc::clone(&commander),
            Arc::clone(&self.registry),
        ));

        let household_token = Arc::new(RwLock::new(String::new()));
        let hub = Arc::new(HubAccessory::new("Smarthub"));
        self.spawn_gateway_poll(hub, household_id.clone(), Arc::clone(&household_token));

        self.resync_cycle(&tokens, &household_token, &household_id, &commander, &session)
            .await?;
        info!("started FIMP session and initialized all state");

        let mut resync =
            tokio::time::interval(Duration::from_secs(self.config.resync_interval_secs));
        resync.tick().await;
        loop {
            resync.tick().await;
            match self
                .resync_cycle(&tokens, &household_token, &household_id, &commander, &session)
                .await
            {
                Ok(()) => debug!("started a new FIMP session and re-fetched all state"),
                Err(e) => error!(
                    error = %e,
                    "failed refreshing FIMP session (device control may be unavailable until \
                     the next retry)"
                ),
            }
        }
    }

    async fn resolve_household(&self, tokens: &Arc<RwLock<AuthTokens>>) -> BridgeResult<String> {
        if let Some(id) = &self.config.household_id {
            return Ok(id.clone());
        }
        let access = tokens.read().await.access_token_hash.clone();
        let sites = self.identity.list_sites(&access).await?;
        sites
            .into_iter()
            .next()
            .map(|site| site.id)
            .ok_or_else(|| {
                BridgeError::Discovery("could not find any households in user account".to_string())
            })
    }

    /// One resync cycle: fresh household token, device re-discovery,
    /// accessory rebuild, transport session re-establishment.
    async fn resync_cycle(
        &self,
        tokens: &Arc<RwLock<AuthTokens>>,
        household_token: &Arc<RwLock<String>>,
        household_id: &str,
        commander: &Arc<FimpCommander>,
        session: &Arc<SessionManager>,
    ) -> BridgeResult<()> {
        let access = tokens.read().await.access_token_hash.clone();
        let fresh = self
            .identity
            .exchange_household(&access, household_id)
            .await?;
        *household_token.write().await = fresh.clone();
        debug!("refreshed household tokens");

        let devices = self.identity.list_devices(&fresh, household_id).await?;
        self.sync_accessories(&devices, household_id, commander);

        session.resync(&fresh).await
    }

    /// Prune accessories for vanished devices and (re)build the rest.
    fn sync_accessories(
        &self,
        devices: &[Device],
        household_id: &str,
        commander: &Arc<FimpCommander>,
    ) {
        let keep: HashSet<i64> = devices.iter().map(|d| d.id).collect();
        for name in self.registry.retain_devices(&keep) {
            info!(accessory = %name, "removing accessory not found in site devices");
        }

        for device in devices {
            let entry = match self.registry.get(device.id) {
                Some(entry) => {
                    debug!(
                        name = device.display_name(),
                        id = device.id,
                        "rebuilding existing accessory"
                    );
                    entry
                }
                None => {
                    info!(
                        name = device.display_name(),
                        id = device.id,
                        "adding new accessory"
                    );
                    self.registry
                        .insert(AccessoryWrapper::new(device, household_id))
                }
            };
            let mut accessory = entry.write().unwrap();
            mapping::rebuild_accessory(&mut accessory, device, commander);
        }
    }

    fn spawn_token_refresh(&self, tokens: Arc<RwLock<AuthTokens>>) {
        let identity = Arc::clone(&self.identity);
        let interval_secs = self.config.token_refresh_interval_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.tick().await;
            loop {
                interval.tick().await;
                let refresh_token = tokens.read().await.refresh_token.clone();
                match identity.refresh(&refresh_token).await {
                    Ok(fresh) => {
                        *tokens.write().await = fresh;
                        debug!("refreshed auth tokens");
                    }
                    Err(e) => warn!(
                        error = %e,
                        "failed refreshing auth tokens; retrying at the next interval"
                    ),
                }
            }
        });
    }

    fn spawn_gateway_poll(
        &self,
        hub: Arc<HubAccessory>,
        household_id: String,
        household_token: Arc<RwLock<String>>,
    ) {
        let identity = Arc::clone(&self.identity);
        let interval_secs = self.config.gateway_poll_interval_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let token = household_token.read().await.clone();
                // No household token yet means the first resync has not
                // completed; skip the poll.
                if token.is_empty() {
                    continue;
                }
                hub.refresh(&identity, &token, &household_id).await;
            }
        });
    }
}
