//! Smarthub (gateway) accessory.
//!
//! The household gateway is exposed as a reachability indicator refreshed
//! by polling the discovery endpoint; it has no FIMP services of its own.

use crate::identity::IdentityClient;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Reachability of the household gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayReachability {
    Unknown,
    Connected,
    NotConnected,
}

/// Accessory wrapper for the household gateway.
pub struct HubAccessory {
    display_name: String,
    status: Mutex<GatewayReachability>,
}

impl HubAccessory {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            status: Mutex::new(GatewayReachability::Unknown),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn status(&self) -> GatewayReachability {
        *self.status.lock().unwrap()
    }

    /// Poll the gateway's online flag. Query failures log a warning and
    /// report Unknown rather than erroring.
    pub async fn refresh(
        &self,
        identity: &IdentityClient,
        household_token: &str,
        household_id: &str,
    ) {
        let status = match identity.gateway_online(household_token, household_id).await {
            Ok(Some(true)) => GatewayReachability::Connected,
            Ok(Some(false)) => GatewayReachability::NotConnected,
            Ok(None) => GatewayReachability::Unknown,
            Err(e) => {
                warn!(error = %e, "failed refreshing gateway status");
                GatewayReachability::Unknown
            }
        };
        debug!(?status, "gateway status refreshed");
        *self.status.lock().unwrap() = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unknown() {
        let hub = HubAccessory::new("Smarthub");
        assert_eq!(hub.status(), GatewayReachability::Unknown);
        assert_eq!(hub.display_name(), "Smarthub");
    }
}
