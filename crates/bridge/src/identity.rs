//! Identity and discovery client.
//!
//! Thin request/response glue against the cloud: OAuth password grant and
//! refresh, household-token exchange, and the GraphQL queries for sites,
//! devices, and gateway reachability. No protocol engine lives here.

use crate::config::{Hosts, OauthConfig};
use crate::error::{BridgeError, BridgeResult};
use fimp_proto::Device;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

/// Largest device count one bridge instance will expose.
const MAX_DEVICES: usize = 149;

/// Access and refresh tokens from the identity provider.
#[derive(Debug, Clone)]
pub struct AuthTokens {
    pub access_token_hash: String,
    pub refresh_token: String,
}

/// One household (site) on the account.
#[derive(Debug, Clone, Deserialize)]
pub struct Site {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token_hash: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    site_token_hash: String,
}

pub struct IdentityClient {
    http: reqwest::Client,
    hosts: Hosts,
    oauth: OauthConfig,
}

impl IdentityClient {
    pub fn new(hosts: Hosts, oauth: OauthConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            hosts,
            oauth,
        }
    }

    /// Password-grant login.
    pub async fn authenticate(&self, email: &str, password: &str) -> BridgeResult<AuthTokens> {
        self.token_request(&[
            ("username", email),
            ("password", password),
            ("grant_type", "password"),
            ("client_id", &self.oauth.client_id),
            ("client_secret", &self.oauth.client_secret),
        ])
        .await
    }

    /// Exchange the refresh token for a fresh token pair.
    pub async fn refresh(&self, refresh_token: &str) -> BridgeResult<AuthTokens> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", "heimdall"),
            ("client_id", &self.oauth.client_id),
            ("client_secret", &self.oauth.client_secret),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> BridgeResult<AuthTokens> {
        let response = self
            .http
            .post(format!("https://{}/auth/token", self.hosts.heimdall))
            .header("x-fh-app-id", &self.oauth.app_id)
            .form(form)
            .send()
            .await
            .map_err(|e| BridgeError::Auth(e.to_string()))?
            .error_for_status()
            .map_err(|e| BridgeError::Auth(e.to_string()))?;

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Auth(format!("malformed token response: {e}")))?;
        Ok(AuthTokens {
            access_token_hash: tokens.access_token_hash,
            refresh_token: tokens.refresh_token,
        })
    }

    /// Exchange the account token for a household-scoped token hash.
    pub async fn exchange_household(
        &self,
        access_token_hash: &str,
        household_id: &str,
    ) -> BridgeResult<String> {
        let response = self
            .http
            .get(format!(
                "https://{}/auth/exchange/{household_id}",
                self.hosts.heimdall
            ))
            .header("x-fh-app-id", &self.oauth.app_id)
            .bearer_auth(access_token_hash)
            .send()
            .await
            .map_err(|e| BridgeError::Auth(e.to_string()))?
            .error_for_status()
            .map_err(|e| BridgeError::Auth(e.to_string()))?;

        let exchange: ExchangeResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Auth(format!("malformed exchange response: {e}")))?;
        Ok(exchange.site_token_hash)
    }

    async fn graphql(
        &self,
        token: &str,
        query: String,
    ) -> BridgeResult<serde_json::Value> {
        let response = self
            .http
            .post(format!("https://{}/", self.hosts.niflheim))
            .header("x-fh-app-id", &self.oauth.app_id)
            .bearer_auth(token)
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(|e| BridgeError::Discovery(e.to_string()))?
            .error_for_status()
            .map_err(|e| BridgeError::Discovery(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| BridgeError::Discovery(format!("malformed graphql response: {e}")))
    }

    /// All households on the account.
    pub async fn list_sites(&self, access_token_hash: &str) -> BridgeResult<Vec<Site>> {
        let body = self
            .graphql(
                access_token_hash,
                "{ sites { name id address { buildingType address city postalCode country } } }"
                    .to_string(),
            )
            .await?;

        let sites = body
            .get("data")
            .and_then(|d| d.get("sites"))
            .cloned()
            .ok_or_else(|| BridgeError::Discovery("no sites in response".to_string()))?;
        serde_json::from_value(sites)
            .map_err(|e| BridgeError::Discovery(format!("malformed sites list: {e}")))
    }

    /// All bridgeable devices in a household. Devices without services are
    /// dropped, and the list is capped to what one instance can expose.
    pub async fn list_devices(
        &self,
        household_token: &str,
        household_id: &str,
    ) -> BridgeResult<Vec<Device>> {
        let query = format!(
            "{{ site(id: \"{household_id}\") {{ devices {{ \
             id address name model modelAlias type services {{ \
             name address enabled props interfaces metadata }} metadata }} }} }}"
        );
        let body = self.graphql(household_token, query).await?;

        let devices = body
            .get("data")
            .and_then(|d| d.get("site"))
            .and_then(|s| s.get("devices"))
            .cloned()
            .ok_or_else(|| BridgeError::Discovery("no devices in response".to_string()))?;
        let mut devices: Vec<Device> = serde_json::from_value(devices)
            .map_err(|e| BridgeError::Discovery(format!("malformed device list: {e}")))?;

        devices.retain(|d| !d.services.is_empty());

        if devices.len() > MAX_DEVICES {
            warn!(
                found = devices.len(),
                max = MAX_DEVICES,
                "household has more devices than one bridge instance can expose; excess ignored"
            );
            devices.truncate(MAX_DEVICES);
        }

        debug!(count = devices.len(), "discovered devices");
        Ok(devices)
    }

    /// Reachability of the household's first gateway: `None` when the
    /// query reports no gateway or no online flag.
    pub async fn gateway_online(
        &self,
        household_token: &str,
        household_id: &str,
    ) -> BridgeResult<Option<bool>> {
        let query = format!("{{ site(id: \"{household_id}\") {{ gateways {{ id online }} }} }}");
        let body = self.graphql(household_token, query).await?;

        Ok(body
            .get("data")
            .and_then(|d| d.get("site"))
            .and_then(|s| s.get("gateways"))
            .and_then(|g| g.get(0))
            .and_then(|g| g.get("online"))
            .and_then(serde_json::Value::as_bool))
    }
}
