//! FIMP message envelope and topic construction.
//!
//! Every outbound command is a JSON envelope published to a
//! household-scoped command topic; responses arrive on a fixed reply
//! topic or the per-address event topic. The field set and spelling of
//! the envelope are fixed by the cloud API.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Source client id stamped on every outbound command.
pub const SOURCE_CLIENT_ID: &str = "smarthome-app";

/// Reply topic requested for correlated responses.
pub const RESPONSE_TOPIC: &str = "pt:j1/mt:rsp/rt:cloud/rn:remote-client/ad:smarthome-app";

/// Message type carrying a bulk device-state report.
pub const STATE_REPORT_TYPE: &str = "evt.pd7.response";

/// Message type signalling a failed command.
pub const ERROR_REPORT_TYPE: &str = "evt.error.report";

/// Prefix shared by all event-report message types.
pub const EVENT_PREFIX: &str = "evt.";

/// Command topic for an address within a household.
pub fn cmd_topic(household_id: &str, address: &str) -> String {
    format!("{household_id}/pt:j1/mt:cmd{address}")
}

/// Event topic a device at `address` reports on. Inbound messages echo
/// this in their `topic` field (without the household prefix).
pub fn evt_topic(address: &str) -> String {
    format!("pt:j1/mt:evt{address}")
}

/// The report type conventionally paired with a command type:
/// `cmd.lvl.set` is expected to produce `evt.lvl.report`. Informative
/// only; correlation never relies on it.
pub fn expected_report_type(cmd: &str) -> Option<String> {
    let parts: Vec<&str> = cmd.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    Some(format!("evt.{}.report", parts[1]))
}

/// Wire type tag for the `val` payload of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "str_map")]
    StrMap,
    #[serde(rename = "int_map")]
    IntMap,
    #[serde(rename = "object")]
    Object,
}

/// Outbound FIMP command envelope.
///
/// Serializes to the exact field set the cloud expects; `corid` is always
/// null on commands and `ver` is always "1".
#[derive(Debug, Clone, Serialize)]
pub struct CommandEnvelope {
    pub corid: Option<String>,
    pub ctime: String,
    pub props: serde_json::Map<String, Value>,
    pub resp_to: String,
    pub serv: String,
    pub src: String,
    pub tags: Vec<String>,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub uid: String,
    pub val: Value,
    pub val_t: ValueType,
    pub ver: String,
}

impl CommandEnvelope {
    /// Build an envelope with a fresh unique id.
    pub fn new(service: &str, cmd: &str, val: Value, val_t: ValueType) -> Self {
        Self {
            corid: None,
            ctime: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            props: serde_json::Map::new(),
            resp_to: RESPONSE_TOPIC.to_string(),
            serv: service.to_string(),
            src: SOURCE_CLIENT_ID.to_string(),
            tags: Vec::new(),
            msg_type: cmd.to_string(),
            uid: Uuid::new_v4().to_string(),
            val,
            val_t,
            ver: "1".to_string(),
        }
    }
}

/// Inbound FIMP message, after gzip decompression.
///
/// Only the fields correlation and dispatch care about are modeled; the
/// rest of the frame is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    #[serde(rename = "type", default)]
    pub msg_type: Option<String>,
    #[serde(default)]
    pub serv: Option<String>,
    #[serde(default)]
    pub corid: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub val: Value,
}

impl IncomingMessage {
    /// Whether this frame reports a failed command.
    pub fn is_error_report(&self) -> bool {
        self.msg_type.as_deref() == Some(ERROR_REPORT_TYPE)
    }

    /// Whether this frame is a bulk device-state report.
    pub fn is_state_report(&self) -> bool {
        self.msg_type.as_deref() == Some(STATE_REPORT_TYPE)
    }

    /// Whether this frame is any event report.
    pub fn is_event(&self) -> bool {
        self.msg_type
            .as_deref()
            .is_some_and(|t| t.starts_with(EVENT_PREFIX))
    }
}
