//! Test support: a recording publisher standing in for the MQTT transport.

use crate::correlator::CorrelationTable;
use crate::error::BridgeResult;
use crate::transport::MessagePublisher;
use async_trait::async_trait;
use fimp_proto::{expected_report_type, IncomingMessage};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// One captured publish.
#[derive(Debug, Clone)]
pub struct SentCommand {
    pub topic: String,
    pub envelope: Value,
}

impl SentCommand {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.envelope.get(name)
    }
}

/// Publisher that records every envelope instead of touching the network.
///
/// With auto-ack enabled, each publish immediately feeds a minimal
/// correlated response back through the table, so sends resolve without a
/// broker.
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<SentCommand>>,
    ack_table: Option<Arc<CorrelationTable>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_ack(table: Arc<CorrelationTable>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            ack_table: Some(table),
        }
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<SentCommand> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> BridgeResult<()> {
        let envelope: Value = serde_json::from_slice(&payload).expect("outbound payload is JSON");
        self.sent.lock().unwrap().push(SentCommand {
            topic: topic.to_string(),
            envelope: envelope.clone(),
        });

        if let Some(table) = &self.ack_table {
            let ack = IncomingMessage {
                msg_type: Some(
                    envelope
                        .get("type")
                        .and_then(Value::as_str)
                        .and_then(expected_report_type)
                        .unwrap_or_else(|| "evt.ok.report".to_string()),
                ),
                serv: envelope
                    .get("serv")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                corid: envelope
                    .get("uid")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                topic: None,
                val: Value::Null,
            };
            table.dispatch(&ack);
        }
        Ok(())
    }
}
