//! Correlator behavior with concurrent outstanding requests.

use fimp_bridge::testing::RecordingPublisher;
use fimp_bridge::{BridgeError, CorrelationTable, FimpCommander, FimpRequest};
use fimp_proto::{IncomingMessage, ValueType};
use serde_json::json;
use std::sync::Arc;

fn setup() -> (
    Arc<CorrelationTable>,
    Arc<FimpCommander>,
    Arc<RecordingPublisher>,
) {
    let table = Arc::new(CorrelationTable::new());
    let commander = Arc::new(FimpCommander::new("site-1", Arc::clone(&table)));
    let publisher = Arc::new(RecordingPublisher::new());
    (table, commander, publisher)
}

async fn wait_for_pending(table: &CorrelationTable, count: usize) {
    while table.pending_count() < count {
        tokio::task::yield_now().await;
    }
}

fn incoming(raw: serde_json::Value) -> IncomingMessage {
    serde_json::from_value(raw).unwrap()
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_settle_independently() {
    let (table, commander, publisher) = setup();
    commander
        .set_active(Arc::clone(&publisher) as Arc<dyn fimp_bridge::MessagePublisher>)
        .await;

    let mut handles = Vec::new();
    for _ in 0..3 {
        let commander = Arc::clone(&commander);
        handles.push(tokio::spawn(async move {
            commander
                .send(FimpRequest::new(
                    "/rt:dev/rn:zw/ad:1/sv:out_bin_switch/ad:5_0",
                    "out_bin_switch",
                    "cmd.binary.set",
                    json!(true),
                    ValueType::Bool,
                ))
                .await
        }));
    }
    wait_for_pending(&table, 3).await;

    let sent = publisher.sent();
    assert_eq!(sent.len(), 3);
    let uid_2 = sent[1].field("uid").unwrap().as_str().unwrap().to_string();

    // A response carrying request 2's correlation id resolves request 2
    // only, leaving 1 and 3 pending.
    table.dispatch(&incoming(json!({
        "type": "evt.binary.report",
        "serv": "out_bin_switch",
        "corid": uid_2,
    })));

    let second = handles.remove(1).await.unwrap();
    assert!(second.is_ok());
    assert_eq!(table.pending_count(), 2);

    // The survivors reject with a communication failure once their own
    // timeouts elapse, each exactly once.
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(BridgeError::Communication(_))));
    }
    assert_eq!(table.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn error_report_rejects_the_matched_request() {
    let (table, commander, publisher) = setup();
    commander
        .set_active(Arc::clone(&publisher) as Arc<dyn fimp_bridge::MessagePublisher>)
        .await;

    let sender = Arc::clone(&commander);
    let handle = tokio::spawn(async move {
        sender
            .send(FimpRequest::new(
                "/rt:dev/rn:zw/ad:1/sv:door_lock/ad:2_0",
                "door_lock",
                "cmd.lock.set",
                json!(true),
                ValueType::Bool,
            ))
            .await
    });
    wait_for_pending(&table, 1).await;

    let uid = publisher.last().unwrap();
    table.dispatch(&incoming(json!({
        "type": "evt.error.report",
        "serv": "door_lock",
        "corid": uid.field("uid").unwrap().as_str().unwrap(),
    })));

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(BridgeError::Communication(_))));
    assert_eq!(table.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn topic_match_resolves_when_corid_is_absent() {
    let (table, commander, publisher) = setup();
    commander
        .set_active(Arc::clone(&publisher) as Arc<dyn fimp_bridge::MessagePublisher>)
        .await;

    let sender = Arc::clone(&commander);
    let handle = tokio::spawn(async move {
        sender
            .send(FimpRequest::new(
                "/rt:dev/rn:zw/ad:1/sv:out_lvl_switch/ad:9_0",
                "out_lvl_switch",
                "cmd.lvl.set",
                json!(40),
                ValueType::Int,
            ))
            .await
    });
    wait_for_pending(&table, 1).await;

    table.dispatch(&incoming(json!({
        "type": "evt.lvl.report",
        "serv": "out_lvl_switch",
        "topic": "pt:j1/mt:evt/rt:dev/rn:zw/ad:1/sv:out_lvl_switch/ad:9_0",
    })));

    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn session_start_matches_any_event_of_its_service() {
    let (table, commander, publisher) = setup();
    commander
        .set_active(Arc::clone(&publisher) as Arc<dyn fimp_bridge::MessagePublisher>)
        .await;

    let sender = Arc::clone(&commander);
    let handle = tokio::spawn(async move {
        sender
            .send(
                FimpRequest::new(
                    "/rt:app/rn:clbridge/ad:1",
                    "clbridge",
                    "cmd.session.start",
                    json!({"compression": "gzip"}),
                    ValueType::StrMap,
                )
                .loose(),
            )
            .await
    });
    wait_for_pending(&table, 1).await;

    // No corid, no matching topic, unpredictable type: only the loose
    // rule (event prefix + service) can match this.
    table.dispatch(&incoming(json!({
        "type": "evt.session.report",
        "serv": "clbridge",
    })));

    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn sending_without_a_connection_is_a_transport_error() {
    let (_, commander, _) = setup();
    let result = commander
        .send(FimpRequest::new(
            "/rt:dev/rn:zw/ad:1/sv:basic/ad:1_0",
            "basic",
            "cmd.lvl.set",
            json!(1),
            ValueType::Int,
        ))
        .await;
    assert!(matches!(result, Err(BridgeError::Transport(_))));
}
