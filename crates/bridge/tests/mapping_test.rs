//! End-to-end capability mapping scenarios against a recorded transport.

use fimp_bridge::mapping::rebuild_accessory;
use fimp_bridge::testing::RecordingPublisher;
use fimp_bridge::{
    AccessoryWrapper, Characteristic, CharacteristicValue, CorrelationTable, FimpCommander,
    MessagePublisher, TargetServiceKind,
};
use fimp_proto::{Device, DeviceStateUpdate};
use serde_json::{json, Value};
use std::sync::Arc;

async fn build(
    device_json: Value,
) -> (
    AccessoryWrapper,
    Device,
    Arc<FimpCommander>,
    Arc<RecordingPublisher>,
) {
    let device: Device = serde_json::from_value(device_json).unwrap();
    let table = Arc::new(CorrelationTable::new());
    let commander = Arc::new(FimpCommander::new("site-1", Arc::clone(&table)));
    let publisher = Arc::new(RecordingPublisher::with_auto_ack(table));
    commander
        .set_active(Arc::clone(&publisher) as Arc<dyn MessagePublisher>)
        .await;

    let mut accessory = AccessoryWrapper::new(&device, "site-1");
    rebuild_accessory(&mut accessory, &device, &commander);
    (accessory, device, commander, publisher)
}

fn apply(accessory: &AccessoryWrapper, services: Value) {
    let update: DeviceStateUpdate =
        serde_json::from_value(json!({"id": accessory.device_id(), "services": services})).unwrap();
    accessory.apply_state_update(&update);
}

#[tokio::test]
async fn dimmer_typed_switch_binds_switch_not_lightbulb() {
    let (accessory, _, _, publisher) = build(json!({
        "id": 11,
        "address": "/rt:dev/rn:zw/ad:1/ad:11_0",
        "name": "Wall plug",
        "type": {"type": "dimmer"},
        "services": [{
            "name": "out_bin_switch",
            "address": "/rt:dev/rn:zw/ad:1/sv:out_bin_switch/ad:11_0",
            "interfaces": ["cmd.binary.set"]
        }]
    }))
    .await;

    // Not a "light" device, so the switch mapping wins.
    assert!(accessory.binding(TargetServiceKind::Switch).is_some());
    assert!(accessory.binding(TargetServiceKind::Lightbulb).is_none());

    let binding = accessory.binding(TargetServiceKind::Switch).unwrap();
    apply(
        &accessory,
        json!([{"name": "out_bin_switch", "attributes": [
            {"name": "binary", "values": [{"val": true, "ts": "2024-03-01T10:00:00Z"}]}
        ]}]),
    );
    assert_eq!(
        binding.characteristic(Characteristic::On),
        Some(CharacteristicValue::Bool(true))
    );

    binding
        .write(Characteristic::On, CharacteristicValue::Bool(false))
        .await
        .unwrap();

    let sent = publisher.last().unwrap();
    assert_eq!(
        sent.topic,
        "site-1/pt:j1/mt:cmd/rt:dev/rn:zw/ad:1/sv:out_bin_switch/ad:11_0"
    );
    assert_eq!(sent.field("serv").unwrap(), "out_bin_switch");
    assert_eq!(sent.field("type").unwrap(), "cmd.binary.set");
    assert_eq!(sent.field("val").unwrap(), &json!(false));
    assert_eq!(sent.field("val_t").unwrap(), "bool");
}

#[tokio::test]
async fn blinds_level_switch_positions_round_trip() {
    let (accessory, _, _, publisher) = build(json!({
        "id": 12,
        "address": "/rt:dev/rn:zw/ad:1/ad:12_0",
        "name": "Bedroom blinds",
        "type": {"type": "blinds"},
        "services": [{
            "name": "out_lvl_switch",
            "address": "/rt:dev/rn:zw/ad:1/sv:out_lvl_switch/ad:12_0",
            "interfaces": ["cmd.lvl.set"],
            "props": {"min_lvl": 0, "max_lvl": 99}
        }]
    }))
    .await;

    let binding = accessory.binding(TargetServiceKind::WindowCovering).unwrap();
    apply(
        &accessory,
        json!([{"name": "out_lvl_switch", "attributes": [
            {"name": "lvl", "values": [{"val": 49, "ts": "2024-03-01T10:00:00Z"}]}
        ]}]),
    );

    let current = binding
        .characteristic(Characteristic::CurrentPosition)
        .unwrap()
        .as_f64()
        .unwrap();
    let target = binding
        .characteristic(Characteristic::TargetPosition)
        .unwrap()
        .as_f64()
        .unwrap();
    assert!((current - 49.0).abs() < 1.0, "position was {current}");
    assert_eq!(current, target);
    assert_eq!(
        binding.characteristic(Characteristic::PositionState),
        Some(CharacteristicValue::Int(2))
    );

    binding
        .write(Characteristic::TargetPosition, CharacteristicValue::Float(100.0))
        .await
        .unwrap();

    let sent = publisher.last().unwrap();
    assert_eq!(sent.field("type").unwrap(), "cmd.lvl.set");
    assert_eq!(sent.field("val").unwrap(), &json!(99));
    assert_eq!(sent.field("val_t").unwrap(), "int");
}

#[tokio::test]
async fn capability_loss_removes_bindings_across_rebuilds() {
    let (mut accessory, _, commander, _) = build(json!({
        "id": 13,
        "address": "/rt:dev/rn:zw/ad:1/ad:13_0",
        "name": "Multisensor",
        "type": {"type": "sensor"},
        "services": [
            {"name": "battery", "address": "/rt:dev/rn:zw/ad:1/sv:battery/ad:13_0", "interfaces": []},
            {"name": "sensor_temp", "address": "/rt:dev/rn:zw/ad:1/sv:sensor_temp/ad:13_0", "interfaces": []}
        ]
    }))
    .await;

    assert!(accessory.binding(TargetServiceKind::Battery).is_some());
    let temp_before = accessory
        .binding(TargetServiceKind::TemperatureSensor)
        .unwrap();

    // A later discovery cycle without the battery service.
    let shrunk: Device = serde_json::from_value(json!({
        "id": 13,
        "address": "/rt:dev/rn:zw/ad:1/ad:13_0",
        "name": "Multisensor",
        "type": {"type": "sensor"},
        "services": [
            {"name": "sensor_temp", "address": "/rt:dev/rn:zw/ad:1/sv:sensor_temp/ad:13_0", "interfaces": []}
        ]
    }))
    .unwrap();
    rebuild_accessory(&mut accessory, &shrunk, &commander);

    assert!(accessory.binding(TargetServiceKind::Battery).is_none());
    let temp_after = accessory
        .binding(TargetServiceKind::TemperatureSensor)
        .unwrap();
    assert!(Arc::ptr_eq(&temp_before, &temp_after));
}

#[tokio::test]
async fn color_temperature_write_read_round_trip() {
    let (accessory, _, _, publisher) = build(json!({
        "id": 14,
        "address": "/rt:dev/rn:zb/ad:1/ad:14_0",
        "name": "Ceiling spot",
        "type": {"type": "light"},
        "services": [
            {"name": "out_bin_switch", "address": "/rt:dev/rn:zb/ad:1/sv:out_bin_switch/ad:14_0",
             "interfaces": ["cmd.binary.set"]},
            {"name": "color_ctrl", "address": "/rt:dev/rn:zb/ad:1/sv:color_ctrl/ad:14_0",
             "interfaces": ["cmd.color.set"],
             "props": {"sup_components": ["warm_w", "cold_w"]}}
        ]
    }))
    .await;
    let binding = accessory.binding(TargetServiceKind::Lightbulb).unwrap();

    for mireds in 140..=500i64 {
        binding
            .write(
                Characteristic::ColorTemperature,
                CharacteristicValue::Int(mireds),
            )
            .await
            .unwrap();

        let sent = publisher.last().unwrap();
        assert_eq!(sent.field("type").unwrap(), "cmd.color.set");
        assert_eq!(sent.field("val_t").unwrap(), "int_map");
        let warm = sent.field("val").unwrap()["warm_w"].as_i64().unwrap();
        let cold = sent.field("val").unwrap()["cold_w"].as_i64().unwrap();
        assert!(warm == 0 || cold == 0);
        if mireds == 320 {
            // Mid-range maps to exactly 255 on the channel scale: both off.
            assert_eq!((warm, cold), (0, 0));
        }

        apply(
            &accessory,
            json!([{"name": "color_ctrl", "attributes": [
                {"name": "color", "values": [
                    {"val": {"warm_wValue": warm, "cold_wValue": cold},
                     "ts": "2024-03-01T10:00:00Z"}
                ]}
            ]}]),
        );
        assert_eq!(
            binding.characteristic(Characteristic::ColorTemperature),
            Some(CharacteristicValue::Int(mireds)),
            "mireds {mireds} did not round-trip"
        );
    }
}

#[tokio::test]
async fn thermostat_writes_pick_supported_modes_and_mirror_current_state() {
    let (accessory, _, _, publisher) = build(json!({
        "id": 15,
        "address": "/rt:dev/rn:zw/ad:1/ad:15_0",
        "name": "Floor heating",
        "type": {"type": "thermostat"},
        "services": [{
            "name": "thermostat",
            "address": "/rt:dev/rn:zw/ad:1/sv:thermostat/ad:15_0",
            "interfaces": ["cmd.setpoint.set", "cmd.mode.set"],
            "props": {"sup_modes": ["off", "heat"]}
        }]
    }))
    .await;
    let binding = accessory.binding(TargetServiceKind::Thermostat).unwrap();

    // AUTO is unsupported; falls back to "heat" and optimistically
    // reports HEAT as current.
    binding
        .write(
            Characteristic::TargetHeatingCoolingState,
            CharacteristicValue::Int(3),
        )
        .await
        .unwrap();
    let sent = publisher.last().unwrap();
    assert_eq!(sent.field("type").unwrap(), "cmd.mode.set");
    assert_eq!(sent.field("val").unwrap(), &json!("heat"));
    assert_eq!(sent.field("val_t").unwrap(), "string");
    assert_eq!(
        binding.characteristic(Characteristic::CurrentHeatingCoolingState),
        Some(CharacteristicValue::Int(1))
    );

    // COOL walks its fallback ladder down to "off" here, but still
    // mirrors COOL as the current state.
    binding
        .write(
            Characteristic::TargetHeatingCoolingState,
            CharacteristicValue::Int(2),
        )
        .await
        .unwrap();
    let sent = publisher.last().unwrap();
    assert_eq!(sent.field("val").unwrap(), &json!("off"));
    assert_eq!(
        binding.characteristic(Characteristic::CurrentHeatingCoolingState),
        Some(CharacteristicValue::Int(2))
    );

    // Setpoint type resolves from sup_modes when no setpoint/state lists
    // exist: "heat" beats the "normal" fallback.
    binding
        .write(
            Characteristic::TargetTemperature,
            CharacteristicValue::Float(21.5),
        )
        .await
        .unwrap();
    let sent = publisher.last().unwrap();
    assert_eq!(sent.field("type").unwrap(), "cmd.setpoint.set");
    assert_eq!(
        sent.field("val").unwrap(),
        &json!({"temp": "21.5", "type": "heat", "unit": "C"})
    );
    assert_eq!(sent.field("val_t").unwrap(), "str_map");
}

#[tokio::test]
async fn write_failures_surface_as_communication_errors() {
    // No auto-ack and a short patience: the write must reject, not hang.
    let device: Device = serde_json::from_value(json!({
        "id": 16,
        "address": "/rt:dev/rn:zw/ad:1/ad:16_0",
        "name": "Sauna switch",
        "type": {"type": "appliance"},
        "services": [{
            "name": "out_bin_switch",
            "address": "/rt:dev/rn:zw/ad:1/sv:out_bin_switch/ad:16_0",
            "interfaces": ["cmd.binary.set"]
        }]
    }))
    .unwrap();
    let table = Arc::new(CorrelationTable::new());
    let commander = Arc::new(FimpCommander::new("site-1", Arc::clone(&table)));
    let publisher = Arc::new(RecordingPublisher::new());

    tokio::time::pause();
    commander
        .set_active(Arc::clone(&publisher) as Arc<dyn MessagePublisher>)
        .await;
    let mut accessory = AccessoryWrapper::new(&device, "site-1");
    rebuild_accessory(&mut accessory, &device, &commander);

    let binding = accessory.binding(TargetServiceKind::Switch).unwrap();
    let result = binding
        .write(Characteristic::On, CharacteristicValue::Bool(true))
        .await;
    assert!(matches!(
        result,
        Err(fimp_bridge::BridgeError::Communication(_))
    ));
    assert_eq!(table.pending_count(), 0);
}
