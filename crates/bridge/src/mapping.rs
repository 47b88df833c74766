//! Capability mapping engine.
//!
//! Turns a device's service descriptors into target service bindings with
//! bidirectional sync handlers. The engine is a declarative table: one
//! builder per target service kind, run once per rebuild. A builder
//! decides applicability from the services and device type, registers
//! update handlers and write callbacks when applicable, and communicates
//! inapplicability solely through its boolean return — in which case a
//! binding left over from a previous cycle is removed, materializing
//! capability loss as service removal.

use crate::accessory::{
    AccessoryWrapper, Characteristic, CharacteristicValue, ContactState, HeatingCoolingState,
    LockState, MediaState, OccupancyState, PositionState, ServiceBinding, SmokeState,
    StatusLowBattery, TargetServiceKind, TemperatureDisplayUnit, WriteHandler,
};
use crate::correlator::{FimpCommander, FimpRequest};
use crate::error::{BridgeError, BridgeResult};
use fimp_proto::device::{CMD_BINARY_SET, CMD_COLOR_SET, CMD_LVL_SET, CMD_MODE_SET, CMD_SETPOINT_SET};
use fimp_proto::{map_range, Device, DeviceType, ServiceDescriptor, ServiceName, ValueType};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Shared context handed to every builder.
pub struct BuilderCx<'a> {
    pub device: &'a Device,
    pub commander: &'a Arc<FimpCommander>,
}

type Builder = fn(&mut AccessoryWrapper, &BuilderCx<'_>) -> bool;

const BUILDERS: [(TargetServiceKind, Builder); 14] = [
    (TargetServiceKind::Battery, build_battery),
    (TargetServiceKind::ContactSensor, build_contact_sensor),
    (TargetServiceKind::Door, build_door),
    (TargetServiceKind::HumiditySensor, build_humidity_sensor),
    (TargetServiceKind::LightSensor, build_light_sensor),
    (TargetServiceKind::Lightbulb, build_lightbulb),
    (TargetServiceKind::LockMechanism, build_lock_mechanism),
    (TargetServiceKind::OccupancySensor, build_occupancy_sensor),
    (TargetServiceKind::SmartSpeaker, build_smart_speaker),
    (TargetServiceKind::SmokeSensor, build_smoke_sensor),
    (TargetServiceKind::Switch, build_switch),
    (TargetServiceKind::TemperatureSensor, build_temperature_sensor),
    (TargetServiceKind::Thermostat, build_thermostat),
    (TargetServiceKind::WindowCovering, build_window_covering),
];

/// Rebuild an accessory against a fresh device snapshot.
///
/// Handlers and write callbacks are always rebuilt from scratch; bindings
/// persist so characteristic state survives a resync, except where a
/// builder's preconditions no longer hold.
pub fn rebuild_accessory(
    accessory: &mut AccessoryWrapper,
    device: &Device,
    commander: &Arc<FimpCommander>,
) {
    accessory.refresh_identity(device);
    accessory.reset_for_rebuild();

    let cx = BuilderCx { device, commander };
    for (kind, builder) in BUILDERS {
        let applicable = builder(accessory, &cx);
        if !applicable && accessory.remove_binding(kind) {
            debug!(
                device = accessory.display_name(),
                kind = ?kind,
                "removed service no longer backed by device capabilities"
            );
        }
    }
}

/// Write callback that converts the characteristic value and sends one
/// command to the service's address.
fn write_via<F>(cx: &BuilderCx<'_>, svc: &ServiceDescriptor, cmd: &'static str, convert: F) -> WriteHandler
where
    F: Fn(CharacteristicValue) -> BridgeResult<(Value, ValueType)> + Send + Sync + 'static,
{
    let commander = Arc::clone(cx.commander);
    let address = svc.address.clone();
    let service = svc.name.to_string();
    Arc::new(move |value| {
        let commander = Arc::clone(&commander);
        let address = address.clone();
        let service = service.clone();
        let payload = convert(value);
        Box::pin(async move {
            let (val, val_t) = payload?;
            commander
                .send(FimpRequest::new(&address, &service, cmd, val, val_t))
                .await
                .map(|_| ())
        })
    })
}

fn expect_bool(value: CharacteristicValue) -> BridgeResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| BridgeError::Communication("expected a boolean value".to_string()))
}

fn expect_number(value: CharacteristicValue) -> BridgeResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| BridgeError::Communication("expected a numeric value".to_string()))
}

/// First preferred entry present in a supported-values list.
fn pick_supported<'a>(list: Option<&[String]>, preferred: &[&'a str]) -> Option<&'a str> {
    let list = list?;
    preferred
        .iter()
        .copied()
        .find(|candidate| list.iter().any(|entry| entry == candidate))
}

/// Numbers may arrive as JSON numbers or stringified ("21.5").
fn number_or_string_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Render a setpoint temperature the way the cloud expects: integral
/// values without a trailing ".0".
fn format_temp(temp: f64) -> String {
    if temp.fract() == 0.0 {
        format!("{}", temp as i64)
    } else {
        format!("{temp}")
    }
}

fn build_battery(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let Some(svc) = cx.device.service(&ServiceName::Battery) else {
        return false;
    };
    let binding = acc.ensure_binding(TargetServiceKind::Battery);
    binding.update(Characteristic::Name, acc.display_name());

    let b = Arc::clone(&binding);
    acc.add_update_handler(
        svc.name.clone(),
        Box::new(move |state| {
            let Some(lvl) = state.latest_attribute("lvl").and_then(|v| v.as_f64()) else {
                return;
            };
            b.update(
                Characteristic::StatusLowBattery,
                if lvl > 20.0 {
                    StatusLowBattery::Normal
                } else {
                    StatusLowBattery::Low
                },
            );
            b.update(Characteristic::BatteryLevel, lvl);
        }),
    );
    true
}

fn build_contact_sensor(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let Some(svc) = cx.device.service(&ServiceName::SensorContact) else {
        return false;
    };
    let binding = acc.ensure_binding(TargetServiceKind::ContactSensor);
    binding.update(Characteristic::Name, acc.display_name());

    let b = Arc::clone(&binding);
    acc.add_update_handler(
        svc.name.clone(),
        Box::new(move |state| {
            let Some(open) = state.latest_attribute("open").and_then(|v| v.as_bool()) else {
                return;
            };
            // An open contact reports "not detected".
            b.update(
                Characteristic::ContactSensorState,
                if open {
                    ContactState::NotDetected
                } else {
                    ContactState::Detected
                },
            );
        }),
    );
    true
}

fn build_door(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let Some(svc) = cx.device.service(&ServiceName::DoorLock) else {
        return false;
    };
    let binding = acc.ensure_binding(TargetServiceKind::Door);
    binding.update(Characteristic::Name, acc.display_name());

    let b = Arc::clone(&binding);
    acc.add_update_handler(
        svc.name.clone(),
        Box::new(move |state| {
            let closed = state
                .latest_attribute("lock")
                .and_then(|v| v.field("door_is_closed"))
                .and_then(Value::as_bool);
            let Some(closed) = closed else {
                return;
            };
            let position: i64 = if closed { 0 } else { 100 };
            b.update(Characteristic::CurrentPosition, position);
            b.update(Characteristic::TargetPosition, position);
        }),
    );
    true
}

fn build_humidity_sensor(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let Some(svc) = cx.device.service(&ServiceName::SensorHumid) else {
        return false;
    };
    let binding = acc.ensure_binding(TargetServiceKind::HumiditySensor);
    binding.update(Characteristic::Name, acc.display_name());

    let b = Arc::clone(&binding);
    acc.add_update_handler(
        svc.name.clone(),
        Box::new(move |state| {
            if let Some(humidity) = state.latest_attribute("sensor").and_then(|v| v.as_f64()) {
                b.update(Characteristic::CurrentRelativeHumidity, humidity);
            }
        }),
    );
    true
}

fn build_light_sensor(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let Some(svc) = cx.device.service(&ServiceName::SensorLumin) else {
        return false;
    };
    let binding = acc.ensure_binding(TargetServiceKind::LightSensor);
    binding.update(Characteristic::Name, acc.display_name());

    let b = Arc::clone(&binding);
    acc.add_update_handler(
        svc.name.clone(),
        Box::new(move |state| {
            if let Some(lux) = state.latest_attribute("sensor").and_then(|v| v.as_f64()) {
                b.update(Characteristic::CurrentAmbientLightLevel, lux);
            }
        }),
    );
    true
}

fn build_lightbulb(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let device = cx.device;
    let lvl_switch = device.service(&ServiceName::OutLvlSwitch);
    let bin_switch = device.service(&ServiceName::OutBinSwitch);
    if lvl_switch.is_none() && bin_switch.is_none() {
        return false;
    }
    if !device.is_type(&DeviceType::Light) {
        return false;
    }
    let binding = acc.ensure_binding(TargetServiceKind::Lightbulb);
    binding.update(Characteristic::Name, acc.display_name());

    // On/off prefers the binary switch when it can actually be commanded.
    let bin_with_cmd = bin_switch.filter(|s| s.supports(CMD_BINARY_SET));
    if let Some(svc) = bin_with_cmd {
        let b = Arc::clone(&binding);
        acc.add_update_handler(
            svc.name.clone(),
            Box::new(move |state| {
                if let Some(on) = state.latest_attribute("binary").and_then(|v| v.as_bool()) {
                    b.update(Characteristic::On, on);
                }
            }),
        );
        binding.on_write(
            Characteristic::On,
            write_via(cx, svc, CMD_BINARY_SET, |value| {
                Ok((Value::Bool(expect_bool(value)?), ValueType::Bool))
            }),
        );
    }

    if let Some(svc) = lvl_switch {
        let dimmable = svc.supports(CMD_BINARY_SET) && svc.supports(CMD_LVL_SET);
        if let (true, Some((min, max))) = (dimmable, svc.level_bounds()) {
            let (min, max) = (min as f64, max as f64);
            let owns_on = bin_with_cmd.is_none();

            let b = Arc::clone(&binding);
            acc.add_update_handler(
                svc.name.clone(),
                Box::new(move |state| {
                    let binary = state.latest_attribute("binary").and_then(|v| v.as_bool());
                    let lvl = state.latest_attribute("lvl").and_then(|v| v.as_f64());

                    if owns_on {
                        if let Some(on) = binary {
                            b.update(Characteristic::On, on);
                        } else if let Some(lvl) = lvl {
                            b.update(Characteristic::On, lvl != min);
                        }
                    }
                    if let Some(lvl) = lvl {
                        b.update(Characteristic::Brightness, map_range(lvl, min, max, 0.0, 100.0));
                    }
                }),
            );

            if owns_on {
                binding.on_write(
                    Characteristic::On,
                    write_via(cx, svc, CMD_BINARY_SET, |value| {
                        Ok((Value::Bool(expect_bool(value)?), ValueType::Bool))
                    }),
                );
            }
            binding.on_write(
                Characteristic::Brightness,
                write_via(cx, svc, CMD_LVL_SET, move |value| {
                    let pct = expect_number(value)?;
                    let lvl = map_range(pct, 0.0, 100.0, min, max).round() as i64;
                    Ok((Value::from(lvl), ValueType::Int))
                }),
            );
        }
    }

    if let Some(color) = device.service(&ServiceName::ColorCtrl) {
        if color.props.has_component("warm_w") && color.props.has_component("cold_w") {
            let b = Arc::clone(&binding);
            acc.add_update_handler(
                color.name.clone(),
                Box::new(move |state| {
                    let attr = state.latest_attribute("color");
                    let warm = attr
                        .and_then(|v| v.field("warm_wValue"))
                        .and_then(Value::as_f64);
                    let cold = attr
                        .and_then(|v| v.field("cold_wValue"))
                        .and_then(Value::as_f64);
                    let (Some(warm), Some(cold)) = (warm, cold) else {
                        return;
                    };
                    let mireds = map_range(255.0 + warm - cold, 0.0, 510.0, 140.0, 500.0);
                    b.update(Characteristic::ColorTemperature, mireds.round() as i64);
                }),
            );
            binding.on_write(
                Characteristic::ColorTemperature,
                write_via(cx, color, CMD_COLOR_SET, |value| {
                    let mireds = expect_number(value)?;
                    let channel = map_range(mireds, 140.0, 500.0, 0.0, 510.0);
                    let (warm, cold) = if channel == 255.0 {
                        (0, 0)
                    } else if channel > 255.0 {
                        ((channel - 255.0).round() as i64, 0)
                    } else {
                        (0, (255.0 - channel).round() as i64)
                    };
                    Ok((json!({"warm_w": warm, "cold_w": cold}), ValueType::IntMap))
                }),
            );
        }
    }
    true
}

fn build_lock_mechanism(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let Some(svc) = cx.device.service(&ServiceName::DoorLock) else {
        return false;
    };
    let binding = acc.ensure_binding(TargetServiceKind::LockMechanism);
    binding.update(Characteristic::Name, acc.display_name());

    let b = Arc::clone(&binding);
    acc.add_update_handler(
        svc.name.clone(),
        Box::new(move |state| {
            let secured = state
                .latest_attribute("lock")
                .and_then(|v| v.field("is_secured"))
                .and_then(Value::as_bool);
            let Some(secured) = secured else {
                return;
            };
            let lock_state = if secured {
                LockState::Secured
            } else {
                LockState::Unsecured
            };
            b.update(Characteristic::LockCurrentState, lock_state);
            b.update(Characteristic::LockTargetState, lock_state);
        }),
    );
    true
}

fn build_occupancy_sensor(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let Some(svc) = cx.device.service(&ServiceName::SensorPresence) else {
        return false;
    };
    let binding = acc.ensure_binding(TargetServiceKind::OccupancySensor);
    binding.update(Characteristic::Name, acc.display_name());

    let b = Arc::clone(&binding);
    acc.add_update_handler(
        svc.name.clone(),
        Box::new(move |state| {
            if let Some(presence) = state.latest_attribute("presence").and_then(|v| v.as_bool()) {
                b.update(
                    Characteristic::OccupancyDetected,
                    if presence {
                        OccupancyState::Detected
                    } else {
                        OccupancyState::NotDetected
                    },
                );
            }
        }),
    );
    true
}

fn build_smart_speaker(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let Some(svc) = cx.device.service(&ServiceName::MediaPlayer) else {
        return false;
    };
    let binding = acc.ensure_binding(TargetServiceKind::SmartSpeaker);
    binding.update(Characteristic::Name, acc.display_name());

    let b = Arc::clone(&binding);
    acc.add_update_handler(
        svc.name.clone(),
        Box::new(move |state| {
            if let Some(playback) = state.latest_attribute("playback").and_then(|v| v.as_str()) {
                let media_state = if playback == "pause" {
                    MediaState::Pause
                } else {
                    MediaState::Play
                };
                b.update(Characteristic::CurrentMediaState, media_state);
                b.update(Characteristic::TargetMediaState, media_state);
            }
        }),
    );

    let b = Arc::clone(&binding);
    acc.add_update_handler(
        svc.name.clone(),
        Box::new(move |state| {
            if let Some(volume) = state.latest_attribute("volume").and_then(|v| v.as_f64()) {
                b.update(Characteristic::Volume, volume);
            }
        }),
    );

    let b = Arc::clone(&binding);
    acc.add_update_handler(
        svc.name.clone(),
        Box::new(move |state| {
            if let Some(mute) = state.latest_attribute("mute").and_then(|v| v.as_bool()) {
                b.update(Characteristic::Mute, mute);
            }
        }),
    );
    true
}

fn build_smoke_sensor(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let Some(svc) = cx.device.service(&ServiceName::AlarmFire) else {
        return false;
    };
    let binding = acc.ensure_binding(TargetServiceKind::SmokeSensor);
    binding.update(Characteristic::Name, acc.display_name());

    let b = Arc::clone(&binding);
    acc.add_update_handler(
        svc.name.clone(),
        Box::new(move |state| {
            let event = state
                .latest_attribute("alarm")
                .and_then(|v| v.field("event"))
                .and_then(Value::as_str);
            let Some(event) = event else {
                return;
            };
            b.update(
                Characteristic::SmokeDetected,
                if event == "smoke" {
                    SmokeState::Detected
                } else {
                    SmokeState::NotDetected
                },
            );
        }),
    );
    true
}

fn build_switch(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let Some(svc) = cx.device.service(&ServiceName::OutBinSwitch) else {
        return false;
    };
    // Lights with a binary switch map to lightbulb instead.
    if cx.device.is_type(&DeviceType::Light) {
        return false;
    }
    let binding = acc.ensure_binding(TargetServiceKind::Switch);
    binding.update(Characteristic::Name, acc.display_name());

    if svc.supports(CMD_BINARY_SET) {
        let b = Arc::clone(&binding);
        acc.add_update_handler(
            svc.name.clone(),
            Box::new(move |state| {
                if let Some(on) = state.latest_attribute("binary").and_then(|v| v.as_bool()) {
                    b.update(Characteristic::On, on);
                }
            }),
        );
        binding.on_write(
            Characteristic::On,
            write_via(cx, svc, CMD_BINARY_SET, |value| {
                Ok((Value::Bool(expect_bool(value)?), ValueType::Bool))
            }),
        );
    }
    true
}

fn build_temperature_sensor(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let device = cx.device;
    let svc = device
        .service(&ServiceName::SensorTemp)
        .or_else(|| device.service(&ServiceName::SensorWattemp));
    let Some(svc) = svc else {
        return false;
    };
    let binding = acc.ensure_binding(TargetServiceKind::TemperatureSensor);
    binding.update(Characteristic::Name, acc.display_name());

    let b = Arc::clone(&binding);
    acc.add_update_handler(
        svc.name.clone(),
        Box::new(move |state| {
            if let Some(temp) = state.latest_attribute("sensor").and_then(|v| v.as_f64()) {
                b.update(Characteristic::CurrentTemperature, temp);
            }
        }),
    );
    true
}

fn build_thermostat(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let device = cx.device;
    if !device.is_type(&DeviceType::Thermostat) {
        return false;
    }
    let binding = acc.ensure_binding(TargetServiceKind::Thermostat);
    binding.update(Characteristic::Name, acc.display_name());

    if let Some(temp) = device.service(&ServiceName::SensorTemp) {
        let b = Arc::clone(&binding);
        acc.add_update_handler(
            temp.name.clone(),
            Box::new(move |state| {
                let Some(attr) = state.latest_attribute("sensor") else {
                    return;
                };
                if let Some(temp) = attr.as_f64() {
                    b.update(Characteristic::CurrentTemperature, temp);
                }
                b.update(
                    Characteristic::TemperatureDisplayUnits,
                    if attr.unit() == Some("C") {
                        TemperatureDisplayUnit::Celsius
                    } else {
                        TemperatureDisplayUnit::Fahrenheit
                    },
                );
            }),
        );
    }

    let Some(thermostat) = device.service(&ServiceName::Thermostat) else {
        return true;
    };

    if thermostat.supports(CMD_SETPOINT_SET) {
        let b = Arc::clone(&binding);
        acc.add_update_handler(
            thermostat.name.clone(),
            Box::new(move |state| {
                let temp = state
                    .latest_attribute("setpoint")
                    .and_then(|v| v.field("temp"))
                    .and_then(number_or_string_f64);
                if let Some(temp) = temp {
                    b.update(Characteristic::TargetTemperature, temp);
                }
            }),
        );

        // Setpoint type: supported setpoints, states, then modes, picking
        // "auto" over "heat" with "normal" as the last resort.
        let props = &thermostat.props;
        let supported = props
            .sup_setpoints
            .as_deref()
            .or(props.sup_states.as_deref())
            .or(props.sup_modes.as_deref());
        let setpoint_type = pick_supported(supported, &["auto", "heat"])
            .unwrap_or("normal")
            .to_string();
        binding.on_write(
            Characteristic::TargetTemperature,
            write_via(cx, thermostat, CMD_SETPOINT_SET, move |value| {
                let temp = expect_number(value)?;
                Ok((
                    json!({
                        "temp": format_temp(temp),
                        "type": setpoint_type,
                        "unit": "C",
                    }),
                    ValueType::StrMap,
                ))
            }),
        );
    }

    if thermostat.supports(CMD_MODE_SET) {
        let b = Arc::clone(&binding);
        acc.add_update_handler(
            thermostat.name.clone(),
            Box::new(move |state| {
                if let Some(current) = state.latest_attribute("state").and_then(|v| v.as_str()) {
                    b.update(
                        Characteristic::CurrentHeatingCoolingState,
                        match current {
                            "heat" | "auto" | "eco" | "normal" => HeatingCoolingState::Heat,
                            _ => HeatingCoolingState::Off,
                        },
                    );
                }
                if let Some(mode) = state.latest_attribute("mode").and_then(|v| v.as_str()) {
                    b.update(
                        Characteristic::TargetHeatingCoolingState,
                        match mode {
                            "off" | "sleep" | "idle" => HeatingCoolingState::Off,
                            "heat" | "normal" => HeatingCoolingState::Heat,
                            "auto" => HeatingCoolingState::Auto,
                            // Cooling is reported as AUTO upstream; kept as-is.
                            "cool" => HeatingCoolingState::Auto,
                            _ => HeatingCoolingState::Off,
                        },
                    );
                }
            }),
        );

        let commander = Arc::clone(cx.commander);
        let address = thermostat.address.clone();
        let service = thermostat.name.to_string();
        let sup_modes = thermostat.props.sup_modes.clone().unwrap_or_default();
        let weak = Arc::downgrade(&binding);
        binding.on_write(
            Characteristic::TargetHeatingCoolingState,
            Arc::new(move |value| {
                let commander = Arc::clone(&commander);
                let address = address.clone();
                let service = service.clone();
                let sup_modes = sup_modes.clone();
                let weak = weak.clone();
                Box::pin(async move {
                    let target = value.as_i64().ok_or_else(|| {
                        BridgeError::Communication("expected a heating/cooling state".to_string())
                    })?;
                    let (mode, optimistic_current) = match target {
                        t if t == HeatingCoolingState::Off as i64 => (
                            pick_supported(Some(sup_modes.as_slice()), &["off"]).unwrap_or("sleep"),
                            HeatingCoolingState::Off,
                        ),
                        t if t == HeatingCoolingState::Heat as i64 => (
                            pick_supported(Some(sup_modes.as_slice()), &["heat"]).unwrap_or("normal"),
                            HeatingCoolingState::Heat,
                        ),
                        t if t == HeatingCoolingState::Cool as i64 => (
                            pick_supported(Some(sup_modes.as_slice()), &["cool", "auto", "off"])
                                .unwrap_or("sleep"),
                            HeatingCoolingState::Cool,
                        ),
                        t if t == HeatingCoolingState::Auto as i64 => (
                            pick_supported(Some(sup_modes.as_slice()), &["auto"]).unwrap_or("heat"),
                            HeatingCoolingState::Heat,
                        ),
                        _ => {
                            return Err(BridgeError::Communication(
                                "unsupported target heating/cooling state".to_string(),
                            ))
                        }
                    };
                    commander
                        .send(FimpRequest::new(
                            &address,
                            &service,
                            CMD_MODE_SET,
                            Value::String(mode.to_string()),
                            ValueType::String,
                        ))
                        .await?;
                    // Optimistically mirror the write; no round-trip
                    // confirmation is expected.
                    if let Some(binding) = weak.upgrade() {
                        binding.update(Characteristic::CurrentHeatingCoolingState, optimistic_current);
                    }
                    Ok(())
                })
            }),
        );
    }
    true
}

fn build_window_covering(acc: &mut AccessoryWrapper, cx: &BuilderCx<'_>) -> bool {
    let device = cx.device;
    let lvl_switch = device.service(&ServiceName::OutLvlSwitch);
    let bin_switch = device.service(&ServiceName::OutBinSwitch);
    if lvl_switch.is_none() && bin_switch.is_none() {
        return false;
    }
    if !device.is_type(&DeviceType::Blinds) {
        return false;
    }
    let binding = acc.ensure_binding(TargetServiceKind::WindowCovering);
    binding.update(Characteristic::Name, acc.display_name());

    let lvl_with_lvl_cmd = lvl_switch
        .filter(|s| s.supports(CMD_LVL_SET))
        .and_then(|s| s.level_bounds().map(|bounds| (s, bounds)));

    if let Some((svc, (min, max))) = lvl_with_lvl_cmd {
        let (min, max) = (min as f64, max as f64);
        let b = Arc::clone(&binding);
        acc.add_update_handler(
            svc.name.clone(),
            Box::new(move |state| {
                if let Some(lvl) = state.latest_attribute("lvl").and_then(|v| v.as_f64()) {
                    let position = map_range(lvl, min, max, 0.0, 100.0);
                    b.update(Characteristic::CurrentPosition, position);
                    b.update(Characteristic::TargetPosition, position);
                    b.update(Characteristic::PositionState, PositionState::Stopped);
                }
            }),
        );
        binding.on_write(
            Characteristic::TargetPosition,
            write_via(cx, svc, CMD_LVL_SET, move |value| {
                let pct = expect_number(value)?;
                let lvl = map_range(pct, 0.0, 100.0, min, max).round() as i64;
                Ok((Value::from(lvl), ValueType::Int))
            }),
        );
    } else if let Some(svc) = lvl_switch.filter(|s| s.supports(CMD_BINARY_SET)) {
        bind_binary_position(acc, &binding, cx, svc);
    } else if let Some(svc) = bin_switch.filter(|s| s.supports(CMD_BINARY_SET)) {
        bind_binary_position(acc, &binding, cx, svc);
    }
    true
}

/// Binary-only covering: fully open or fully closed, nothing in between.
fn bind_binary_position(
    acc: &mut AccessoryWrapper,
    binding: &Arc<ServiceBinding>,
    cx: &BuilderCx<'_>,
    svc: &ServiceDescriptor,
) {
    let b = Arc::clone(binding);
    acc.add_update_handler(
        svc.name.clone(),
        Box::new(move |state| {
            if let Some(open) = state.latest_attribute("binary").and_then(|v| v.as_bool()) {
                let position: i64 = if open { 100 } else { 0 };
                b.update(Characteristic::CurrentPosition, position);
                b.update(Characteristic::TargetPosition, position);
                b.update(Characteristic::PositionState, PositionState::Stopped);
            }
        }),
    );
    binding.on_write(
        Characteristic::TargetPosition,
        write_via(cx, svc, CMD_BINARY_SET, |value| {
            let pct = expect_number(value)?;
            Ok((Value::Bool(pct != 0.0), ValueType::Bool))
        }),
    );
}
