//! Accessory registry keyed by device id.

use crate::accessory::AccessoryWrapper;
use fimp_proto::{DeviceStateUpdate, IncomingMessage};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Process-wide accessory store and inbound state dispatcher.
#[derive(Default)]
pub struct AccessoryRegistry {
    inner: RwLock<HashMap<i64, Arc<RwLock<AccessoryWrapper>>>>,
}

impl AccessoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_id: i64) -> Option<Arc<RwLock<AccessoryWrapper>>> {
        self.inner.read().unwrap().get(&device_id).cloned()
    }

    pub fn insert(&self, wrapper: AccessoryWrapper) -> Arc<RwLock<AccessoryWrapper>> {
        let device_id = wrapper.device_id();
        let entry = Arc::new(RwLock::new(wrapper));
        self.inner
            .write()
            .unwrap()
            .insert(device_id, Arc::clone(&entry));
        entry
    }

    /// Drop accessories whose device no longer exists. Returns the display
    /// names of the removed ones so the caller can log them.
    pub fn retain_devices(&self, keep: &HashSet<i64>) -> Vec<String> {
        let mut removed = Vec::new();
        self.inner.write().unwrap().retain(|device_id, entry| {
            if keep.contains(device_id) {
                true
            } else {
                removed.push(entry.read().unwrap().display_name().to_string());
                false
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }

    /// Route one device-state entry to its accessory, if bridged.
    pub fn dispatch_state(&self, update: &DeviceStateUpdate) {
        let Some(device_id) = update.id else {
            return;
        };
        if let Some(entry) = self.get(device_id) {
            entry.read().unwrap().apply_state_update(update);
        }
    }

    /// Unpack a bulk state report and dispatch every device entry.
    pub fn dispatch_report(&self, msg: &IncomingMessage) {
        let Some(devices) = msg.val.get("param").and_then(|p| p.get("devices")) else {
            return;
        };
        let updates: Vec<DeviceStateUpdate> = match serde_json::from_value(devices.clone()) {
            Ok(updates) => updates,
            Err(e) => {
                debug!(error = %e, "ignoring malformed device state report");
                return;
            }
        };
        for update in &updates {
            self.dispatch_state(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessory::{Characteristic, TargetServiceKind};
    use fimp_proto::{Device, ServiceName};
    use serde_json::json;

    fn device(id: i64, name: &str) -> Device {
        serde_json::from_value(json!({
            "id": id,
            "address": format!("/rt:dev/rn:zw/ad:1/ad:{id}_0"),
            "name": name,
            "type": {"type": "sensor"},
            "services": []
        }))
        .unwrap()
    }

    #[test]
    fn retain_reports_removed_accessories() {
        let registry = AccessoryRegistry::new();
        registry.insert(AccessoryWrapper::new(&device(1, "Keep"), "site"));
        registry.insert(AccessoryWrapper::new(&device(2, "Drop"), "site"));

        let removed = registry.retain_devices(&HashSet::from([1]));
        assert_eq!(removed, vec!["Drop".to_string()]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(1).is_some());
        assert!(registry.get(2).is_none());
    }

    #[test]
    fn bulk_report_reaches_the_right_accessory() {
        let registry = AccessoryRegistry::new();
        let entry = registry.insert(AccessoryWrapper::new(&device(9, "Sensor"), "site"));

        {
            let mut acc = entry.write().unwrap();
            let binding = acc.ensure_binding(TargetServiceKind::HumiditySensor);
            let b = Arc::clone(&binding);
            acc.add_update_handler(
                ServiceName::SensorHumid,
                Box::new(move |state| {
                    if let Some(v) = state.latest_attribute("sensor").and_then(|v| v.as_f64()) {
                        b.update(Characteristic::CurrentRelativeHumidity, v);
                    }
                }),
            );
        }

        let msg: IncomingMessage = serde_json::from_value(json!({
            "type": "evt.pd7.response",
            "val": {"param": {"devices": [
                {"id": 9, "services": [{"name": "sensor_humid", "attributes": [
                    {"name": "sensor", "values": [{"val": 51.0, "ts": "2024-03-01T10:00:00Z"}]}
                ]}]},
                {"id": 404, "services": []}
            ]}}
        }))
        .unwrap();
        registry.dispatch_report(&msg);

        let humidity = entry
            .read()
            .unwrap()
            .binding(TargetServiceKind::HumiditySensor)
            .unwrap()
            .characteristic(Characteristic::CurrentRelativeHumidity)
            .unwrap();
        assert_eq!(humidity.as_f64(), Some(51.0));
    }
}
