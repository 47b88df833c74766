//! Accessory model: per-device service bindings, characteristics, and
//! inbound state fan-out.
//!
//! The accessory host runtime is an external collaborator; this module
//! carries the in-process registry the mapping engine binds against:
//! typed characteristics, write callbacks for host-initiated writes, and
//! an insertion-ordered update-handler registry per source service.

use crate::error::{BridgeError, BridgeResult};
use fimp_proto::{Device, DeviceStateUpdate, DeviceType, ServiceName, ServiceState};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Target service kinds an accessory can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetServiceKind {
    Battery,
    ContactSensor,
    Door,
    HumiditySensor,
    LightSensor,
    Lightbulb,
    LockMechanism,
    OccupancySensor,
    SmartSpeaker,
    SmokeSensor,
    Switch,
    TemperatureSensor,
    Thermostat,
    WindowCovering,
}

/// Characteristics the bridge reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    Name,
    On,
    Brightness,
    ColorTemperature,
    BatteryLevel,
    StatusLowBattery,
    ContactSensorState,
    CurrentPosition,
    TargetPosition,
    PositionState,
    CurrentRelativeHumidity,
    CurrentAmbientLightLevel,
    LockCurrentState,
    LockTargetState,
    OccupancyDetected,
    CurrentMediaState,
    TargetMediaState,
    Volume,
    Mute,
    SmokeDetected,
    CurrentTemperature,
    TargetTemperature,
    TemperatureDisplayUnits,
    CurrentHeatingCoolingState,
    TargetHeatingCoolingState,
}

/// Value stored in (or written to) a characteristic.
#[derive(Debug, Clone, PartialEq)]
pub enum CharacteristicValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl CharacteristicValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CharacteristicValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CharacteristicValue::Int(i) => Some(*i),
            CharacteristicValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CharacteristicValue::Int(i) => Some(*i as f64),
            CharacteristicValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CharacteristicValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for CharacteristicValue {
    fn from(b: bool) -> Self {
        CharacteristicValue::Bool(b)
    }
}

impl From<i64> for CharacteristicValue {
    fn from(i: i64) -> Self {
        CharacteristicValue::Int(i)
    }
}

impl From<f64> for CharacteristicValue {
    fn from(f: f64) -> Self {
        CharacteristicValue::Float(f)
    }
}

impl From<&str> for CharacteristicValue {
    fn from(s: &str) -> Self {
        CharacteristicValue::Str(s.to_string())
    }
}

impl From<String> for CharacteristicValue {
    fn from(s: String) -> Self {
        CharacteristicValue::Str(s)
    }
}

macro_rules! state_codes {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant = $code),+
        }

        impl From<$name> for CharacteristicValue {
            fn from(v: $name) -> Self {
                CharacteristicValue::Int(v as i64)
            }
        }
    };
}

state_codes!(
    /// Low-battery threshold state.
    StatusLowBattery { Normal = 0, Low = 1 }
);
state_codes!(
    /// Contact sensor state; an open contact reads "not detected".
    ContactState { Detected = 0, NotDetected = 1 }
);
state_codes!(
    /// Occupancy sensor state.
    OccupancyState { NotDetected = 0, Detected = 1 }
);
state_codes!(
    /// Smoke sensor state.
    SmokeState { NotDetected = 0, Detected = 1 }
);
state_codes!(
    /// Lock mechanism state, current and target.
    LockState { Unsecured = 0, Secured = 1 }
);
state_codes!(
    /// Window covering motion state.
    PositionState { Decreasing = 0, Increasing = 1, Stopped = 2 }
);
state_codes!(
    /// Media playback state, current and target.
    MediaState { Play = 0, Pause = 1, Stop = 2 }
);
state_codes!(
    /// Heating/cooling state, current and target.
    HeatingCoolingState { Off = 0, Heat = 1, Cool = 2, Auto = 3 }
);
state_codes!(
    /// Temperature display unit.
    TemperatureDisplayUnit { Celsius = 0, Fahrenheit = 1 }
);

/// Callback invoked when the host writes a characteristic.
pub type WriteHandler =
    Arc<dyn Fn(CharacteristicValue) -> BoxFuture<'static, BridgeResult<()>> + Send + Sync>;

/// Handler invoked for every inbound state update of one source service.
pub type UpdateHandler = Box<dyn Fn(&ServiceState) + Send + Sync>;

/// One bound target service with its characteristic values and write
/// callbacks. Shared between the wrapper and the update handlers.
pub struct ServiceBinding {
    kind: TargetServiceKind,
    characteristics: Mutex<HashMap<Characteristic, CharacteristicValue>>,
    write_handlers: Mutex<HashMap<Characteristic, WriteHandler>>,
}

impl ServiceBinding {
    fn new(kind: TargetServiceKind) -> Self {
        Self {
            kind,
            characteristics: Mutex::new(HashMap::new()),
            write_handlers: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> TargetServiceKind {
        self.kind
    }

    /// Update a characteristic from inbound device state.
    pub fn update(&self, characteristic: Characteristic, value: impl Into<CharacteristicValue>) {
        self.characteristics
            .lock()
            .unwrap()
            .insert(characteristic, value.into());
    }

    /// Current value of a characteristic, if it has ever been set.
    pub fn characteristic(&self, characteristic: Characteristic) -> Option<CharacteristicValue> {
        self.characteristics
            .lock()
            .unwrap()
            .get(&characteristic)
            .cloned()
    }

    /// Register the callback for host-initiated writes.
    pub fn on_write(&self, characteristic: Characteristic, handler: WriteHandler) {
        self.write_handlers
            .lock()
            .unwrap()
            .insert(characteristic, handler);
    }

    /// Drop all write callbacks; called before a rebuild re-registers
    /// them against the fresh device snapshot.
    pub fn clear_write_handlers(&self) {
        self.write_handlers.lock().unwrap().clear();
    }

    /// Host-initiated characteristic write.
    pub async fn write(
        &self,
        characteristic: Characteristic,
        value: CharacteristicValue,
    ) -> BridgeResult<()> {
        let handler = self
            .write_handlers
            .lock()
            .unwrap()
            .get(&characteristic)
            .cloned();
        match handler {
            Some(handler) => handler(value).await,
            None => Err(BridgeError::Communication(format!(
                "characteristic {characteristic:?} is not writable"
            ))),
        }
    }
}

/// Static accessory information surfaced to the host.
#[derive(Debug, Clone)]
pub struct AccessoryInformation {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_revision: String,
}

/// One accessory per bridged device.
///
/// Owns the target service bindings and the per-source-service update
/// handler registry. Handlers run in registration order; order matters
/// only for effect, not precedence.
pub struct AccessoryWrapper {
    device_id: i64,
    accessory_id: String,
    display_name: String,
    device_type: Option<DeviceType>,
    information: AccessoryInformation,
    bindings: HashMap<TargetServiceKind, Arc<ServiceBinding>>,
    handlers: HashMap<ServiceName, Vec<UpdateHandler>>,
}

impl AccessoryWrapper {
    pub fn new(device: &Device, household_id: &str) -> Self {
        let mut wrapper = Self {
            device_id: device.id,
            accessory_id: format!("{}@{}", device.id, household_id),
            display_name: String::new(),
            device_type: None,
            information: AccessoryInformation {
                manufacturer: "fimp-bridge".to_string(),
                model: String::new(),
                serial_number: String::new(),
                firmware_revision: env!("CARGO_PKG_VERSION").to_string(),
            },
            bindings: HashMap::new(),
            handlers: HashMap::new(),
        };
        wrapper.refresh_identity(device);
        wrapper
    }

    /// Refresh the display name and static information from a new device
    /// snapshot; bindings and handlers are untouched.
    pub fn refresh_identity(&mut self, device: &Device) {
        let device_type = device.device_type().cloned();
        self.display_name = device.display_name().to_string();
        self.device_type = device_type.clone();
        self.information.model = device.effective_model().unwrap_or_default().to_string();
        self.information.serial_number = format!(
            "id: {}, address: {}, type: {}",
            device.id,
            device.address,
            device_type.map(|t| t.to_string()).unwrap_or_default()
        );
    }

    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    pub fn accessory_id(&self) -> &str {
        &self.accessory_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn device_type(&self) -> Option<&DeviceType> {
        self.device_type.as_ref()
    }

    pub fn information(&self) -> &AccessoryInformation {
        &self.information
    }

    /// The binding for a target service kind, if currently bound.
    pub fn binding(&self, kind: TargetServiceKind) -> Option<Arc<ServiceBinding>> {
        self.bindings.get(&kind).cloned()
    }

    /// Reuse the persisted binding for `kind` or create a fresh one.
    pub fn ensure_binding(&mut self, kind: TargetServiceKind) -> Arc<ServiceBinding> {
        Arc::clone(
            self.bindings
                .entry(kind)
                .or_insert_with(|| Arc::new(ServiceBinding::new(kind))),
        )
    }

    /// Remove a binding whose preconditions no longer hold. Returns
    /// whether a binding was actually present.
    pub fn remove_binding(&mut self, kind: TargetServiceKind) -> bool {
        self.bindings.remove(&kind).is_some()
    }

    /// Kinds currently bound.
    pub fn bound_kinds(&self) -> Vec<TargetServiceKind> {
        self.bindings.keys().copied().collect()
    }

    /// Register an update handler for a source service. Handlers stack;
    /// all of them run for every update of that service.
    pub fn add_update_handler(&mut self, service: ServiceName, handler: UpdateHandler) {
        self.handlers.entry(service).or_default().push(handler);
    }

    /// Drop all update handlers and write callbacks ahead of a rebuild.
    pub fn reset_for_rebuild(&mut self) {
        self.handlers.clear();
        for binding in self.bindings.values() {
            binding.clear_write_handlers();
        }
    }

    /// Fan an inbound device-state update out to every handler registered
    /// for each reported service.
    pub fn apply_state_update(&self, update: &DeviceStateUpdate) {
        for service_state in &update.services {
            if let Some(handlers) = self.handlers.get(&service_state.name) {
                for handler in handlers {
                    handler(service_state);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn device() -> Device {
        serde_json::from_value(json!({
            "id": 7,
            "address": "/rt:dev/rn:zw/ad:1/ad:7_0",
            "name": "Office lamp",
            "model": "dimmer_2",
            "type": {"type": "light"},
            "services": []
        }))
        .unwrap()
    }

    #[test]
    fn accessory_id_is_deterministic() {
        let a = AccessoryWrapper::new(&device(), "site-1");
        let b = AccessoryWrapper::new(&device(), "site-1");
        assert_eq!(a.accessory_id(), b.accessory_id());
        assert_eq!(a.accessory_id(), "7@site-1");
    }

    #[test]
    fn bindings_are_reused_across_ensure_calls() {
        let mut acc = AccessoryWrapper::new(&device(), "site-1");
        let first = acc.ensure_binding(TargetServiceKind::Lightbulb);
        let second = acc.ensure_binding(TargetServiceKind::Lightbulb);
        assert!(Arc::ptr_eq(&first, &second));

        assert!(acc.remove_binding(TargetServiceKind::Lightbulb));
        assert!(!acc.remove_binding(TargetServiceKind::Lightbulb));
        assert!(acc.binding(TargetServiceKind::Lightbulb).is_none());
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let mut acc = AccessoryWrapper::new(&device(), "site-1");
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let order = Arc::clone(&order);
            acc.add_update_handler(
                ServiceName::MediaPlayer,
                Box::new(move |_| order.lock().unwrap().push(tag)),
            );
        }

        let update: DeviceStateUpdate = serde_json::from_value(json!({
            "id": 7,
            "services": [{"name": "media_player", "attributes": []}]
        }))
        .unwrap();
        acc.apply_state_update(&update);

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn updates_for_unhandled_services_are_ignored() {
        let mut acc = AccessoryWrapper::new(&device(), "site-1");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        acc.add_update_handler(
            ServiceName::Battery,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let update: DeviceStateUpdate = serde_json::from_value(json!({
            "id": 7,
            "services": [{"name": "sensor_temp", "attributes": []}]
        }))
        .unwrap();
        acc.apply_state_update(&update);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn writes_without_a_handler_fail_as_communication() {
        let mut acc = AccessoryWrapper::new(&device(), "site-1");
        let binding = acc.ensure_binding(TargetServiceKind::Switch);
        let result = binding
            .write(Characteristic::On, CharacteristicValue::Bool(true))
            .await;
        assert!(matches!(result, Err(BridgeError::Communication(_))));
    }
}
