//! Device and service descriptors as returned by discovery.
//!
//! A [`Device`] is an immutable snapshot of one discovery cycle: identity,
//! a type tag, and the list of services the device exposes. Snapshots are
//! replaced wholesale on resync, never patched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use strum::{Display, EnumString};

/// Command interface advertised on a level or binary switch.
pub const CMD_BINARY_SET: &str = "cmd.binary.set";
/// Command interface for setting a dim/position level.
pub const CMD_LVL_SET: &str = "cmd.lvl.set";
/// Command interface for thermostat setpoints.
pub const CMD_SETPOINT_SET: &str = "cmd.setpoint.set";
/// Command interface for thermostat modes.
pub const CMD_MODE_SET: &str = "cmd.mode.set";
/// Command interface for color channels.
pub const CMD_COLOR_SET: &str = "cmd.color.set";

/// Device type tag from the discovery tree.
///
/// The cloud vocabulary grows over time; unrecognized tags are preserved
/// in `Other` rather than failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DeviceType {
    Appliance,
    Battery,
    Blinds,
    Boiler,
    Chargepoint,
    DoorLock,
    Fan,
    FireDetector,
    GarageDoor,
    GasDetector,
    Gate,
    HeatDetector,
    HeatPump,
    Heater,
    Input,
    LeakDetector,
    Light,
    MediaPlayer,
    Meter,
    PowerRegulator,
    Sensor,
    Siren,
    Thermostat,
    WaterValve,
    #[strum(default)]
    Other(String),
}

impl From<String> for DeviceType {
    fn from(s: String) -> Self {
        DeviceType::from_str(&s).unwrap_or(DeviceType::Other(s))
    }
}

impl From<DeviceType> for String {
    fn from(t: DeviceType) -> Self {
        t.to_string()
    }
}

impl Serialize for DeviceType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(DeviceType::from(String::deserialize(deserializer)?))
    }
}

/// FIMP service name vocabulary.
///
/// Covers every service the cloud currently reports; unknown names land in
/// `Other` so a vocabulary addition never breaks discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ServiceName {
    AlarmAppliance,
    AlarmBurglar,
    AlarmEmergency,
    AlarmFire,
    AlarmGas,
    AlarmHealth,
    AlarmHeat,
    AlarmLock,
    AlarmPower,
    AlarmSiren,
    AlarmSystem,
    AlarmTime,
    AlarmWater,
    AlarmWaterValve,
    AlarmWeather,
    BarrierCtrl,
    Basic,
    Battery,
    Chargepoint,
    Clbridge,
    ColorCtrl,
    ComplexAlarmSystem,
    DevSys,
    DoorLock,
    Doorman,
    FanCtrl,
    Gateway,
    MediaPlayer,
    MeterElec,
    MeterGas,
    MeterWater,
    Ota,
    OutBinSwitch,
    OutLvlSwitch,
    Parameters,
    PowerRegulator,
    SceneCtrl,
    SensorAccelx,
    SensorAccely,
    SensorAccelz,
    SensorAirflow,
    SensorAnglepos,
    SensorAtmo,
    SensorBaro,
    SensorCo,
    SensorCo2,
    SensorContact,
    SensorCurrent,
    SensorDew,
    SensorDirect,
    SensorDistance,
    SensorElresist,
    SensorFreq,
    SensorGp,
    SensorGust,
    SensorHumid,
    SensorLumin,
    SensorMoist,
    SensorNoise,
    SensorPower,
    SensorPresence,
    SensorRain,
    SensorRotation,
    SensorSeismicint,
    SensorSeismicmag,
    SensorSolarrad,
    SensorTank,
    SensorTemp,
    SensorTidelvl,
    SensorUv,
    SensorVeloc,
    SensorVoltage,
    SensorWatflow,
    SensorWatpressure,
    SensorWattemp,
    SensorWeight,
    SensorWind,
    SirenCtrl,
    Thermostat,
    UserCode,
    Vinculum,
    VirtualMeterElec,
    WaterHeater,
    #[strum(default)]
    Other(String),
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        ServiceName::from_str(&s).unwrap_or(ServiceName::Other(s))
    }
}

impl From<ServiceName> for String {
    fn from(n: ServiceName) -> Self {
        n.to_string()
    }
}

impl Serialize for ServiceName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ServiceName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(ServiceName::from(String::deserialize(deserializer)?))
    }
}

/// Properties bag attached to a service descriptor.
///
/// Numeric bounds and supported-value lists are sparse; anything the
/// bridge does not interpret is kept in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_lvl: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_lvl: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sup_modes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sup_setpoints: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sup_states: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sup_components: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ServiceProps {
    /// Whether `sup_components` lists the given color component.
    pub fn has_component(&self, component: &str) -> bool {
        self.sup_components
            .as_ref()
            .is_some_and(|c| c.iter().any(|e| e == component))
    }
}

/// One service exposed by a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: ServiceName,
    pub address: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub props: ServiceProps,
}

fn default_enabled() -> bool {
    true
}

impl ServiceDescriptor {
    /// Whether the service advertises the given command interface.
    pub fn supports(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }

    /// Level bounds, present only when both ends are reported.
    pub fn level_bounds(&self) -> Option<(i64, i64)> {
        Some((self.props.min_lvl?, self.props.max_lvl?))
    }
}

/// Device type tag as nested in the discovery tree (`type.type`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceTypeTag {
    #[serde(rename = "type", default)]
    pub kind: Option<DeviceType>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Discovery snapshot of one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(rename = "modelAlias", default)]
    pub model_alias: Option<String>,
    #[serde(rename = "type", default)]
    pub type_tag: DeviceTypeTag,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

impl Device {
    /// The device type tag, when reported.
    pub fn device_type(&self) -> Option<&DeviceType> {
        self.type_tag.kind.as_ref()
    }

    /// Whether the device carries the given type tag.
    pub fn is_type(&self, t: &DeviceType) -> bool {
        self.device_type() == Some(t)
    }

    /// First service with the given name, if any.
    pub fn service(&self, name: &ServiceName) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| &s.name == name)
    }

    /// Display name shown on accessories.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Model alias when set, plain model otherwise.
    pub fn effective_model(&self) -> Option<&str> {
        self.model_alias.as_deref().or(self.model.as_deref())
    }
}
