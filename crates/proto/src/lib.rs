//! FIMP protocol primitives.
//!
//! Wire-level types shared across the bridge: the outbound command
//! envelope and inbound message shape, topic construction, the device and
//! service descriptors returned by discovery, and the attribute model
//! carried by device-state reports. No I/O lives here.

pub mod device;
pub mod message;
pub mod range;
pub mod state;

pub use device::{Device, DeviceType, ServiceDescriptor, ServiceName, ServiceProps};
pub use message::{
    cmd_topic, evt_topic, expected_report_type, CommandEnvelope, IncomingMessage, ValueType,
    ERROR_REPORT_TYPE, EVENT_PREFIX, RESPONSE_TOPIC, SOURCE_CLIENT_ID, STATE_REPORT_TYPE,
};
pub use range::map_range;
pub use state::{latest, Attribute, AttributeValue, DeviceStateUpdate, ServiceState};
