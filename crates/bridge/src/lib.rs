//! FIMP → accessory-model bridge runtime.
//!
//! Bridges a household's cloud-connected devices to a standardized
//! smart-home accessory model:
//!
//! - **identity** authenticates against the cloud and discovers devices.
//! - **mapping** turns each device's service descriptors into accessory
//!   service bindings with bidirectional sync handlers.
//! - **session** owns the MQTT-over-websocket connection lifecycle with
//!   overlap-safe hand-off between resync cycles.
//! - **correlator** matches outbound commands to their responses on the
//!   shared inbound stream.
//! - **platform** ties the pieces together and runs the periodic loops.

pub mod accessory;
pub mod config;
pub mod correlator;
pub mod error;
pub mod hub;
pub mod identity;
pub mod mapping;
pub mod platform;
pub mod registry;
pub mod session;
pub mod testing;
pub mod transport;

pub use accessory::{
    AccessoryWrapper, Characteristic, CharacteristicValue, ServiceBinding, TargetServiceKind,
};
pub use config::BridgeConfig;
pub use correlator::{CorrelationTable, FimpCommander, FimpRequest};
pub use error::{BridgeError, BridgeResult};
pub use platform::Platform;
pub use registry::AccessoryRegistry;
pub use session::SessionManager;
pub use transport::{decode_frame, FimpConnection, MessagePublisher, SessionPhase};
