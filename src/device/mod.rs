//! Device models, builtin types, and the registry/dispatcher layer.

pub mod builtin;
pub mod model;
pub mod registry;

pub use model::{CommandRequest, CommandSpec, DeviceModel, Domain, EventInfo};
pub use registry::{DeviceInstance, Dispatcher, LivenessEvent, NewDevice, Registry};
