//! Device capability probing
//!
//! Decides, before any engine exists, whether local inference should be
//! attempted at all on this device.

mod hardware;
mod probe;

pub use hardware::{AcceleratorLimits, DeviceHints, HardwareDetector};
pub use probe::{
    probe, CapabilityReport, RequirementFailure, MIN_LOGICAL_CORES, MIN_MEMORY_BYTES,
    REQUIRED_STORAGE_BUFFER_BINDING_SIZE, REQUIRED_WORKGROUP_STORAGE_SIZE,
};
