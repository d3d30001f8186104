//! Minimum-requirement check for local inference

use super::hardware::{AcceleratorLimits, DeviceHints};
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Devices reporting less memory than this are unsupported (4 GiB)
pub const MIN_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Devices reporting fewer logical cores than this are unsupported
pub const MIN_LOGICAL_CORES: usize = 4;

/// Storage binding size the inference runtime may request (1 GiB)
pub const REQUIRED_STORAGE_BUFFER_BINDING_SIZE: u64 = 1024 * 1024 * 1024;

/// Workgroup storage the inference runtime may request
pub const REQUIRED_WORKGROUP_STORAGE_SIZE: u64 = 32768;

/// Why a device falls short of a requirement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RequirementFailure {
    /// No accelerated compute API; logged, but not disqualifying
    NoAccelerator,
    LowMemory { gib: f64 },
    LowCpuCores { cores: usize },
}

impl RequirementFailure {
    /// Whether this failure alone makes the device unsupported
    pub fn is_blocking(&self) -> bool {
        !matches!(self, RequirementFailure::NoAccelerator)
    }
}

impl fmt::Display for RequirementFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequirementFailure::NoAccelerator => write!(f, "no_accelerator"),
            RequirementFailure::LowMemory { gib } => write!(f, "low_memory_{:.1}", gib),
            RequirementFailure::LowCpuCores { cores } => write!(f, "low_cpu_cores_{}", cores),
        }
    }
}

/// Outcome of the capability probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityReport {
    pub supported: bool,
    pub reasons: Vec<RequirementFailure>,
}

/// Checks device hints against the minimum requirements
///
/// Pure and synchronous. Memory and core counts below the minimums make the
/// device unsupported; a missing accelerator is only a warning. Hints the
/// runtime does not expose are treated as passing.
pub fn probe(hints: &DeviceHints) -> CapabilityReport {
    let mut reasons = Vec::new();

    if hints.accelerator == Some(false) {
        warn!("Accelerated compute API not available");
        reasons.push(RequirementFailure::NoAccelerator);
    }

    if let Some(bytes) = hints.memory_bytes {
        if bytes < MIN_MEMORY_BYTES {
            warn!("Insufficient memory for local inference");
            reasons.push(RequirementFailure::LowMemory {
                gib: bytes as f64 / (1024.0 * 1024.0 * 1024.0),
            });
        }
    }

    if let Some(cores) = hints.logical_cores {
        if cores < MIN_LOGICAL_CORES {
            warn!("Insufficient CPU cores for local inference");
            reasons.push(RequirementFailure::LowCpuCores { cores });
        }
    }

    let supported = !reasons.iter().any(RequirementFailure::is_blocking);
    CapabilityReport { supported, reasons }
}

impl AcceleratorLimits {
    /// Whether the adapter can satisfy the runtime's largest allocations
    ///
    /// When it cannot, the background-worker strategy is skipped and loading
    /// goes straight to the main-thread strategies.
    pub fn sufficient(&self) -> bool {
        self.max_storage_buffer_binding_size >= REQUIRED_STORAGE_BUFFER_BINDING_SIZE
            && self.max_compute_workgroup_storage_size >= REQUIRED_WORKGROUP_STORAGE_SIZE
    }
}
