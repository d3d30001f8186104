//! Hardware hint detection for local inference

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, info};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Limits reported by the accelerated compute adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceleratorLimits {
    /// Largest storage buffer that can be bound, in bytes
    pub max_storage_buffer_binding_size: u64,
    /// Largest workgroup shared storage, in bytes
    pub max_compute_workgroup_storage_size: u64,
}

/// Runtime hints about the device
///
/// Every field is optional: `None` means the runtime does not expose that
/// information, and a missing hint never counts against the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceHints {
    /// Device memory in bytes
    pub memory_bytes: Option<u64>,
    /// Number of logical CPU cores
    pub logical_cores: Option<usize>,
    /// Whether an accelerated compute API is present
    pub accelerator: Option<bool>,
    /// Adapter limits, when an accelerator could be queried
    pub accelerator_limits: Option<AcceleratorLimits>,
}

impl DeviceHints {
    /// Returns memory in gigabytes, if known
    pub fn memory_gb(&self) -> Option<f64> {
        self.memory_bytes.map(|bytes| bytes as f64 / GIB)
    }

    pub fn with_memory_gb(mut self, gb: f64) -> Self {
        self.memory_bytes = Some((gb * GIB) as u64);
        self
    }

    pub fn with_logical_cores(mut self, cores: usize) -> Self {
        self.logical_cores = Some(cores);
        self
    }

    pub fn with_accelerator(mut self, present: bool) -> Self {
        self.accelerator = Some(present);
        self
    }

    pub fn with_accelerator_limits(mut self, limits: AcceleratorLimits) -> Self {
        self.accelerator_limits = Some(limits);
        self
    }
}

/// Detects hardware hints for the current machine
pub struct HardwareDetector;

impl HardwareDetector {
    /// Reads total memory, logical cores and accelerator presence
    ///
    /// Accelerator limits are not queried from the host and stay `None`; the
    /// worker then keeps its place in the load plan. Embedders that know the
    /// limits attach them with [`DeviceHints::with_accelerator_limits`].
    pub fn detect() -> DeviceHints {
        let mut sys = System::new_all();
        sys.refresh_all();

        let memory_bytes = Some(sys.total_memory()).filter(|bytes| *bytes > 0);
        let logical_cores = Some(sys.cpus().len()).filter(|cores| *cores > 0);
        let accelerator = Self::detect_accelerator();

        let hints = DeviceHints {
            memory_bytes,
            logical_cores,
            accelerator,
            accelerator_limits: None,
        };

        info!(
            "Hardware detected: {} RAM, {} cores, accelerator: {}",
            hints
                .memory_gb()
                .map(|gb| format!("{:.1}GB", gb))
                .unwrap_or_else(|| "unknown".to_string()),
            hints
                .logical_cores
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            match hints.accelerator {
                Some(true) => "yes",
                Some(false) => "no",
                None => "unknown",
            }
        );
        debug!("Device hints: {:?}", hints);

        hints
    }

    #[cfg(target_os = "linux")]
    fn detect_accelerator() -> Option<bool> {
        const DEVICE_NODES: [&str; 3] = ["/dev/nvidia0", "/dev/kfd", "/dev/dri/renderD128"];
        let found = DEVICE_NODES
            .iter()
            .any(|node| std::path::Path::new(node).exists());
        debug!("GPU device node present: {}", found);
        Some(found)
    }

    #[cfg(target_os = "macos")]
    fn detect_accelerator() -> Option<bool> {
        // Metal is available on every supported macOS release
        Some(true)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn detect_accelerator() -> Option<bool> {
        debug!("Accelerator detection not implemented for this platform");
        None
    }
}
