//! GPU telemetry.
//!
//! The sampler never talks to a vendor library directly. It owns a
//! [`GpuStatsCollector`], which drives a [`GpuBackend`] chosen at runtime by
//! [`backend_for_host`]. When no backend can be loaded the collector degrades
//! to reporting no GPUs for the rest of the process lifetime.

mod collector;
pub mod nvml;

use serde::Serialize;
use tracing::debug;

pub use collector::GpuStatsCollector;
pub use nvml::NvmlBackend;

/// Opaque device handle issued by a backend.
///
/// Only meaningful to the backend instance that returned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device(usize);

impl Device {
    pub fn from_raw(raw: usize) -> Self {
        Device(raw)
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

/// Device memory, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// Utilisation over the driver's last sample period, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Utilization {
    pub compute_percent: u32,
    pub memory_percent: u32,
}

/// Usage of one GPU in a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GpuUsage {
    /// Device index as enumerated by the backend.
    pub index: u32,
    pub gpu_percent: f64,
    pub memory_percent: f64,
}

/// Share of device memory in use; zero when the total is unknown.
pub fn memory_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    used as f64 / total as f64 * 100.0
}

/// Failure reported by a GPU backend.
///
/// Variants mirror the status codes of the NVIDIA management library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    Uninitialized,
    InvalidArgument,
    NotSupported,
    NoPermission,
    AlreadyInitialized,
    NotFound,
    InsufficientSize,
    InsufficientPower,
    DriverNotLoaded,
    Timeout,
    IrqIssue,
    LibraryNotFound,
    FunctionNotFound,
    CorruptedInforom,
    GpuIsLost,
    ResetRequired,
    OperatingSystem,
    LibRmVersionMismatch,
    InUse,
    Memory,
    NoData,
    VgpuEccNotSupported,
    Unknown,
    /// A status code outside the documented set.
    Unrecognized(i32),
}

impl BackendError {
    /// Maps a non-zero status code to its error.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => BackendError::Uninitialized,
            2 => BackendError::InvalidArgument,
            3 => BackendError::NotSupported,
            4 => BackendError::NoPermission,
            5 => BackendError::AlreadyInitialized,
            6 => BackendError::NotFound,
            7 => BackendError::InsufficientSize,
            8 => BackendError::InsufficientPower,
            9 => BackendError::DriverNotLoaded,
            10 => BackendError::Timeout,
            11 => BackendError::IrqIssue,
            12 => BackendError::LibraryNotFound,
            13 => BackendError::FunctionNotFound,
            14 => BackendError::CorruptedInforom,
            15 => BackendError::GpuIsLost,
            16 => BackendError::ResetRequired,
            17 => BackendError::OperatingSystem,
            18 => BackendError::LibRmVersionMismatch,
            19 => BackendError::InUse,
            20 => BackendError::Memory,
            21 => BackendError::NoData,
            22 => BackendError::VgpuEccNotSupported,
            999 => BackendError::Unknown,
            other => BackendError::Unrecognized(other),
        }
    }

    /// `Ok` for status 0, the matching error otherwise.
    pub fn check(code: i32) -> Result<(), BackendError> {
        if code == 0 {
            Ok(())
        } else {
            Err(BackendError::from_code(code))
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            BackendError::Uninitialized => "library was not first initialized",
            BackendError::InvalidArgument => "a supplied argument is invalid",
            BackendError::NotSupported => "the requested operation is not available on target device",
            BackendError::NoPermission => "the current user does not have permission for operation",
            BackendError::AlreadyInitialized => "library already initialized",
            BackendError::NotFound => "a query to find an object was unsuccessful",
            BackendError::InsufficientSize => "an input argument is not large enough",
            BackendError::InsufficientPower => "a device's external power cables are not properly attached",
            BackendError::DriverNotLoaded => "NVIDIA driver is not loaded",
            BackendError::Timeout => "user provided timeout passed",
            BackendError::IrqIssue => "NVIDIA kernel detected an interrupt issue with a GPU",
            BackendError::LibraryNotFound => "NVML shared library couldn't be found or loaded",
            BackendError::FunctionNotFound => "local version of NVML doesn't implement this function",
            BackendError::CorruptedInforom => "infoROM is corrupted",
            BackendError::GpuIsLost => "the GPU has fallen off the bus or has otherwise become inaccessible",
            BackendError::ResetRequired => "the GPU requires a reset before it can be used again",
            BackendError::OperatingSystem => "the GPU control device has been blocked by the operating system",
            BackendError::LibRmVersionMismatch => "RM detects a driver/library version mismatch",
            BackendError::InUse => "an operation cannot be performed because the GPU is currently in use",
            BackendError::Memory => "insufficient memory",
            BackendError::NoData => "no data",
            BackendError::VgpuEccNotSupported => {
                "the requested vgpu operation is not available on target device, because ECC is enabled"
            }
            BackendError::Unknown => "an internal driver error occurred",
            BackendError::Unrecognized(code) => return write!(f, "unrecognized status code {}", code),
        };
        f.write_str(msg)
    }
}

impl std::error::Error for BackendError {}

/// Narrow hardware telemetry interface, one implementation per platform.
///
/// `shutdown` must be harmless when `init` never succeeded.
pub trait GpuBackend: Send {
    fn init(&mut self) -> Result<(), BackendError>;
    fn device_count(&self) -> Result<u32, BackendError>;
    fn device_handle(&self, index: u32) -> Result<Device, BackendError>;
    fn memory_info(&self, device: Device) -> Result<MemoryInfo, BackendError>;
    fn utilization(&self, device: Device) -> Result<Utilization, BackendError>;
    fn shutdown(&mut self) -> Result<(), BackendError>;
}

/// Backend for hosts without a usable GPU library.
///
/// `init` reports why the real backend could not be built. Every query after
/// that answers "no devices".
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    reason: BackendError,
}

impl UnavailableBackend {
    pub fn new(reason: BackendError) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> BackendError {
        self.reason
    }
}

impl GpuBackend for UnavailableBackend {
    fn init(&mut self) -> Result<(), BackendError> {
        Err(self.reason)
    }

    fn device_count(&self) -> Result<u32, BackendError> {
        Ok(0)
    }

    fn device_handle(&self, _index: u32) -> Result<Device, BackendError> {
        Err(BackendError::NotFound)
    }

    fn memory_info(&self, _device: Device) -> Result<MemoryInfo, BackendError> {
        Err(BackendError::Uninitialized)
    }

    fn utilization(&self, _device: Device) -> Result<Utilization, BackendError> {
        Err(BackendError::Uninitialized)
    }

    fn shutdown(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Picks the GPU backend for the platform this process runs on.
///
/// Never fails: a library that cannot be loaded yields an
/// [`UnavailableBackend`].
pub fn backend_for_host() -> Box<dyn GpuBackend> {
    let loaded = if cfg!(windows) {
        NvmlBackend::windows()
    } else {
        NvmlBackend::linux()
    };

    match loaded {
        Ok(backend) => Box::new(backend),
        Err(e) => {
            debug!("GPU library not loaded: {}", e);
            Box::new(UnavailableBackend::new(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_taxonomy() {
        assert_eq!(BackendError::check(0), Ok(()));
        assert_eq!(BackendError::from_code(1), BackendError::Uninitialized);
        assert_eq!(BackendError::from_code(12), BackendError::LibraryNotFound);
        assert_eq!(BackendError::from_code(22), BackendError::VgpuEccNotSupported);
        assert_eq!(BackendError::from_code(999), BackendError::Unknown);
        assert_eq!(BackendError::from_code(42), BackendError::Unrecognized(42));
        assert_eq!(BackendError::check(9), Err(BackendError::DriverNotLoaded));
    }

    #[test]
    fn backend_error_display() {
        assert_eq!(
            BackendError::DriverNotLoaded.to_string(),
            "NVIDIA driver is not loaded"
        );
        assert_eq!(
            BackendError::Unrecognized(77).to_string(),
            "unrecognized status code 77"
        );
    }

    #[test]
    fn memory_percent_guards_zero_total() {
        assert_eq!(memory_percent(50, 100), 50.0);
        assert_eq!(memory_percent(0, 0), 0.0);
        assert_eq!(memory_percent(10, 0), 0.0);
    }

    #[test]
    fn unavailable_backend_reports_no_devices() {
        let mut backend = UnavailableBackend::new(BackendError::LibraryNotFound);
        assert_eq!(backend.init(), Err(BackendError::LibraryNotFound));
        assert_eq!(backend.device_count(), Ok(0));
        assert!(backend.device_handle(0).is_err());
        assert_eq!(backend.shutdown(), Ok(()));
        assert_eq!(backend.shutdown(), Ok(()));
    }

    #[test]
    fn device_handle_is_opaque_roundtrip() {
        let device = Device::from_raw(0xdead_beef);
        assert_eq!(device.raw(), 0xdead_beef);
    }
}
