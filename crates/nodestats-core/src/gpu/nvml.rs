//! NVIDIA management library binding.
//!
//! The library is loaded at runtime with `libloading`, so hosts without the
//! driver still run the agent. All FFI stays in this file.

use std::ffi::{OsStr, c_int, c_uint, c_ulonglong, c_void};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use libloading::Library;
use tracing::{debug, warn};

use super::{BackendError, Device, GpuBackend, MemoryInfo, Utilization};

/// Set while an [`NvmlBackend`] holds the library.
static LIBRARY_HELD: AtomicBool = AtomicBool::new(false);

type NvmlDevice = *mut c_void;

#[repr(C)]
#[derive(Default)]
struct NvmlMemory {
    total: c_ulonglong,
    free: c_ulonglong,
    used: c_ulonglong,
}

#[repr(C)]
#[derive(Default)]
struct NvmlUtilization {
    gpu: c_uint,
    memory: c_uint,
}

type InitFn = unsafe extern "C" fn() -> c_int;
type ShutdownFn = unsafe extern "C" fn() -> c_int;
type DeviceCountFn = unsafe extern "C" fn(*mut c_uint) -> c_int;
type HandleByIndexFn = unsafe extern "C" fn(c_uint, *mut NvmlDevice) -> c_int;
type MemoryInfoFn = unsafe extern "C" fn(NvmlDevice, *mut NvmlMemory) -> c_int;
type UtilizationFn = unsafe extern "C" fn(NvmlDevice, *mut NvmlUtilization) -> c_int;

/// Resolved entry points. The function pointers stay valid as long as
/// `_library` is alive.
struct Api {
    init: InitFn,
    shutdown: ShutdownFn,
    device_count: DeviceCountFn,
    handle_by_index: HandleByIndexFn,
    memory_info: MemoryInfoFn,
    utilization: UtilizationFn,
    _library: Library,
}

impl Api {
    fn load(path: &OsStr) -> Result<Self, BackendError> {
        let library = unsafe { Library::new(path) }.map_err(|e| {
            debug!("failed to load {:?}: {}", path, e);
            BackendError::LibraryNotFound
        })?;

        Ok(Self {
            init: symbol(&library, b"nvmlInit_v2\0")?,
            shutdown: symbol(&library, b"nvmlShutdown\0")?,
            device_count: symbol(&library, b"nvmlDeviceGetCount_v2\0")?,
            handle_by_index: symbol(&library, b"nvmlDeviceGetHandleByIndex_v2\0")?,
            memory_info: symbol(&library, b"nvmlDeviceGetMemoryInfo\0")?,
            utilization: symbol(&library, b"nvmlDeviceGetUtilizationRates\0")?,
            _library: library,
        })
    }
}

fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T, BackendError> {
    // SAFETY: T is one of the function pointer types above, matching the
    // documented NVML signature for `name`.
    let sym = unsafe { library.get::<T>(name) }.map_err(|e| {
        debug!("missing NVML symbol: {}", e);
        BackendError::FunctionNotFound
    })?;
    Ok(*sym)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Loaded,
    Initialized,
    ShutDown,
}

/// [`GpuBackend`] backed by `libnvidia-ml` / `nvml.dll`.
///
/// At most one instance exists per process; constructing a second one while
/// the first is alive fails with [`BackendError::InUse`].
pub struct NvmlBackend {
    api: Api,
    state: State,
}

impl NvmlBackend {
    /// Loads `libnvidia-ml.so.1` from the dynamic linker search path.
    pub fn linux() -> Result<Self, BackendError> {
        Self::from_path("libnvidia-ml.so.1")
    }

    /// Loads `nvml.dll` from the NVSMI directory under Program Files.
    pub fn windows() -> Result<Self, BackendError> {
        let program_files =
            std::env::var_os("ProgramW6432").unwrap_or_else(|| "C:\\Program Files".into());
        let mut path = PathBuf::from(program_files);
        path.push("NVIDIA Corporation");
        path.push("NVSMI");
        path.push("nvml.dll");
        Self::from_path(path.as_os_str())
    }

    pub fn from_path(path: impl AsRef<OsStr>) -> Result<Self, BackendError> {
        if LIBRARY_HELD
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BackendError::InUse);
        }

        match Api::load(path.as_ref()) {
            Ok(api) => Ok(Self {
                api,
                state: State::Loaded,
            }),
            Err(e) => {
                LIBRARY_HELD.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn ensure_initialized(&self) -> Result<(), BackendError> {
        if self.state == State::Initialized {
            Ok(())
        } else {
            Err(BackendError::Uninitialized)
        }
    }
}

impl GpuBackend for NvmlBackend {
    fn init(&mut self) -> Result<(), BackendError> {
        match self.state {
            State::Initialized => Ok(()),
            State::ShutDown => Err(BackendError::Uninitialized),
            State::Loaded => {
                BackendError::check(unsafe { (self.api.init)() })?;
                self.state = State::Initialized;
                Ok(())
            }
        }
    }

    fn device_count(&self) -> Result<u32, BackendError> {
        if self.state != State::Initialized {
            return Ok(0);
        }
        let mut count: c_uint = 0;
        BackendError::check(unsafe { (self.api.device_count)(&mut count) })?;
        Ok(count)
    }

    fn device_handle(&self, index: u32) -> Result<Device, BackendError> {
        self.ensure_initialized()?;
        let mut handle: NvmlDevice = std::ptr::null_mut();
        BackendError::check(unsafe { (self.api.handle_by_index)(index, &mut handle) })?;
        Ok(Device::from_raw(handle as usize))
    }

    fn memory_info(&self, device: Device) -> Result<MemoryInfo, BackendError> {
        self.ensure_initialized()?;
        let mut memory = NvmlMemory::default();
        BackendError::check(unsafe {
            (self.api.memory_info)(device.raw() as NvmlDevice, &mut memory)
        })?;
        Ok(MemoryInfo {
            total: memory.total,
            used: memory.used,
            free: memory.free,
        })
    }

    fn utilization(&self, device: Device) -> Result<Utilization, BackendError> {
        self.ensure_initialized()?;
        let mut rates = NvmlUtilization::default();
        BackendError::check(unsafe {
            (self.api.utilization)(device.raw() as NvmlDevice, &mut rates)
        })?;
        Ok(Utilization {
            compute_percent: rates.gpu,
            memory_percent: rates.memory,
        })
    }

    fn shutdown(&mut self) -> Result<(), BackendError> {
        let previous = std::mem::replace(&mut self.state, State::ShutDown);
        if previous == State::Initialized {
            BackendError::check(unsafe { (self.api.shutdown)() })?;
        }
        Ok(())
    }
}

impl Drop for NvmlBackend {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("NVML shutdown failed: {}", e);
        }
        LIBRARY_HELD.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_not_found_and_releases_guard() {
        for _ in 0..2 {
            let result = NvmlBackend::from_path("/nonexistent/libnvidia-ml.so.1");
            assert!(matches!(result, Err(BackendError::LibraryNotFound)));
        }
        assert!(!LIBRARY_HELD.load(Ordering::Acquire));
    }

    #[test]
    fn ffi_structs_match_c_layout() {
        assert_eq!(std::mem::size_of::<NvmlMemory>(), 24);
        assert_eq!(std::mem::size_of::<NvmlUtilization>(), 8);
    }
}
