use std::sync::Arc;

use async_trait::async_trait;
use nvml_wrapper::Nvml;

use super::MemoryProbe;
use super::ProbeError;
use super::MIB;

/// Reads free memory straight from NVML, without spawning `nvidia-smi`.
pub struct NvmlProbe {
    nvml: Arc<Nvml>,
}

impl NvmlProbe {
    pub fn new(nvml: Arc<Nvml>) -> Self {
        Self { nvml }
    }

    /// Initialize NVML, retrying with the versioned library name used by
    /// container runtimes that do not ship the unversioned symlink.
    pub fn init() -> Result<Self, ProbeError> {
        let nvml = match Nvml::init() {
            Ok(nvml) => {
                tracing::info!("NVML initialized successfully");
                nvml
            }
            Err(_) => {
                tracing::warn!("Standard NVML init failed, trying with explicit library path");
                let nvml = Nvml::builder()
                    .lib_path(std::ffi::OsStr::new("libnvidia-ml.so.1"))
                    .init()?;
                tracing::info!("NVML initialized with explicit library path");
                nvml
            }
        };

        Ok(Self::new(Arc::new(nvml)))
    }
}

#[async_trait]
impl MemoryProbe for NvmlProbe {
    async fn free_memory_mb(&self, device_index: u32) -> Result<u64, ProbeError> {
        let device = self.nvml.device_by_index(device_index)?;
        let memory_info = device.memory_info()?;
        Ok(memory_info.free / MIB)
    }
}
