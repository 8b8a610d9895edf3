//! Free device memory queries.
//!
//! A [`MemoryProbe`] answers a single question: how many MiB are currently
//! unallocated on device `n`. Two backends exist, one shelling out to
//! `nvidia-smi` and one talking to NVML directly.

mod nvml;
mod smi;

use std::process::ExitStatus;

use async_trait::async_trait;
use thiserror::Error;

pub use self::nvml::NvmlProbe;
pub use self::smi::parse_free_memory;
pub use self::smi::SmiProbe;

/// Bytes per MiB, the unit `nvidia-smi` reports memory in.
pub const MIB: u64 = 1024 * 1024;

/// Errors raised while querying free memory. Every variant is fatal to the
/// caller; probes never retry.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("malformed free memory reading for device {device_index}: {output:?}")]
    Malformed { device_index: u32, output: String },

    #[error("NVML error: {0}")]
    Nvml(#[from] nvml_wrapper::error::NvmlError),
}

#[async_trait]
pub trait MemoryProbe: Send + Sync {
    /// Free memory on `device_index`, in MiB.
    async fn free_memory_mb(&self, device_index: u32) -> Result<u64, ProbeError>;
}

#[async_trait]
impl<P: MemoryProbe + ?Sized> MemoryProbe for Box<P> {
    async fn free_memory_mb(&self, device_index: u32) -> Result<u64, ProbeError> {
        (**self).free_memory_mb(device_index).await
    }
}
