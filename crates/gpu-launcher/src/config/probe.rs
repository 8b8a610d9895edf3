use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::ValueEnum;
use derive_more::Display;

use crate::probe::MemoryProbe;
use crate::probe::NvmlProbe;
use crate::probe::ProbeError;
use crate::probe::SmiProbe;

/// Where free memory readings come from.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProbeBackend {
    /// `nvidia-smi --query-gpu=memory.free`
    #[display("smi")]
    Smi,
    /// NVML device memory info
    #[display("nvml")]
    Nvml,
}

/// Probe selection shared by every subcommand that queries a device.
#[derive(Args, Debug, Clone)]
pub struct ProbeOptions {
    #[arg(
        long,
        env = "GPU_LAUNCHER_PROBE",
        value_enum,
        default_value_t = ProbeBackend::Smi,
        help = "Backend used to read free device memory"
    )]
    pub backend: ProbeBackend,

    #[arg(
        long,
        env = "GPU_LAUNCHER_SMI_PATH",
        default_value = "nvidia-smi",
        value_hint = clap::ValueHint::CommandName,
        help = "nvidia-smi executable used by the smi backend"
    )]
    pub smi_path: PathBuf,
}

impl ProbeOptions {
    pub fn build(&self) -> Result<Box<dyn MemoryProbe>, ProbeError> {
        tracing::debug!(backend = %self.backend, "building memory probe");
        Ok(match self.backend {
            ProbeBackend::Smi => Box::new(SmiProbe::new(&self.smi_path)),
            ProbeBackend::Nvml => Box::new(NvmlProbe::init()?),
        })
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ProbeArgs {
    #[arg(
        long,
        env = "GPU_LAUNCHER_DEVICE",
        default_value_t = 0,
        help = "Index of the device to query"
    )]
    pub device: u32,

    #[command(flatten)]
    pub probe: ProbeOptions,
}
