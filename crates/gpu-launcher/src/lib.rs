//! Wait for free GPU memory on a device, then launch a training job.

pub mod config;
pub mod gate;
pub mod job;
pub mod launcher;
pub mod probe;

pub use gate::wait_until_available;
pub use gate::GateConfig;
pub use job::launch;
pub use job::JobSpec;
pub use launcher::Launcher;
pub use launcher::Phase;
pub use probe::MemoryProbe;
