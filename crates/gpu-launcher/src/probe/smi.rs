use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use super::MemoryProbe;
use super::ProbeError;

/// Queries free memory through the `nvidia-smi` CLI.
#[derive(Debug, Clone)]
pub struct SmiProbe {
    program: PathBuf,
}

impl SmiProbe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for a machine readable, single device query.
    fn query_args(device_index: u32) -> [String; 3] {
        [
            format!("--id={device_index}"),
            "--query-gpu=memory.free".to_string(),
            "--format=csv,noheader,nounits".to_string(),
        ]
    }
}

impl Default for SmiProbe {
    fn default() -> Self {
        Self::new("nvidia-smi")
    }
}

#[async_trait]
impl MemoryProbe for SmiProbe {
    async fn free_memory_mb(&self, device_index: u32) -> Result<u64, ProbeError> {
        let program = self.program.display().to_string();
        tracing::debug!(%program, device_index, "querying free memory");

        let output = Command::new(&self.program)
            .args(Self::query_args(device_index))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProbeError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_free_memory(device_index, &String::from_utf8_lossy(&output.stdout))
    }
}

/// Parses `--format=csv,noheader,nounits` output for a single device.
///
/// The first non-empty line must be exactly one unsigned integer (MiB).
/// Anything else, such as a header, a unit suffix or `[N/A]`, is rejected.
pub fn parse_free_memory(device_index: u32, output: &str) -> Result<u64, ProbeError> {
    let malformed = || ProbeError::Malformed {
        device_index,
        output: output.to_string(),
    };

    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(malformed)?
        .parse::<u64>()
        .map_err(|_| malformed())
}
