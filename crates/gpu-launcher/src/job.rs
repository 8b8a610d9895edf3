//! One-shot launch of the external training job.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

/// Exit code reported when the wait was interrupted before launching.
pub const CANCELLED_EXIT_CODE: u8 = 130;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Everything needed to start the training job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Runner executable, e.g. `allennlp`.
    pub program: PathBuf,
    /// Leading arguments placed before the config path, e.g. `train`.
    pub subcommand: Vec<String>,
    pub config_path: PathBuf,
    /// Output directory passed with `-s`.
    pub serialization_dir: PathBuf,
    /// Packages passed with `--include-package`.
    pub include_packages: Vec<String>,
    /// Resume from the checkpoint in `serialization_dir`.
    pub recover: bool,
    /// Variables set on the child only.
    pub env: BTreeMap<String, String>,
    pub extra_args: Vec<String>,
}

impl JobSpec {
    pub fn args(&self) -> Vec<String> {
        let mut args = self.subcommand.clone();
        args.push(self.config_path.display().to_string());
        args.push("-s".to_string());
        args.push(self.serialization_dir.display().to_string());
        for package in &self.include_packages {
            args.push("--include-package".to_string());
            args.push(package.clone());
        }
        if self.recover {
            args.push("--recover".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Build the child command. The launcher's own environment is left
    /// untouched, overrides only apply to the child.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args())
            .envs(&self.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

/// Start the job and wait for it to exit.
pub async fn launch(spec: &JobSpec) -> Result<ExitStatus, LaunchError> {
    let program = spec.program.display().to_string();

    tracing::info!(
        %program,
        args = ?spec.args(),
        env = ?spec.env,
        "launching job"
    );

    let mut child = spec
        .command()
        .spawn()
        .map_err(|source| LaunchError::Spawn {
            program: program.clone(),
            source,
        })?;

    tracing::info!(pid = child.id(), "job started");

    let status = child
        .wait()
        .await
        .map_err(|source| LaunchError::Wait { program, source })?;

    if status.success() {
        tracing::info!("job finished successfully");
    } else {
        tracing::warn!(%status, "job exited unsuccessfully");
    }

    Ok(status)
}

/// Map a child's exit status to the launcher's own exit code.
///
/// Signals follow the shell convention of `128 + signo`.
pub fn exit_code(status: ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return (code & 0xff) as u8;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return (128 + signal).min(255) as u8;
        }
    }

    1
}
