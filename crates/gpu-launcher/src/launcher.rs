use std::process::ExitStatus;

use derive_more::Display;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::gate::wait_until_available;
use crate::gate::GateConfig;
use crate::gate::GateError;
use crate::gate::Readiness;
use crate::job::launch;
use crate::job::JobSpec;
use crate::job::LaunchError;
use crate::probe::MemoryProbe;

/// Lifecycle of a launcher. There is no way back from `Running`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    #[display("polling")]
    Polling,
    #[display("running")]
    Running,
}

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Result of a completed run.
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    pub readiness: Readiness,
    pub status: ExitStatus,
}

/// Waits for free device memory, then starts the job exactly once.
pub struct Launcher<P> {
    probe: P,
    gate: GateConfig,
    job: JobSpec,
    phase: Phase,
}

impl<P: MemoryProbe> Launcher<P> {
    pub fn new(probe: P, gate: GateConfig, job: JobSpec) -> Self {
        Self {
            probe,
            gate,
            job,
            phase: Phase::Polling,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn gate(&self) -> &GateConfig {
        &self.gate
    }

    pub fn job(&self) -> &JobSpec {
        &self.job
    }

    /// Consumes the launcher so the job can only ever be started once.
    ///
    /// Cancellation is only honoured while polling. Once the job runs, the
    /// launcher waits for it and reports whatever status it exits with.
    pub async fn run(
        mut self,
        cancellation_token: CancellationToken,
    ) -> Result<RunOutcome, LauncherError> {
        tracing::info!(
            phase = %self.phase,
            device_index = self.gate.device_index,
            threshold_mb = self.gate.threshold_mb,
            poll_interval = ?self.gate.poll_interval,
            timeout = ?self.gate.timeout,
            "waiting for free device memory"
        );

        let readiness = wait_until_available(&self.probe, &self.gate, &cancellation_token).await?;

        self.transition(Phase::Running);
        let status = launch(&self.job).await?;

        Ok(RunOutcome { readiness, status })
    }

    fn transition(&mut self, next: Phase) {
        tracing::info!(from = %self.phase, to = %next, "launcher phase change");
        self.phase = next;
    }
}
