//! Polling gate that blocks until a device has enough free memory.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::probe::MemoryProbe;
use crate::probe::ProbeError;

/// Parameters of the wait loop, fixed before polling starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub device_index: u32,
    /// Minimum free memory in MiB. A reading equal to it passes.
    pub threshold_mb: u64,
    pub poll_interval: Duration,
    /// Give up after this long. `None` waits forever.
    pub timeout: Option<Duration>,
}

/// Outcome of a satisfied wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// The reading that satisfied the threshold.
    pub free_mb: u64,
    /// Number of queries performed, including the satisfying one.
    pub polls: u32,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("free memory query failed")]
    Probe(#[from] ProbeError),

    #[error("wait cancelled after {polls} poll(s)")]
    Cancelled { polls: u32 },

    #[error(
        "device {device_index} did not reach {threshold_mb} MiB free within {timeout:?} (last reading {last_free_mb} MiB)"
    )]
    TimedOut {
        device_index: u32,
        threshold_mb: u64,
        timeout: Duration,
        last_free_mb: u64,
    },
}

/// Poll `probe` until free memory on the configured device is at least the
/// threshold.
///
/// Probe failures abort the wait immediately. The loop returns right after
/// the first satisfying reading without querying again.
pub async fn wait_until_available<P>(
    probe: &P,
    config: &GateConfig,
    cancellation_token: &CancellationToken,
) -> Result<Readiness, GateError>
where
    P: MemoryProbe + ?Sized,
{
    // a deadline past the clock's range is treated as no deadline at all
    let deadline = config
        .timeout
        .and_then(|timeout| Instant::now().checked_add(timeout));
    let mut polls = 0u32;

    loop {
        if cancellation_token.is_cancelled() {
            return Err(GateError::Cancelled { polls });
        }

        let free_mb = probe.free_memory_mb(config.device_index).await?;
        polls += 1;

        if free_mb >= config.threshold_mb {
            tracing::info!(
                device_index = config.device_index,
                free_mb,
                threshold_mb = config.threshold_mb,
                polls,
                "free memory threshold reached"
            );
            return Ok(Readiness { free_mb, polls });
        }

        tracing::info!(
            device_index = config.device_index,
            free_mb,
            threshold_mb = config.threshold_mb,
            "not enough free memory, retrying in {:?}",
            config.poll_interval
        );

        let timed_out = || GateError::TimedOut {
            device_index: config.device_index,
            threshold_mb: config.threshold_mb,
            timeout: config.timeout.unwrap_or_default(),
            last_free_mb: free_mb,
        };

        // `None` means the next poll lies beyond the clock's range
        let wake_at = Instant::now().checked_add(config.poll_interval);
        let expires_first = match (deadline, wake_at) {
            (Some(deadline), Some(wake_at)) => deadline <= wake_at,
            (Some(_), None) => true,
            (None, _) => false,
        };

        tokio::select! {
            _ = cancellation_token.cancelled() => {
                return Err(GateError::Cancelled { polls });
            }
            _ = sleep_until(deadline), if expires_first => {
                return Err(timed_out());
            }
            _ = sleep_until(wake_at), if !expires_first => {}
        }
    }
}

/// Sleeps until `at`, or forever when there is no such instant.
async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
