use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use gpu_launcher::gate::GateError;
use gpu_launcher::job;
use gpu_launcher::launcher::LauncherError;
use gpu_launcher::probe::ProbeError;
use gpu_launcher::probe::SmiProbe;
use gpu_launcher::GateConfig;
use gpu_launcher::JobSpec;
use gpu_launcher::Launcher;
use gpu_launcher::MemoryProbe;
use similar_asserts::assert_eq;
use tempfile::TempDir;
use test_log::test;
use tokio_util::sync::CancellationToken;

const CONFIG_PATH: &str = "training_config/srl_transformers.jsonnet";

/// Stands in for `nvidia-smi`, replaying readings in order.
struct StubProbe {
    readings: Mutex<VecDeque<u64>>,
    calls: AtomicU32,
}

impl StubProbe {
    fn new(readings: &[u64]) -> Self {
        Self {
            readings: Mutex::new(readings.iter().copied().collect()),
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MemoryProbe for &StubProbe {
    async fn free_memory_mb(&self, _device_index: u32) -> Result<u64, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .readings
            .lock()
            .expect("poisoned")
            .pop_front()
            .expect("probe queried more often than scripted"))
    }
}

/// A job runner script that records its arguments and data paths.
struct StubRunner {
    dir: TempDir,
}

impl StubRunner {
    fn new(exit_code: i32) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let script = format!(
            "printf '%s\\n' \"$@\" > '{args}'\n\
             printf 'TRAIN_DATA_PATH=%s\\nDEV_DATA_PATH=%s\\n' \"$TRAIN_DATA_PATH\" \"$DEV_DATA_PATH\" > '{env}'\n\
             exit {exit_code}\n",
            args = dir.path().join("args").display(),
            env = dir.path().join("env").display(),
        );
        std::fs::write(dir.path().join("runner.sh"), script).expect("write runner script");
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn was_launched(&self) -> bool {
        self.path("args").exists()
    }

    fn recorded(&self, name: &str) -> Vec<String> {
        std::fs::read_to_string(self.path(name))
            .expect("runner output")
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// The script is run through `sh` so it never needs the exec bit.
    fn job_spec(&self) -> JobSpec {
        JobSpec {
            program: PathBuf::from("sh"),
            subcommand: vec![
                self.path("runner.sh").display().to_string(),
                "train".to_string(),
            ],
            config_path: PathBuf::from(CONFIG_PATH),
            serialization_dir: self.path("output"),
            include_packages: vec!["srl_transformers".to_string()],
            recover: false,
            env: BTreeMap::from([
                ("TRAIN_DATA_PATH".to_string(), "/data/conll/train".to_string()),
                ("DEV_DATA_PATH".to_string(), "/data/conll/dev".to_string()),
            ]),
            extra_args: Vec::new(),
        }
    }
}

fn gate(poll_interval: Duration) -> GateConfig {
    GateConfig {
        device_index: 0,
        threshold_mb: 10000,
        poll_interval,
        timeout: None,
    }
}

fn expected_args(output: &Path) -> Vec<String> {
    vec![
        "train".to_string(),
        CONFIG_PATH.to_string(),
        "-s".to_string(),
        output.display().to_string(),
        "--include-package".to_string(),
        "srl_transformers".to_string(),
    ]
}

#[test(tokio::test)]
async fn ready_device_launches_immediately() {
    let probe = StubProbe::new(&[12000]);
    let runner = StubRunner::new(0);

    // an hour long interval would hang the test if a retry happened
    let launcher = Launcher::new(&probe, gate(Duration::from_secs(3600)), runner.job_spec());
    let outcome = launcher
        .run(CancellationToken::new())
        .await
        .expect("job should run");

    assert_eq!(probe.calls(), 1);
    assert_eq!(outcome.readiness.free_mb, 12000);
    assert_eq!(outcome.readiness.polls, 1);
    assert!(outcome.status.success());
    assert_eq!(runner.recorded("args"), expected_args(&runner.path("output")));
    assert_eq!(
        runner.recorded("env"),
        vec![
            "TRAIN_DATA_PATH=/data/conll/train".to_string(),
            "DEV_DATA_PATH=/data/conll/dev".to_string(),
        ]
    );
    assert!(std::env::var_os("TRAIN_DATA_PATH").is_none());
    assert!(std::env::var_os("DEV_DATA_PATH").is_none());
}

#[test(tokio::test)]
async fn low_memory_polls_again_before_launch() {
    let probe = StubProbe::new(&[512, 9999, 10000]);
    let runner = StubRunner::new(0);

    let launcher = Launcher::new(&probe, gate(Duration::from_millis(10)), runner.job_spec());
    let outcome = launcher
        .run(CancellationToken::new())
        .await
        .expect("job should run");

    assert_eq!(probe.calls(), 3);
    assert_eq!(outcome.readiness.polls, 3);
    assert!(runner.was_launched());
}

#[test(tokio::test)]
async fn job_exit_status_is_forwarded() {
    let probe = StubProbe::new(&[20000]);
    let runner = StubRunner::new(7);

    let outcome = Launcher::new(&probe, gate(Duration::from_secs(1)), runner.job_spec())
        .run(CancellationToken::new())
        .await
        .expect("job should run");

    assert_eq!(outcome.status.code(), Some(7));
    assert_eq!(job::exit_code(outcome.status), 7);
}

#[test(tokio::test)]
async fn unparsable_probe_output_never_launches() {
    // `echo` answers with its own arguments instead of a reading
    let runner = StubRunner::new(0);
    let launcher = Launcher::new(
        SmiProbe::new("echo"),
        gate(Duration::from_millis(10)),
        runner.job_spec(),
    );

    let err = launcher.run(CancellationToken::new()).await.unwrap_err();

    assert!(
        matches!(
            err,
            LauncherError::Gate(GateError::Probe(ProbeError::Malformed { .. }))
        ),
        "got {err}"
    );
    assert!(!runner.was_launched());
}

#[test(tokio::test)]
async fn missing_query_tool_never_launches() {
    let runner = StubRunner::new(0);
    let launcher = Launcher::new(
        SmiProbe::new("/nonexistent/bin/nvidia-smi"),
        gate(Duration::from_millis(10)),
        runner.job_spec(),
    );

    let err = launcher.run(CancellationToken::new()).await.unwrap_err();

    assert!(
        matches!(
            err,
            LauncherError::Gate(GateError::Probe(ProbeError::Spawn { .. }))
        ),
        "got {err}"
    );
    assert!(!runner.was_launched());
}

#[test(tokio::test)]
async fn cancelled_wait_never_launches() {
    let probe = StubProbe::new(&[0, 0, 0, 0, 0]);
    let runner = StubRunner::new(0);
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        })
    };

    let err = Launcher::new(&probe, gate(Duration::from_secs(3600)), runner.job_spec())
        .run(token)
        .await
        .unwrap_err();
    canceller.await.expect("canceller task");

    assert!(
        matches!(err, LauncherError::Gate(GateError::Cancelled { polls: 1 })),
        "got {err}"
    );
    assert!(!runner.was_launched());
}
