use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::probe::ProbeOptions;
use crate::gate::GateConfig;
use crate::job::JobSpec;

/// Variable the job reads its training data location from.
pub const TRAIN_DATA_ENV: &str = "TRAIN_DATA_PATH";
/// Variable the job reads its validation data location from.
pub const DEV_DATA_ENV: &str = "DEV_DATA_PATH";

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(
        long,
        env = "GPU_LAUNCHER_DEVICE",
        default_value_t = 0,
        help = "Index of the device whose free memory gates the launch"
    )]
    pub device: u32,

    #[arg(
        long,
        env = "GPU_LAUNCHER_THRESHOLD_MB",
        default_value_t = 10000,
        help = "Minimum free device memory in MiB required before launching"
    )]
    pub threshold_mb: u64,

    #[arg(
        long,
        env = "GPU_LAUNCHER_POLL_INTERVAL_SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds to sleep between free memory checks"
    )]
    pub poll_interval_secs: u64,

    #[arg(
        long,
        env = "GPU_LAUNCHER_TIMEOUT_SECS",
        help = "Give up waiting after this many seconds (waits forever when unset)"
    )]
    pub timeout_secs: Option<u64>,

    #[command(flatten)]
    pub probe: ProbeOptions,

    #[arg(
        long,
        env = "GPU_LAUNCHER_TRAIN_DATA_PATH",
        default_value = "data/conll-2012/train",
        value_hint = clap::ValueHint::DirPath,
        help = "Training data directory, exported to the job as TRAIN_DATA_PATH"
    )]
    pub train_data_path: PathBuf,

    #[arg(
        long,
        env = "GPU_LAUNCHER_DEV_DATA_PATH",
        default_value = "data/conll-2012/development",
        value_hint = clap::ValueHint::DirPath,
        help = "Validation data directory, exported to the job as DEV_DATA_PATH"
    )]
    pub dev_data_path: PathBuf,

    #[arg(
        long = "env",
        value_name = "KEY=VALUE",
        value_parser = parse_key_val,
        help = "Additional environment variable for the job, may be repeated"
    )]
    pub extra_env: Vec<(String, String)>,

    #[arg(
        long,
        env = "GPU_LAUNCHER_RUNNER",
        default_value = "allennlp",
        value_hint = clap::ValueHint::CommandName,
        help = "Training job runner executable"
    )]
    pub runner: PathBuf,

    #[arg(
        long = "runner-arg",
        default_value = "train",
        allow_hyphen_values = true,
        help = "Argument placed before the config path, may be repeated"
    )]
    pub runner_args: Vec<String>,

    #[arg(
        long,
        env = "GPU_LAUNCHER_CONFIG_PATH",
        default_value = "training_config/srl_transformers.jsonnet",
        value_hint = clap::ValueHint::FilePath,
        help = "Job configuration file"
    )]
    pub config_path: PathBuf,

    #[arg(
        long,
        short = 's',
        env = "GPU_LAUNCHER_SERIALIZATION_DIR",
        default_value = "models/srl_transformers",
        value_hint = clap::ValueHint::DirPath,
        help = "Directory the job writes checkpoints and results to"
    )]
    pub serialization_dir: PathBuf,

    #[arg(
        long = "include-package",
        default_value = "srl_transformers",
        help = "Package the runner should import, may be repeated"
    )]
    pub include_packages: Vec<String>,

    #[arg(
        long,
        env = "GPU_LAUNCHER_RECOVER",
        help = "Resume the job from the checkpoint in the serialization directory"
    )]
    pub recover: bool,

    /// Extra arguments appended to the runner command line, after `--`
    #[arg(last = true)]
    pub extra_args: Vec<String>,
}

impl RunArgs {
    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            device_index: self.device,
            threshold_mb: self.threshold_mb,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }

    /// Data paths are inserted first so `--env` can override them.
    pub fn job_spec(&self) -> JobSpec {
        let mut env = BTreeMap::new();
        env.insert(
            TRAIN_DATA_ENV.to_string(),
            self.train_data_path.display().to_string(),
        );
        env.insert(
            DEV_DATA_ENV.to_string(),
            self.dev_data_path.display().to_string(),
        );
        env.extend(self.extra_env.iter().cloned());

        JobSpec {
            program: self.runner.clone(),
            subcommand: self.runner_args.clone(),
            config_path: self.config_path.clone(),
            serialization_dir: self.serialization_dir.clone(),
            include_packages: self.include_packages.clone(),
            recover: self.recover,
            env,
            extra_args: self.extra_args.clone(),
        }
    }
}

/// Parse a single `KEY=VALUE` pair
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
