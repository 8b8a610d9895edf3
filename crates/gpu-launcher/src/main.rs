use std::process::ExitCode;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use gpu_launcher::config::Cli;
use gpu_launcher::config::Commands;
use gpu_launcher::config::ProbeArgs;
use gpu_launcher::config::RunArgs;
use gpu_launcher::gate::GateError;
use gpu_launcher::job;
use gpu_launcher::launcher::LauncherError;
use gpu_launcher::Launcher;
use gpu_launcher::MemoryProbe;
use tokio_util::sync::CancellationToken;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    setup_global_hooks();

    let cli = Cli::parse();
    utils::logging::init();

    match cli.command {
        Commands::Run(run_args) => run(*run_args).await,
        Commands::Probe(probe_args) => run_probe(probe_args).await,
    }
}

async fn run(run_args: RunArgs) -> Result<ExitCode> {
    tracing::info!("Starting gpu-launcher {}", &**version::VERSION);

    let probe = run_args
        .probe
        .build()
        .context("initialize memory probe failed")?;
    let launcher = Launcher::new(probe, run_args.gate_config(), run_args.job_spec());

    let cancellation_token = CancellationToken::new();
    spawn_interrupt_listener(cancellation_token.clone());

    match launcher.run(cancellation_token).await {
        Ok(outcome) => {
            tracing::info!(
                free_mb = outcome.readiness.free_mb,
                polls = outcome.readiness.polls,
                status = %outcome.status,
                "job exited"
            );
            Ok(ExitCode::from(job::exit_code(outcome.status)))
        }
        Err(LauncherError::Gate(GateError::Cancelled { polls })) => {
            tracing::warn!(polls, "interrupted while waiting, job not launched");
            Ok(ExitCode::from(job::CANCELLED_EXIT_CODE))
        }
        Err(e) => {
            let e = anyhow::Error::new(e).context("wait for free device memory and launch job");
            tracing::error!("{e:#}");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Cancels the wait on the first Ctrl-C. Once the job runs, the terminal
/// delivers the signal to the job itself and the launcher keeps waiting.
fn spawn_interrupt_listener(cancellation_token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received");
                cancellation_token.cancel();
            }
            Err(e) => tracing::warn!("Failed to listen for interrupt: {}", e),
        }
    });
}

async fn run_probe(probe_args: ProbeArgs) -> Result<ExitCode> {
    let probe = probe_args
        .probe
        .build()
        .context("initialize memory probe failed")?;

    let free_mb = probe
        .free_memory_mb(probe_args.device)
        .await
        .with_context(|| format!("query free memory of device {} failed", probe_args.device))?;

    println!("{free_mb}");
    Ok(ExitCode::SUCCESS)
}
