use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::probe::ProbeArgs;
use crate::config::run::RunArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Wait for free GPU memory, then launch the training job
    Run(Box<RunArgs>),
    /// Print the current free memory of a device in MiB
    Probe(ProbeArgs),
}
