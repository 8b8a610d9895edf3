pub mod cli;
pub mod probe;
pub mod run;

pub use cli::*;
pub use probe::*;
pub use run::*;
