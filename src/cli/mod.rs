pub mod args;
pub mod commands;

pub use args::{CheckArgs, Cli, Commands, InstrumentArgs, RunArgs, Verbosity};
