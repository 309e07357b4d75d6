use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "script-runner")]
#[command(about = "Run procedure scripts under operator control", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log debug details to stderr
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Log errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE", env = "SCRIPT_RUNNER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// Default filter directive when `RUST_LOG` is unset.
    pub fn to_log_level(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "debug",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a script, streaming events to stdout and reading control
    /// requests from stdin
    Run(RunArgs),

    /// Print the instrumented text of a script
    Instrument(InstrumentArgs),

    /// Instrument and compile a script without running it
    Check(CheckArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Script name, relative to the script root
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Script root directory
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Run id
    #[arg(long)]
    pub id: Option<u64>,

    /// Scope the run belongs to
    #[arg(long, default_value = "DEFAULT")]
    pub scope: String,

    /// Seconds between statements
    #[arg(long, value_name = "SECS")]
    pub line_delay: Option<f64>,

    /// Run options, e.g. manual,pauseOnError,abortAfterError
    #[arg(long, value_delimiter = ',')]
    pub options: Vec<String>,

    /// Environment for the script's host functions
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    pub env: Vec<(String, String)>,

    /// Run without talking to real targets
    #[arg(long)]
    pub disconnect: bool,

    /// Render events for a human instead of as JSON lines
    #[arg(long)]
    pub pretty: bool,
}

#[derive(Args, Debug)]
pub struct InstrumentArgs {
    /// Script file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Make top-level functions private
    #[arg(long)]
    pub mark_private: bool,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Script file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

fn parse_env(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", value)),
    }
}
