use crate::cli::args::{CheckArgs, InstrumentArgs, RunArgs, Verbosity};
use crate::config::{RunSettings, RunnerConfig};
use crate::events::{ConsoleSink, EventSink, JsonLinesSink};
use crate::protocol::{ControlRequest, RunEvent};
use crate::runtime::{
    instrument_script, DirectoryStore, Dispatch, RunOutcome, RunSpec, RunningScript, ScriptRunner,
};
use crate::{Result, RunnerError};
use anyhow::Context;
use is_terminal::IsTerminal;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const CONTROL_POLL: Duration = Duration::from_millis(50);

/// Execute the run command.
pub fn run(args: RunArgs, config: RunnerConfig, _verbosity: Verbosity) -> Result<()> {
    let root = args
        .root
        .clone()
        .or_else(|| config.script_root.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let settings = RunSettings::from_options(&args.options)?;
    let line_delay = args
        .line_delay
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .map_err(|e| RunnerError::Config(format!("--line-delay {}: {}", secs, e)))
        })
        .transpose()?;
    for (key, value) in &args.env {
        std::env::set_var(key, value);
    }

    let sink: Arc<dyn EventSink> = if args.pretty && std::io::stdout().is_terminal() {
        Arc::new(ConsoleSink::new())
    } else {
        Arc::new(JsonLinesSink::stdout())
    };
    let runner = ScriptRunner::builder(config)
        .sink(Arc::clone(&sink))
        .store(Arc::new(DirectoryStore::new(&root)))
        .build()?;
    if let Some(delay) = line_delay {
        runner.set_line_delay(delay);
    }

    let mut spec = RunSpec::new(&args.name)
        .scope(&args.scope)
        .disconnect(args.disconnect)
        .settings(settings);
    if let Some(id) = args.id {
        spec = spec.id(id);
    }
    let run = runner.open(spec)?;
    info!("Running {} from {}", run.filename(), root.display());
    run.run()?;

    control_loop(&runner, &run, read_control_lines());
    let outcome = run.join();
    sink.publish(run.id(), &RunEvent::Complete);
    run.stop_message_log();

    match outcome {
        RunOutcome::Fatal(fault) => Err(anyhow::anyhow!("Script {} failed: {}", run.filename(), fault)),
        RunOutcome::Completed | RunOutcome::Stopped => Ok(()),
    }
}

/// Lines of stdin, read on their own thread.
fn read_control_lines() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("control-input".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if line.trim().is_empty() => {}
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read control input: {}", e);
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to start control input reader: {}", e);
    }
    rx
}

/// Apply control requests until the run ends or a shutdown is requested.
///
/// Once the control input is closed nobody can resume the run, so a run
/// that then blocks on the operator is stopped.
fn control_loop(runner: &ScriptRunner, run: &RunningScript, requests: Receiver<String>) {
    let mut connected = true;
    while run.is_running() {
        if !connected {
            if run.awaits_operator() {
                info!("Control input closed, stopping {}", run.filename());
                run.stop();
                return;
            }
            std::thread::sleep(CONTROL_POLL);
            continue;
        }
        match requests.recv_timeout(CONTROL_POLL) {
            Ok(line) => {
                let dispatched =
                    ControlRequest::parse(&line).and_then(|request| runner.dispatch(run, request));
                match dispatched {
                    Ok(Dispatch::Shutdown) => {
                        run.stop();
                        return;
                    }
                    Ok(Dispatch::Continue) => {}
                    Err(e) => warn!("{:#}", e),
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => connected = false,
        }
    }
}

/// Execute the instrument command.
pub fn instrument(args: InstrumentArgs, _verbosity: Verbosity) -> Result<()> {
    let (filename, text) = read_script(&args.file)?;
    let instrumented = instrument_script(&text, &filename, args.mark_private)?;
    println!("{}", instrumented);
    Ok(())
}

/// Execute the check command.
pub fn check(args: CheckArgs, verbosity: Verbosity) -> Result<()> {
    let (filename, text) = read_script(&args.file)?;
    let instrumented = instrument_script(&text, &filename, true)?;
    rhai::Engine::new()
        .compile(&instrumented)
        .map_err(|e| RunnerError::Compile {
            filename: filename.clone(),
            message: e.to_string(),
        })?;
    if verbosity != Verbosity::Quiet {
        println!("{}: OK", filename);
    }
    Ok(())
}

fn read_script(path: &Path) -> Result<(String, String)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    Ok((path.to_string_lossy().into_owned(), text))
}
