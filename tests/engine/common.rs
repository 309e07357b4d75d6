#![allow(dead_code)]

use script_runner::runtime::{ChannelLimitsSource, LimitsEvent};
use script_runner::{
    MemorySink, MemoryStore, RunEvent, RunSpec, RunnerConfig, RunningScript, ScriptRunner,
    ScriptState,
};
use std::sync::mpsc::Sender;
use std::sync::{mpsc, Arc};
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub struct Harness {
    pub runner: ScriptRunner,
    pub sink: Arc<MemorySink>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_scripts(config, &[])
    }

    pub fn with_scripts(config: RunnerConfig, scripts: &[(&str, &str)]) -> Self {
        let store = Arc::new(MemoryStore::new());
        for (name, text) in scripts {
            store.insert(name, text);
        }
        let sink = Arc::new(MemorySink::new());
        let runner = ScriptRunner::builder(config)
            .sink(sink.clone())
            .store(store.clone())
            .build()
            .unwrap();
        runner.set_line_delay(Duration::ZERO);
        Self {
            runner,
            sink,
            store,
        }
    }

    /// Harness whose runner watches limits events sent on the returned
    /// channel.
    pub fn with_limits(config: RunnerConfig) -> (Self, Sender<LimitsEvent>) {
        let (tx, rx) = mpsc::channel();
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(MemorySink::new());
        let runner = ScriptRunner::builder(config)
            .sink(sink.clone())
            .store(store.clone())
            .limits(Arc::new(ChannelLimitsSource::new(rx)))
            .build()
            .unwrap();
        runner.set_line_delay(Duration::ZERO);
        (
            Self {
                runner,
                sink,
                store,
            },
            tx,
        )
    }

    pub fn start(&self, name: &str, text: &str) -> Arc<RunningScript> {
        let run = self.runner.open_text(RunSpec::new(name), text).unwrap();
        run.run().unwrap();
        run
    }

    pub fn wait_for_state(&self, state: ScriptState) -> bool {
        self.sink.wait_for(TIMEOUT, |event| event.state() == Some(state))
    }

    pub fn wait_for_line(&self, line: usize, state: ScriptState) -> bool {
        self.sink.wait_for(TIMEOUT, |event| {
            matches!(event, RunEvent::Line { line_no, state: s, .. } if *line_no == line && *s == state)
        })
    }

    /// Output of the script itself, without engine messages.
    pub fn script_output(&self) -> Vec<String> {
        self.sink
            .output_lines()
            .into_iter()
            .filter(|line| !line.contains("(SCRIPTRUNNER)"))
            .collect()
    }

    pub fn engine_messages(&self) -> Vec<String> {
        self.sink
            .output_lines()
            .into_iter()
            .filter(|line| line.contains("(SCRIPTRUNNER)"))
            .collect()
    }

    pub fn count_state(&self, state: ScriptState) -> usize {
        self.sink
            .line_states()
            .iter()
            .filter(|(_, s)| *s == state)
            .count()
    }
}

/// Configuration with no pause on error and no idle flush surprises.
pub fn quiet_config() -> RunnerConfig {
    RunnerConfig {
        line_delay: 0.0,
        pause_on_error: false,
        continue_after_error: true,
        ..RunnerConfig::default()
    }
}

pub fn last_state(sink: &MemorySink) -> Option<ScriptState> {
    sink.line_states().last().map(|(_, state)| *state)
}
