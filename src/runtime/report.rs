use super::result::{RunOutcome, ScriptFault};
use super::script::RunningScript;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Completion report of a suite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub script: String,
    pub run_id: u64,
    pub scope: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    /// Run options in their operator spelling.
    pub options: Vec<String>,
    pub settings: ReportSettings,
    /// `completed`, `stopped` or `fatal`.
    pub outcome: String,
    pub errors: Vec<ScriptFault>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSettings {
    pub manual: bool,
    pub pause_on_error: bool,
    pub continue_after_error: bool,
    pub abort_after_error: bool,
    #[serde(rename = "loop")]
    pub loop_: bool,
    pub break_loop_on_error: bool,
}

impl RunReport {
    pub fn build(
        run: &RunningScript,
        outcome: &RunOutcome,
        started: DateTime<Local>,
        ended: DateTime<Local>,
    ) -> Self {
        let options = run.settings();
        let outcome = match outcome {
            RunOutcome::Completed => "completed",
            RunOutcome::Stopped => "stopped",
            RunOutcome::Fatal(_) => "fatal",
        };
        Self {
            script: run.unique_filename(),
            run_id: run.id(),
            scope: run.scope().to_string(),
            start_time: started.to_rfc3339(),
            end_time: ended.to_rfc3339(),
            duration_secs: (ended - started).num_milliseconds().max(0) as f64 / 1000.0,
            options: options.to_options().into_iter().map(str::to_string).collect(),
            settings: ReportSettings {
                manual: options.manual,
                pause_on_error: run.pause_on_error(),
                continue_after_error: run.continue_after_error(),
                abort_after_error: options.continue_after_error == Some(false),
                loop_: options.loop_,
                break_loop_on_error: options.break_loop_on_error,
            },
            outcome: outcome.to_string(),
            errors: run.exceptions(),
        }
    }

    /// Whether the run completed without reporting an error.
    pub fn passed(&self) -> bool {
        self.outcome == "completed" && self.errors.is_empty()
    }
}
