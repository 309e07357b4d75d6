//! Telemetry limits monitoring.
//!
//! While a script runs, limits state changes are echoed to the run output
//! and, with `pause_on_red`, a transition into a red state pauses the
//! script at its next statement.

use super::worker::Sleeper;
use crate::protocol::OutputColor;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

const EVENT_TIMEOUT: Duration = Duration::from_millis(500);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitsState {
    Green,
    GreenLow,
    GreenHigh,
    Yellow,
    YellowLow,
    YellowHigh,
    Red,
    RedLow,
    RedHigh,
    Blue,
    Stale,
}

impl LimitsState {
    pub fn is_red(self) -> bool {
        matches!(self, LimitsState::Red | LimitsState::RedLow | LimitsState::RedHigh)
    }

    pub fn is_green(self) -> bool {
        matches!(
            self,
            LimitsState::Green | LimitsState::GreenLow | LimitsState::GreenHigh
        )
    }

    pub fn is_yellow(self) -> bool {
        matches!(
            self,
            LimitsState::Yellow | LimitsState::YellowLow | LimitsState::YellowHigh
        )
    }
}

impl fmt::Display for LimitsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LimitsState::Green => "GREEN",
            LimitsState::GreenLow => "GREEN_LOW",
            LimitsState::GreenHigh => "GREEN_HIGH",
            LimitsState::Yellow => "YELLOW",
            LimitsState::YellowLow => "YELLOW_LOW",
            LimitsState::YellowHigh => "YELLOW_HIGH",
            LimitsState::Red => "RED",
            LimitsState::RedLow => "RED_LOW",
            LimitsState::RedHigh => "RED_HIGH",
            LimitsState::Blue => "BLUE",
            LimitsState::Stale => "STALE",
        };
        f.write_str(s)
    }
}

/// A limits state change of one telemetry item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsEvent {
    pub target: String,
    pub packet: String,
    pub item: String,
    pub old_state: Option<LimitsState>,
    pub new_state: LimitsState,
}

impl LimitsEvent {
    /// Output line and colour for this change, if it is worth showing.
    ///
    /// An item appearing in a nominal state (green or blue) is not shown.
    pub fn message(&self) -> Option<(String, OutputColor)> {
        let text = format!(
            "{} {} {} is {}",
            self.target, self.packet, self.item, self.new_state
        );
        let state = self.new_state;
        match self.old_state {
            None if state.is_green() || state == LimitsState::Blue => None,
            None if state.is_yellow() => Some((text, OutputColor::Yellow)),
            None if state.is_red() => Some((text, OutputColor::Red)),
            None => None,
            Some(_) if state == LimitsState::Blue => Some((text, OutputColor::Black)),
            Some(_) if state.is_green() => Some((text, OutputColor::Green)),
            Some(_) if state.is_yellow() => Some((text, OutputColor::Yellow)),
            Some(_) if state.is_red() => Some((text, OutputColor::Red)),
            Some(_) => None,
        }
    }
}

/// Source of limits events.
pub trait LimitsSource: Send + Sync {
    /// Next event, or `Ok(None)` when none arrived within `timeout`.
    fn next_event(&self, timeout: Duration) -> Result<Option<LimitsEvent>>;
}

/// Limits events delivered over a channel.
pub struct ChannelLimitsSource {
    receiver: Mutex<Receiver<LimitsEvent>>,
}

impl ChannelLimitsSource {
    pub fn new(receiver: Receiver<LimitsEvent>) -> Self {
        Self {
            receiver: Mutex::new(receiver),
        }
    }
}

impl LimitsSource for ChannelLimitsSource {
    fn next_event(&self, timeout: Duration) -> Result<Option<LimitsEvent>> {
        let receiver = self.receiver.lock().unwrap_or_else(|p| p.into_inner());
        match receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(crate::RunnerError::Storage("limits event channel closed".into()).into())
            }
        }
    }
}

/// Body of the limits worker thread.
///
/// `report` receives every message to show, `pause` is called on red when
/// `pause_on_red` is set. Returns when the sleeper is cancelled.
pub fn monitor_limits(
    source: &dyn LimitsSource,
    sleeper: &Sleeper,
    pause_on_red: bool,
    report: impl Fn(String, OutputColor),
    pause: impl Fn(),
) {
    debug!("Limits monitor started");
    while !sleeper.is_cancelled() {
        let event = match source.next_event(EVENT_TIMEOUT) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!("Limits source error: {:#}", e);
                if sleeper.sleep(RECONNECT_DELAY) {
                    break;
                }
                continue;
            }
        };
        if sleeper.is_cancelled() {
            break;
        }
        if let Some((text, color)) = event.message() {
            report(text, color);
        }
        if pause_on_red && event.new_state.is_red() {
            pause();
        }
    }
    debug!("Limits monitor stopped");
}
