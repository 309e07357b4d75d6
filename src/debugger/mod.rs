//! Run control primitives: latches, run states, breakpoints and the file
//! call stack.

pub mod breakpoint;
pub mod call_stack;
pub mod control;
pub mod state;

pub use breakpoint::{Breakpoint, BreakpointManager};
pub use call_stack::{CallStack, FileSwitch};
pub use control::{ControlFlags, Latch, POLL_INTERVAL};
pub use state::ScriptState;
