//! Source-to-source instrumentation.
//!
//! Each instrumentable statement is rewritten, on its own physical line(s),
//! into a guarded form that calls the runner hooks around it:
//!
//! ```text
//! loop { try { sr_pre_line("f", 3); stmt; sr_post_line("f", 3); break; }
//!        catch (sr_err) { if !sr_on_exception(sr_err, "f", 3) { break; } } }
//! ```
//!
//! A `true` from the exception hook re-enters the loop and re-executes the
//! same statement. The rewrite never adds or removes a newline, so compile
//! and runtime error positions still point at the original lines.

use super::segmenter::{segments, Segment, SegmentKind};
use crate::{Result, RunnerError};
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Hook called before every statement.
pub const PRE_LINE_HOOK: &str = "sr_pre_line";
/// Hook called after every statement that completed.
pub const POST_LINE_HOOK: &str = "sr_post_line";
/// Hook called with the caught error of a failed statement.
pub const EXCEPTION_HOOK: &str = "sr_on_exception";

const ERROR_VAR: &str = "sr_err";
const VALUE_VAR: &str = "sr_value";

/// Quote `value` as a script string literal.
pub fn string_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Rewrites scripts into their instrumented form.
#[derive(Debug, Clone)]
pub struct Instrumenter {
    let_statement: Regex,
}

impl Instrumenter {
    pub fn new() -> Result<Self> {
        let let_statement = Regex::new(r"(?s)^let\s+([A-Za-z_][A-Za-z0-9_]*)\s*=(.*);\s*$")
            .map_err(|e| RunnerError::Config(format!("invalid let pattern: {}", e)))?;
        Ok(Self { let_statement })
    }

    /// Instrument `text`, giving up early when `cancel` is raised.
    ///
    /// Returns `Ok(None)` when cancelled; callers treat that as a stop.
    #[tracing::instrument(skip_all, fields(filename = filename))]
    pub fn instrument_cancellable(
        &self,
        text: &str,
        filename: &str,
        mark_private: bool,
        cancel: &AtomicBool,
    ) -> Result<Option<String>> {
        let file = string_literal(filename);
        let mut lines = Vec::new();

        for segment in segments(text)? {
            if cancel.load(Ordering::SeqCst) {
                tracing::debug!("Instrumentation cancelled");
                return Ok(None);
            }
            lines.push(self.rewrite(&segment, &file, mark_private));
        }

        let instrumented = lines.join("\n");
        let (before, after) = (text.matches('\n').count(), instrumented.matches('\n').count());
        if before != after {
            return Err(RunnerError::Instrumentation {
                line: 0,
                message: format!("line count changed from {} to {}", before + 1, after + 1),
            }
            .into());
        }
        Ok(Some(instrumented))
    }

    pub fn instrument(&self, text: &str, filename: &str, mark_private: bool) -> Result<String> {
        let never = AtomicBool::new(false);
        self.instrument_cancellable(text, filename, mark_private, &never)?
            .ok_or_else(|| {
                RunnerError::Instrumentation {
                    line: 0,
                    message: "instrumentation cancelled".to_string(),
                }
                .into()
            })
    }

    fn rewrite(&self, segment: &Segment, file: &str, mark_private: bool) -> String {
        let body = segment.text.trim_start();
        let indent = &segment.text[..segment.text.len() - body.len()];
        let body = body.trim_end();
        let line = segment.line;

        match segment.kind {
            SegmentKind::Blank => String::new(),
            SegmentKind::Terminator => segment.text.clone(),
            SegmentKind::Structural => {
                if skip_structural(body) {
                    return segment.text.clone();
                }
                let body = match body.strip_prefix("fn ") {
                    Some(rest) if mark_private => format!("private fn {}", rest),
                    _ => body.to_string(),
                };
                format!("{}{}({}, {}); {}", indent, PRE_LINE_HOOK, file, line, body)
            }
            SegmentKind::Statement if segment.inside_guard => {
                format!("{}{}", indent, guarded(body, file, line))
            }
            SegmentKind::Statement => {
                let pre = format!("{}({}, {});", PRE_LINE_HOOK, file, line);
                let post = format!("{}({}, {});", POST_LINE_HOOK, file, line);
                let catch = format!(
                    "catch ({err}) {{ if !{hook}({err}, {file}, {line}) {{ break; }} }}",
                    err = ERROR_VAR,
                    hook = EXCEPTION_HOOK,
                );

                let rewritten = if let Some(caps) = self.let_statement.captures(body) {
                    format!(
                        "let {v} = (); loop {{ try {{ {pre} {v} ={expr}; {post} break; }} {catch} }} let {name} = {v};",
                        v = VALUE_VAR,
                        expr = &caps[2],
                        name = &caps[1],
                    )
                } else if body.ends_with(';') {
                    format!("loop {{ try {{ {pre} {body} {post} break; }} {catch} }}")
                } else {
                    format!(
                        "{{ let {v} = (); loop {{ try {{ {pre} {v} = {{ {body} }}; {post} break; }} {catch} }} {v} }}",
                        v = VALUE_VAR,
                    )
                };
                format!("{}{}", indent, rewritten)
            }
        }
    }
}

/// Statement inside a user `try` block: hooks only, the user's own `catch`
/// handles the error.
fn guarded(body: &str, file: &str, line: usize) -> String {
    if body.ends_with(';') {
        format!(
            "{pre}({file}, {line}); {body} {post}({file}, {line});",
            pre = PRE_LINE_HOOK,
            post = POST_LINE_HOOK,
        )
    } else {
        format!(
            "{{ {pre}({file}, {line}); let {v} = {{ {body} }}; {post}({file}, {line}); {v} }}",
            pre = PRE_LINE_HOOK,
            post = POST_LINE_HOOK,
            v = VALUE_VAR,
        )
    }
}

/// Structural text that cannot take a statement prefix: the tail of a
/// multi-line literal or a block that closes more than it opens.
fn skip_structural(body: &str) -> bool {
    let count = |c: char| body.matches(c).count();
    count('}') > count('{') || count(')') > count('(') || count(']') > count('[') || count('[') > count(']')
}

/// Instrument `text` as `filename`.
pub fn instrument_script(text: &str, filename: &str, mark_private: bool) -> Result<String> {
    Instrumenter::new()?.instrument(text, filename, mark_private)
}
