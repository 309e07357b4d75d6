use crate::common::{last_state, quiet_config, Harness};
use script_runner::{ControlRequest, Dispatch, RunEvent, RunOutcome, ScriptState};

#[test]
fn test_breakpoint_stops_before_its_line() {
    let h = Harness::new(quiet_config());
    h.runner.set_breakpoint("main.rhai", 2);
    let run = h.start("main.rhai", "print(1);\nprint(2);\nprint(3);\n");

    assert!(h.wait_for_line(2, ScriptState::Breakpoint));
    assert_eq!(run.position(), (Some("main.rhai".to_string()), 2));
    let output = h.script_output();
    assert_eq!(output.len(), 1);
    assert!(output[0].ends_with(": 1"));
    assert!(h
        .engine_messages()
        .iter()
        .any(|line| line.ends_with("Hit Breakpoint at main.rhai:2")));

    run.go();
    assert_eq!(run.join(), RunOutcome::Completed);
    assert_eq!(h.script_output().len(), 3);
    assert_eq!(h.count_state(ScriptState::Stopped), 1);
}

#[test]
fn test_breakpoint_message_precedes_breakpoint_state() {
    let h = Harness::new(quiet_config());
    h.runner.set_breakpoint("main.rhai", 1);
    let run = h.start("main.rhai", "print(1);\n");

    assert!(h.wait_for_state(ScriptState::Breakpoint));
    let events = h.sink.events();
    let message = events.iter().position(|event| {
        matches!(event, RunEvent::Output { line, .. } if line.ends_with("Hit Breakpoint at main.rhai:1"))
    });
    let state = events
        .iter()
        .position(|event| event.state() == Some(ScriptState::Breakpoint));
    assert!(message.is_some());
    assert!(message < state, "{:?}", events);

    run.stop();
    assert_eq!(run.join(), RunOutcome::Stopped);
}

#[test]
fn test_breakpoints_hit_on_every_pass() {
    let h = Harness::new(quiet_config());
    h.runner.set_breakpoint("main.rhai", 2);
    let run = h.start("main.rhai", "for i in 0..2 {\n    print(i);\n}\n");

    assert!(h.wait_for_state(ScriptState::Breakpoint));
    run.go();
    assert!(h.sink.wait_for(crate::common::TIMEOUT, |event| matches!(
        event,
        RunEvent::Output { line, .. } if line.ends_with("(main.rhai:2): 0")
    )));
    h.sink.clear();
    assert!(h.wait_for_line(2, ScriptState::Breakpoint));
    run.go();
    assert_eq!(run.join(), RunOutcome::Completed);
    assert_eq!(h.script_output().len(), 1);
}

#[test]
fn test_pause_step_go() {
    let h = Harness::new(quiet_config());
    let run = h
        .runner
        .open_text(script_runner::RunSpec::new("main.rhai"), "print(1);\nprint(2);\nprint(3);\n")
        .unwrap();
    run.pause();
    run.run().unwrap();

    assert!(h.wait_for_line(1, ScriptState::Paused));
    assert!(h.script_output().is_empty());

    run.step();
    assert!(h.wait_for_line(2, ScriptState::Paused));
    let output = h.script_output();
    assert_eq!(output.len(), 1);
    assert!(output[0].ends_with("(main.rhai:1): 1"));

    run.go();
    assert_eq!(run.join(), RunOutcome::Completed);
    assert_eq!(h.script_output().len(), 3);
    assert!(!h.sink.line_states().contains(&(3, ScriptState::Paused)));
    assert_eq!(last_state(&h.sink), Some(ScriptState::Stopped));
}

#[test]
fn test_stop_is_idempotent() {
    let h = Harness::new(quiet_config());
    let run = h.start("main.rhai", "wait();\nprint(1);\n");
    assert!(h.wait_for_state(ScriptState::Waiting));

    run.stop();
    run.stop();
    assert_eq!(run.join(), RunOutcome::Stopped);
    run.stop();

    assert_eq!(h.count_state(ScriptState::Stopped), 1);
    assert!(h.script_output().is_empty());
    assert!(run.exceptions().is_empty());
}

#[test]
fn test_stop_request_releases_a_paused_run() {
    let h = Harness::new(quiet_config());
    h.runner.set_breakpoint("main.rhai", 1);
    let run = h.start("main.rhai", "print(1);\n");
    assert!(h.wait_for_state(ScriptState::Breakpoint));

    let next = h
        .runner
        .dispatch(&run, ControlRequest::parse(r#"{"command":"stop"}"#).unwrap())
        .unwrap();
    assert_eq!(next, Dispatch::Shutdown);
    assert_eq!(run.join(), RunOutcome::Stopped);
    assert!(h.script_output().is_empty());
}

#[test]
fn test_go_ends_a_script_wait() {
    let h = Harness::new(quiet_config());
    let run = h.start("main.rhai", "let cut = wait(60);\nprint(cut);\n");
    assert!(h.wait_for_state(ScriptState::Waiting));

    h.runner.dispatch_current(ControlRequest::Go).unwrap();
    assert_eq!(run.join(), RunOutcome::Completed);
    assert!(h.script_output()[0].ends_with(": true"));
}

#[test]
fn test_only_untimed_waits_await_the_operator() {
    let h = Harness::new(quiet_config());
    let run = h.start("main.rhai", "wait(60);\nwait();\nprint(2);\n");
    assert!(h.wait_for_line(1, ScriptState::Waiting));
    assert!(!run.awaits_operator());

    run.go();
    assert!(h.wait_for_line(2, ScriptState::Waiting));
    assert!(run.awaits_operator());

    run.go();
    assert_eq!(run.join(), RunOutcome::Completed);
    assert!(!run.awaits_operator());
}

#[test]
fn test_error_pause_awaits_the_operator() {
    let mut config = quiet_config();
    config.pause_on_error = true;
    let h = Harness::new(config);
    let run = h.start("main.rhai", "throw \"bad\";\nprint(2);\n");
    assert!(h.wait_for_state(ScriptState::Error));
    assert!(run.awaits_operator());

    run.stop();
    assert_eq!(run.join(), RunOutcome::Stopped);
}

#[test]
fn test_timed_wait_runs_out() {
    let h = Harness::new(quiet_config());
    let run = h.start("main.rhai", "print(wait(0.05));\n");
    assert_eq!(run.join(), RunOutcome::Completed);
    assert!(h.script_output()[0].ends_with(": false"));
}

#[test]
fn test_backtrace_is_published_on_request() {
    let h = Harness::new(quiet_config());
    h.runner.set_breakpoint("main.rhai", 2);
    let run = h.start("main.rhai", "let a = 1;\nprint(a);\n");
    assert!(h.wait_for_state(ScriptState::Breakpoint));

    h.runner.dispatch(&run, ControlRequest::Backtrace).unwrap();
    assert!(h.sink.wait_for(crate::common::TIMEOUT, |event| matches!(
        event,
        RunEvent::Backtrace { frames } if frames == &vec!["main.rhai:2".to_string()]
    )));

    run.go();
    run.join();
}
