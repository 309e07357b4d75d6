use crate::common::{quiet_config, Harness};
use script_runner::runtime::{LimitsEvent, LimitsState};
use script_runner::{OutputColor, RunEvent, RunOutcome, ScriptState};

fn red_event() -> LimitsEvent {
    LimitsEvent {
        target: "INST".into(),
        packet: "HEALTH_STATUS".into(),
        item: "TEMP1".into(),
        old_state: Some(LimitsState::Green),
        new_state: LimitsState::RedHigh,
    }
}

#[test]
fn test_red_limit_pauses_the_run() {
    let (h, limits) = Harness::with_limits(quiet_config());
    h.runner.set_monitor_limits(true);
    h.runner.set_pause_on_red(true);
    let run = h.start("main.rhai", "wait(30);\nprint(\"after\");\n");

    assert!(h.wait_for_state(ScriptState::Waiting));
    limits.send(red_event()).unwrap();
    assert!(h.wait_for_state(ScriptState::Paused));
    assert!(h.sink.events().iter().any(|event| matches!(
        event,
        RunEvent::Output { line, color: OutputColor::Red }
            if line.ends_with("INST HEALTH_STATUS TEMP1 is RED_HIGH")
    )));

    run.go();
    assert_eq!(run.join(), RunOutcome::Completed);
    assert!(h.script_output()[0].ends_with(": after"));
}

#[test]
fn test_limits_are_only_reported_without_pause_on_red() {
    let (h, limits) = Harness::with_limits(quiet_config());
    h.runner.set_monitor_limits(true);
    let run = h.start("main.rhai", "let cut = wait(30);\nprint(cut);\n");

    assert!(h.wait_for_state(ScriptState::Waiting));
    limits.send(red_event()).unwrap();
    assert!(h.sink.wait_for(crate::common::TIMEOUT, |event| matches!(
        event,
        RunEvent::Output { line, .. } if line.ends_with("is RED_HIGH")
    )));
    assert_eq!(h.count_state(ScriptState::Paused), 0);

    run.go();
    assert_eq!(run.join(), RunOutcome::Completed);
}
