use crate::common::{last_state, quiet_config, Harness};
use script_runner::{OutputColor, RunEvent, RunOutcome, RunSpec, RunnerConfig, RunnerError, ScriptState};

#[test]
fn test_simple_run_prints_in_order() {
    let h = Harness::new(quiet_config());
    let run = h.start("main.rhai", "print(1);\nprint(2);\n");

    assert_eq!(run.join(), RunOutcome::Completed);
    let output = h.script_output();
    assert_eq!(output.len(), 2);
    assert!(output[0].ends_with("(main.rhai:1): 1"), "{}", output[0]);
    assert!(output[1].ends_with("(main.rhai:2): 2"), "{}", output[1]);
    assert_eq!(last_state(&h.sink), Some(ScriptState::Stopped));
    assert_eq!(h.count_state(ScriptState::Stopped), 1);
    assert!(!run.is_running());
}

#[test]
fn test_engine_messages_frame_the_run() {
    let h = Harness::new(quiet_config());
    let run = h.start("main.rhai", "let x = 1;\n");
    run.join();

    let messages = h.engine_messages();
    assert!(messages[0].ends_with("Starting script: main.rhai"));
    assert!(messages.last().unwrap().ends_with("Script completed: main.rhai"));
}

#[test]
fn test_disconnect_mode_is_announced() {
    let h = Harness::new(quiet_config());
    let run = h
        .runner
        .open_text(RunSpec::new("main.rhai").disconnect(true), "wait(30);\nprint(\"done\");\n")
        .unwrap();
    run.run().unwrap();

    assert_eq!(run.join(), RunOutcome::Completed);
    assert!(h.engine_messages()[0].ends_with("Starting script: main.rhai in DISCONNECT mode"));
    assert_eq!(h.script_output().len(), 1);
}

#[test]
fn test_let_bindings_survive_instrumentation() {
    let h = Harness::new(quiet_config());
    let script = "let total = 0;\nfor i in 1..=4 {\n    total += i;\n}\nlet doubled = total * 2;\nprint(doubled);\n";
    let run = h.start("main.rhai", script);

    assert_eq!(run.join(), RunOutcome::Completed);
    assert!(h.script_output()[0].ends_with(": 20"));
}

#[test]
fn test_expression_continued_on_next_line() {
    let h = Harness::new(quiet_config());
    let script = "let y = 5;\nlet x = 0;\nx = y\n    - 1;\nprint(x);\nlet z = y\n    - 2;\nprint(z);\n";
    let run = h.start("main.rhai", script);

    assert_eq!(run.join(), RunOutcome::Completed);
    let output = h.script_output();
    assert_eq!(output.len(), 2);
    assert!(output[0].ends_with("(main.rhai:5): 4"), "{:?}", output);
    assert!(output[1].ends_with("(main.rhai:8): 3"), "{:?}", output);
}

#[test]
fn test_functions_return_their_tail_value() {
    let h = Harness::new(quiet_config());
    let script = "fn add(a, b) {\n    a + b\n}\nprint(add(2, 3));\n";
    let run = h.start("main.rhai", script);

    assert_eq!(run.join(), RunOutcome::Completed);
    assert!(h.script_output()[0].ends_with("(main.rhai:4): 5"));
}

#[test]
fn test_output_is_truncated_with_one_warning() {
    let config = RunnerConfig {
        stdout_max_lines: 3,
        ..quiet_config()
    };
    let h = Harness::new(config);
    let run = h.start("main.rhai", "print(\"a\\nb\\nc\\nd\\ne\");\n");
    run.join();

    let events: Vec<(String, OutputColor)> = h
        .sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            RunEvent::Output { line, color } if line.contains("(main.rhai:1)") => Some((line, color)),
            _ => None,
        })
        .collect();
    assert_eq!(events.len(), 4);
    assert!(events[0].0.ends_with(": a"));
    assert!(events[2].0.ends_with(": c"));
    assert!(events[3]
        .0
        .ends_with("ERROR: Too much written to stdout.  Truncating output to 3 lines."));
    assert_eq!(events[3].1, OutputColor::Red);
}

#[test]
fn test_line_offset_shifts_reported_lines() {
    let h = Harness::new(quiet_config());
    let run = h.runner.open_text(RunSpec::new("main.rhai"), "").unwrap();
    run.run_text("print(1);", 10, None, false).unwrap();
    run.join();

    assert!(h.script_output()[0].ends_with("(main.rhai:11): 1"));
    assert!(h.sink.line_states().contains(&(11, ScriptState::Running)));
}

#[test]
fn test_skip_script_ends_the_run_quietly() {
    let h = Harness::new(quiet_config());
    let run = h.start("main.rhai", "print(1);\nskip_script();\nprint(2);\n");

    assert_eq!(run.join(), RunOutcome::Stopped);
    assert_eq!(h.script_output().len(), 1);
    assert!(run.exceptions().is_empty());
    assert!(h
        .engine_messages()
        .last()
        .unwrap()
        .ends_with("Script stopped: main.rhai"));
}

#[test]
fn test_suite_runs_publish_a_report() {
    let h = Harness::new(quiet_config());
    let run = h.start("suite_main.rhai", "print(1);\nthrow \"bad\";\nprint(3);\n");
    assert_eq!(run.join(), RunOutcome::Completed);

    let report = h
        .sink
        .events()
        .into_iter()
        .find_map(|event| match event {
            RunEvent::Report { report } => Some(report),
            _ => None,
        })
        .expect("no report event");
    assert_eq!(report["script"], "suite_main.rhai");
    assert_eq!(report["outcome"], "completed");
    assert_eq!(report["errors"].as_array().unwrap().len(), 1);
    assert_eq!(report["settings"]["continueAfterError"], true);

    let saved = h.store.reports();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, "suite_main.rhai");
}

#[test]
fn test_plain_runs_do_not_report() {
    let h = Harness::new(quiet_config());
    h.start("main.rhai", "print(1);\n").join();
    assert!(h.store.reports().is_empty());
}

#[test]
fn test_second_start_while_running_is_refused() {
    let h = Harness::new(quiet_config());
    let run = h.start("main.rhai", "wait();\n");
    assert!(h.wait_for_state(ScriptState::Waiting));

    let err = run.run().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RunnerError>(),
        Some(RunnerError::AlreadyRunning(_))
    ));
    let err = run.set_text("print(2);", "main.rhai").unwrap_err();
    assert!(matches!(err.downcast_ref::<RunnerError>(), Some(RunnerError::Busy(_))));

    run.stop();
    assert_eq!(run.join(), RunOutcome::Stopped);
}

#[test]
fn test_current_run_is_cleared_after_completion() {
    let h = Harness::new(quiet_config());
    let run = h.start("main.rhai", "wait();\n");
    assert!(h.wait_for_state(ScriptState::Waiting));
    assert_eq!(h.runner.current().map(|current| current.id()), Some(run.id()));

    run.stop();
    run.join();
    assert!(h.runner.current().is_none());
}

#[test]
fn test_instrumentation_error_is_returned_before_running() {
    let h = Harness::new(quiet_config());
    let run = h.runner.open_text(RunSpec::new("main.rhai"), "print(1);\nlet m = #{\n").unwrap();

    let err = run.run().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RunnerError>(),
        Some(RunnerError::Instrumentation { .. })
    ));
    assert!(!run.is_running());
    assert!(h.sink.line_states().is_empty());
}
