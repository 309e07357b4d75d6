use crate::common::{quiet_config, Harness};
use script_runner::{RunEvent, RunOutcome, RunSpec, ScriptState};

const UTIL: &str = "fn double(x) {\n    x * 2\n}\n";
const MAIN: &str = "import \"lib/util\" as util;\nprint(util::double(21));\n";

#[test]
fn test_imported_utility_runs_instrumented() {
    let h = Harness::with_scripts(quiet_config(), &[("lib/util.rhai", UTIL)]);
    let run = h.start("main.rhai", MAIN);

    assert_eq!(run.join(), RunOutcome::Completed);
    assert!(h.script_output()[0].ends_with("(main.rhai:2): 42"));
    assert!(h.sink.events().iter().any(|event| matches!(
        event,
        RunEvent::File { filename, text, .. } if filename == "lib/util.rhai" && text == UTIL
    )));
    assert!(h.runner.file_cache().contains("lib/util.rhai"));
}

#[test]
fn test_breakpoint_inside_utility_shows_call_stack() {
    let h = Harness::with_scripts(quiet_config(), &[("lib/util.rhai", UTIL)]);
    h.runner.set_breakpoint("lib/util.rhai", 2);
    let run = h.start("main.rhai", MAIN);

    assert!(h.wait_for_line(2, ScriptState::Breakpoint));
    assert_eq!(
        run.backtrace(),
        vec!["lib/util.rhai:2".to_string(), "main.rhai".to_string()]
    );
    assert!(h
        .engine_messages()
        .iter()
        .any(|line| line.ends_with("Hit Breakpoint at util.rhai:2")));

    run.go();
    assert_eq!(run.join(), RunOutcome::Completed);
}

#[test]
fn test_missing_utility_is_fatal() {
    let h = Harness::new(quiet_config());
    let run = h.start("main.rhai", MAIN);
    assert!(matches!(run.join(), RunOutcome::Fatal(_)));
    assert_eq!(h.count_state(ScriptState::Fatal), 1);
}

#[test]
fn test_rename_moves_breakpoints() {
    let h = Harness::new(quiet_config());
    let run = h.runner.open_text(RunSpec::new(""), "print(1);\nprint(2);\n").unwrap();
    let untitled = run.unique_filename();
    assert_eq!(untitled, format!("Untitled{}", run.id()));

    h.runner.set_breakpoint(&untitled, 2);
    run.set_filename("procs/new.rhai");

    assert_eq!(run.unique_filename(), "procs/new.rhai");
    assert!(h.runner.is_breakpoint("procs/new.rhai", 2));
    assert!(!h.runner.is_breakpoint(&untitled, 2));
}

#[test]
fn test_stored_breakpoints_apply_to_the_run() {
    let h = Harness::with_scripts(quiet_config(), &[("procs/a.rhai", "print(1);\nprint(2);\n")]);
    h.store.set_breakpoints("procs/a.rhai", vec![1]);
    let run = h.runner.open(RunSpec::new("procs/a")).unwrap();
    run.run().unwrap();

    assert!(h.wait_for_line(2, ScriptState::Breakpoint));
    run.go();
    assert_eq!(run.join(), RunOutcome::Completed);
}

#[test]
fn test_cleared_stored_breakpoint_stays_cleared() {
    let h = Harness::with_scripts(quiet_config(), &[("a.rhai", "print(1);\nprint(2);\n")]);
    h.store.set_breakpoints("a.rhai", vec![1]);
    let run = h.runner.open(RunSpec::new("a.rhai")).unwrap();
    assert!(h.runner.is_breakpoint("a.rhai", 2));

    h.runner.clear_breakpoint("a.rhai", 2);
    run.set_text("print(1);\nprint(3);\n", "a.rhai").unwrap();
    assert!(!h.runner.is_breakpoint("a.rhai", 2));

    run.run().unwrap();
    assert_eq!(run.join(), RunOutcome::Completed);
    assert_eq!(h.count_state(ScriptState::Breakpoint), 0);
}

#[test]
fn test_set_text_replaces_the_script() {
    let h = Harness::new(quiet_config());
    let run = h.runner.open_text(RunSpec::new("main.rhai"), "print(1);\n").unwrap();
    run.set_text("print(\"edited\");\n", "main.rhai").unwrap();
    run.run().unwrap();

    assert_eq!(run.join(), RunOutcome::Completed);
    assert!(h.script_output()[0].ends_with(": edited"));
}

#[test]
fn test_message_log_is_saved_to_the_store() {
    let h = Harness::new(quiet_config());
    let run = h.start("main.rhai", "print(\"logged\");\n");
    run.join();
    run.stop_message_log();

    let logs = h.store.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].0, "main.rhai");
    assert!(logs[0].1.contains("(main.rhai:1): logged"));
    assert!(logs[0].1.contains("Starting script: main.rhai"));
}
