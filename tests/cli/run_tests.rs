use crate::common::{events, output_lines, Workspace};
use std::fs;
use std::time::Duration;

#[test]
fn test_run_id_and_extension() {
    let ws = Workspace::new();
    ws.script("procs/collect.rhai", "print(1);\n");
    let output = ws.run("procs/collect").args(["--id", "12"]).output().unwrap();
    assert!(output.status.success());

    let events = events(&output.stdout);
    assert_eq!(events[0]["filename"], "procs/collect.rhai");
    assert!(output_lines(&events)
        .iter()
        .any(|line| line.ends_with("Script completed: collect.rhai")));
}

#[test]
fn test_stop_request_on_stdin() {
    let ws = Workspace::new();
    ws.script("main.rhai", "wait();\nprint(\"never\");\n");
    let output = ws
        .run("main")
        .write_stdin("{\"command\":\"stop\"}\n")
        .output()
        .unwrap();
    assert!(output.status.success());

    let lines = output_lines(&events(&output.stdout));
    assert!(lines
        .iter()
        .any(|line| line.ends_with(r#"received command: {"command":"stop"}"#)));
    assert!(lines.iter().any(|line| line.ends_with("Script stopped: main.rhai")));
    assert!(!lines.iter().any(|line| line.ends_with(": never")));
}

#[test]
fn test_closed_input_stops_a_paused_run() {
    let ws = Workspace::new();
    ws.script("main.rhai", "print(1);\nprint(2);\n");
    let output = ws
        .run("main")
        .args(["--options", "pauseOnError"])
        .write_stdin("{\"command\":\"pause\"}\n")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(events(&output.stdout).last().unwrap()["type"], "complete");
}

#[test]
fn test_closed_input_stops_a_run_paused_on_error() {
    let ws = Workspace::new();
    ws.script("main.rhai", "print(1);\nthrow \"bad\";\nprint(3);\n");
    let output = ws
        .run("main")
        .args(["--options", "pauseOnError"])
        .timeout(Duration::from_secs(30))
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let events = events(&output.stdout);
    assert!(events
        .iter()
        .any(|event| event["type"] == "line" && event["state"] == "error"));
    let lines = output_lines(&events);
    assert!(lines.iter().any(|line| line.ends_with("Script stopped: main.rhai")));
    assert!(!lines.iter().any(|line| line.ends_with(": 3")));
}

#[test]
fn test_closed_input_stops_an_untimed_wait() {
    let ws = Workspace::new();
    ws.script("main.rhai", "wait();\nprint(\"never\");\n");
    let output = ws
        .run("main")
        .timeout(Duration::from_secs(30))
        .output()
        .unwrap();
    assert!(output.status.success());
    let lines = output_lines(&events(&output.stdout));
    assert!(lines.iter().any(|line| line.ends_with("Script stopped: main.rhai")));
    assert!(!lines.iter().any(|line| line.ends_with(": never")));
}

#[test]
fn test_line_delay_flag() {
    let ws = Workspace::new();
    ws.script("main.rhai", "print(1);\nprint(2);\n");
    ws.run("main")
        .args(["--line-delay", "0.01"])
        .assert()
        .success();
}

#[test]
fn test_suite_report_is_written() {
    let ws = Workspace::new();
    ws.script("suite_power.rhai", "print(1);\n");
    let output = ws.run("suite_power").output().unwrap();
    assert!(output.status.success());

    let events = events(&output.stdout);
    let report = events
        .iter()
        .find(|event| event["type"] == "report")
        .expect("no report event");
    assert_eq!(report["report"]["outcome"], "completed");

    let reports: Vec<_> = fs::read_dir(ws.root().join("reports"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].ends_with("suite_power.rhai.json"), "{:?}", reports);
}
