use crate::common::{events, output_lines, Workspace};

#[test]
fn test_stdout_is_json_lines() {
    let ws = Workspace::new();
    ws.script("main.rhai", "print(\"hello\");\n");
    let output = ws.run("main").output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let events = events(&output.stdout);
    assert_eq!(events[0]["type"], "file");
    assert_eq!(events[0]["filename"], "main.rhai");
    assert_eq!(events.last().unwrap()["type"], "complete");

    let lines = output_lines(&events);
    assert!(lines.iter().any(|line| line.ends_with("(main.rhai:1): hello")));
}

#[test]
fn test_error_output_is_red() {
    let ws = Workspace::new();
    ws.script("main.rhai", "throw \"boom\";\nprint(2);\n");
    let output = ws.run("main").output().unwrap();
    assert!(output.status.success());

    let events = events(&output.stdout);
    let red: Vec<_> = events
        .iter()
        .filter(|event| event["type"] == "output" && event["color"] == "RED")
        .collect();
    assert_eq!(red.len(), 1);
    assert!(red[0]["line"].as_str().unwrap().contains("ERROR: main.rhai:1: boom"));
    assert!(events
        .iter()
        .any(|event| event["type"] == "line" && event["state"] == "error"));
}

#[test]
fn test_pretty_falls_back_to_json_when_piped() {
    let ws = Workspace::new();
    ws.script("main.rhai", "print(1);\n");
    let output = ws.run("main").arg("--pretty").output().unwrap();
    assert!(output.status.success());
    assert_eq!(events(&output.stdout).last().unwrap()["type"], "complete");
}
