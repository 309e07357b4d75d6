use crate::common::{cmd, Workspace};
use predicates::prelude::*;

#[test]
fn test_missing_script_fails() {
    let ws = Workspace::new();
    ws.run("nope")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Script not found: nope"));
}

#[test]
fn test_unknown_run_option_fails() {
    let ws = Workspace::new();
    ws.script("main.rhai", "print(1);\n");
    ws.run("main")
        .args(["--options", "sideways"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown run option: sideways"));
}

#[test]
fn test_invalid_config_fails() {
    let ws = Workspace::new();
    ws.script("main.rhai", "print(1);\n");
    let bad = ws.script("bad.toml", "line_delay = -2.0\n");
    cmd()
        .arg("--config")
        .arg(bad)
        .args(["run", "main", "--root"])
        .arg(ws.root())
        .assert()
        .failure()
        .stderr(predicate::str::contains("line_delay"));
}

#[test]
fn test_fatal_script_exits_with_failure() {
    let ws = Workspace::new();
    ws.script("main.rhai", "let = 5;\n");
    ws.run("main")
        .assert()
        .failure()
        .stdout(predicate::str::contains(r#""state":"fatal""#))
        .stdout(predicate::str::contains(r#""type":"complete""#))
        .stderr(predicate::str::contains("failed"));
}

#[test]
fn test_instrumentation_error_is_reported() {
    let ws = Workspace::new();
    ws.script("main.rhai", "print(1);\nfoo(\n1,\n");
    ws.run("main")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Instrumentation failed at line 2"));
}
