use crate::common::cmd;
use predicates::prelude::*;

#[test]
fn test_help_lists_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("instrument"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_run_help_lists_options() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--line-delay"))
        .stdout(predicate::str::contains("--options"))
        .stdout(predicate::str::contains("--disconnect"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("script-runner"));
}
