use predicates::prelude::*;

#[test]
fn help_lists_console_commands() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("crawlboard");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("crawlers"))
        .stdout(predicate::str::contains("watch"));
}

#[test]
fn unknown_subcommand_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("crawlboard");
    cmd.arg("frobnicate").assert().failure();
}

#[test]
fn unreachable_backend_reports_the_failing_operation() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("crawlboard");
    cmd.env("CRAWLBOARD_BACKEND_URL", "http://127.0.0.1:9/api")
        .args(["crawlers", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("list crawlers"));
}
