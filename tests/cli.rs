use std::fs::File;
use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::predicate;

fn write_config(contents: &str) -> (assert_fs::TempDir, std::path::PathBuf) {
    let dir = assert_fs::TempDir::new().unwrap();
    let path = dir.path().join("taskmaster.yaml");
    let mut file = File::create(&path).unwrap();
    writeln!(file, "{contents}").unwrap();
    (dir, path)
}

#[test]
fn invalid_config_exits_with_code_one() {
    let (_dir, path) = write_config(
        r#"
programs:
  bad:
    cmd: "/bin/true"
    numprocs: 0
"#,
    );

    let mut cmd = Command::cargo_bin("taskmaster").unwrap();
    cmd.arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .code(1);
}

#[test]
fn print_config_prints_the_loaded_policy_and_exits_successfully() {
    let (_dir, path) = write_config(
        r#"
programs:
  sleeper:
    cmd: "/bin/sleep 60"
    autostart: false
"#,
    );

    let mut cmd = Command::cargo_bin("taskmaster").unwrap();
    cmd.arg("--config")
        .arg(&path)
        .arg("--print-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("sleeper"));
}

#[test]
fn shell_status_and_exit_round_trip_over_stdin() {
    let (_dir, path) = write_config(
        r#"
programs:
  idle:
    cmd: "/bin/sleep 60"
    autostart: false
"#,
    );

    let mut cmd = Command::cargo_bin("taskmaster").unwrap();
    cmd.arg("--config")
        .arg(&path)
        .arg("--http-addr")
        .arg("127.0.0.1:0")
        .write_stdin("status\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("NAME"));
}

#[test]
fn start_on_unknown_program_reports_an_error_without_crashing() {
    let (_dir, path) = write_config(
        r#"
programs:
  known:
    cmd: "/bin/sleep 60"
    autostart: false
"#,
    );

    let mut cmd = Command::cargo_bin("taskmaster").unwrap();
    cmd.arg("--config")
        .arg(&path)
        .arg("--http-addr")
        .arg("127.0.0.1:0")
        .write_stdin("start nope\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("unknown program"));
}
