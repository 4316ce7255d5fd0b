use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn run_help_mentions_options() {
    let mut cmd = cargo_bin_cmd!("intakectl");
    let output = cmd
        .arg("run")
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("--max-files"), "run help missing --max-files");
    assert!(text.contains("--json"), "run help missing --json");
    assert!(text.contains("--set"), "run help missing global --set");
}

#[test]
fn policies_lists_builtin_types() {
    let mut cmd = cargo_bin_cmd!("intakectl");
    cmd.arg("policies")
        .assert()
        .success()
        .stdout(predicate::str::contains("simple"))
        .stdout(predicate::str::contains("sleepy"))
        .stdout(predicate::str::contains("fs_watcher"));
}

#[test]
fn check_reports_missing_options() {
    let tmp = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("intakectl");
    cmd.current_dir(tmp.path())
        .env_remove("INTAKE_CONFIG_PATH")
        .env_remove("INTAKE_CONFIG_JSON")
        .arg("check")
        .arg("--set")
        .arg("topic=t")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn malformed_override_is_rejected() {
    let mut cmd = cargo_bin_cmd!("intakectl");
    cmd.args(["check", "--set", "no-equals-sign"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected key=value"));
}

#[test]
fn simple_run_prints_matching_files() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("in");
    std::fs::create_dir_all(root.join("nested")).unwrap();
    std::fs::write(root.join("1.txt"), "one").unwrap();
    std::fs::write(root.join("nested/2.txt"), "two").unwrap();
    std::fs::write(root.join("skip.log"), "skip").unwrap();

    let mut cmd = cargo_bin_cmd!("intakectl");
    cmd.current_dir(tmp.path())
        .env_remove("INTAKE_CONFIG_PATH")
        .env_remove("INTAKE_CONFIG_JSON")
        .arg("--set")
        .arg(format!("fs.uris={}", root.display()))
        .args([
            "--set",
            "topic=t",
            "--set",
            "policy.class=simple",
            "--set",
            "file_reader.class=text",
            "--set",
            r"policy.regexp=^[0-9]+\.txt$",
            "run",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("1.txt"))
        .stdout(predicate::str::contains("2.txt"))
        .stdout(predicate::str::contains("skip.log").not());
}
