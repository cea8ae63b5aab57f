use assert_cmd::Command;
use predicates::prelude::*;

fn multiscan() -> Command {
    Command::cargo_bin("multiscan").unwrap()
}

#[test]
fn test_validate_accepts_valid_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multiscan.toml");
    std::fs::write(
        &path,
        r#"
        [multiscan]
        try_count = 3
        batch_count = 2

        [tool]
        command = "xcodebuild {tests}"
        "#,
    )
    .unwrap();

    multiscan()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("Batch count: 2"));
}

#[test]
fn test_validate_rejects_zero_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multiscan.toml");
    std::fs::write(
        &path,
        r#"
        [multiscan]
        batch_count = 0

        [tool]
        command = "xcodebuild {tests}"
        "#,
    )
    .unwrap();

    multiscan()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("batch_count must be greater than zero"));
}

#[test]
fn test_init_writes_loadable_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multiscan.toml");

    multiscan()
        .arg("--config")
        .arg(&path)
        .arg("init")
        .assert()
        .success();
    assert!(path.exists());

    multiscan()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .success();

    // refuses to overwrite
    multiscan()
        .arg("--config")
        .arg(&path)
        .arg("init")
        .assert()
        .failure();
}

#[test]
fn test_run_reports_failures_in_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multiscan.toml");
    let output = dir.path().join("out");
    std::fs::write(
        &path,
        format!(
            r#"
            [multiscan]
            quit_simulators = false
            output_types = "junit"
            output_directory = "{}"

            [tool]
            command = "printf '<testsuite><testcase classname=\"App.Tests\" name=\"testBroken\"><failure message=\"nope\"/></testcase></testsuite>' > {{junit}}; exit 65"
            "#,
            output.display()
        ),
    )
    .unwrap();

    multiscan()
        .arg("--config")
        .arg(&path)
        .arg("run")
        .arg("--summary-json")
        .arg(dir.path().join("summary.json"))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("App/Tests/testBroken"));

    let summary = std::fs::read_to_string(dir.path().join("summary.json")).unwrap();
    let summary: serde_json::Value = serde_json::from_str(&summary).unwrap();
    assert_eq!(summary["result"], false);
    assert_eq!(summary["failed_testcount"], 1);
}
