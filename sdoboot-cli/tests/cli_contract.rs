//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("sdoboot");
    cmd.env_remove("SDOBOOT_CONFIG")
        .env_remove("SDOBOOT_PORT")
        .env_remove("SDOBOOT_BAUD")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sdoboot"))
        .stdout(predicate::str::contains("simulate"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sdoboot"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn completions_command_writes_to_stdout() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .code(0)
        .stdout(predicate::str::contains("sdoboot"));
}

#[test]
fn completions_without_shell_is_usage_error() {
    cli_cmd()
        .arg("completions")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("shell"));
}

#[test]
fn exit_code_two_for_unknown_command() {
    cli_cmd()
        .arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn simulate_json_reports_transfer() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir
        .path()
        .join("app.bin");
    let data: Vec<u8> = (0..100u8).collect();
    fs::write(&image, &data).expect("write image");

    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["simulate", "--capacity", "64", "--json"])
        .arg(&image)
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let report: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(report["bytes"], 100);
    assert_eq!(report["commands"], 2);
    assert_eq!(report["capacity"], 64);
    assert_eq!(report["resets"], 0);
}

#[test]
fn simulate_missing_image_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir
        .path()
        .join("not_there.bin");

    cli_cmd()
        .current_dir(dir.path())
        .args(["simulate", "--json"])
        .arg(&missing)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn simulate_empty_image_is_usage_error() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir
        .path()
        .join("empty.bin");
    fs::write(&image, b"").expect("write image");

    cli_cmd()
        .current_dir(dir.path())
        .arg("simulate")
        .arg(&image)
        .assert()
        .failure()
        .code(2);
}

#[test]
fn invalid_config_file_is_config_error() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("sdoboot.toml"), "invalid toml [[[").expect("write config");
    let image = dir
        .path()
        .join("app.bin");
    fs::write(&image, [1, 2, 3]).expect("write image");

    cli_cmd()
        .current_dir(dir.path())
        .arg("simulate")
        .arg(&image)
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("TOML"));
}

#[test]
fn local_config_sets_capacity() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path().join("sdoboot.toml"),
        "[channel]\ncapacity = 16\nfragment_size = 4\n",
    )
    .expect("write config");
    let image = dir
        .path()
        .join("app.bin");
    fs::write(&image, [7u8; 40]).expect("write image");

    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["simulate", "--json"])
        .arg(&image)
        .assert()
        .success()
        .get_output()
        .clone();

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(report["capacity"], 16);
    assert_eq!(report["fragment_size"], 4);
    assert_eq!(report["commands"], 3);
}

#[test]
fn console_replay_prints_cleaned_commands() {
    let dir = tempdir().expect("tempdir should be created");
    let capture = dir
        .path()
        .join("capture.txt");
    fs::write(&capture, "reset node\r\nstatus # query\n").expect("write capture");

    cli_cmd()
        .current_dir(dir.path())
        .arg("console")
        .arg("--input")
        .arg(&capture)
        .assert()
        .success()
        .stdout("RESETNODE\nSTATUS\n");
}

#[test]
fn console_without_port_is_usage_error() {
    let dir = tempdir().expect("tempdir should be created");

    cli_cmd()
        .current_dir(dir.path())
        .arg("console")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("port"));
}

#[test]
fn help_includes_usage_examples() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("Examples"));
}
