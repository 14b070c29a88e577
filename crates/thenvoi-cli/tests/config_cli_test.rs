//! End-to-end tests for `thenvoi config ...`.

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;

use thenvoi_test_utils::{SAMPLE_AGENT_ID, SAMPLE_API_KEY, Sandbox};

fn thenvoi(sandbox: &Sandbox) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("thenvoi"));
    cmd.arg("--config")
        .arg(sandbox.config_path())
        .arg("--state-dir")
        .arg(sandbox.state_dir())
        .env("NO_COLOR", "1")
        .env_remove("THENVOI_AGENT_ID")
        .env_remove("THENVOI_API_KEY")
        .env_remove("THENVOI_CONFIG_PATH")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn set_creates_then_list_masks() {
    let sandbox = Sandbox::new();

    thenvoi(&sandbox)
        .args(["config", "set", "bot", "-i", SAMPLE_AGENT_ID, "-k", SAMPLE_API_KEY])
        .assert()
        .success()
        .stdout(contains("Created configuration for 'bot'"));

    thenvoi(&sandbox)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(contains("bot"))
        .stdout(contains("12345678-****-****-****-123456789012"))
        .stdout(contains("*****************2345"))
        .stdout(contains(SAMPLE_API_KEY).not());
}

#[test]
fn set_rejects_bad_uuid() {
    let sandbox = Sandbox::new();

    thenvoi(&sandbox)
        .args(["config", "set", "bot", "-i", "not-a-uuid", "-k", "secret"])
        .assert()
        .code(1)
        .stderr(contains("must be a valid UUID"));
    assert!(!sandbox.config_path().exists());
}

#[test]
fn overwrite_without_force_needs_a_terminal() {
    let sandbox = Sandbox::new();
    sandbox.write_sample_config();

    thenvoi(&sandbox)
        .args(["config", "set", "test-agent", "-i", SAMPLE_AGENT_ID, "-k", "sk-new-key-000000"])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(contains("--force"));

    thenvoi(&sandbox)
        .args(["config", "set", "test-agent", "-i", SAMPLE_AGENT_ID, "-k", "sk-new-key-000000"])
        .arg("-f")
        .assert()
        .success()
        .stdout(contains("Updated configuration for 'test-agent'"));
}

#[test]
fn list_json_and_empty_store() {
    let sandbox = Sandbox::new();

    thenvoi(&sandbox)
        .args(["--format", "json", "config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));

    thenvoi(&sandbox)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(contains("No agents configured."));

    sandbox.write_sample_config();
    thenvoi(&sandbox)
        .args(["--format", "json", "config", "list"])
        .assert()
        .success()
        .stdout(contains("\"api_key_masked\""))
        .stdout(contains("\"another-agent\""));
}

#[test]
fn show_masks_unless_revealed() {
    let sandbox = Sandbox::new();
    sandbox.write_sample_config();

    thenvoi(&sandbox)
        .args(["config", "show", "test-agent"])
        .assert()
        .success()
        .stdout(contains(SAMPLE_AGENT_ID))
        .stdout(contains(SAMPLE_API_KEY).not())
        .stdout(contains("--reveal"));

    thenvoi(&sandbox)
        .args(["config", "show", "test-agent", "--reveal"])
        .assert()
        .success()
        .stdout(contains(SAMPLE_API_KEY));
}

#[test]
fn show_unknown_agent_hints_at_list() {
    let sandbox = Sandbox::new();
    sandbox.write_sample_config();

    thenvoi(&sandbox)
        .args(["config", "show", "ghost"])
        .assert()
        .code(1)
        .stderr(contains("Error:"))
        .stderr(contains("Hint: Run 'thenvoi config list'"));
}

#[test]
fn delete_with_force() {
    let sandbox = Sandbox::new();
    sandbox.write_sample_config();

    thenvoi(&sandbox)
        .args(["config", "delete", "test-agent", "--force"])
        .assert()
        .success()
        .stdout(contains("Deleted configuration for 'test-agent'"));

    thenvoi(&sandbox)
        .args(["config", "delete", "test-agent", "--force"])
        .assert()
        .code(1);
}

#[test]
fn validate_prints_each_problem() {
    let sandbox = Sandbox::new();
    sandbox.write_config("broken:\n  agent_id: nope\n");

    thenvoi(&sandbox)
        .args(["config", "validate"])
        .assert()
        .code(1)
        .stdout(contains("Validation errors:"))
        .stdout(contains("invalid UUID format"))
        .stdout(contains("missing 'api_key'"))
        .stderr(contains("Error:").not());
}

#[test]
fn validate_success() {
    let sandbox = Sandbox::new();
    sandbox.write_sample_config();

    thenvoi(&sandbox)
        .args(["config", "validate", "test-agent"])
        .assert()
        .success()
        .stdout(contains("Configuration valid for agent 'test-agent'"));
}

#[test]
fn path_reports_existence() {
    let sandbox = Sandbox::new();

    thenvoi(&sandbox)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(contains("agent_config.yaml"))
        .stdout(contains("File exists: No"));

    thenvoi(&sandbox)
        .args(["config", "set", "bot", "-i", SAMPLE_AGENT_ID, "-k", SAMPLE_API_KEY])
        .assert()
        .success();

    thenvoi(&sandbox)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(contains("File exists: Yes"))
        .stdout(contains("Permissions: Secure"));
}
