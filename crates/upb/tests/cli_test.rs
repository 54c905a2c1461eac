//! Integration tests for the `upb` CLI binary.
//!
//! These cover argument parsing, help output, shell completions, the
//! offline codec commands and registry listings, all without a PIM.
#![allow(clippy::unwrap_used)]

use std::io::Write;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `upb` binary with env isolation.
///
/// Clears all `UPB_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn upb_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("upb");
    cmd.env("HOME", "/tmp/upb-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/upb-cli-test-nonexistent")
        .env_remove("UPB_PROFILE")
        .env_remove("UPB_URL")
        .env_remove("UPB_FLAGS")
        .env_remove("UPB_UPSTART")
        .env_remove("UPB_OUTPUT")
        .env_remove("UPB_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

const EXPORT: &str = "\
0,UPStart Export,5,0,194,1,0
2,5,Evening
3,9,0,4,28,5,12,Dimmer,1,0,0,Hall,Light
3,12,0,4,28,5,12,Dimmer,1,0,0,Porch,Light
8,0,9,1
4,0,0,9,5,50
4,0,0,12,5,100
";

fn export_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(EXPORT.as_bytes()).unwrap();
    file
}

/// A command bound to an unused local port and the sample export.
fn offline_cmd(export: &tempfile::NamedTempFile) -> assert_cmd::Command {
    let mut cmd = upb_cmd();
    cmd.args(["--url", "tcp://127.0.0.1:1", "--upstart"])
        .arg(export.path());
    cmd
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = upb_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    upb_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("UPB")
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("links"))
            .and(predicate::str::contains("monitor")),
    );
}

#[test]
fn test_version_flag() {
    upb_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("upb"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    upb_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Codec ───────────────────────────────────────────────────────────

#[test]
fn test_encode_then_decode() {
    let output = upb_cmd()
        .args(["encode", "goto", "194", "9", "--level", "50", "-o", "plain"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let payload = String::from_utf8(output.stdout).unwrap();

    upb_cmd()
        .args(["decode", payload.trim(), "-o", "json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"network_id\": 194")
                .and(predicate::str::contains("\"dest_id\": 9"))
                .and(predicate::str::contains("\"msg_id\": 34")),
        );
}

#[test]
fn test_encode_rejects_channel_on_link() {
    let output = upb_cmd()
        .args(["encode", "activate", "194", "5", "--link", "--channel", "1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("channel"));
}

#[test]
fn test_decode_garbage_is_a_usage_error() {
    let output = upb_cmd().args(["decode", "zz"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Malformed"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path() {
    upb_cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_missing_profile_without_url() {
    let output = upb_cmd().args(["devices", "list"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Profile 'default' not found"));
}

// ── Registries ──────────────────────────────────────────────────────

#[test]
fn test_devices_list_from_export() {
    let export = export_file();
    offline_cmd(&export)
        .args(["devices", "list", "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::diff("194_9_0\n194_12_0\n"));
}

#[test]
fn test_devices_show_json() {
    let export = export_file();
    offline_cmd(&export)
        .args(["devices", "show", "194_9_0", "-o", "json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"name\": \"Hall Light\"")
                .and(predicate::str::contains("\"dimmable\": true"))
                .and(predicate::str::contains("\"status\": null")),
        );
}

#[test]
fn test_unknown_device_exits_not_found() {
    let export = export_file();
    let output = offline_cmd(&export)
        .args(["devices", "show", "194_99_0"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("devices list"));
}

#[test]
fn test_links_show_lists_members() {
    let export = export_file();
    offline_cmd(&export)
        .args(["links", "show", "194_5"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Evening")
                .and(predicate::str::contains("Hall Light"))
                .and(predicate::str::contains("preset 100")),
        );
}

#[test]
fn test_bad_export_fails_loudly() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"2,5,Evening\n").unwrap();
    let output = upb_cmd()
        .args(["--url", "tcp://127.0.0.1:1", "--upstart"])
        .arg(file.path())
        .args(["links", "list"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(combined_output(&output).contains("line 1"));
}

#[test]
fn test_unreachable_pim_exits_with_connection_code() {
    let export = export_file();
    let output = offline_cmd(&export)
        .args(["--timeout", "1", "devices", "on", "194_9_0"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7));
    assert!(combined_output(&output).contains("127.0.0.1"));
}
