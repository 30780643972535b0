//! CLI integration tests for vmdiff
//!
//! Tests cover:
//! - Help, version and argument errors
//! - `run`, `roots`, `speed` and `replay` against scripted geth-style binaries

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Helper to run the CLI with arguments inside `dir`
fn run_vmdiff(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vmdiff"))
        .args(args)
        .current_dir(dir)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn write_tests(dir: &Path, count: usize) -> PathBuf {
    let tests = dir.join("tests");
    std::fs::create_dir_all(&tests).unwrap();
    for i in 0..count {
        std::fs::write(tests.join(format!("{:08}-t-0.json", i)), "{}").unwrap();
    }
    tests
}

// ==================== Help & Errors ====================

#[test]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    let output = run_vmdiff(dir.path(), &["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    for word in ["run", "roots", "speed", "replay", "--gethbatch", "--nethbatch", "--revme"] {
        assert!(text.contains(word), "help lacks {}", word);
    }
}

#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    let output = run_vmdiff(dir.path(), &["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("vmdiff"));
}

#[test]
fn test_needs_two_vms() {
    let dir = TempDir::new().unwrap();
    let output = run_vmdiff(dir.path(), &["--geth", "evm", "run", "t.json"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("need at least 2 vm(s), got 1"));
}

#[test]
fn test_missing_binary() {
    let dir = TempDir::new().unwrap();
    let output = run_vmdiff(
        dir.path(),
        &[
            "--geth",
            "/nonexistent/evm",
            "--besu",
            "/nonexistent/evmtool",
            "roots",
            "t.json",
        ],
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("binary not found: /nonexistent/evm"));
}

#[test]
fn test_missing_subcommand() {
    let dir = TempDir::new().unwrap();
    let output = run_vmdiff(dir.path(), &["--geth", "evm"]);
    assert!(!output.status.success());
}

// ==================== Scripted VMs ====================

#[cfg(unix)]
mod scripted {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// A geth-style binary writing one step with `gas` and a final root to stderr
    fn fake_geth(dir: &Path, name: &str, gas: &str) -> String {
        let path = dir.join(name);
        let body = format!(
            r#"#!/bin/sh
echo '{{"pc":0,"op":96,"gas":"{}","gasCost":"0x3","depth":1,"stack":[]}}' >&2
echo '{{"stateRoot":"0x{}"}}' >&2
"#,
            gas,
            "11".repeat(32)
        );
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_run_agree() {
        let dir = TempDir::new().unwrap();
        let a = fake_geth(dir.path(), "evm-a", "0x10");
        let b = fake_geth(dir.path(), "evm-b", "0x10");
        let tests = write_tests(dir.path(), 1);
        let test = tests.join("00000000-t-0.json");

        let output = run_vmdiff(
            dir.path(),
            &["--geth", &a, "--geth", &b, "--outdir", "out", "run", test.to_str().unwrap()],
        );
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("All 2 vms agree after 1 steps"));
        assert!(dir.path().join("out/geth-0-output.jsonl").exists());
        assert!(dir.path().join("out/geth-1-output.jsonl").exists());
    }

    #[test]
    fn test_run_divergence() {
        let dir = TempDir::new().unwrap();
        let a = fake_geth(dir.path(), "evm-a", "0x10");
        let b = fake_geth(dir.path(), "evm-b", "0x11");
        let tests = write_tests(dir.path(), 1);
        let test = tests.join("00000000-t-0.json");

        let output = run_vmdiff(
            dir.path(),
            &["--geth", &a, "--geth", &b, "--outdir", "out", "run", test.to_str().unwrap()],
        );
        assert_eq!(output.status.code(), Some(1));
        let text = stdout(&output);
        assert!(text.starts_with("Consensus error"));
        assert!(text.contains("tracediff"));
        assert!(text.contains("gas"));
    }

    #[test]
    fn test_run_json() {
        let dir = TempDir::new().unwrap();
        let a = fake_geth(dir.path(), "evm-a", "0x10");
        let b = fake_geth(dir.path(), "evm-b", "0x10");
        let tests = write_tests(dir.path(), 1);
        let test = tests.join("00000000-t-0.json");

        let output = run_vmdiff(
            dir.path(),
            &["--json", "--geth", &a, "--geth", &b, "run", test.to_str().unwrap()],
        );
        assert!(output.status.success());
        let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
        assert_eq!(json["agree"], true);
        assert_eq!(json["steps"], 1);
    }

    #[test]
    fn test_log_json() {
        let dir = TempDir::new().unwrap();
        let a = fake_geth(dir.path(), "evm-a", "0x10");
        let b = fake_geth(dir.path(), "evm-b", "0x10");
        let tests = write_tests(dir.path(), 1);
        let test = tests.join("00000000-t-0.json");

        let output = Command::new(env!("CARGO_BIN_EXE_vmdiff"))
            .args(["--log-json", "--log-level", "info", "--geth", a.as_str(), "--geth", b.as_str(), "roots"])
            .arg(&test)
            .current_dir(dir.path())
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to execute command");
        assert!(output.status.success(), "stderr: {}", stderr(&output));

        let logs = stderr(&output);
        let lines: Vec<&str> = logs.lines().filter(|l| !l.trim().is_empty()).collect();
        assert!(!lines.is_empty());
        for line in &lines {
            let json: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(json.get("level").is_some(), "{}", line);
        }
        assert!(lines.iter().any(|l| l.contains("Added VM")));
    }

    #[test]
    fn test_roots_agree() {
        let dir = TempDir::new().unwrap();
        let a = fake_geth(dir.path(), "evm-a", "0x10");
        let b = fake_geth(dir.path(), "evm-b", "0x11");
        let tests = write_tests(dir.path(), 1);
        let test = tests.join("00000000-t-0.json");

        let output = run_vmdiff(
            dir.path(),
            &["--geth", &a, "--geth", &b, "roots", test.to_str().unwrap()],
        );
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains(&format!("Roots agree: 0x{}", "11".repeat(32))));
    }

    #[test]
    fn test_speed() {
        let dir = TempDir::new().unwrap();
        let a = fake_geth(dir.path(), "evm-a", "0x10");
        write_tests(dir.path(), 2);

        let output = run_vmdiff(dir.path(), &["--geth", &a, "speed", "tests"]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("geth-0: 2 runs"));
    }

    #[test]
    fn test_replay_cleans_up() {
        let dir = TempDir::new().unwrap();
        let a = fake_geth(dir.path(), "evm-a", "0x10");
        let b = fake_geth(dir.path(), "evm-b", "0x10");
        let tests = write_tests(dir.path(), 5);

        let output = run_vmdiff(
            dir.path(),
            &[
                "--geth", &a, "--geth", &b, "--parallel", "2", "--outdir", "out",
                "--cleanup-files", "true", "replay", "tests",
            ],
        );
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("Executed 5 tests (0 inconclusive, 0 skipped)"));
        assert_eq!(std::fs::read_dir(&tests).unwrap().count(), 1);
        let counter = std::fs::read_to_string(dir.path().join(".fuzzcounter")).unwrap();
        assert_eq!(counter.trim(), "5");
    }

    #[test]
    fn test_replay_cleanup_disabled() {
        let dir = TempDir::new().unwrap();
        let a = fake_geth(dir.path(), "evm-a", "0x10");
        let b = fake_geth(dir.path(), "evm-b", "0x10");
        let tests = write_tests(dir.path(), 4);

        let output = run_vmdiff(
            dir.path(),
            &["--geth", &a, "--geth", &b, "--cleanup-files", "false", "replay", "tests"],
        );
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert_eq!(std::fs::read_dir(&tests).unwrap().count(), 4);
    }

    #[test]
    fn test_replay_consensus_failure() {
        let dir = TempDir::new().unwrap();
        let a = fake_geth(dir.path(), "evm-a", "0x10");
        let b = fake_geth(dir.path(), "evm-b", "0x11");
        write_tests(dir.path(), 3);

        let output = run_vmdiff(
            dir.path(),
            &["--geth", &a, "--geth", &b, "--outdir", "out", "replay", "tests"],
        );
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        let text = stdout(&output);
        assert!(text.contains("Consensus failure:"));
        assert!(text.contains("Consensus error"));
    }
}
