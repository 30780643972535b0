//! Integration tests for the VM adapters
//!
//! Tests cover:
//! - One-shot runs against scripted client binaries
//! - Exit status handling per client
//! - State-root extraction
//! - Batch children serving several tests and failing mid-test

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use vmdiff_vms::{
    build_vm, BatchVm, ClientKind, Evm, ExecResult, OneShotVm, VmConfig, VmError, VmSpec,
};

// ============================================================================
// Helpers
// ============================================================================

const ROOT: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn test_file(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"{}").unwrap();
    path
}

fn geth_trace_body() -> String {
    format!(
        r#"echo '{{"pc":0,"op":96,"gas":"0x10","gasCost":"0x3","depth":1,"stack":[]}}' >&2
echo '{{"pc":2,"op":0,"gas":"0xd","depth":1,"stack":["0x1"]}}' >&2
echo '{{"output":"","gasUsed":"0x3"}}' >&2
echo '{{"stateRoot":"{}"}}' >&2"#,
        ROOT
    )
}

async fn run(vm: &dyn Evm, path: &Path, speed_only: bool) -> (Result<ExecResult, VmError>, String) {
    let mut sink = Vec::new();
    let result = vm.run_state_test(path, &mut sink, speed_only).await;
    (result, String::from_utf8(sink).unwrap())
}

// ============================================================================
// One-shot adapter
// ============================================================================

#[tokio::test]
async fn test_oneshot_trace_is_normalized() {
    let dir = TempDir::new().unwrap();
    let binary = script(&dir, "evm", &geth_trace_body());
    let test = test_file(&dir, "t.json");
    let vm = OneShotVm::new(ClientKind::Geth, binary, "geth-0", VmConfig::default());

    let (result, output) = run(&vm, &test, false).await;
    let result = result.unwrap();
    assert_eq!(result.steps, 1);
    assert_eq!(result.state_root.as_deref(), Some(ROOT));
    assert!(result
        .command
        .ends_with(&format!("--json --noreturndata --nomemory statetest {}", test.display())));

    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[0],
        r#"{"depth":1,"pc":0,"gas":16,"op":"0x60","opName":"PUSH1","stack":[]}"#
    );
    assert_eq!(lines[1], format!(r#"{{"stateRoot":"{}"}}"#, ROOT));
}

#[tokio::test]
async fn test_oneshot_exit_failure() {
    let dir = TempDir::new().unwrap();
    let body = format!("{}\nexit 3", geth_trace_body());
    let binary = script(&dir, "evm", &body);
    let test = test_file(&dir, "t.json");

    let geth = OneShotVm::new(ClientKind::Geth, binary.clone(), "geth-0", VmConfig::default());
    let (result, _) = run(&geth, &test, false).await;
    assert!(matches!(result, Err(VmError::Exit { .. })));

    // Nethermind reports test failures through the exit code while tracing
    let neth = OneShotVm::new(ClientKind::Nethermind, binary, "nethermind-0", VmConfig::default());
    let (result, _) = run(&neth, &test, false).await;
    assert_eq!(result.unwrap().steps, 1);
}

#[tokio::test]
async fn test_oneshot_speed_requires_root() {
    let dir = TempDir::new().unwrap();
    let binary = script(&dir, "evm", "echo 'nothing useful' >&2");
    let test = test_file(&dir, "t.json");
    let vm = OneShotVm::new(ClientKind::Geth, binary, "geth-0", VmConfig::default());

    let (result, _) = run(&vm, &test, true).await;
    assert!(matches!(result, Err(VmError::MissingStateRoot { .. })));
}

#[tokio::test]
async fn test_oneshot_state_root() {
    let dir = TempDir::new().unwrap();
    let binary = script(
        &dir,
        "evm",
        &format!(r#"echo '[{{"name":"x","pass":true,"stateRoot": "{}"}}]'"#, ROOT),
    );
    let test = test_file(&dir, "t.json");
    let vm = OneShotVm::new(ClientKind::Geth, binary, "geth-0", VmConfig::default());

    let root = vm.state_root(&test).await.unwrap();
    assert_eq!(root.root, ROOT);
    assert!(root.command.ends_with(&format!("statetest {}", test.display())));
}

#[tokio::test]
async fn test_oneshot_missing_binary_fails_to_spawn() {
    let dir = TempDir::new().unwrap();
    let test = test_file(&dir, "t.json");
    let vm = OneShotVm::new(
        ClientKind::Besu,
        dir.path().join("absent"),
        "besu-0",
        VmConfig::default(),
    );
    let (result, _) = run(&vm, &test, false).await;
    assert!(matches!(result, Err(VmError::Spawn { .. })));
}

#[tokio::test]
async fn test_instances_share_stats() {
    let dir = TempDir::new().unwrap();
    let binary = script(&dir, "evm", &geth_trace_body());
    let test = test_file(&dir, "t.json");
    let vm = OneShotVm::new(ClientKind::Geth, binary, "geth-0", VmConfig::default());
    let instance = vm.instance(3);
    assert_eq!(instance.name(), "geth-0-3");

    let (result, _) = run(instance.as_ref(), &test, false).await;
    result.unwrap();
    let stats = vm.stats();
    assert_eq!(stats[2], ("count", "1".to_string()));
}

// ============================================================================
// Batch adapter
// ============================================================================

fn batch_body() -> String {
    // Root derived from the file name so each test is distinguishable
    r#"while read path; do
  name=$(basename "$path" .json)
  echo '{"pc":0,"op":96,"gas":"0x10","depth":1,"stack":[]}' >&2
  echo "{\"stateRoot\":\"0x$name\"}" >&2
  echo "{\"stateRoot\":\"0x$name\"}"
done"#
        .to_string()
}

#[tokio::test]
async fn test_batch_serves_several_tests() {
    let dir = TempDir::new().unwrap();
    let binary = script(&dir, "evm", &batch_body());
    let first = test_file(&dir, "aa.json");
    let second = test_file(&dir, "bb.json");
    let vm = BatchVm::new(ClientKind::Geth, binary, "gethbatch-0", VmConfig::default()).unwrap();

    let (result, output) = run(&vm, &first, false).await;
    assert_eq!(result.unwrap().state_root.as_deref(), Some("0xaa"));
    assert_eq!(output.lines().count(), 2);

    let (result, output) = run(&vm, &second, false).await;
    assert_eq!(result.unwrap().state_root.as_deref(), Some("0xbb"));
    assert!(output.ends_with("{\"stateRoot\":\"0xbb\"}\n"));

    // Switching to root mode restarts the child with other arguments
    let root = vm.state_root(&first).await.unwrap();
    assert_eq!(root.root, "0xaa");
    assert_eq!(root.command.split(' ').last(), Some("statetest"));

    vm.close().await;
}

#[tokio::test]
async fn test_batch_truncated_output() {
    let dir = TempDir::new().unwrap();
    let binary = script(
        &dir,
        "evm",
        r#"read path
echo '{"pc":0,"op":96,"gas":"0x10","depth":1,"stack":[]}' >&2"#,
    );
    let test = test_file(&dir, "t.json");
    let vm = BatchVm::new(ClientKind::Geth, binary, "gethbatch-0", VmConfig::default()).unwrap();

    let (result, _) = run(&vm, &test, false).await;
    assert!(matches!(result, Err(VmError::Truncated { .. })));

    // A fresh child is started for the next test
    let (result, _) = run(&vm, &test, false).await;
    assert!(matches!(result, Err(VmError::Truncated { .. })));
    vm.close().await;
}

#[tokio::test]
async fn test_build_vm_names_adapter() {
    let dir = TempDir::new().unwrap();
    let binary = script(&dir, "besu-evm", &geth_trace_body());
    let spec = VmSpec {
        kind: ClientKind::Besu,
        binary,
        batch: false,
        index: 2,
    };
    let vm = build_vm(&spec, &VmConfig::default()).unwrap();
    assert_eq!(vm.name(), "besu-2");
}
