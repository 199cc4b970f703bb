use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn hashchain() -> Command {
    Command::cargo_bin("hashchain").expect("binary should build")
}

#[test]
fn test_demo_prints_chain() {
    hashchain()
        .args(["demo", "--difficulty", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#0 nonce=0"))
        .stdout(predicate::str::contains("\"Genesis Block\""))
        .stdout(predicate::str::contains("\"Blockchain mining test data\""));
}

#[test]
fn test_demo_json_is_a_valid_chain() {
    let output = hashchain()
        .args(["demo", "--difficulty", "2", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let blocks: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let blocks = blocks.as_array().unwrap();
    assert_eq!(blocks.len(), 3);
    assert!(blocks[2]["hash"].as_str().unwrap().starts_with("00"));
}

#[test]
fn test_mine_rejects_negative_difficulty() {
    hashchain()
        .args(["mine", "--data", "x", "--difficulty", "-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid difficulty -1"));
}

#[test]
fn test_mine_times_out() {
    hashchain()
        .args([
            "mine",
            "--data",
            "x",
            "--difficulty",
            "64",
            "--timeout-ms",
            "50",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("mining timed out"));
}

#[test]
fn test_mine_json() {
    let output = hashchain()
        .args(["mine", "--data", "Mining test data", "--difficulty", "3", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let block: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(block["index"], 1);
    assert_eq!(block["previous_hash"], "0");
    assert!(block["hash"].as_str().unwrap().starts_with("000"));
}

#[test]
fn test_build_then_verify() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("chain.json");

    let output = hashchain()
        .args(["build", "--blocks", "5", "--difficulty", "1", "--parallel"])
        .output()
        .unwrap();
    assert!(output.status.success());
    fs::write(&path, &output.stdout).unwrap();

    hashchain()
        .arg("verify")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("valid (6 blocks)"));

    hashchain()
        .arg("verify")
        .write_stdin(output.stdout)
        .assert()
        .success()
        .stdout(predicate::str::contains("valid (6 blocks)"));
}

#[test]
fn test_verify_detects_tampering() {
    let output = hashchain()
        .args(["build", "--blocks", "3"])
        .output()
        .unwrap();
    let mut chain: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    chain[1]["data"] = "tampered".into();

    hashchain()
        .arg("verify")
        .write_stdin(serde_json::to_vec(&chain).unwrap())
        .assert()
        .failure()
        .stderr(predicate::str::contains("chain linkage violation at block 1"));
}
