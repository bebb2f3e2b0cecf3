//! Drives the `nrollup` binary through a full file-based cycle.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn tmp_dir(name: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    p.push(format!("nrollup_cli_{name}_{nanos}"));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nrollup"))
        .args(args)
        .env_remove("NROLLUP_CONFIG")
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn ok(args: &[&str]) -> String {
    let out = run(args);
    assert!(
        out.status.success(),
        "nrollup {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn p(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

/// Events a faithful ledger would emit: every outstanding expectation, in order.
fn faithful_events(state: &Path) -> Value {
    let snap = read_json(state);
    let mut events = snap["expected_deposits"].as_array().unwrap().clone();
    events.extend(snap["expected_roots"].as_array().unwrap().iter().cloned());
    Value::Array(events)
}

#[test]
fn deposit_batch_reconcile_cycle() {
    let dir = tmp_dir("cycle");
    let state = dir.join("state.json");
    ok(&["init", "--state", p(&state)]);
    assert!(!run(&["init", "--state", p(&state)]).status.success());

    for name in ["alice", "bob", "carol"] {
        let key = dir.join(format!("{name}.json"));
        ok(&["keygen", "--out", p(&key), "--seed", name]);
    }
    ok(&["deposit", "--state", p(&state), "--genesis"]);
    for (name, amount) in [("alice", "100"), ("bob", "200"), ("carol", "0")] {
        let key = dir.join(format!("{name}.json"));
        ok(&["deposit", "--state", p(&state), "--key", p(&key), "--amount", amount]);
    }
    let flush_call = dir.join("process_deposits.json");
    let out = ok(&["flush-deposits", "--state", p(&state), "--out-call", p(&flush_call)]);
    assert!(out.contains("Flushed 4 deposits at position 0"));
    assert_eq!(read_json(&flush_call)["call"], "process_deposits");

    let bob = read_json(&dir.join("bob.json"));
    let transfers = dir.join("transfers.json");
    std::fs::write(
        &transfers,
        json!([
            {"from_index": 2, "to_index": 1, "amount": "200", "token_type": "1", "secret": bob["secret"]},
            {"from_index": 2, "to_index": 3, "amount": "1", "token_type": "1", "secret": bob["secret"]}
        ])
        .to_string(),
    )
    .unwrap();
    let witness = dir.join("Prover.toml");
    let submit = dir.join("submit_batch.json");
    let out = ok(&[
        "batch",
        "--state",
        p(&state),
        "--transfers",
        p(&transfers),
        "--witness",
        p(&witness),
        "--out-call",
        p(&submit),
    ]);
    // The second transfer overdraws and is skipped.
    assert!(out.contains("Sealed 1 of 2 transfers"));
    let toml_text = std::fs::read_to_string(&witness).unwrap();
    assert!(toml_text.contains("intermediate_roots = ["));
    assert_eq!(read_json(&submit)["call"], "submit_batch");

    let events = dir.join("events.json");
    std::fs::write(&events, faithful_events(&state).to_string()).unwrap();
    let out = ok(&["reconcile", "--state", p(&state), "--events", p(&events)]);
    assert!(out.contains("Reconciled 6 events"));

    let summary = ok(&["inspect", "--state", p(&state), "--accounts"]);
    assert!(summary.contains("status:         live"));
    assert!(summary.contains("balance=300"));
    let snap = read_json(&state);
    assert_eq!(snap["confirmed_root"], snap["balance_tree"]["root"]);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn divergent_event_halts_state_file() {
    let dir = tmp_dir("halt");
    let state = dir.join("state.json");
    ok(&["init", "--state", p(&state), "--deposit-batch-log2", "1"]);
    ok(&["deposit", "--state", p(&state), "--genesis"]);

    let events = dir.join("events.json");
    std::fs::write(
        &events,
        json!([{"event": "confirm_batch", "old_root": "0x01", "new_root": "0x02", "count": 1}])
            .to_string(),
    )
    .unwrap();
    assert!(!run(&["reconcile", "--state", p(&state), "--events", p(&events)])
        .status
        .success());
    assert!(ok(&["inspect", "--state", p(&state)]).contains("HALTED"));

    let root = read_json(&state)["balance_tree"]["root"].as_str().unwrap().to_owned();
    ok(&["resolve-halt", "--state", p(&state), "--ledger-root", &root]);
    assert!(ok(&["inspect", "--state", p(&state)]).contains("live"));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn demo_agrees_with_ledger() {
    let dir = tmp_dir("demo");
    let witness = dir.join("demo.json");
    let out = ok(&["demo", "--witness", p(&witness)]);
    assert!(out.contains("OK: ledger and local state agree"));
    assert_eq!(read_json(&witness)["amount"].as_array().unwrap().len(), 2);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn zero_cache_lists_every_level() {
    let out = ok(&["zero-cache", "--depth", "3"]);
    assert_eq!(out.lines().count(), 4);
}

#[test]
fn cbor_state_file_round_trips() {
    let dir = tmp_dir("cbor");
    let state = dir.join("state.cbor");
    ok(&["init", "--state", p(&state)]);
    ok(&["deposit", "--state", p(&state), "--genesis"]);

    let bytes = std::fs::read(&state).unwrap();
    let snap: nrollup_core::StateSnapshot = nrollup_core::io::from_cbor(&bytes).unwrap();
    assert_eq!(snap.pending_deposits.len(), 1);
    assert!(snap.pending_deposits[0].is_reserved());
    assert!(ok(&["inspect", "--state", p(&state)]).contains("live"));

    let _ = std::fs::remove_dir_all(dir);
}
