#![cfg(feature = "storage-rocksdb")]

mod common;

use assert_cmd::cargo_bin;
use common::{write_events_csv, write_instant_config, write_users_csv};
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");
    let users = dir.path().join("users.csv");
    let config = dir.path().join("config.json");
    write_users_csv(&users, &[1]).unwrap();
    write_instant_config(&config, 1.0).unwrap();

    let run = |events: &std::path::Path| {
        Command::new(cargo_bin!("loyalty-engine"))
            .arg("process")
            .arg(events)
            .arg("--users")
            .arg(&users)
            .arg("--config")
            .arg(&config)
            .arg("--db-path")
            .arg(&db_path)
            .output()
            .expect("Failed to execute command")
    };

    // 1. First run: first purchase earns cashback
    let events1 = dir.path().join("events1.csv");
    write_events_csv(&events1, &[(1, "1000")]).unwrap();
    let output1 = run(&events1);
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("1,1,1,80.00,NGN,completed"));

    // 2. Second run on the same DB: history and counters survive
    let events2 = dir.path().join("events2.csv");
    write_events_csv(&events2, &[(1, "1000")]).unwrap();
    let output2 = run(&events2);
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);

    assert!(stdout2.contains("1,1,1,80.00,NGN,completed"));
    // No new achievements, so only base rate: 1000 * 1%
    assert!(stdout2.contains("2,1,2,10.00,NGN,completed"));
}
