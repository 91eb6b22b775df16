// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cancellation liveness tests for the task gate.

use std::time::Duration;

use apphost_sdk::TaskGate;

#[tokio::test]
async fn test_pending_wrap_rejects_when_fired() {
    let gate = TaskGate::new();
    let gate2 = gate.clone();

    let pending = tokio::spawn(async move {
        // A wrap around a never-resolving future must still reject.
        gate2.wrap(std::future::pending::<()>()).await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.fire();

    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("wrap did not observe cancellation")
        .unwrap();
    assert!(result.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_fire_is_idempotent() {
    let gate = TaskGate::new();
    gate.fire();
    gate.fire();
    assert!(gate.is_fired());
    assert!(gate
        .wrap(async {})
        .await
        .unwrap_err()
        .is_cancelled());
}

#[tokio::test]
async fn test_clones_share_the_token() {
    let gate = TaskGate::new();
    let clone = gate.clone();
    gate.fire();
    assert!(clone.is_fired());

    // A reset through either handle is visible to both.
    clone.reset();
    assert!(!gate.is_fired());
}

#[tokio::test]
async fn test_wrap_after_reset_runs_clean() {
    let gate = TaskGate::new();
    gate.fire();
    gate.reset();

    let value = gate
        .wrap(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            "done"
        })
        .await
        .unwrap();
    assert_eq!(value, "done");
}

#[tokio::test]
async fn test_many_pending_wraps_all_reject() {
    let gate = TaskGate::new();
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let gate = gate.clone();
        tasks.push(tokio::spawn(async move {
            gate.wrap(std::future::pending::<()>()).await
        }));
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.fire();

    for task in tasks {
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("wrap did not observe cancellation")
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }
}
