// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App FSM tests: transitions, cancellation, error recording, stats.

mod common;

use std::time::Duration;

use apphost_core::CoreError;
use apphost_sdk::AppState;
use common::*;

#[tokio::test]
async fn test_full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir);

    manager.init("looper", info_for("looper")).await.unwrap();
    let app = manager.get("looper").unwrap();
    assert_eq!(app.state(), AppState::Initialized);

    manager.start("looper").await.unwrap();
    assert_eq!(app.state(), AppState::Running);
    assert!(app.stats().start_time.is_some());

    manager.stop("looper").await.unwrap();
    assert_eq!(app.state(), AppState::Stopped);

    let stats = app.stats();
    assert!(stats.stop_time.is_some());
    assert!(stats.last_error.is_none(), "clean stop must not record an error");
    assert!(stats.stop_time.unwrap() >= stats.start_time.unwrap());
}

#[tokio::test]
async fn test_init_forbidden_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir);

    manager.init("looper", info_for("looper")).await.unwrap();
    manager.start("looper").await.unwrap();

    let err = manager.init("looper", info_for("looper")).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidAppState { .. }));

    manager.stop("looper").await.unwrap();
}

#[tokio::test]
async fn test_run_requires_module() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir);

    manager.register("looper").unwrap();
    let err = manager.start("looper").await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidAppState { .. }));
}

#[tokio::test]
async fn test_init_unknown_module_records_error() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir);

    let err = manager.init("ghost", info_for("ghost")).await.unwrap_err();
    assert!(matches!(err, CoreError::ModuleLoad { .. }));

    let app = manager.get("ghost").unwrap();
    assert_eq!(app.state(), AppState::Uninitialized);
    assert!(app.stats().last_error.is_some());
}

#[tokio::test]
async fn test_failing_run_stops_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir);

    manager.init("failer", info_for("failer")).await.unwrap();
    let err = manager.start("failer").await.unwrap_err();
    assert!(matches!(err, CoreError::ModuleFailed { hook: "run", .. }));

    let app = manager.get("failer").unwrap();
    assert_eq!(app.state(), AppState::Stopped);
    assert!(app.stats().last_error.unwrap().contains("boom"));
}

#[tokio::test]
async fn test_stop_preempts_user_loop() {
    // The loop sleeps for an hour per iteration; stop() must still return
    // promptly because the wrapped await rejects with "App stopped".
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir);

    manager.init("looper", info_for("looper")).await.unwrap();
    manager.start("looper").await.unwrap();

    let app = manager.get("looper").unwrap();
    tokio::time::timeout(Duration::from_secs(2), manager.stop("looper"))
        .await
        .expect("stop() did not pre-empt the user loop")
        .unwrap();
    assert_eq!(app.state(), AppState::Stopped);
    assert!(app.stats().last_error.is_none());
}

#[tokio::test]
async fn test_quick_module_completes_within_warmup() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir);

    manager.init("quick", info_for("quick")).await.unwrap();
    manager.start("quick").await.unwrap();

    let app = manager.get("quick").unwrap();
    assert_eq!(app.state(), AppState::Stopped);
    assert!(app.stats().last_error.is_none());
}

#[tokio::test]
async fn test_restart_counts_and_runs_clean() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir);

    manager.init("looper", info_for("looper")).await.unwrap();
    manager.start("looper").await.unwrap();
    manager.restart("looper").await.unwrap();

    let app = manager.get("looper").unwrap();
    assert_eq!(app.state(), AppState::Running);
    assert_eq!(app.stats().restart_count, 1);

    // The restarted run got a fresh token: stopping still works.
    manager.stop("looper").await.unwrap();
    assert_eq!(app.state(), AppState::Stopped);
}

#[tokio::test]
async fn test_restart_from_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir);

    manager.init("looper", info_for("looper")).await.unwrap();
    manager.start("looper").await.unwrap();
    manager.stop("looper").await.unwrap();

    manager.restart("looper").await.unwrap();
    let app = manager.get("looper").unwrap();
    assert_eq!(app.state(), AppState::Running);
    manager.stop("looper").await.unwrap();
}

#[tokio::test]
async fn test_uptime_accumulates_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir);

    manager.init("looper", info_for("looper")).await.unwrap();

    manager.start("looper").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    manager.stop("looper").await.unwrap();
    let app = manager.get("looper").unwrap();
    let first = app.stats().uptime_ms;

    manager.start("looper").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    manager.stop("looper").await.unwrap();
    let second = app.stats().uptime_ms;

    assert!(second >= first, "uptime must only accumulate");
}

#[tokio::test]
async fn test_uninstall_returns_to_uninitialized() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir);

    manager.init("looper", info_for("looper")).await.unwrap();
    manager.start("looper").await.unwrap();

    let app = manager.get("looper").unwrap();
    app.uninstall().await.unwrap();
    assert_eq!(app.state(), AppState::Uninitialized);

    // Re-init brings it back.
    manager.init("looper", info_for("looper")).await.unwrap();
    assert_eq!(app.state(), AppState::Initialized);
}

#[tokio::test]
async fn test_stop_is_noop_outside_running() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir);

    manager.init("looper", info_for("looper")).await.unwrap();
    let app = manager.get("looper").unwrap();

    // INITIALIZED: no-op.
    manager.stop("looper").await.unwrap();
    assert_eq!(app.state(), AppState::Initialized);

    manager.start("looper").await.unwrap();
    manager.stop("looper").await.unwrap();
    let stop_time = app.stats().stop_time;

    // STOPPED: second stop does not touch stats.
    manager.stop("looper").await.unwrap();
    assert_eq!(app.stats().stop_time, stop_time);
}

#[tokio::test]
async fn test_init_resets_restart_counter() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir);

    manager.init("looper", info_for("looper")).await.unwrap();
    manager.start("looper").await.unwrap();
    manager.restart("looper").await.unwrap();
    manager.stop("looper").await.unwrap();

    let app = manager.get("looper").unwrap();
    assert_eq!(app.stats().restart_count, 1);

    manager.init("looper", info_for("looper")).await.unwrap();
    assert_eq!(app.stats().restart_count, 0);
}
