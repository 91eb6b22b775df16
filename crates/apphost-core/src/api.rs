// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! REST + SSE control surface.
//!
//! Routes, all under `/@api`:
//!
//! | Route | Method | Behavior |
//! |---|---|---|
//! | `/@api/list` | GET | JSON array of status records |
//! | `/@api/stat/:name` | GET | JSON status, or a 1 Hz SSE status stream when `Accept` includes `text/event-stream` |
//! | `/@api/control/:name` | POST | plaintext `START`/`STOP`/`RESTART`/`RELOAD` |
//! | `/@api/control/:name` | PUT | JSON `AppInfo + {$code}`: persist source, (re)initialize, save manifest |
//! | `/@api/control/:name` | DELETE | uninstall and unregister |
//! | `/@api/logs/:name` | SSE | full backlog with id `0`, then live log lines keyed by UUID |
//!
//! An optional static web root is mounted at `/`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use apphost_http::{handler, Context, HttpError, Router, SseEvent, StaticOptions};
use apphost_sdk::{AppInfo, ConsoleEvent};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error};

use crate::app::now_ms;
use crate::error::CoreError;
use crate::manager::AppManager;
use crate::manifest;

/// Shared state captured by the API handlers.
pub struct ApiState {
    pub manager: Arc<AppManager>,
    pub manifest_path: PathBuf,
}

impl ApiState {
    /// Persist the current app list; failures are logged, not fatal.
    async fn save_manifest(&self) {
        let infos = self.manager.export();
        if let Err(e) = manifest::save_manifest(&self.manifest_path, &infos).await {
            error!(error = %e, "failed to save manifest");
        }
    }
}

/// Build the full router: API routes plus the optional static web root.
pub fn build_router(state: Arc<ApiState>, web_root: Option<PathBuf>) -> Router {
    let mut router = Router::new();

    let st = state.clone();
    router.get(
        "/@api/list",
        handler(move |ctx| {
            let st = st.clone();
            Box::pin(async move {
                let statuses = st.manager.status_all();
                ctx.send_json(&statuses, 200).await
            })
        }),
    );

    let st = state.clone();
    router.get(
        "/@api/stat/:name",
        handler(move |ctx| {
            let st = st.clone();
            Box::pin(async move { stat(ctx, &st).await })
        }),
    );

    let st = state.clone();
    router.post(
        "/@api/control/:name",
        handler(move |ctx| {
            let st = st.clone();
            Box::pin(async move { control(ctx, &st).await })
        }),
    );

    let st = state.clone();
    router.put(
        "/@api/control/:name",
        handler(move |ctx| {
            let st = st.clone();
            Box::pin(async move { install(ctx, &st).await })
        }),
    );

    let st = state.clone();
    router.delete(
        "/@api/control/:name",
        handler(move |ctx| {
            let st = st.clone();
            Box::pin(async move { remove(ctx, &st).await })
        }),
    );

    let st = state.clone();
    router.get(
        "/@api/logs/:name",
        handler(move |ctx| {
            let st = st.clone();
            Box::pin(async move { logs(ctx, &st).await })
        }),
    );

    if let Some(root) = web_root {
        apphost_http::serve_dir(&mut router, "/", root, StaticOptions::default());
    }

    router
}

fn app_name(ctx: &Context) -> String {
    ctx.param("name").unwrap_or("").to_string()
}

/// GET `/@api/stat/:name`: one status record, or a 1 Hz SSE stream of them.
async fn stat(ctx: &mut Context, state: &ApiState) -> apphost_http::Result<()> {
    let name = app_name(ctx);
    let Some(app) = state.manager.get(&name) else {
        return ctx.send_status(404, None).await;
    };

    let wants_stream = ctx
        .header("accept")
        .map(|a| a.contains("text/event-stream"))
        .unwrap_or(false);
    if !wants_stream {
        return ctx.send_json(&app.status(), 200).await;
    }

    ctx.sse().await?;
    loop {
        let status = serde_json::to_string(&app.status())
            .map_err(|e| HttpError::Protocol(format!("status encode failed: {e}")))?;
        if ctx
            .engine_mut()
            .send_sse(&status, None, None)
            .await
            .is_err()
        {
            // Client went away; end the stream.
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Ok(())
}

/// POST `/@api/control/:name`: plaintext lifecycle verbs.
async fn control(ctx: &mut Context, state: &ApiState) -> apphost_http::Result<()> {
    let name = app_name(ctx);
    let command = ctx.text().await?.trim().to_ascii_uppercase();

    if state.manager.get(&name).is_none() {
        return ctx.send_status(400, Some("unknown app")).await;
    }

    let result = match command.as_str() {
        "START" => state.manager.start(&name).await,
        "STOP" => state.manager.stop(&name).await,
        "RESTART" => state.manager.restart(&name).await,
        "RELOAD" => state.manager.reload(&name).await,
        _ => return ctx.send_status(400, Some("unknown command")).await,
    };

    match result {
        Ok(()) => ctx.send(b"", 200).await,
        Err(e) if e.http_status() < 500 => {
            ctx.send_status(e.http_status(), Some(&e.to_string())).await
        }
        Err(e) => {
            ctx.send_json(
                &json!({ "error": e.to_string(), "full": format!("{e:?}") }),
                500,
            )
            .await
        }
    }
}

/// PUT `/@api/control/:name`: create or replace an app from
/// `AppInfo + {$code}`.
async fn install(ctx: &mut Context, state: &ApiState) -> apphost_http::Result<()> {
    let name = app_name(ctx);
    let mut body: serde_json::Value = match ctx.json().await {
        Ok(body) => body,
        Err(e) => {
            return ctx
                .send_json(&json!({ "error": format!("invalid body: {e}") }), 400)
                .await
        }
    };

    for field in ["name", "version", "description", "$code"] {
        if !body.get(field).map(|v| v.is_string()).unwrap_or(false) {
            return ctx
                .send_json(&json!({ "error": format!("missing field: {field}") }), 400)
                .await;
        }
    }
    if body["name"].as_str() != Some(name.as_str()) {
        return ctx
            .send_json(&json!({ "error": "body name does not match path" }), 400)
            .await;
    }

    let code = body
        .as_object_mut()
        .and_then(|o| o.remove("$code"))
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();

    // Pre-compile gate: bad source never reaches the registry.
    if let Err(e) = state.manager.loader().check(&name, &code).await {
        return ctx
            .send_json(&json!({ "error": e.to_string() }), 400)
            .await;
    }

    let mut info: AppInfo = match serde_json::from_value(body) {
        Ok(info) => info,
        Err(e) => {
            return ctx
                .send_json(&json!({ "error": format!("invalid app info: {e}") }), 400)
                .await
        }
    };

    // Timestamps strictly increase across re-inits of the same app.
    let previous = state
        .manager
        .get(&name)
        .map(|a| a.info().timestamp)
        .unwrap_or(0);
    info.timestamp = (now_ms().max(0) as u64).max(previous + 1);

    // Persist the source under <base>/<name>.<timestamp>.<ext>.
    let base_dir = &state.manager.config().base_dir;
    let file_name = info.module_file_name(state.manager.loader().extension());
    if let Err(e) = write_module_source(base_dir, &file_name, &code).await {
        return ctx
            .send_json(&json!({ "error": e.to_string(), "full": format!("{e:?}") }), 500)
            .await;
    }

    match state.manager.init(&name, info).await {
        Ok(()) => {
            state.save_manifest().await;
            ctx.send_json(&json!({ "success": true }), 200).await
        }
        Err(e) => {
            ctx.send_json(
                &json!({ "error": e.to_string(), "full": format!("{e:?}") }),
                500,
            )
            .await
        }
    }
}

async fn write_module_source(
    base_dir: &std::path::Path,
    file_name: &str,
    code: &str,
) -> crate::error::Result<()> {
    tokio::fs::create_dir_all(base_dir)
        .await
        .map_err(|e| CoreError::io("create base dir", e))?;
    tokio::fs::write(base_dir.join(file_name), code)
        .await
        .map_err(|e| CoreError::io("write module source", e))
}

/// DELETE `/@api/control/:name`: uninstall and unregister.
async fn remove(ctx: &mut Context, state: &ApiState) -> apphost_http::Result<()> {
    let name = app_name(ctx);
    if state.manager.get(&name).is_none() {
        return ctx.send_status(404, None).await;
    }
    match state.manager.unregister(&name).await {
        Ok(()) => {
            state.save_manifest().await;
            ctx.send_json(&json!({ "success": true }), 200).await
        }
        Err(e) => {
            ctx.send_json(
                &json!({ "error": e.to_string(), "full": format!("{e:?}") }),
                500,
            )
            .await
        }
    }
}

/// GET `/@api/logs/:name` SSE stream: backlog snapshot with id `0`, then one
/// event per new log line with its UUID as the id. The console subscription
/// lives inside this handler and is dropped the moment a write fails, so a
/// gone client detaches immediately.
async fn logs(ctx: &mut Context, state: &ApiState) -> apphost_http::Result<()> {
    let name = app_name(ctx);
    let Some(app) = state.manager.get(&name) else {
        return ctx.send_status(404, None).await;
    };

    let console = app.console().clone();
    // Subscribe before snapshotting so no message falls between the two.
    let mut rx = console.subscribe();
    let backlog = console.messages();

    ctx.sse().await?;
    let backlog_json = serde_json::to_string(&backlog)
        .map_err(|e| HttpError::Protocol(format!("log encode failed: {e}")))?;
    ctx.engine_mut()
        .send_sse(&backlog_json, None, Some("0"))
        .await?;

    loop {
        match rx.recv().await {
            Ok(ConsoleEvent::Log(message)) => {
                let payload = match serde_json::to_string(&message) {
                    Ok(payload) => payload,
                    Err(e) => {
                        debug!(error = %e, "skipping unencodable log message");
                        continue;
                    }
                };
                let event = SseEvent {
                    id: Some(message.uuid.clone()),
                    data: payload,
                    ..SseEvent::default()
                };
                if ctx.engine_mut().send_event(&event).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!(app = %name, skipped, "log stream lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
    Ok(())
}
