// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP accept loop.
//!
//! One task per accepted connection; requests on a connection run strictly
//! one at a time, with [`HttpEngine::reuse`] between them for keep-alive.
//! Shutdown is signalled through a `watch` channel.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::engine::{HttpEngine, Protocol, ReadState};
use crate::error::Result;
use crate::pipe::{ByteStream, Pipe, PipeOptions};
use crate::router::Router;

/// Socket options applied to every accepted connection.
const ACCEPTED_OPTIONS: PipeOptions = PipeOptions {
    keep_alive: Some(true),
    no_delay: Some(true),
};

/// Accept connections until the shutdown signal flips to `true`.
pub async fn serve(
    listener: TcpListener,
    router: Arc<Router>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!(addr = ?listener.local_addr().ok(), "HTTP server listening");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("HTTP server received shutdown signal");
                    break;
                }
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote_addr)) => {
                        debug!(%remote_addr, "accepted connection");
                        let router = router.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, router).await;
                        });
                    }
                    Err(e) => {
                        debug!(error = %e, "failed to accept connection");
                    }
                }
            }
        }
    }

    info!("HTTP server stopped");
    Ok(())
}

/// Drive one connection: request, response, keep-alive, repeat.
pub async fn handle_connection(stream: TcpStream, router: Arc<Router>) {
    drive_connection(stream, router).await;
}

/// Same as [`handle_connection`] but over any byte stream (used by tests
/// with in-memory duplex pipes, where the socket options are a no-op).
pub async fn drive_connection(stream: impl ByteStream + 'static, router: Arc<Router>) {
    let pipe = Pipe::new(stream);
    if let Err(e) = pipe.set_options(ACCEPTED_OPTIONS) {
        debug!(error = %e, "failed to apply socket options");
    }
    let mut engine = HttpEngine::server(pipe);

    loop {
        engine = match router.handle(engine).await {
            Ok(engine) => engine,
            Err(e) => {
                if !e.is_disconnect() {
                    debug!(error = %e, "connection error");
                }
                return;
            }
        };

        let reusable = engine.read_state() == ReadState::Done
            && engine.keep_alive()
            && engine.protocol() == Protocol::Http;
        if !reusable || engine.reuse().is_err() {
            break;
        }
    }

    let _ = engine.close().await;
}
