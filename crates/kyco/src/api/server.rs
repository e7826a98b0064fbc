// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP control server.
//!
//! Runs axum on a current-thread tokio runtime owned by the `api_server`
//! thread. Every request falls through to the [`RestEndpoints`] table of the
//! controller, except `GET /kytos/logs`, which upgrades to a websocket
//! streaming the process-wide [`LogStream`]. The server and every open log
//! socket stop when its [`ApiSignal`] fires, either from `Controller::stop`
//! or from the `/kytos/shutdown` endpoint.
//!
//! [`RestEndpoints`]: super::RestEndpoints

use super::endpoints::{RestRequest, REST_PREFIX};
use crate::controller::tcp_server::bind_listener;
use crate::controller::ControllerHandle;
use crate::logs::{LogStream, LOGS_URL};
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Notify};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// One-shot cancellation signal for the HTTP server.
///
/// Any number of tasks may wait on it; all of them wake when it fires.
#[derive(Clone, Default)]
pub struct ApiSignal {
    notify: Arc<Notify>,
    triggered: Arc<AtomicBool>,
}

impl ApiSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Later calls are no-ops.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once the signal has fired.
    pub async fn wait(&self) {
        // Registered before the flag check so a concurrent trigger is not missed
        let notified = self.notify.notified();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

impl std::fmt::Debug for ApiSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

/// Bound, not yet serving, HTTP control server.
pub struct ApiServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    signal: ApiSignal,
}

impl ApiServer {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = bind_listener(addr)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            signal: ApiSignal::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn signal(&self) -> ApiSignal {
        self.signal.clone()
    }

    /// Serve until the signal fires. Blocks the calling thread.
    pub fn serve(self, handle: ControllerHandle) -> io::Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let Self {
            listener,
            local_addr,
            signal,
        } = self;

        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener)?;
            info!("API server on http://{}", local_addr);

            let app = router(handle, LogStream::global().clone(), signal.clone());
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    signal.wait().await;
                    debug!("API server shutdown signal received");
                })
                .await
        })?;

        info!("API server on {} stopped", local_addr);
        Ok(())
    }
}

fn router(handle: ControllerHandle, logs: LogStream, signal: ApiSignal) -> Router {
    let logs_path = format!("{}{}", REST_PREFIX, LOGS_URL);
    Router::new()
        .route(
            &logs_path,
            get(move |ws: WebSocketUpgrade| {
                let lines = logs.subscribe();
                let signal = signal.clone();
                async move { ws.on_upgrade(move |socket| stream_logs(socket, lines, signal)) }
            }),
        )
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(handle)
}

async fn dispatch(
    State(handle): State<ControllerHandle>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let request = RestRequest {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        host: headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: body.to_vec(),
    };
    handle.rest_endpoints().dispatch(&request)
}

/// Forward log lines to one websocket client until it leaves or the server stops.
async fn stream_logs(
    mut socket: WebSocket,
    mut lines: broadcast::Receiver<String>,
    signal: ApiSignal,
) {
    debug!("Log stream client attached");
    loop {
        tokio::select! {
            _ = signal.wait() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            line = lines.recv() => {
                let line = match line {
                    Ok(line) => line,
                    Err(RecvError::Lagged(skipped)) => format!("... {} log lines dropped", skipped),
                    Err(RecvError::Closed) => break,
                };
                if socket.send(Message::Text(line)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Log stream client detached");
}
