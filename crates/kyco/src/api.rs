// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP control plane.
//!
//! # Endpoints
//!
//! - `GET /kytos/status/` - `200 {"response":"running"}` or `404 {"response":"not running"}`
//! - `GET /kytos/shutdown` - stops the HTTP server; loopback hosts only, `403` otherwise
//! - `GET /kytos/logs` - websocket upgrade, one text frame per log line
//! - anything NApps mount with [`ControllerHandle::register_rest_endpoint`]

pub mod endpoints;
pub mod server;

pub use endpoints::{RestEndpoints, RestHandler, RestRequest, RestResponse, REST_PREFIX};
pub use server::{ApiServer, ApiSignal};

use crate::controller::{ControllerHandle, WeakControllerHandle};
use axum::http::{Method, StatusCode};
use serde_json::json;
use tracing::{info, warn};

pub const STATUS_URL: &str = "/status/";
pub const SHUTDOWN_URL: &str = "/shutdown";

/// Mount the controller's own endpoints.
pub(crate) fn register_builtin_endpoints(handle: &ControllerHandle) {
    let weak = handle.downgrade();
    handle.register_rest_endpoint(STATUS_URL, &[Method::GET], move |_req| status(&weak));

    let weak = handle.downgrade();
    handle.register_rest_endpoint(SHUTDOWN_URL, &[Method::GET], move |req| {
        shutdown(&weak, req)
    });
}

/// GET /kytos/status/
fn status(weak: &WeakControllerHandle) -> RestResponse {
    match weak.upgrade() {
        Some(handle) if handle.api_running() => {
            RestResponse::json(StatusCode::OK, &json!({"response": "running"}))
        }
        _ => RestResponse::json(StatusCode::NOT_FOUND, &json!({"response": "not running"})),
    }
}

/// Hosts allowed to call the shutdown endpoint for an API bound on `port`.
pub fn allowed_shutdown_hosts(port: u16) -> [String; 2] {
    [format!("127.0.0.1:{}", port), format!("localhost:{}", port)]
}

/// GET /kytos/shutdown
fn shutdown(weak: &WeakControllerHandle, req: &RestRequest) -> RestResponse {
    let Some(control) = weak.upgrade().and_then(|h| h.api_control()) else {
        return RestResponse::empty(StatusCode::NOT_FOUND);
    };

    let host = req.host.as_deref().unwrap_or("");
    let allowed = allowed_shutdown_hosts(control.addr.port());
    if !allowed.iter().any(|h| h == host) {
        warn!("Rejected shutdown request from host '{}'", host);
        return RestResponse::empty(StatusCode::FORBIDDEN);
    }

    info!("API server shutdown requested");
    control.signal.trigger();
    RestResponse::text(StatusCode::OK, "Server shutting down...")
}
