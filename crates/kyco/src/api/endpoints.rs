// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! REST endpoint registry.
//!
//! NApps mount handlers under `/kytos{url}` at runtime; the HTTP server
//! resolves every request against this table, so routes can be added while
//! the server is running.

use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Prefix every registered url is mounted under.
pub const REST_PREFIX: &str = "/kytos";

/// Request as seen by an endpoint handler.
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    /// Value of the `Host` header, if any
    pub host: Option<String>,
    pub body: Vec<u8>,
}

impl RestRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            host: None,
            body: Vec::new(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// Response produced by an endpoint handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: String,
}

impl RestResponse {
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string(),
        }
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self::text(status, "")
    }
}

impl IntoResponse for RestResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, self.content_type)],
            self.body,
        )
            .into_response()
    }
}

/// Endpoint handler.
pub type RestHandler = Arc<dyn Fn(&RestRequest) -> RestResponse + Send + Sync>;

struct Route {
    rule: String,
    methods: Vec<Method>,
    handler: RestHandler,
}

/// Table of mounted endpoints.
#[derive(Default)]
pub struct RestEndpoints {
    routes: RwLock<Vec<Route>>,
}

impl RestEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `handler` at `/kytos{url}` for `methods`.
    ///
    /// Returns `false` (and leaves the table untouched) if the path is
    /// already mounted.
    pub fn register<F>(&self, url: &str, methods: &[Method], handler: F) -> bool
    where
        F: Fn(&RestRequest) -> RestResponse + Send + Sync + 'static,
    {
        let rule = format!("{}{}", REST_PREFIX, url);
        let mut routes = self.routes.write();
        if routes.iter().any(|r| r.rule == rule) {
            debug!("Endpoint {} already registered", rule);
            return false;
        }

        debug!("Endpoint {} registered for {:?}", rule, methods);
        routes.push(Route {
            rule,
            methods: methods.to_vec(),
            handler: Arc::new(handler),
        });
        true
    }

    /// Unmount the mounted rule `rule` (prefix included).
    ///
    /// Returns `false` if nothing is mounted there.
    pub fn unregister(&self, rule: &str) -> bool {
        let mut routes = self.routes.write();
        let Some(pos) = routes.iter().position(|r| r.rule == rule) else {
            return false;
        };
        routes.remove(pos);
        debug!("Endpoint {} unregistered", rule);
        true
    }

    /// Mounted rules, in registration order.
    pub fn rules(&self) -> Vec<String> {
        self.routes.read().iter().map(|r| r.rule.clone()).collect()
    }

    pub fn contains(&self, rule: &str) -> bool {
        self.routes.read().iter().any(|r| r.rule == rule)
    }

    /// Resolve and run the handler for `request`.
    ///
    /// Unknown paths give 404, a known path with another method gives 405.
    /// A panicking handler gives 500.
    pub fn dispatch(&self, request: &RestRequest) -> RestResponse {
        let handler = {
            let routes = self.routes.read();
            let Some(route) = routes.iter().find(|r| r.rule == request.path) else {
                return RestResponse::text(StatusCode::NOT_FOUND, "Not Found");
            };
            if !route.methods.contains(&request.method) {
                return RestResponse::text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
            }
            route.handler.clone()
        };

        match catch_unwind(AssertUnwindSafe(|| handler(request))) {
            Ok(response) => response,
            Err(_) => {
                error!("Handler for {} {} panicked", request.method, request.path);
                RestResponse::empty(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

impl std::fmt::Debug for RestEndpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestEndpoints")
            .field("rules", &self.rules())
            .finish()
    }
}
