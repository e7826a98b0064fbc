// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared controller state.
//!
//! [`ControllerHandle`] is a cheap clone over everything the dispatch loops,
//! the HTTP server and NApps need: buffers, listener registry, switch and
//! connection registry, REST endpoints and the running markers. Built-in
//! listeners and endpoints hold a [`WeakControllerHandle`] so the state is
//! not kept alive by its own callbacks.

use super::registry::Registry;
use crate::api::{self, ApiSignal, RestEndpoints, RestRequest, RestResponse};
use crate::buffers::KycoBuffers;
use crate::error::ListenerError;
use crate::events::{names, KycoEvent};
use crate::listeners::{EventListeners, Listener, NotifyOutcome};
use crate::switch::{Connection, Dpid, Switch};
use arc_swap::ArcSwap;
use axum::http::Method;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{error, info};

/// Address and stop signal of the running HTTP server.
#[derive(Debug, Clone)]
pub struct ApiControl {
    pub addr: SocketAddr,
    pub signal: ApiSignal,
}

struct Shared {
    buffers: ArcSwap<KycoBuffers>,
    listeners: EventListeners,
    registry: Registry,
    rest: RestEndpoints,
    started_at: RwLock<Option<DateTime<Utc>>>,
    api: RwLock<Option<ApiControl>>,
}

/// Handle on the controller state.
#[derive(Clone)]
pub struct ControllerHandle {
    inner: Arc<Shared>,
}

/// Non-owning [`ControllerHandle`].
#[derive(Clone)]
pub struct WeakControllerHandle(Weak<Shared>);

impl WeakControllerHandle {
    pub fn upgrade(&self) -> Option<ControllerHandle> {
        self.0.upgrade().map(|inner| ControllerHandle { inner })
    }
}

impl ControllerHandle {
    /// Fresh state with the built-in `core.connection.new` listener and the
    /// status/shutdown endpoints installed.
    pub fn new() -> Self {
        let handle = Self {
            inner: Arc::new(Shared {
                buffers: ArcSwap::from_pointee(KycoBuffers::new()),
                listeners: EventListeners::new(),
                registry: Registry::new(),
                rest: RestEndpoints::new(),
                started_at: RwLock::new(None),
                api: RwLock::new(None),
            }),
        };

        let weak = handle.downgrade();
        let admission = Listener::new("controller.new_connection", move |event: &KycoEvent| {
            match weak.upgrade() {
                Some(handle) => handle.new_connection(event),
                None => Ok(()),
            }
        });
        if let Err(e) = handle.register_listener(names::CONNECTION_NEW, admission) {
            error!("Built-in connection listener not installed: {}", e);
        }

        api::register_builtin_endpoints(&handle);
        handle
    }

    pub fn downgrade(&self) -> WeakControllerHandle {
        WeakControllerHandle(Arc::downgrade(&self.inner))
    }

    /// Current buffer set.
    pub fn buffers(&self) -> Arc<KycoBuffers> {
        self.inner.buffers.load_full()
    }

    /// Install a fresh, empty buffer set and return the previous one.
    pub(crate) fn reset_buffers(&self) -> Arc<KycoBuffers> {
        self.inner.buffers.swap(Arc::new(KycoBuffers::new()))
    }

    pub fn listeners(&self) -> &EventListeners {
        &self.inner.listeners
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn rest_endpoints(&self) -> &RestEndpoints {
        &self.inner.rest
    }

    pub fn register_listener(&self, pattern: &str, listener: Listener) -> Result<(), ListenerError> {
        self.inner.listeners.register(pattern, listener)
    }

    pub fn unregister_listener(&self, pattern: &str, listener: &Listener) -> bool {
        self.inner.listeners.unregister(pattern, listener)
    }

    /// Send `event` to every matching listener on the calling thread.
    pub fn notify_listeners(&self, event: &KycoEvent) -> NotifyOutcome {
        self.inner.listeners.notify(event)
    }

    /// Mount `handler` at `/kytos{url}`. A path already mounted is left as is.
    pub fn register_rest_endpoint<F>(&self, url: &str, methods: &[Method], handler: F) -> bool
    where
        F: Fn(&RestRequest) -> RestResponse + Send + Sync + 'static,
    {
        self.inner.rest.register(url, methods, handler)
    }

    /// Mounted REST rules.
    pub fn rest_endpoint_rules(&self) -> Vec<String> {
        self.inner.rest.rules()
    }

    /// Return the switch for `dpid`, creating it on first sight, bound to
    /// `connection`.
    ///
    /// `core.switches.new` is put on the app buffer only after the switch
    /// points at `connection`.
    pub fn get_switch_or_create(&self, dpid: &Dpid, connection: Arc<Connection>) -> Arc<Switch> {
        let admission = self.inner.registry.admit_switch(dpid, connection);
        if admission.created {
            self.buffers()
                .app
                .put(KycoEvent::switches_new(admission.switch.clone()));
        }
        admission.switch
    }

    /// Handler of `core.connection.new`: register the event's source
    /// connection, replacing a stale one with the same id.
    pub fn new_connection(&self, event: &KycoEvent) -> Result<(), ListenerError> {
        let connection = event
            .source()
            .ok_or_else(|| ListenerError::failed(format!("{} without source connection", event)))?;
        info!("Handling {} from {}", event.name(), connection.id());
        self.inner.registry.new_connection(connection.clone());
        Ok(())
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.started_at.read()
    }

    pub(crate) fn set_started_at(&self, at: Option<DateTime<Utc>>) {
        *self.inner.started_at.write() = at;
    }

    pub fn is_running(&self) -> bool {
        self.started_at().is_some()
    }

    /// `"Running since <timestamp>"` or `"Stopped"`.
    pub fn status(&self) -> String {
        match self.started_at() {
            Some(at) => format!("Running since {}", at),
            None => "Stopped".to_string(),
        }
    }

    /// Time since start, zero when stopped.
    pub fn uptime(&self) -> Duration {
        self.started_at()
            .and_then(|at| (Utc::now() - at).to_std().ok())
            .unwrap_or_default()
    }

    pub fn api_control(&self) -> Option<ApiControl> {
        self.inner.api.read().clone()
    }

    pub(crate) fn set_api_control(&self, control: Option<ApiControl>) {
        *self.inner.api.write() = control;
    }

    /// Whether the HTTP server is up and has not been asked to stop.
    pub fn api_running(&self) -> bool {
        self.inner
            .api
            .read()
            .as_ref()
            .is_some_and(|c| !c.signal.is_triggered())
    }
}

impl Default for ControllerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("registry", &self.inner.registry)
            .field("listeners", &self.inner.listeners)
            .field("started_at", &self.started_at())
            .finish()
    }
}
