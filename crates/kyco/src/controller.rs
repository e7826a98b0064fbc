// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Kyco controller core.
//!
//! The [`Controller`] owns the shared state ([`ControllerHandle`]), the NApp
//! host and, while started, six named threads:
//!
//! | thread                  | loop                                        |
//! |-------------------------|---------------------------------------------|
//! | `tcp_server`            | accept switches, raise `core.connection.new` |
//! | `api_server`            | HTTP control plane                          |
//! | `raw_event_handler`     | raw buffer dispatch                         |
//! | `msg_in_event_handler`  | msg-in buffer dispatch                      |
//! | `msg_out_event_handler` | msg-out buffer send + dispatch              |
//! | `app_event_handler`     | app buffer dispatch                         |
//!
//! # Stop sequence
//!
//! 1. shut the switch listener socket (non-graceful only)
//! 2. stop the accept loop
//! 3. put one `core.shutdown` sentinel on every buffer
//! 4. fire the HTTP server's cancellation signal
//! 5. join all threads, bounded by `shutdown_timeout_secs`; stragglers are detached
//! 6. unload non-core NApps
//! 7. replace the buffer set with empty buffers

use crate::api::{ApiServer, ApiSignal, RestRequest, RestResponse};
use crate::buffers::KycoBuffers;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, ListenerError, NAppLoadError};
use crate::events::KycoEvent;
use crate::listeners::{Listener, NotifyOutcome};
use crate::napps::{LoadSummary, NAppCatalog, NAppHost};
use crate::switch::{Connection, ConnectionId, Dpid, Switch};
use axum::http::Method;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod dispatch;
pub mod handle;
pub mod registry;
pub mod supervisor;
pub mod tcp_server;

pub use dispatch::DispatchStats;
pub use handle::{ApiControl, ControllerHandle, WeakControllerHandle};
pub use registry::{Admission, Registry};
pub use supervisor::{JoinReport, Supervisor};
pub use tcp_server::{TcpServer, TcpServerControl};

/// Threads and stop handles of a started controller.
struct Running {
    supervisor: Supervisor,
    tcp: TcpServerControl,
    api: ApiSignal,
    tcp_addr: SocketAddr,
    api_addr: SocketAddr,
}

/// SDN controller.
pub struct Controller {
    config: ControllerConfig,
    handle: ControllerHandle,
    napps: NAppHost,
    running: Mutex<Option<Running>>,
}

impl Controller {
    /// Create a controller with the bundled NApps available.
    pub fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        Self::with_catalog(config, NAppCatalog::with_builtins())
    }

    /// Create a controller loading NApps from `catalog`.
    pub fn with_catalog(
        config: ControllerConfig,
        catalog: NAppCatalog,
    ) -> Result<Self, ControllerError> {
        config.validate()?;

        let handle = ControllerHandle::new();
        let napps = NAppHost::new(handle.clone(), catalog, config.napps_dir.clone());

        Ok(Self {
            config,
            handle,
            napps,
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn handle(&self) -> &ControllerHandle {
        &self.handle
    }

    pub fn napps(&self) -> &NAppHost {
        &self.napps
    }

    /// Bind the listeners, start every thread and load NApps.
    ///
    /// A concurrent [`Controller::stop`] waits until the start is complete.
    pub fn start(&self) -> Result<(), ControllerError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }

        info!("Starting Kyco controller");

        let tcp_bind = SocketAddr::new(self.config.listen, self.config.port);
        let tcp = TcpServer::bind(tcp_bind).map_err(|source| ControllerError::Bind {
            addr: tcp_bind.to_string(),
            source,
        })?;
        let api_bind = SocketAddr::new(self.config.api_address, self.config.api_port);
        let api = ApiServer::bind(api_bind).map_err(|source| ControllerError::Bind {
            addr: api_bind.to_string(),
            source,
        })?;

        let tcp_addr = tcp.local_addr();
        let api_addr = api.local_addr();
        let tcp_control = tcp.control();
        let api_signal = api.signal();
        self.handle.set_api_control(Some(ApiControl {
            addr: api_addr,
            signal: api_signal.clone(),
        }));

        let buffers = self.handle.buffers();
        let mut supervisor = Supervisor::new();
        if let Err(e) = self.spawn_threads(&mut supervisor, tcp, api, &buffers) {
            error!("Controller start aborted: {}", e);
            tcp_control.close();
            buffers.send_stop_signal();
            api_signal.trigger();
            supervisor.join_all(self.config.shutdown_timeout());
            self.handle.set_api_control(None);
            self.handle.reset_buffers();
            return Err(e);
        }

        *running = Some(Running {
            supervisor,
            tcp: tcp_control,
            api: api_signal,
            tcp_addr,
            api_addr,
        });

        info!("Loading Kyco NApps...");
        self.load_core_napps();
        let summary = self.napps.load_all();
        if !summary.failed.is_empty() {
            warn!("{} NApp(s) failed to load", summary.failed.len());
        }

        self.handle.set_started_at(Some(Utc::now()));
        drop(running);
        info!(
            "Kyco controller started: switches on {}, API on http://{}",
            tcp_addr, api_addr
        );
        Ok(())
    }

    fn spawn_threads(
        &self,
        supervisor: &mut Supervisor,
        tcp: TcpServer,
        api: ApiServer,
        buffers: &Arc<KycoBuffers>,
    ) -> Result<(), ControllerError> {
        let raw = buffers.raw.clone();
        supervisor.spawn("tcp_server", move || tcp.serve(raw))?;

        let handle = self.handle.clone();
        supervisor.spawn("api_server", move || {
            if let Err(e) = api.serve(handle) {
                error!("API server failed: {}", e);
            }
        })?;

        let stages = [
            ("raw_event_handler", buffers.raw.clone()),
            ("msg_in_event_handler", buffers.msg_in.clone()),
            ("app_event_handler", buffers.app.clone()),
        ];
        for (name, buffer) in stages {
            let handle = self.handle.clone();
            supervisor.spawn(name, move || {
                dispatch::event_loop(&buffer, handle.listeners());
            })?;
        }

        let msg_out = buffers.msg_out.clone();
        let handle = self.handle.clone();
        supervisor.spawn("msg_out_event_handler", move || {
            dispatch::msg_out_loop(&msg_out, handle.listeners());
        })?;

        Ok(())
    }

    fn load_core_napps(&self) {
        for name in &self.config.core_napps {
            match self.napps.load(name) {
                Ok(()) | Err(NAppLoadError::AlreadyLoaded { .. }) => {}
                Err(e) => error!("Core NApp not loaded: {}", e),
            }
        }
    }

    /// Stop the controller. A controller that is not started is left alone.
    ///
    /// Returns the join report, or `None` if there was nothing to stop.
    pub fn stop(&self, graceful: bool) -> Option<JoinReport> {
        let Some(mut running) = self.running.lock().take() else {
            debug!("Stop requested but controller is not running");
            return None;
        };

        info!("Stopping Kyco controller (graceful: {})", graceful);

        if !graceful {
            running.tcp.close();
        }
        running.tcp.stop();
        self.handle.buffers().send_stop_signal();
        running.api.trigger();

        let report = running.supervisor.join_all(self.config.shutdown_timeout());
        if !report.detached.is_empty() {
            warn!("Threads left running: {:?}", report.detached);
        }

        self.handle.set_started_at(None);
        self.handle.set_api_control(None);

        let unloaded = self.napps.unload_all();
        debug!("Unloaded NApps: {:?}", unloaded);

        let discarded = self.handle.reset_buffers().backlog();
        if discarded > 0 {
            debug!("Discarded {} buffered event(s)", discarded);
        }

        info!(
            "Kyco controller stopped (switches were on {}, API on {})",
            running.tcp_addr, running.api_addr
        );
        Some(report)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// `"Running since <timestamp>"` or `"Stopped"`.
    pub fn status(&self) -> String {
        self.handle.status()
    }

    /// Time since start, zero when stopped.
    pub fn uptime(&self) -> Duration {
        self.handle.uptime()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.handle.started_at()
    }

    /// Bound switch listener address while started.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.tcp_addr)
    }

    /// Bound HTTP API address while started.
    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.api_addr)
    }

    /// Names of the controller threads while started.
    pub fn thread_names(&self) -> Vec<&'static str> {
        self.running
            .lock()
            .as_ref()
            .map(|r| r.supervisor.names())
            .unwrap_or_default()
    }

    pub fn buffers(&self) -> Arc<KycoBuffers> {
        self.handle.buffers()
    }

    pub fn notify_listeners(&self, event: &KycoEvent) -> NotifyOutcome {
        self.handle.notify_listeners(event)
    }

    pub fn register_listener(&self, pattern: &str, listener: Listener) -> Result<(), ListenerError> {
        self.handle.register_listener(pattern, listener)
    }

    pub fn unregister_listener(&self, pattern: &str, listener: &Listener) -> bool {
        self.handle.unregister_listener(pattern, listener)
    }

    pub fn register_rest_endpoint<F>(&self, url: &str, methods: &[Method], handler: F) -> bool
    where
        F: Fn(&RestRequest) -> RestResponse + Send + Sync + 'static,
    {
        self.handle.register_rest_endpoint(url, methods, handler)
    }

    pub fn rest_endpoints(&self) -> Vec<String> {
        self.handle.rest_endpoint_rules()
    }

    pub fn get_switch_by_dpid(&self, dpid: &Dpid) -> Option<Arc<Switch>> {
        self.handle.registry().get_switch_by_dpid(dpid)
    }

    pub fn get_switch_or_create(&self, dpid: &Dpid, connection: Arc<Connection>) -> Arc<Switch> {
        self.handle.get_switch_or_create(dpid, connection)
    }

    pub fn add_new_switch(&self, switch: Arc<Switch>) -> Option<Arc<Switch>> {
        self.handle.registry().add_new_switch(switch)
    }

    pub fn remove_switch(&self, dpid: &Dpid) -> bool {
        self.handle.registry().remove_switch(dpid)
    }

    pub fn get_connection_by_id(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.handle.registry().get_connection_by_id(id)
    }

    pub fn create_or_update_connection(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        self.handle.registry().create_or_update_connection(connection)
    }

    pub fn remove_connection(&self, connection: &Arc<Connection>) -> bool {
        self.handle.registry().remove_connection(connection)
    }

    pub fn load_napp(&self, name: &str) -> Result<(), NAppLoadError> {
        self.napps.load(name)
    }

    pub fn load_napps(&self) -> LoadSummary {
        self.napps.load_all()
    }

    pub fn unload_napp(&self, name: &str) -> bool {
        self.napps.unload(name)
    }

    pub fn unload_napps(&self) -> Vec<String> {
        self.napps.unload_all()
    }

    pub fn install_napp(&self, name: &str) -> Result<(), NAppLoadError> {
        self.napps.install(name)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop(true);
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("status", &self.status())
            .field("handle", &self.handle)
            .field("napps", &self.napps)
            .finish()
    }
}
