// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! NApp hosting.
//!
//! A NApp is a compiled-in implementation of [`NApp`] registered in a
//! [`NAppCatalog`] under its `author/napp_name`. The [`NAppHost`] builds it
//! with a [`ControllerHandle`], wires its listeners into the listener
//! registry, runs its start hook, and undoes all of that on unload.
//!
//! The NApps directory (`<root>/<author>/<napp_name>/`) only decides which
//! catalog entries get loaded at startup.

pub mod switch_inventory;

use crate::controller::ControllerHandle;
use crate::error::{NAppError, NAppLoadError};
use crate::listeners::Listener;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Listeners a NApp contributes, keyed by event pattern.
pub type NAppListeners = BTreeMap<String, Vec<Listener>>;

/// Contract every NApp implements.
pub trait NApp: Send {
    /// Listeners to register while the NApp is loaded.
    fn listeners(&self) -> NAppListeners;

    /// Called once the listeners are registered.
    fn start(&mut self) -> Result<(), NAppError>;

    /// Called on unload, before the listeners are removed.
    fn shutdown(&mut self);

    /// Core NApps survive [`NAppHost::unload_all`].
    fn is_core(&self) -> bool {
        false
    }
}

/// Builds a NApp bound to the controller.
pub type NAppFactory =
    Arc<dyn Fn(ControllerHandle) -> Result<Box<dyn NApp>, NAppError> + Send + Sync>;

/// Name → factory table.
#[derive(Clone, Default)]
pub struct NAppCatalog {
    factories: BTreeMap<String, NAppFactory>,
}

impl NAppCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the NApps bundled with the controller.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(switch_inventory::NAPP_NAME, switch_inventory::SwitchInventory::boxed);
        catalog
    }

    /// Add or replace the factory for `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(ControllerHandle) -> Result<Box<dyn NApp>, NAppError> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<NAppFactory> {
        self.factories.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl std::fmt::Debug for NAppCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// Outcome of [`NAppHost::load_all`].
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub loaded: Vec<String>,
    pub failed: Vec<NAppLoadError>,
}

struct LoadedNApp {
    napp: Box<dyn NApp>,
    listeners: NAppListeners,
    /// REST rules the NApp mounted while loading.
    endpoints: Vec<String>,
}

/// Loads, tracks and unloads NApps.
pub struct NAppHost {
    handle: ControllerHandle,
    catalog: RwLock<NAppCatalog>,
    napps_dir: PathBuf,
    loaded: Mutex<BTreeMap<String, LoadedNApp>>,
}

impl NAppHost {
    pub fn new(handle: ControllerHandle, catalog: NAppCatalog, napps_dir: impl Into<PathBuf>) -> Self {
        Self {
            handle,
            catalog: RwLock::new(catalog),
            napps_dir: napps_dir.into(),
            loaded: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn napps_dir(&self) -> &Path {
        &self.napps_dir
    }

    /// Make another NApp available to [`NAppHost::load`].
    pub fn register_napp<F>(&self, name: &str, factory: F)
    where
        F: Fn(ControllerHandle) -> Result<Box<dyn NApp>, NAppError> + Send + Sync + 'static,
    {
        self.catalog.write().register(name, factory);
    }

    /// Build, wire and start the NApp `name`.
    pub fn load(&self, name: &str) -> Result<(), NAppLoadError> {
        let mut loaded = self.loaded.lock();
        if loaded.contains_key(name) {
            return Err(NAppLoadError::AlreadyLoaded { name: name.into() });
        }

        let factory = self
            .catalog
            .read()
            .get(name)
            .ok_or_else(|| NAppLoadError::NotFound { name: name.into() })?;

        let rules_before = self.handle.rest_endpoint_rules();
        let mut napp = match factory(self.handle.clone()) {
            Ok(napp) => napp,
            Err(source) => {
                self.unmount_all(&self.mounted_since(&rules_before));
                return Err(NAppLoadError::Init {
                    name: name.into(),
                    source,
                });
            }
        };

        let listeners = napp.listeners();
        let mut registered: Vec<(&str, &Listener)> = Vec::new();
        for (pattern, list) in &listeners {
            for listener in list {
                if let Err(source) = self.handle.register_listener(pattern, listener.clone()) {
                    self.unregister_all(registered);
                    self.unmount_all(&self.mounted_since(&rules_before));
                    return Err(NAppLoadError::Listener {
                        name: name.into(),
                        source,
                    });
                }
                registered.push((pattern.as_str(), listener));
            }
        }

        if let Err(source) = napp.start() {
            self.unregister_all(registered);
            self.unmount_all(&self.mounted_since(&rules_before));
            return Err(NAppLoadError::Start {
                name: name.into(),
                source,
            });
        }

        info!(
            "NApp {} loaded ({} listener pattern(s))",
            name,
            listeners.len()
        );
        let endpoints = self.mounted_since(&rules_before);
        loaded.insert(
            name.to_string(),
            LoadedNApp {
                napp,
                listeners,
                endpoints,
            },
        );
        Ok(())
    }

    fn mounted_since(&self, before: &[String]) -> Vec<String> {
        self.handle
            .rest_endpoint_rules()
            .into_iter()
            .filter(|rule| !before.contains(rule))
            .collect()
    }

    fn unmount_all(&self, rules: &[String]) {
        for rule in rules {
            self.handle.rest_endpoints().unregister(rule);
        }
    }

    fn unregister_all<'a>(&self, listeners: impl IntoIterator<Item = (&'a str, &'a Listener)>) {
        for (pattern, listener) in listeners {
            self.handle.unregister_listener(pattern, listener);
        }
    }

    /// Shut the NApp down, then remove every listener it registered and
    /// every REST rule it mounted.
    ///
    /// Listener calls already running on other threads are waited for, so
    /// none of the NApp's listeners runs once this returns.
    ///
    /// Returns `false` if no NApp by that name is loaded.
    pub fn unload(&self, name: &str) -> bool {
        let Some(mut entry) = self.loaded.lock().remove(name) else {
            return false;
        };

        // Detach first so shutdown never races a listener or REST call
        self.unregister_all(
            entry
                .listeners
                .iter()
                .flat_map(|(p, list)| list.iter().map(move |l| (p.as_str(), l))),
        );
        self.unmount_all(&entry.endpoints);
        entry.napp.shutdown();
        info!("NApp {} unloaded", name);
        true
    }

    /// Unload every NApp except core ones. Returns the unloaded names.
    pub fn unload_all(&self) -> Vec<String> {
        let names: Vec<String> = self
            .loaded
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.napp.is_core())
            .map(|(name, _)| name.clone())
            .collect();

        names.into_iter().filter(|name| self.unload(name)).collect()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.lock().contains_key(name)
    }

    pub fn loaded_names(&self) -> Vec<String> {
        self.loaded.lock().keys().cloned().collect()
    }

    /// `author/napp_name` entries found under the NApps directory, sorted.
    ///
    /// A missing directory yields an empty list.
    pub fn discover(&self) -> Vec<String> {
        match discover_napps(&self.napps_dir) {
            Ok(names) => names,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    "NApps directory {} not found, starting without NApps",
                    self.napps_dir.display()
                );
                Vec::new()
            }
            Err(e) => {
                error!("Could not read NApps directory {}: {}", self.napps_dir.display(), e);
                Vec::new()
            }
        }
    }

    /// Load every NApp found under the NApps directory.
    ///
    /// Failures are logged and collected; they never abort the scan.
    pub fn load_all(&self) -> LoadSummary {
        let mut summary = LoadSummary::default();

        for name in self.discover() {
            info!("Loading NApp {}", name);
            match self.load(&name) {
                Ok(()) => summary.loaded.push(name),
                Err(NAppLoadError::AlreadyLoaded { .. }) => {
                    debug!("NApp {} already loaded", name);
                }
                Err(e) => {
                    error!("{}", e);
                    summary.failed.push(e);
                }
            }
        }

        summary
    }

    /// Fetch and install a NApp package.
    pub fn install(&self, name: &str) -> Result<(), NAppLoadError> {
        Err(NAppLoadError::Unsupported {
            name: name.into(),
            reason: "NApp packaging is not available; NApps are compiled in".into(),
        })
    }
}

impl std::fmt::Debug for NAppHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NAppHost")
            .field("napps_dir", &self.napps_dir)
            .field("loaded", &self.loaded_names())
            .finish()
    }
}

fn sorted_subdirs(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name.starts_with("__") {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Walk `root/<author>/<napp_name>` and return `author/napp_name` names.
pub fn discover_napps(root: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for author in sorted_subdirs(root)? {
        for napp in sorted_subdirs(&root.join(&author))? {
            names.push(format!("{}/{}", author, napp));
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{RestRequest, RestResponse};
    use crate::events::KycoEvent;
    use axum::http::{Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[derive(Default)]
    struct Counters {
        hits: AtomicUsize,
        starts: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    struct TestNApp {
        counters: Arc<Counters>,
        listener: Listener,
        core: bool,
        fail_start: bool,
    }

    impl TestNApp {
        fn factory(
            counters: Arc<Counters>,
            core: bool,
            fail_start: bool,
        ) -> impl Fn(ControllerHandle) -> Result<Box<dyn NApp>, NAppError> + Send + Sync {
            move |_handle| {
                let hits = counters.clone();
                let listener = Listener::new("test", move |_e: &KycoEvent| {
                    hits.hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                Ok(Box::new(TestNApp {
                    counters: counters.clone(),
                    listener,
                    core,
                    fail_start,
                }) as Box<dyn NApp>)
            }
        }
    }

    impl NApp for TestNApp {
        fn listeners(&self) -> NAppListeners {
            let mut map = NAppListeners::new();
            map.insert("test.ping".into(), vec![self.listener.clone()]);
            map.insert("core.switches".into(), vec![self.listener.clone()]);
            map
        }

        fn start(&mut self) -> Result<(), NAppError> {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(NAppError::new("start refused"));
            }
            Ok(())
        }

        fn shutdown(&mut self) {
            self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        }

        fn is_core(&self) -> bool {
            self.core
        }
    }

    fn host_with(entries: &[(&str, Arc<Counters>, bool, bool)]) -> (NAppHost, ControllerHandle) {
        let handle = ControllerHandle::new();
        let mut catalog = NAppCatalog::new();
        for (name, counters, core, fail) in entries {
            catalog.register(name, TestNApp::factory(counters.clone(), *core, *fail));
        }
        (NAppHost::new(handle.clone(), catalog, "/nonexistent/kyco/napps"), handle)
    }

    #[test]
    fn test_load_registers_listeners_and_starts() {
        let counters = Arc::new(Counters::default());
        let (host, handle) = host_with(&[("acme/ping", counters.clone(), false, false)]);

        host.load("acme/ping").unwrap();
        assert!(host.is_loaded("acme/ping"));
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);

        handle.notify_listeners(&KycoEvent::new("test.ping"));
        handle.notify_listeners(&KycoEvent::new("core.switches.new"));
        assert_eq!(counters.hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unload_removes_every_listener() {
        let counters = Arc::new(Counters::default());
        let (host, handle) = host_with(&[("acme/ping", counters.clone(), false, false)]);
        let before = handle.listeners().patterns();

        host.load("acme/ping").unwrap();
        assert!(host.unload("acme/ping"));
        assert!(!host.unload("acme/ping"));

        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(handle.listeners().patterns(), before);
        handle.notify_listeners(&KycoEvent::new("test.ping"));
        assert_eq!(counters.hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unload_keeps_other_napps_listeners_on_shared_pattern() {
        let a = Arc::new(Counters::default());
        let b = Arc::new(Counters::default());
        let (host, handle) = host_with(&[
            ("acme/a", a.clone(), false, false),
            ("acme/b", b.clone(), false, false),
        ]);

        host.load("acme/a").unwrap();
        host.load("acme/b").unwrap();
        assert_eq!(handle.listeners().listener_count("test.ping"), 2);

        host.unload("acme/a");
        assert_eq!(handle.listeners().listener_count("test.ping"), 1);
        handle.notify_listeners(&KycoEvent::new("test.ping"));
        assert_eq!(a.hits.load(Ordering::SeqCst), 0);
        assert_eq!(b.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_errors() {
        let ok = Arc::new(Counters::default());
        let bad = Arc::new(Counters::default());
        let (host, handle) = host_with(&[
            ("acme/ok", ok, false, false),
            ("acme/bad", bad.clone(), false, true),
        ]);

        let err = host.load("acme/missing").unwrap_err();
        assert!(matches!(err, NAppLoadError::NotFound { .. }));
        assert_eq!(err.napp_name(), "acme/missing");

        host.load("acme/ok").unwrap();
        let err = host.load("acme/ok").unwrap_err();
        assert!(matches!(err, NAppLoadError::AlreadyLoaded { .. }));

        let err = host.load("acme/bad").unwrap_err();
        assert!(matches!(err, NAppLoadError::Start { .. }));
        assert!(!host.is_loaded("acme/bad"));
        assert_eq!(handle.listeners().listener_count("test.ping"), 1);
        handle.notify_listeners(&KycoEvent::new("test.ping"));
        assert_eq!(bad.hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_init_error() {
        let handle = ControllerHandle::new();
        let mut catalog = NAppCatalog::new();
        catalog.register("acme/broken", |_h| Err(NAppError::new("missing config")));
        let host = NAppHost::new(handle, catalog, "/nonexistent");

        let err = host.load("acme/broken").unwrap_err();
        assert!(matches!(err, NAppLoadError::Init { .. }));
        assert!(err.to_string().contains("missing config"));
    }

    #[test]
    fn test_unload_all_keeps_core() {
        let core = Arc::new(Counters::default());
        let plain = Arc::new(Counters::default());
        let (host, _) = host_with(&[
            ("kyco/core_app", core.clone(), true, false),
            ("acme/plain", plain.clone(), false, false),
        ]);

        host.load("kyco/core_app").unwrap();
        host.load("acme/plain").unwrap();

        assert_eq!(host.unload_all(), vec!["acme/plain".to_string()]);
        assert_eq!(host.loaded_names(), vec!["kyco/core_app".to_string()]);
        assert_eq!(core.shutdowns.load(Ordering::SeqCst), 0);
        assert_eq!(plain.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_discover_two_level_tree() {
        let dir = tempfile::tempdir().unwrap();
        for path in ["zeta/last", "acme/ping", "acme/alpha", ".git/objects"] {
            fs::create_dir_all(dir.path().join(path)).unwrap();
        }
        fs::write(dir.path().join("README"), "not a napp").unwrap();
        fs::write(dir.path().join("acme/notes.txt"), "not a napp").unwrap();

        let names = discover_napps(dir.path()).unwrap();
        assert_eq!(names, vec!["acme/alpha", "acme/ping", "zeta/last"]);
    }

    #[test]
    fn test_load_all_missing_dir_is_not_fatal() {
        let (host, _) = host_with(&[]);
        let summary = host.load_all();
        assert!(summary.loaded.is_empty());
        assert!(summary.failed.is_empty());
    }

    #[test]
    fn test_load_all_reports_unknown_napps() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("acme/ping")).unwrap();
        fs::create_dir_all(dir.path().join("acme/unknown")).unwrap();

        let counters = Arc::new(Counters::default());
        let handle = ControllerHandle::new();
        let mut catalog = NAppCatalog::new();
        catalog.register("acme/ping", TestNApp::factory(counters, false, false));
        let host = NAppHost::new(handle, catalog, dir.path());

        let summary = host.load_all();
        assert_eq!(summary.loaded, vec!["acme/ping".to_string()]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].napp_name(), "acme/unknown");
    }

    #[test]
    fn test_install_is_unsupported() {
        let (host, _) = host_with(&[]);
        let err = host.install("acme/ping").unwrap_err();
        assert!(matches!(err, NAppLoadError::Unsupported { .. }));
    }

    /// NApp mounting `/kytos/acme/hello` from its start hook.
    struct RestNApp {
        handle: ControllerHandle,
        fail_start: bool,
    }

    impl NApp for RestNApp {
        fn listeners(&self) -> NAppListeners {
            NAppListeners::new()
        }

        fn start(&mut self) -> Result<(), NAppError> {
            self.handle
                .register_rest_endpoint("/acme/hello", &[Method::GET], |_r: &RestRequest| {
                    RestResponse::text(StatusCode::OK, "hello")
                });
            if self.fail_start {
                return Err(NAppError::new("start refused"));
            }
            Ok(())
        }

        fn shutdown(&mut self) {}
    }

    fn rest_host(fail_start: bool) -> (NAppHost, ControllerHandle) {
        let handle = ControllerHandle::new();
        let mut catalog = NAppCatalog::new();
        catalog.register("acme/rest", move |handle: ControllerHandle| {
            Ok(Box::new(RestNApp { handle, fail_start }) as Box<dyn NApp>)
        });
        (NAppHost::new(handle.clone(), catalog, "/nonexistent/kyco/napps"), handle)
    }

    #[test]
    fn test_unload_unmounts_rest_endpoints() {
        let (host, handle) = rest_host(false);
        let builtin = handle.rest_endpoint_rules();

        host.load("acme/rest").unwrap();
        let resp = handle
            .rest_endpoints()
            .dispatch(&RestRequest::new(Method::GET, "/kytos/acme/hello"));
        assert_eq!(resp.status, StatusCode::OK);

        assert!(host.unload("acme/rest"));
        assert_eq!(handle.rest_endpoint_rules(), builtin);
        let resp = handle
            .rest_endpoints()
            .dispatch(&RestRequest::new(Method::GET, "/kytos/acme/hello"));
        assert_eq!(resp.status, StatusCode::NOT_FOUND);

        host.load("acme/rest").unwrap();
        assert!(handle.rest_endpoints().contains("/kytos/acme/hello"));
    }

    #[test]
    fn test_failed_start_unmounts_rest_endpoints() {
        let (host, handle) = rest_host(true);
        let builtin = handle.rest_endpoint_rules();

        let err = host.load("acme/rest").unwrap_err();
        assert!(matches!(err, NAppLoadError::Start { .. }));
        assert_eq!(handle.rest_endpoint_rules(), builtin);
    }

    #[test]
    fn test_no_listener_call_after_unload_returns() {
        let counters = Arc::new(Counters::default());
        let (host, handle) = host_with(&[("acme/ping", counters.clone(), false, false)]);

        // Registered first, so it runs before the NApp's listener.
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        {
            let started = started.clone();
            let release = release.clone();
            handle
                .register_listener(
                    "test",
                    Listener::new("blocker", move |_e: &KycoEvent| {
                        started.wait();
                        release.wait();
                        Ok(())
                    }),
                )
                .unwrap();
        }
        host.load("acme/ping").unwrap();

        let notifier = {
            let handle = handle.clone();
            thread::spawn(move || handle.notify_listeners(&KycoEvent::new("test.ping")))
        };

        started.wait();
        assert!(host.unload("acme/ping"));
        release.wait();

        let outcome = notifier.join().unwrap();
        assert_eq!(outcome.delivered, 1);
        assert_eq!(counters.hits.load(Ordering::SeqCst), 0);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
    }
}
