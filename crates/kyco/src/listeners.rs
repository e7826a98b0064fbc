// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event listener registry.
//!
//! Maps event-name patterns to ordered lists of listeners. A pattern is a
//! regular expression matched from the start of the event name, so
//! `core.switches` matches `core.switches.new` and `.*` matches everything.
//!
//! # Thread safety
//!
//! The registry sits behind a `RwLock`. [`EventListeners::notify`] copies the
//! matching listeners out under the read lock and invokes them after the
//! lock is released, so a listener may register or unregister listeners
//! (including itself) without deadlocking.
//!
//! Every registration carries a call gate. `unregister` closes the gate,
//! so a snapshot taken earlier skips the listener, and then waits for calls
//! already running on other threads. Once `unregister` returns, the
//! listener is never invoked again for that registration.

use crate::error::ListenerError;
use crate::events::KycoEvent;
use parking_lot::RwLock;
use regex::Regex;
use std::fmt;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

type ListenerFn = dyn Fn(&KycoEvent) -> Result<(), ListenerError> + Send + Sync;

/// A subscriber callback.
///
/// Clones compare equal: identity is the underlying allocation, which is
/// what lets a NApp unregister exactly the listeners it registered.
#[derive(Clone)]
pub struct Listener {
    label: Arc<str>,
    func: Arc<ListenerFn>,
}

impl Listener {
    pub fn new<F>(label: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(&KycoEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            func: Arc::new(func),
        }
    }

    /// Name used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn call(&self, event: &KycoEvent) -> Result<(), ListenerError> {
        (self.func)(event)
    }

    fn same_as(&self, other: &Listener) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.func), Arc::as_ptr(&other.func))
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.label).finish()
    }
}

/// Result of one [`EventListeners::notify`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyOutcome {
    /// Listeners that returned `Ok`
    pub delivered: usize,
    /// Listeners that returned `Err` or panicked
    pub failed: usize,
}

impl NotifyOutcome {
    pub fn invoked(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Poll interval while waiting for in-flight calls of a closed gate.
const DRAIN_POLL: Duration = Duration::from_micros(200);

thread_local! {
    /// Gates this thread is currently calling through, innermost last.
    static ENTERED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Admission control for the calls of one registration.
struct Gate {
    open: AtomicBool,
    calls: AtomicUsize,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        })
    }

    fn key(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    /// Start a call, or `None` if the gate is closed.
    ///
    /// The call is counted before the gate is checked, so `close_and_drain`
    /// either sees it or it sees the gate closed.
    fn enter(self: &Arc<Self>) -> Option<GateCall> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.open.load(Ordering::SeqCst) {
            self.calls.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        ENTERED.with(|e| e.borrow_mut().push(self.key()));
        Some(GateCall { gate: self.clone() })
    }

    /// Close the gate and wait for calls running on other threads.
    fn close_and_drain(self: &Arc<Self>) {
        self.open.store(false, Ordering::SeqCst);

        // Calls on this thread (a listener unregistering itself) cannot finish first.
        let key = self.key();
        let own = ENTERED.with(|e| e.borrow().iter().filter(|k| **k == key).count());
        while self.calls.load(Ordering::SeqCst) > own {
            thread::sleep(DRAIN_POLL);
        }
    }
}

struct GateCall {
    gate: Arc<Gate>,
}

impl Drop for GateCall {
    fn drop(&mut self) {
        let key = self.gate.key();
        ENTERED.with(|e| {
            let mut entered = e.borrow_mut();
            if let Some(pos) = entered.iter().rposition(|k| *k == key) {
                entered.remove(pos);
            }
        });
        self.gate.calls.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Registration {
    listener: Listener,
    gate: Arc<Gate>,
}

impl Registration {
    fn new(listener: Listener) -> Self {
        Self {
            listener,
            gate: Gate::new(),
        }
    }
}

struct PatternEntry {
    pattern: String,
    regex: Regex,
    listeners: Vec<Registration>,
}

/// Pattern → listeners registry.
pub struct EventListeners {
    entries: RwLock<Vec<PatternEntry>>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    fn compile(pattern: &str) -> Result<Regex, ListenerError> {
        Regex::new(&format!("^(?:{})", pattern)).map_err(|source| {
            ListenerError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })
    }

    /// Append `listener` to the list for `pattern`, creating the entry if needed.
    pub fn register(&self, pattern: &str, listener: Listener) -> Result<(), ListenerError> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|e| e.pattern == pattern) {
            entry.listeners.push(Registration::new(listener));
            return Ok(());
        }

        let regex = Self::compile(pattern)?;
        trace!("New listener pattern '{}'", pattern);
        entries.push(PatternEntry {
            pattern: pattern.to_string(),
            regex,
            listeners: vec![Registration::new(listener)],
        });
        Ok(())
    }

    /// Remove one occurrence of `listener` from `pattern`.
    ///
    /// The pattern entry is dropped once its list is empty. Calls of that
    /// registration already running on other threads are waited for. Returns
    /// `false` if the listener was not registered under that pattern.
    pub fn unregister(&self, pattern: &str, listener: &Listener) -> bool {
        let removed = {
            let mut entries = self.entries.write();
            let Some(idx) = entries.iter().position(|e| e.pattern == pattern) else {
                return false;
            };

            let entry = &mut entries[idx];
            let Some(pos) = entry.listeners.iter().position(|r| &r.listener == listener) else {
                return false;
            };
            let removed = entry.listeners.remove(pos);

            if entry.listeners.is_empty() {
                entries.remove(idx);
                trace!("Listener pattern '{}' removed", pattern);
            }
            removed
        };

        removed.gate.close_and_drain();
        true
    }

    fn snapshot(&self, name: &str) -> Vec<(Listener, Arc<Gate>)> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.regex.is_match(name))
            .flat_map(|e| {
                e.listeners
                    .iter()
                    .map(|r| (r.listener.clone(), r.gate.clone()))
            })
            .collect()
    }

    /// Listeners whose pattern matches `name`, in registration order.
    pub fn matching(&self, name: &str) -> Vec<Listener> {
        self.snapshot(name).into_iter().map(|(l, _)| l).collect()
    }

    /// Invoke every matching listener on the calling thread.
    ///
    /// Each call is isolated: an `Err` or a panic is logged and counted and
    /// the remaining listeners still run.
    pub fn notify(&self, event: &KycoEvent) -> NotifyOutcome {
        let mut outcome = NotifyOutcome::default();

        for (listener, gate) in self.snapshot(event.name()) {
            let Some(_call) = gate.enter() else {
                debug!(
                    "Listener '{}' unregistered, skipping {}",
                    listener.label(),
                    event.name()
                );
                continue;
            };
            match catch_unwind(AssertUnwindSafe(|| listener.call(event))) {
                Ok(Ok(())) => outcome.delivered += 1,
                Ok(Err(e)) => {
                    outcome.failed += 1;
                    warn!(
                        "Listener '{}' failed on {}: {}",
                        listener.label(),
                        event.name(),
                        e
                    );
                }
                Err(_) => {
                    outcome.failed += 1;
                    warn!(
                        "Listener '{}' panicked on {}",
                        listener.label(),
                        event.name()
                    );
                }
            }
        }

        outcome
    }

    /// Registered patterns, in insertion order.
    pub fn patterns(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.pattern.clone()).collect()
    }

    /// Number of listeners registered under exactly `pattern`.
    pub fn listener_count(&self, pattern: &str) -> usize {
        self.entries
            .read()
            .iter()
            .find(|e| e.pattern == pattern)
            .map_or(0, |e| e.listeners.len())
    }

    /// Whether `listener` is registered under any pattern.
    pub fn contains(&self, listener: &Listener) -> bool {
        self.entries
            .read()
            .iter()
            .any(|e| e.listeners.iter().any(|r| &r.listener == listener))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for EventListeners {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("patterns", &self.patterns())
            .finish()
    }
}
