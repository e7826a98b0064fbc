// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named controller threads with a bounded join.
//!
//! Every worker reports on a shared channel when it exits (normally or by
//! panic). [`Supervisor::join_all`] waits on that channel up to a deadline,
//! joins the workers that finished, and detaches the rest.

use crate::error::ControllerError;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Sends the worker name on drop, so a panicking worker is reported too.
struct ExitGuard {
    name: &'static str,
    tx: Sender<&'static str>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(self.name);
    }
}

/// Result of [`Supervisor::join_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JoinReport {
    /// Threads that exited and were joined
    pub joined: Vec<&'static str>,
    /// Threads that panicked
    pub panicked: Vec<&'static str>,
    /// Threads still running at the deadline, left detached
    pub detached: Vec<&'static str>,
}

impl JoinReport {
    pub fn is_clean(&self) -> bool {
        self.panicked.is_empty() && self.detached.is_empty()
    }
}

/// Owner of the controller threads.
pub struct Supervisor {
    workers: Vec<Worker>,
    exit_tx: Sender<&'static str>,
    exit_rx: Receiver<&'static str>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (exit_tx, exit_rx) = channel::unbounded();
        Self {
            workers: Vec::new(),
            exit_tx,
            exit_rx,
        }
    }

    /// Spawn a named thread running `f`.
    pub fn spawn<F>(&mut self, name: &'static str, f: F) -> Result<(), ControllerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = ExitGuard {
            name,
            tx: self.exit_tx.clone(),
        };
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = guard;
                debug!("Thread {} started", name);
                f();
                debug!("Thread {} finished", name);
            })
            .map_err(|source| ControllerError::Thread { name, source })?;

        self.workers.push(Worker { name, handle });
        Ok(())
    }

    /// Names of the threads not yet joined.
    pub fn names(&self) -> Vec<&'static str> {
        self.workers.iter().map(|w| w.name).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Join every thread, waiting at most `timeout` in total.
    pub fn join_all(&mut self, timeout: Duration) -> JoinReport {
        let deadline = Instant::now() + timeout;
        let mut report = JoinReport::default();

        while !self.workers.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let name = match self.exit_rx.recv_timeout(remaining) {
                Ok(name) => name,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            };

            let Some(idx) = self.workers.iter().position(|w| w.name == name) else {
                continue;
            };
            let worker = self.workers.swap_remove(idx);
            info!("Stopping thread: {}", worker.name);
            match worker.handle.join() {
                Ok(()) => report.joined.push(worker.name),
                Err(_) => {
                    error!("Thread {} panicked", worker.name);
                    report.panicked.push(worker.name);
                }
            }
        }

        for worker in self.workers.drain(..) {
            warn!(
                "Thread {} did not stop within {:?}, detaching",
                worker.name, timeout
            );
            report.detached.push(worker.name);
        }

        report
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
