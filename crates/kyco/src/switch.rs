// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Switch connections and switch identities.
//!
//! A [`Connection`] is one socket-level link, identified by the peer
//! `(ip, port)`. A [`Switch`] is the longer-lived device identity keyed by
//! its dpid; its current connection is swapped when the switch reconnects.
//!
//! # Connection state
//!
//! ```text
//!   accept()          close() / send error
//!  ---------> Established ------------------> Closed
//! ```

use crate::error::ConnectionError;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Connection identifier: the peer `(ip, port)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub SocketAddr);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SocketAddr> for ConnectionId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

/// Write timeout on accepted switch sockets.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle able to shut a stream down from any thread, including while
/// another thread is blocked writing to it.
pub trait StreamShutdown: Send + Sync {
    /// Shut both directions of the stream down.
    fn shutdown(&self) -> io::Result<()>;
}

impl StreamShutdown for TcpStream {
    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Byte sink behind a connection.
///
/// Implemented for `TcpStream`; tests plug in an in-memory stream.
pub trait SwitchStream: Write + Send {
    /// Shutdown handle sharing the underlying socket.
    fn shutdown_handle(&self) -> io::Result<Box<dyn StreamShutdown>>;
}

impl SwitchStream for TcpStream {
    fn shutdown_handle(&self) -> io::Result<Box<dyn StreamShutdown>> {
        Ok(Box::new(self.try_clone()?))
    }
}

/// Connection liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Established,
    Closed,
}

/// One link between the controller and a switch.
///
/// Writes are serialized on the writer lock. Closing never takes that lock
/// while a write is in progress: it shuts the socket down through a separate
/// handle, which fails the pending write.
pub struct Connection {
    id: ConnectionId,
    writer: Mutex<Option<Box<dyn SwitchStream>>>,
    closer: Box<dyn StreamShutdown>,
    closed: AtomicBool,
    bytes_sent: AtomicU64,
    accepted_at: Instant,
}

impl Connection {
    /// Wrap an accepted TCP stream, bounding each write by [`SEND_TIMEOUT`].
    pub fn from_tcp(stream: TcpStream, peer_addr: SocketAddr) -> io::Result<Self> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {}", peer_addr, e);
        }
        stream.set_write_timeout(Some(SEND_TIMEOUT))?;
        Self::new(peer_addr.into(), Box::new(stream))
    }

    /// Create a connection over an arbitrary stream.
    pub fn new(id: ConnectionId, stream: Box<dyn SwitchStream>) -> io::Result<Self> {
        let closer = stream.shutdown_handle()?;
        Ok(Self {
            id,
            writer: Mutex::new(Some(stream)),
            closer,
            closed: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            accepted_at: Instant::now(),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::Acquire) {
            ConnectionState::Closed
        } else {
            ConnectionState::Established
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    /// Total bytes written through [`Connection::send`].
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }

    /// Write packed message bytes to the switch.
    ///
    /// A write error closes the connection.
    pub fn send(&self, data: &[u8]) -> Result<(), ConnectionError> {
        let closed = || ConnectionError::Closed(self.id.to_string());
        if !self.is_alive() {
            return Err(closed());
        }

        let mut guard = self.writer.lock();
        if !self.is_alive() {
            guard.take();
            return Err(closed());
        }
        let stream = guard.as_mut().ok_or_else(closed)?;

        let result = stream.write_all(data).and_then(|()| stream.flush());
        match result {
            Ok(()) => {
                self.bytes_sent
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                guard.take();
                if self.mark_closed() {
                    warn!("Send to {} failed, closing: {}", self.id, e);
                } else {
                    debug!("Send to {} interrupted by close: {}", self.id, e);
                }
                Err(ConnectionError::Io(e))
            }
        }
    }

    /// Close the connection, failing any write in progress.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        if !self.mark_closed() {
            return false;
        }
        // A blocked sender still holds the writer; it drops it on its way out.
        if let Some(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        debug!("Connection {} closed", self.id);
        true
    }

    /// Flip to closed and shut the socket down. `false` if already closed.
    fn mark_closed(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Err(e) = self.closer.shutdown() {
            // Peer may already be gone.
            debug!("Shutdown of {} returned: {}", self.id, e);
        }
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("bytes_sent", &self.bytes_sent())
            .finish()
    }
}

/// Datapath identifier of a switch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dpid(String);

impl Dpid {
    pub fn new(dpid: impl Into<String>) -> Self {
        Self(dpid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Dpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Dpid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A network switch known to the controller.
pub struct Switch {
    dpid: Dpid,
    connection: ArcSwapOption<Connection>,
    first_seen: Instant,
}

impl Switch {
    pub fn new(dpid: Dpid) -> Self {
        Self {
            dpid,
            connection: ArcSwapOption::empty(),
            first_seen: Instant::now(),
        }
    }

    pub fn dpid(&self) -> &Dpid {
        &self.dpid
    }

    /// Current connection of the switch.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.load_full()
    }

    /// Point the switch at `connection`, returning the previous one.
    pub fn update_connection(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        self.connection.swap(Some(connection))
    }

    pub fn first_seen(&self) -> Instant {
        self.first_seen
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_some_and(|c| c.is_alive())
    }
}

impl fmt::Debug for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Switch")
            .field("dpid", &self.dpid)
            .field("connection", &self.connection().map(|c| c.id()))
            .finish()
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Condvar;

    #[derive(Clone, Copy, Default)]
    enum WriteMode {
        #[default]
        Accept,
        Fail,
        Stall,
    }

    /// In-memory stream recording everything written to it.
    #[derive(Clone, Default)]
    pub struct MockStream {
        written: Arc<Mutex<Vec<u8>>>,
        shutdowns: Arc<(Mutex<u64>, Condvar)>,
        mode: WriteMode,
    }

    impl MockStream {
        pub fn new() -> Self {
            Self::default()
        }

        /// A stream whose writes always fail.
        pub fn broken() -> Self {
            Self {
                mode: WriteMode::Fail,
                ..Self::default()
            }
        }

        /// A stream whose writes block until it is shut down, like a
        /// half-open socket with a full send buffer.
        pub fn stalled() -> Self {
            Self {
                mode: WriteMode::Stall,
                ..Self::default()
            }
        }

        pub fn written(&self) -> Vec<u8> {
            self.written.lock().clone()
        }

        pub fn shutdown_count(&self) -> u64 {
            *self.shutdowns.0.lock()
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.mode {
                WriteMode::Accept => {
                    self.written.lock().extend_from_slice(buf);
                    Ok(buf.len())
                }
                WriteMode::Fail => Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock broken")),
                WriteMode::Stall => {
                    let (count, shut) = &*self.shutdowns;
                    let mut count = count.lock();
                    while *count == 0 {
                        shut.wait(&mut count);
                    }
                    Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock shut down"))
                }
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl StreamShutdown for MockStream {
        fn shutdown(&self) -> io::Result<()> {
            let (count, shut) = &*self.shutdowns;
            *count.lock() += 1;
            shut.notify_all();
            Ok(())
        }
    }

    impl SwitchStream for MockStream {
        fn shutdown_handle(&self) -> io::Result<Box<dyn StreamShutdown>> {
            Ok(Box::new(self.clone()))
        }
    }

    /// Connection over `stream`.
    pub fn connection_over(addr: &str, stream: &MockStream) -> Arc<Connection> {
        let id = ConnectionId(addr.parse().expect("socket addr"));
        Arc::new(Connection::new(id, Box::new(stream.clone())).expect("mock connection"))
    }

    /// Connection over a fresh mock stream, plus a handle to inspect it.
    pub fn connection(addr: &str) -> (Arc<Connection>, MockStream) {
        let stream = MockStream::new();
        (connection_over(addr, &stream), stream)
    }
}
