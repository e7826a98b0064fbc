// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Switch-facing TCP listener.
//!
//! Accepts switch connections and raises `core.connection.new` on the raw
//! buffer for each one. The accept loop polls a non-blocking listener so it
//! can observe the stop flag; a hard stop also shuts the listening socket.

use crate::buffers::EventBuffer;
use crate::events::KycoEvent;
use crate::switch::Connection;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

const ACCEPT_POLL: Duration = Duration::from_millis(10);
const LISTEN_BACKLOG: i32 = 128;

/// Bound, not yet serving, switch listener.
pub struct TcpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    control: TcpServerControl,
}

/// Stop handle for a running [`TcpServer`].
#[derive(Clone)]
pub struct TcpServerControl {
    running: Arc<AtomicBool>,
    socket: Arc<Socket>,
}

impl TcpServerControl {
    /// Ask the accept loop to stop at its next poll.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Shut the listening socket down (non-graceful stop).
    pub fn close(&self) {
        self.stop();
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            debug!("Listener shutdown returned: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

fn bind_socket(addr: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket)
}

/// Bind a non-blocking listener with address reuse. Port 0 picks an
/// ephemeral port.
pub(crate) fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let listener: TcpListener = bind_socket(addr)?.into();
    listener.set_nonblocking(true)?;
    Ok(listener)
}

impl TcpServer {
    /// Bind the listener. Port 0 picks an ephemeral port.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = bind_socket(addr)?;
        let control_socket = socket.try_clone()?;
        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            control: TcpServerControl {
                running: Arc::new(AtomicBool::new(true)),
                socket: Arc::new(control_socket),
            },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn control(&self) -> TcpServerControl {
        self.control.clone()
    }

    /// Accept connections until stopped, feeding `raw`.
    pub fn serve(self, raw: EventBuffer) {
        info!("Switch listener on {}", self.local_addr);

        while self.control.is_running() {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        error!("Dropping {}: {}", peer_addr, e);
                        continue;
                    }
                    let connection = match Connection::from_tcp(stream, peer_addr) {
                        Ok(connection) => Arc::new(connection),
                        Err(e) => {
                            error!("Dropping {}: {}", peer_addr, e);
                            continue;
                        }
                    };
                    info!("New connection from {}", peer_addr);
                    raw.put(KycoEvent::connection_new(connection));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    if !self.control.is_running() {
                        break;
                    }
                    error!("Accept error: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        info!("Switch listener on {} stopped", self.local_addr);
    }
}
