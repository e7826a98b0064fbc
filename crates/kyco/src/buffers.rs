// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline buffers.
//!
//! Each stage of the controller owns one unbounded FIFO. Producers never
//! block; the stage's dispatch loop blocks on [`EventBuffer::get`].

use crate::events::KycoEvent;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::{debug, error};

/// Unbounded, thread-safe FIFO of events.
///
/// Clones share the same queue.
#[derive(Clone)]
pub struct EventBuffer {
    name: &'static str,
    tx: Sender<KycoEvent>,
    rx: Receiver<KycoEvent>,
}

impl EventBuffer {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = channel::unbounded();
        Self { name, tx, rx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue an event. Never blocks.
    pub fn put(&self, event: KycoEvent) {
        debug!("[{}] put {}", self.name, event);
        // The buffer holds its own receiver, so the channel cannot be disconnected.
        if let Err(e) = self.tx.send(event) {
            error!("[{}] dropped {}: channel closed", self.name, e.0);
        }
    }

    /// Block until an event is available.
    ///
    /// Returns `None` only if the channel was torn down.
    pub fn get(&self) -> Option<KycoEvent> {
        self.rx.recv().ok()
    }

    /// Wait up to `timeout` for an event.
    pub fn get_timeout(&self, timeout: Duration) -> Option<KycoEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take an event if one is queued.
    pub fn try_get(&self) -> Option<KycoEvent> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl std::fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

/// The four stage buffers of the controller.
#[derive(Debug, Clone)]
pub struct KycoBuffers {
    /// Raw network events (`core.connection.new`, undecoded frames)
    pub raw: EventBuffer,
    /// Decoded inbound protocol messages
    pub msg_in: EventBuffer,
    /// Outbound protocol messages awaiting send
    pub msg_out: EventBuffer,
    /// Application-level notifications
    pub app: EventBuffer,
}

impl KycoBuffers {
    pub fn new() -> Self {
        Self {
            raw: EventBuffer::new("raw"),
            msg_in: EventBuffer::new("msg_in"),
            msg_out: EventBuffer::new("msg_out"),
            app: EventBuffer::new("app"),
        }
    }

    /// All buffers, in pipeline order.
    pub fn all(&self) -> [&EventBuffer; 4] {
        [&self.raw, &self.msg_in, &self.msg_out, &self.app]
    }

    /// Put one shutdown sentinel on every buffer.
    pub fn send_stop_signal(&self) {
        debug!("Sending stop signal to all buffers");
        for buffer in self.all() {
            buffer.put(KycoEvent::shutdown());
        }
    }

    /// Total number of queued events.
    pub fn backlog(&self) -> usize {
        self.all().iter().map(|b| b.len()).sum()
    }
}

impl Default for KycoBuffers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let buffer = EventBuffer::new("raw");
        for i in 0..10 {
            buffer.put(KycoEvent::new(format!("test.event.{}", i)));
        }
        assert_eq!(buffer.len(), 10);

        for i in 0..10 {
            let event = buffer.get().expect("event");
            assert_eq!(event.name(), format!("test.event.{}", i));
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multi_producer_keeps_per_producer_order() {
        let buffer = EventBuffer::new("app");
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        buffer.put(KycoEvent::new(format!("p{}.{}", p, i)));
                    }
                })
            })
            .collect();
        for handle in producers {
            handle.join().unwrap();
        }

        let mut last_seen = [None::<usize>; 4];
        while let Some(event) = buffer.try_get() {
            let (p, i) = event.name()[1..].split_once('.').unwrap();
            let (p, i): (usize, usize) = (p.parse().unwrap(), i.parse().unwrap());
            if let Some(prev) = last_seen[p] {
                assert!(i > prev, "producer {} reordered: {} after {}", p, i, prev);
            }
            last_seen[p] = Some(i);
        }
        assert!(last_seen.iter().all(|s| *s == Some(249)));
    }

    #[test]
    fn test_get_blocks_until_put() {
        let buffer = EventBuffer::new("msg_in");
        let consumer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.get().map(|e| e.name().to_string()))
        };
        thread::sleep(Duration::from_millis(20));
        buffer.put(KycoEvent::new("late.event"));
        assert_eq!(consumer.join().unwrap().as_deref(), Some("late.event"));
    }

    #[test]
    fn test_get_timeout_empty() {
        let buffer = EventBuffer::new("msg_out");
        assert!(buffer.get_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_stop_signal_reaches_every_buffer() {
        let buffers = KycoBuffers::new();
        buffers.app.put(KycoEvent::new("app.pending"));
        buffers.send_stop_signal();
        assert_eq!(buffers.backlog(), 5);

        assert_eq!(buffers.app.get().unwrap().name(), "app.pending");
        for buffer in buffers.all() {
            assert!(buffer.get().unwrap().is_shutdown());
        }
    }
}
