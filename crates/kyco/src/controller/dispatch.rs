// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffer dispatch loops.
//!
//! One loop per buffer, each on its own thread. A loop is RUNNING until it
//! dequeues the shutdown sentinel, then STOPPED. The raw, msg-in and app
//! loops notify listeners of the sentinel before exiting; the msg-out loop
//! exits on it without sending anything.

use crate::buffers::EventBuffer;
use crate::error::OutboundError;
use crate::events::KycoEvent;
use crate::listeners::EventListeners;
use tracing::{debug, info, trace, warn};

/// Counters returned by a loop when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events taken off the buffer and handed to listeners
    pub dispatched: u64,
    /// Listener invocations that failed
    pub listener_failures: u64,
    /// Outbound events dropped before notify (msg-out only)
    pub send_failures: u64,
}

/// Generic `get → notify → check-sentinel` loop used by raw, msg-in and app.
pub fn event_loop(buffer: &EventBuffer, listeners: &EventListeners) -> DispatchStats {
    let stage = buffer.name();
    let mut stats = DispatchStats::default();
    info!("{} event handler started", stage);

    while let Some(event) = buffer.get() {
        let outcome = listeners.notify(&event);
        stats.dispatched += 1;
        stats.listener_failures += outcome.failed as u64;
        trace!("[{}] {} -> {} listener(s)", stage, event, outcome.invoked());

        if event.is_shutdown() {
            break;
        }
    }

    debug!(
        "{} event handler stopped after {} event(s)",
        stage, stats.dispatched
    );
    stats
}

/// Msg-out loop: pack, send to the destination, then notify.
///
/// A send that cannot happen is logged and the event is not notified, so
/// listeners can rely on "already sent".
pub fn msg_out_loop(buffer: &EventBuffer, listeners: &EventListeners) -> DispatchStats {
    let stage = buffer.name();
    let mut stats = DispatchStats::default();
    info!("{} event handler started", stage);

    while let Some(event) = buffer.get() {
        if event.is_shutdown() {
            break;
        }

        if let Err(e) = send_outbound(&event) {
            stats.send_failures += 1;
            warn!("[{}] dropping {}: {}", stage, event, e);
            continue;
        }

        let outcome = listeners.notify(&event);
        stats.dispatched += 1;
        stats.listener_failures += outcome.failed as u64;
    }

    debug!(
        "{} event handler stopped after {} event(s)",
        stage, stats.dispatched
    );
    stats
}

fn send_outbound(event: &KycoEvent) -> Result<usize, OutboundError> {
    let message = event.message().ok_or(OutboundError::MissingMessage)?;
    let destination = event.destination().ok_or(OutboundError::MissingDestination)?;
    let bytes = message.pack()?;
    destination.send(&bytes)?;
    trace!("Sent {} bytes to {}", bytes.len(), destination.id());
    Ok(bytes.len())
}
