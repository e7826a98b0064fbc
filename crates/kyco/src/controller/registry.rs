// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection and switch registries.
//!
//! Both maps live behind a single mutex so that switch admission (which
//! touches both) is atomic with respect to connection admission running on
//! another dispatch thread. Connections that leave the registry are closed
//! after the lock is released.

use crate::switch::{Connection, ConnectionId, Dpid, Switch};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Default)]
struct Maps {
    /// Connections indexed by peer address
    connections: HashMap<ConnectionId, Arc<Connection>>,
    /// Switches indexed by dpid
    switches: HashMap<Dpid, Arc<Switch>>,
}

/// Outcome of [`Registry::admit_switch`].
#[derive(Debug, Clone)]
pub struct Admission {
    pub switch: Arc<Switch>,
    /// The dpid had never been seen
    pub created: bool,
    /// Connection superseded by this admission (already closed)
    pub superseded: Option<Arc<Connection>>,
}

/// Registry of live connections and known switches.
#[derive(Default)]
pub struct Registry {
    maps: Mutex<Maps>,
}

fn close_all(stale: impl IntoIterator<Item = Arc<Connection>>) {
    for conn in stale {
        conn.close();
    }
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `connection`, overwriting whatever was stored under its id.
    ///
    /// Returns the overwritten entry, which is left open.
    pub fn create_or_update_connection(
        &self,
        connection: Arc<Connection>,
    ) -> Option<Arc<Connection>> {
        self.maps
            .lock()
            .connections
            .insert(connection.id(), connection)
    }

    /// Admit a freshly accepted connection.
    ///
    /// A different connection already registered under the same id is
    /// evicted and closed first; the newest link wins.
    pub fn new_connection(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let stale = {
            let mut maps = self.maps.lock();
            maps.connections
                .insert(connection.id(), connection.clone())
                .filter(|old| !Arc::ptr_eq(old, &connection))
        };

        if let Some(old) = &stale {
            info!("Replacing stale connection {}", old.id());
            old.close();
        }
        debug!("Connection {} registered", connection.id());
        stale
    }

    pub fn get_connection_by_id(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.maps.lock().connections.get(id).cloned()
    }

    /// Close `connection` and drop it from the registry.
    ///
    /// Returns `false` if the registry did not hold this connection.
    pub fn remove_connection(&self, connection: &Arc<Connection>) -> bool {
        let removed = {
            let mut maps = self.maps.lock();
            Self::remove_if_same(&mut maps, connection)
        };
        connection.close();
        if removed {
            debug!("Connection {} removed", connection.id());
        }
        removed
    }

    fn remove_if_same(maps: &mut Maps, connection: &Arc<Connection>) -> bool {
        let id = connection.id();
        match maps.connections.get(&id) {
            Some(current) if Arc::ptr_eq(current, connection) => {
                maps.connections.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn get_switch_by_dpid(&self, dpid: &Dpid) -> Option<Arc<Switch>> {
        self.maps.lock().switches.get(dpid).cloned()
    }

    /// Store `switch` under its dpid, returning the switch it replaced.
    pub fn add_new_switch(&self, switch: Arc<Switch>) -> Option<Arc<Switch>> {
        let dpid = switch.dpid().clone();
        self.maps.lock().switches.insert(dpid, switch)
    }

    /// Forget a switch. Returns `false` if the dpid is unknown.
    pub fn remove_switch(&self, dpid: &Dpid) -> bool {
        let removed = self.maps.lock().switches.remove(dpid).is_some();
        if removed {
            info!("Switch {} removed", dpid);
        }
        removed
    }

    /// Bind `dpid` to `connection`, creating the switch on first sight.
    ///
    /// Both maps are updated under one lock: the connection is upserted, the
    /// switch is looked up or created, its connection reference swapped, and
    /// the superseded connection dropped from the map if the map still holds
    /// that same object. The superseded connection is closed after unlocking.
    pub fn admit_switch(&self, dpid: &Dpid, connection: Arc<Connection>) -> Admission {
        let (admission, overwritten) = {
            let mut maps = self.maps.lock();

            let overwritten = maps
                .connections
                .insert(connection.id(), connection.clone())
                .filter(|prev| !Arc::ptr_eq(prev, &connection));

            let (switch, created) = match maps.switches.get(dpid) {
                Some(switch) => (switch.clone(), false),
                None => {
                    let switch = Arc::new(Switch::new(dpid.clone()));
                    maps.switches.insert(dpid.clone(), switch.clone());
                    (switch, true)
                }
            };

            let superseded = switch
                .update_connection(connection.clone())
                .filter(|old| !Arc::ptr_eq(old, &connection));
            if let Some(old) = &superseded {
                Self::remove_if_same(&mut maps, old);
            }

            (
                Admission {
                    switch,
                    created,
                    superseded,
                },
                overwritten,
            )
        };

        if let Some(old) = &admission.superseded {
            info!(
                "Switch {} moved from {} to {}",
                dpid,
                old.id(),
                connection.id()
            );
        }
        close_all(admission.superseded.iter().cloned().chain(overwritten));

        if admission.created {
            info!("New switch {} on {}", dpid, connection.id());
        }
        admission
    }

    pub fn connection_count(&self) -> usize {
        self.maps.lock().connections.len()
    }

    pub fn switch_count(&self) -> usize {
        self.maps.lock().switches.len()
    }

    /// Snapshot of all connections, sorted by id.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let mut all: Vec<_> = self.maps.lock().connections.values().cloned().collect();
        all.sort_by_key(|c| c.id());
        all
    }

    /// Snapshot of all switches, sorted by dpid.
    pub fn switches(&self) -> Vec<Arc<Switch>> {
        let mut all: Vec<_> = self.maps.lock().switches.values().cloned().collect();
        all.sort_by(|a, b| a.dpid().cmp(b.dpid()));
        all
    }

    /// Close and drop every connection; switches are kept.
    pub fn close_all_connections(&self) -> usize {
        let drained: Vec<_> = self.maps.lock().connections.drain().map(|(_, c)| c).collect();
        let count = drained.len();
        close_all(drained);
        count
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let maps = self.maps.lock();
        f.debug_struct("Registry")
            .field("connections", &maps.connections.len())
            .field("switches", &maps.switches.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switch::mock;

    const DPID: &str = "00:00:00:00:00:01";

    #[test]
    fn test_registry_new() {
        let reg = Registry::new();
        assert_eq!(reg.connection_count(), 0);
        assert_eq!(reg.switch_count(), 0);
    }

    #[test]
    fn test_admit_then_readmit_same_dpid() {
        let reg = Registry::new();
        let dpid = Dpid::new(DPID);
        let (a, stream_a) = mock::connection("10.0.0.1:50001");
        let (b, _) = mock::connection("10.0.0.1:50002");

        let first = reg.admit_switch(&dpid, a.clone());
        assert!(first.created);
        assert!(first.superseded.is_none());
        assert_eq!(reg.switch_count(), 1);
        assert_eq!(reg.connection_count(), 1);

        let second = reg.admit_switch(&dpid, b.clone());
        assert!(!second.created);
        assert!(Arc::ptr_eq(&first.switch, &second.switch));
        assert!(Arc::ptr_eq(&second.switch.connection().unwrap(), &b));
        assert!(Arc::ptr_eq(second.superseded.as_ref().unwrap(), &a));

        assert_eq!(reg.switch_count(), 1);
        assert_eq!(reg.connection_count(), 1);
        assert!(reg.get_connection_by_id(&a.id()).is_none());
        assert!(!a.is_alive());
        assert_eq!(stream_a.shutdown_count(), 1);
    }

    #[test]
    fn test_readmit_same_connection_keeps_it() {
        let reg = Registry::new();
        let dpid = Dpid::new(DPID);
        let (a, _) = mock::connection("10.0.0.1:50003");

        reg.admit_switch(&dpid, a.clone());
        let again = reg.admit_switch(&dpid, a.clone());

        assert!(again.superseded.is_none());
        assert!(a.is_alive());
        assert_eq!(reg.connection_count(), 1);
    }

    #[test]
    fn test_superseded_connection_sharing_id_keeps_new_one() {
        let reg = Registry::new();
        let dpid = Dpid::new(DPID);
        let (a, _) = mock::connection("10.0.0.1:50004");
        let (b, _) = mock::connection("10.0.0.1:50004");

        reg.admit_switch(&dpid, a.clone());
        reg.admit_switch(&dpid, b.clone());

        let current = reg.get_connection_by_id(&b.id()).expect("new connection kept");
        assert!(Arc::ptr_eq(&current, &b));
        assert!(b.is_alive());
        assert!(!a.is_alive());
    }

    #[test]
    fn test_last_admitted_connection_wins() {
        let reg = Registry::new();
        let dpid = Dpid::new(DPID);
        let conns: Vec<_> = (0..5)
            .map(|i| mock::connection(&format!("10.0.0.2:{}", 51000 + i)).0)
            .collect();

        for conn in &conns {
            reg.admit_switch(&dpid, conn.clone());
        }

        let switch = reg.get_switch_by_dpid(&dpid).unwrap();
        assert!(Arc::ptr_eq(&switch.connection().unwrap(), conns.last().unwrap()));
        assert_eq!(reg.connection_count(), 1);
        assert!(conns[..4].iter().all(|c| !c.is_alive()));
    }

    #[test]
    fn test_new_connection_replaces_stale_same_id() {
        let reg = Registry::new();
        let (old, old_stream) = mock::connection("10.0.0.3:6000");
        let (new, _) = mock::connection("10.0.0.3:6000");

        assert!(reg.new_connection(old.clone()).is_none());
        let stale = reg.new_connection(new.clone()).expect("stale evicted");

        assert!(Arc::ptr_eq(&stale, &old));
        assert_eq!(old_stream.shutdown_count(), 1);
        assert!(Arc::ptr_eq(&reg.get_connection_by_id(&new.id()).unwrap(), &new));
        assert_eq!(reg.connection_count(), 1);
    }

    #[test]
    fn test_remove_connection_reports_absence() {
        let reg = Registry::new();
        let (conn, _) = mock::connection("10.0.0.4:7000");
        reg.new_connection(conn.clone());

        assert!(reg.remove_connection(&conn));
        assert!(!conn.is_alive());
        assert!(!reg.remove_connection(&conn));
    }

    #[test]
    fn test_remove_switch() {
        let reg = Registry::new();
        let dpid = Dpid::new(DPID);
        assert!(!reg.remove_switch(&dpid));

        reg.add_new_switch(Arc::new(Switch::new(dpid.clone())));
        assert!(reg.get_switch_by_dpid(&dpid).is_some());
        assert!(reg.remove_switch(&dpid));
        assert!(reg.get_switch_by_dpid(&dpid).is_none());
    }

    #[test]
    fn test_create_or_update_connection_overwrites() {
        let reg = Registry::new();
        let (a, _) = mock::connection("10.0.0.5:8000");
        let (b, _) = mock::connection("10.0.0.5:8000");

        assert!(reg.create_or_update_connection(a.clone()).is_none());
        let prev = reg.create_or_update_connection(b.clone()).unwrap();
        assert!(Arc::ptr_eq(&prev, &a));
        assert!(a.is_alive());
    }

    #[test]
    fn test_snapshots_sorted() {
        let reg = Registry::new();
        for (dpid, port) in [("00:03", 3), ("00:01", 1), ("00:02", 2)] {
            let (conn, _) = mock::connection(&format!("10.0.0.6:{}", 9000 + port));
            reg.admit_switch(&Dpid::new(dpid), conn);
        }

        let dpids: Vec<_> = reg.switches().iter().map(|s| s.dpid().to_string()).collect();
        assert_eq!(dpids, vec!["00:01", "00:02", "00:03"]);
        let ports: Vec<_> = reg.connections().iter().map(|c| c.id().0.port()).collect();
        assert_eq!(ports, vec![9001, 9002, 9003]);

        assert_eq!(reg.close_all_connections(), 3);
        assert_eq!(reg.connection_count(), 0);
        assert_eq!(reg.switch_count(), 3);
    }

    #[test]
    fn test_concurrent_admission() {
        let reg = Arc::new(Registry::new());
        let dpid = Dpid::new(DPID);

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let reg = reg.clone();
                let dpid = dpid.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let addr = format!("10.1.{}.{}:6633", i, j);
                        let (conn, _) = mock::connection(&addr);
                        if j % 2 == 0 {
                            reg.admit_switch(&dpid, conn);
                        } else {
                            reg.new_connection(conn);
                        }
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let switch = reg.get_switch_by_dpid(&dpid).unwrap();
        let current = switch.connection().unwrap();
        assert!(current.is_alive());
        let registered = reg.get_connection_by_id(&current.id()).unwrap();
        assert!(Arc::ptr_eq(&registered, &current));
        assert_eq!(reg.switch_count(), 1);
    }
}
