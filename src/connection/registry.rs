//! Registry of live connections
//!
//! Identity assignment, capacity enforcement and insertion happen under one
//! write lock, so a connection is either fully registered or not visible at
//! all.

use super::{Connection, ConnectionId, ConnectionIo};
use crate::error::{NetworkError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

struct RegistryInner {
    entries: HashMap<ConnectionId, Arc<Connection>>,
    next_id: ConnectionId,
}

impl RegistryInner {
    /// Next free identity; skips 0 and ids still held after wraparound
    fn allocate_id(&mut self) -> ConnectionId {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if id != 0 && !self.entries.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Tracks every live connection of one engine instance
pub struct ConnectionRegistry {
    max_connections: usize,
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create an empty registry holding at most `max_connections` entries
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            inner: RwLock::new(RegistryInner {
                entries: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Register a new connection and assign its identity
    ///
    /// Fails with [`NetworkError::CapacityExceeded`] when the registry is
    /// full; the caller must then close the socket without announcing it.
    pub(crate) fn register(
        &self,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Result<(Arc<Connection>, ConnectionIo)> {
        let mut inner = self.inner.write();
        if inner.entries.len() >= self.max_connections {
            return Err(NetworkError::CapacityExceeded(self.max_connections));
        }

        let id = inner.allocate_id();
        let (connection, io) = Connection::new(id, peer_addr, local_addr);
        inner.entries.insert(id, Arc::clone(&connection));
        Ok((connection, io))
    }

    /// Remove a connection, returning it if it was registered
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.write().entries.remove(&id)
    }

    /// Look up a live connection
    #[must_use]
    pub fn try_get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.read().entries.get(&id).cloned()
    }

    /// True if `id` is currently registered
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.read().entries.contains_key(&id)
    }

    /// Number of live connections
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Maximum number of live connections
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// True when no further connection can be registered
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count() >= self.max_connections
    }

    /// Snapshot of the live connections, ordered by identity
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        let mut connections: Vec<_> = self.inner.read().entries.values().cloned().collect();
        connections.sort_by_key(|c| c.id());
        connections
    }

    /// Visit every live connection once
    ///
    /// The visitor runs outside the registry lock, so it may call back into
    /// the registry. Connections unregistered while the walk is in progress
    /// are skipped. Returns the number of connections visited.
    pub fn for_each<F>(&self, mut visitor: F) -> usize
    where
        F: FnMut(&Arc<Connection>),
    {
        let mut visited = 0;
        for connection in self.snapshot() {
            if !self.contains(connection.id()) {
                continue;
            }
            visitor(&connection);
            visited += 1;
        }
        visited
    }

    /// Remove every entry, returning what was registered
    pub fn clear(&self) -> Vec<Arc<Connection>> {
        let mut inner = self.inner.write();
        inner.entries.drain().map(|(_, c)| c).collect()
    }

    #[cfg(test)]
    fn with_next_id(max_connections: usize, next_id: ConnectionId) -> Self {
        let registry = Self::new(max_connections);
        registry.inner.write().next_id = next_id;
        registry
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("count", &self.count())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_register_until_full() {
        let registry = ConnectionRegistry::new(2);
        let (a, _) = registry.register(addr(1), addr(9)).unwrap();
        let (b, _) = registry.register(addr(2), addr(9)).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(registry.is_full());

        let err = registry.register(addr(3), addr(9)).unwrap_err();
        assert!(matches!(err, NetworkError::CapacityExceeded(2)));
        assert_eq!(registry.count(), 2);

        registry.unregister(a.id());
        assert!(registry.register(addr(3), addr(9)).is_ok());
    }

    #[test]
    fn test_try_get_and_unregister() {
        let registry = ConnectionRegistry::new(4);
        let (conn, _) = registry.register(addr(1), addr(9)).unwrap();

        assert_eq!(registry.try_get(conn.id()).unwrap().peer_addr(), addr(1));
        assert!(registry.unregister(conn.id()).is_some());
        assert!(registry.try_get(conn.id()).is_none());
        assert!(registry.unregister(conn.id()).is_none());
    }

    #[test]
    fn test_wraparound_skips_live_ids() {
        let registry = ConnectionRegistry::with_next_id(8, u64::MAX - 1);
        let (a, _) = registry.register(addr(1), addr(9)).unwrap();
        let (b, _) = registry.register(addr(2), addr(9)).unwrap();
        assert_eq!(a.id(), u64::MAX - 1);
        assert_eq!(b.id(), u64::MAX);

        // Counter wraps to 0, which is never handed out
        let (c, _) = registry.register(addr(3), addr(9)).unwrap();
        assert_eq!(c.id(), 1);

        // Force another full wrap while 1 is still live
        registry.inner.write().next_id = 1;
        let (d, _) = registry.register(addr(4), addr(9)).unwrap();
        assert_eq!(d.id(), 2);
    }

    #[test]
    fn test_for_each_skips_removed_entries() {
        let registry = ConnectionRegistry::new(8);
        let ids: Vec<_> = (0..4)
            .map(|i| registry.register(addr(i), addr(9)).unwrap().0.id())
            .collect();

        let mut seen = Vec::new();
        let visited = registry.for_each(|conn| {
            seen.push(conn.id());
            // Remove a later entry mid-walk
            if conn.id() == ids[0] {
                registry.unregister(ids[2]);
            }
        });

        assert_eq!(visited, 3);
        assert_eq!(seen, vec![ids[0], ids[1], ids[3]]);
    }

    #[test]
    fn test_concurrent_register_respects_capacity() {
        let registry = Arc::new(ConnectionRegistry::new(16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let mut ids = Vec::new();
                    for i in 0..10 {
                        if let Ok((conn, _)) = registry.register(addr(t * 100 + i), addr(9)) {
                            ids.push(conn.id());
                        }
                        assert!(registry.count() <= 16);
                    }
                    ids
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "identity {} handed out twice", id);
            }
        }
        assert_eq!(all.len(), 16);
        assert_eq!(registry.clear().len(), 16);
        assert_eq!(registry.count(), 0);
    }

    proptest::proptest! {
        #[test]
        fn test_random_operations_keep_invariants(
            capacity in 1usize..8,
            ops in proptest::collection::vec(proptest::option::of(0usize..16), 1..64),
        ) {
            let registry = ConnectionRegistry::new(capacity);
            let mut live: Vec<ConnectionId> = Vec::new();

            // Some(i) removes the i-th live entry, None registers
            for op in ops {
                match op {
                    Some(i) if !live.is_empty() => {
                        let id = live.remove(i % live.len());
                        proptest::prop_assert!(registry.unregister(id).is_some());
                    }
                    _ => match registry.register(addr(1), addr(9)) {
                        Ok((conn, _)) => {
                            proptest::prop_assert!(!live.contains(&conn.id()));
                            proptest::prop_assert!(conn.id() != 0);
                            live.push(conn.id());
                        }
                        Err(e) => {
                            proptest::prop_assert_eq!(live.len(), capacity);
                            proptest::prop_assert!(matches!(e, NetworkError::CapacityExceeded(_)));
                        }
                    },
                }
                proptest::prop_assert_eq!(registry.count(), live.len());
                proptest::prop_assert!(registry.count() <= capacity);
                for id in &live {
                    proptest::prop_assert!(registry.contains(*id));
                }
            }
        }
    }
}
