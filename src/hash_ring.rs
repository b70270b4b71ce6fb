//! Consistent-hashing ring with virtual nodes.
//!
//! Servers own random positions ("vnodes") on a 32-bit ring. A key hashes to
//! a 32-bit value (SHA-256 of its bytes, reduced mod 2^32) and is routed to
//! the owner of the first ring position at or after the hash, wrapping to the
//! start, so adding or removing a server only moves the keys on the arcs it
//! touches.
//!
//! The ring can optionally act as a backing store, keeping the items routed
//! to each server so `delete_server` can hand them to the successor.

use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

/// Size of the hash space: positions live in `[0, 2^32)`.
const RING_SIZE: u64 = 1 << 32;

/// Errors from ring construction and mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    /// The ring needs at least one server.
    ZeroServers,
    /// Each server needs at least one virtual node.
    ZeroVnodes,
    /// The server id is not on the ring.
    UnknownServer(usize),
    /// The last server cannot be deleted; its keys would have no home.
    LastServer,
}

impl std::fmt::Display for RingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RingError::ZeroServers => write!(f, "ring requires at least one server"),
            RingError::ZeroVnodes => write!(f, "ring requires at least one virtual node per server"),
            RingError::UnknownServer(id) => write!(f, "server {} is not on the ring", id),
            RingError::LastServer => write!(f, "cannot delete the last server on the ring"),
        }
    }
}

impl std::error::Error for RingError {}

#[derive(Debug, Default, Clone)]
struct OwnedNodes {
    /// Ring indices (into the sorted position list) owned by the server.
    indices: BTreeSet<usize>,
    /// Highest owned index; anchor for the delete-server transfer.
    max_index: Option<usize>,
}

impl OwnedNodes {
    fn add(&mut self, index: usize) {
        self.indices.insert(index);
        self.max_index = Some(self.max_index.map_or(index, |m| m.max(index)));
    }
}

/// Vnode ring with stable key → server mapping.
pub struct HashRing {
    vnodes_per_server: usize,
    positions: Vec<u32>,
    ownership: HashMap<usize, OwnedNodes>,
    next_server_id: usize,
    store: Option<HashMap<usize, Vec<String>>>,
}

impl std::fmt::Debug for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashRing")
            .field("servers", &self.ownership.len())
            .field("vnodes_per_server", &self.vnodes_per_server)
            .field("positions", &self.positions.len())
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl HashRing {
    /// Build a ring of `servers` servers with `vnodes` random positions each.
    ///
    /// # Errors
    ///
    /// [`RingError::ZeroServers`] / [`RingError::ZeroVnodes`] for empty
    /// dimensions.
    pub fn new(servers: usize, vnodes: usize) -> Result<Self, RingError> {
        if servers == 0 {
            return Err(RingError::ZeroServers);
        }
        if vnodes == 0 {
            return Err(RingError::ZeroVnodes);
        }

        let mut rng = rand::rng();
        let mut pairs: Vec<(usize, u32)> = Vec::with_capacity(servers * vnodes);
        for server in 0..servers {
            for _ in 0..vnodes {
                pairs.push((server, rng.random_range(0..=u32::MAX)));
            }
        }
        pairs.sort_by_key(|&(_, position)| position);

        let positions = pairs.iter().map(|&(_, position)| position).collect();
        let mut ownership: HashMap<usize, OwnedNodes> = HashMap::with_capacity(servers);
        for (index, &(server, _)) in pairs.iter().enumerate() {
            ownership.entry(server).or_default().add(index);
        }

        Ok(Self {
            vnodes_per_server: vnodes,
            positions,
            ownership,
            next_server_id: servers,
            store: None,
        })
    }

    /// Enable the backing store: items routed via [`insert_data`](Self::insert_data)
    /// are retained per server and transferred on delete.
    pub fn with_store(mut self) -> Self {
        self.store = Some(HashMap::new());
        self
    }

    /// Number of servers currently on the ring.
    pub fn server_count(&self) -> usize {
        self.ownership.len()
    }

    /// Number of positions on the ring.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Server ids present on the ring, ascending.
    pub fn server_ids(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.ownership.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Route a key to its owning server.
    ///
    /// The key's SHA-256 digest is reduced mod 2^32 and mapped to the first
    /// ring position at or after it, wrapping past the top of the ring.
    pub fn server_for<K: AsRef<[u8]>>(&self, key: K) -> usize {
        let hash = hash_key(key.as_ref());
        let mut index = self.positions.partition_point(|&p| p < hash);
        if index == self.positions.len() {
            index = 0;
        }
        self.owner_of(index)
    }

    /// Route `item` to its server, retaining it when the store is enabled.
    pub fn insert_data(&mut self, item: impl Into<String>) -> usize {
        let item = item.into();
        let server = self.server_for(&item);
        if let Some(store) = &mut self.store {
            store.entry(server).or_default().push(item);
        }
        server
    }

    /// Items currently stored for `server`; `None` when the store is
    /// disabled or the server holds nothing.
    pub fn server_data(&self, server: usize) -> Option<&[String]> {
        self.store.as_ref()?.get(&server).map(|items| items.as_slice())
    }

    /// Add a new server with the standard number of vnodes; returns its id.
    pub fn insert_server(&mut self) -> usize {
        let id = self.next_server_id;
        self.next_server_id += 1;
        self.ownership.insert(id, OwnedNodes::default());
        for _ in 0..self.vnodes_per_server {
            self.insert_vnode_unchecked(id);
        }
        tracing::debug!(server = id, vnodes = self.vnodes_per_server, "server joined ring");
        id
    }

    /// Place one new vnode for `server` at the midpoint of the widest arc.
    ///
    /// # Errors
    ///
    /// [`RingError::UnknownServer`] when `server` is not on the ring.
    pub fn insert_vnode(&mut self, server: usize) -> Result<(), RingError> {
        if !self.ownership.contains_key(&server) {
            return Err(RingError::UnknownServer(server));
        }
        self.insert_vnode_unchecked(server);
        Ok(())
    }

    /// Remove `server`, transferring its ring indices (and stored items) to
    /// the server owning the index just after its highest one.
    ///
    /// # Errors
    ///
    /// [`RingError::UnknownServer`] for an id not on the ring,
    /// [`RingError::LastServer`] when it is the only one left.
    pub fn delete_server(&mut self, server: usize) -> Result<(), RingError> {
        if !self.ownership.contains_key(&server) {
            return Err(RingError::UnknownServer(server));
        }
        if self.ownership.len() == 1 {
            return Err(RingError::LastServer);
        }

        let removed = self.ownership.remove(&server).unwrap_or_default();
        let heir = match removed.max_index {
            Some(max_index) => {
                let successor = (max_index + 1) % self.positions.len();
                let owner = self.owner_of_excluding(successor, server);
                owner.unwrap_or_else(|| self.any_other_server(server))
            }
            None => self.any_other_server(server),
        };

        let heir_nodes = self.ownership.entry(heir).or_default();
        for index in removed.indices {
            heir_nodes.add(index);
        }

        if let Some(store) = &mut self.store {
            if let Some(items) = store.remove(&server) {
                store.entry(heir).or_default().extend(items);
            }
        }

        tracing::debug!(server, heir, "server left ring");
        Ok(())
    }

    /// Arc length from position `index` to the next position, mod 2^32.
    /// `None` for an out-of-range index. A single-position ring owns the
    /// whole hash space.
    pub fn node_capacity(&self, index: usize) -> Option<u64> {
        if index >= self.positions.len() {
            return None;
        }
        if self.positions.len() == 1 {
            return Some(RING_SIZE);
        }
        let next = (index + 1) % self.positions.len();
        let from = self.positions[index] as u64;
        let to = self.positions[next] as u64;
        Some((to + RING_SIZE - from) % RING_SIZE)
    }

    /// Total arc length owned by `server`; `None` for an unknown id.
    pub fn server_capacity(&self, server: usize) -> Option<u64> {
        let nodes = self.ownership.get(&server)?;
        Some(nodes.indices.iter().filter_map(|&index| self.node_capacity(index)).sum())
    }

    fn owner_of(&self, index: usize) -> usize {
        for (&server, nodes) in &self.ownership {
            if nodes.indices.contains(&index) {
                return server;
            }
        }
        // Unreachable while the ownership sets partition 0..len.
        0
    }

    fn owner_of_excluding(&self, index: usize, excluded: usize) -> Option<usize> {
        self.ownership
            .iter()
            .find(|&(&server, nodes)| server != excluded && nodes.indices.contains(&index))
            .map(|(&server, _)| server)
    }

    fn any_other_server(&self, excluded: usize) -> usize {
        self.ownership.keys().copied().find(|&id| id != excluded).unwrap_or(0)
    }

    fn insert_vnode_unchecked(&mut self, server: usize) {
        let gap_index = self.widest_gap_index();
        let next = (gap_index + 1) % self.positions.len();
        let lower = self.positions[gap_index] as u64;
        let upper = self.positions[next] as u64;
        let span = (upper + RING_SIZE - lower) % RING_SIZE;
        let position = ((lower + span / 2) % RING_SIZE) as u32;

        // Sorted insert; every owned index at or after it shifts right.
        let insert_at = self.positions.partition_point(|&p| p < position);
        self.positions.insert(insert_at, position);
        for nodes in self.ownership.values_mut() {
            let shifted: BTreeSet<usize> = nodes
                .indices
                .iter()
                .map(|&index| if index >= insert_at { index + 1 } else { index })
                .collect();
            nodes.indices = shifted;
            if let Some(max) = &mut nodes.max_index {
                if *max >= insert_at {
                    *max += 1;
                }
            }
        }

        self.ownership.entry(server).or_default().add(insert_at);
    }

    /// Index whose arc to the next position is the widest.
    fn widest_gap_index(&self) -> usize {
        let n = self.positions.len();
        let mut best = 0usize;
        let mut best_gap = 0u64;
        for i in 0..n {
            let next = (i + 1) % n;
            let gap = (self.positions[next] as u64 + RING_SIZE - self.positions[i] as u64)
                % RING_SIZE;
            if gap > best_gap {
                best_gap = gap;
                best = i;
            }
        }
        best
    }
}

fn hash_key(key: &[u8]) -> u32 {
    let digest = Sha256::digest(key);
    // The 256-bit digest reduced mod 2^32 is its low-order four bytes.
    u32::from_be_bytes([digest[28], digest[29], digest[30], digest[31]])
}
