use std::collections::HashMap;
use std::time::{Duration, Instant};

use rexec_wire::{Message, NodeIdentity, RecentIds};
use tracing::{debug, trace};

/// A known node and when it was last heard from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub identity: NodeIdentity,
    pub last_seen: Instant,
}

/// Live set of remote nodes, keyed by node id.
///
/// Entries older than the TTL are evicted lazily when a snapshot is taken.
#[derive(Debug)]
pub struct NodeRegistry {
    local_id: String,
    nodes: HashMap<String, NodeEntry>,
    seen: RecentIds,
}

impl NodeRegistry {
    pub fn new(local_id: impl Into<String>, dedup_window: usize) -> Self {
        Self {
            local_id: local_id.into(),
            nodes: HashMap::new(),
            seen: RecentIds::new(dedup_window),
        }
    }

    /// Decide whether an incoming message should be processed.
    ///
    /// Returns false for our own messages, messages addressed elsewhere, and
    /// repeats of an already seen message identity.
    pub fn observe(&mut self, message: &Message) -> bool {
        if message.source_id == self.local_id || !message.is_addressed_to(&self.local_id) {
            return false;
        }
        if !self.seen.first_sighting(message) {
            trace!(
                node = %message.source_id,
                message_id = message.message_id,
                "duplicate message dropped"
            );
            return false;
        }
        true
    }

    /// Insert or refresh a node. Returns true if the node was not known.
    ///
    /// `last_seen` never moves backwards.
    pub fn upsert(&mut self, identity: NodeIdentity, at: Instant) -> bool {
        match self.nodes.get_mut(&identity.id) {
            Some(entry) => {
                entry.last_seen = entry.last_seen.max(at);
                entry.identity = identity;
                false
            }
            None => {
                debug!(node = %identity, "node discovered");
                self.nodes.insert(
                    identity.id.clone(),
                    NodeEntry {
                        identity,
                        last_seen: at,
                    },
                );
                true
            }
        }
    }

    /// Remove a node immediately.
    pub fn evict(&mut self, id: &str) -> Option<NodeEntry> {
        let removed = self.nodes.remove(id);
        if let Some(entry) = &removed {
            debug!(node = %entry.identity, "node evicted");
        }
        removed
    }

    /// Live nodes at `now`, sorted by id. Expired entries are removed.
    pub fn snapshot(&mut self, now: Instant, ttl: Duration) -> Vec<NodeIdentity> {
        self.nodes.retain(|_, entry| {
            let live = now.saturating_duration_since(entry.last_seen) <= ttl;
            if !live {
                debug!(node = %entry.identity, "node expired");
            }
            live
        });

        let mut nodes: Vec<NodeIdentity> = self
            .nodes
            .values()
            .map(|entry| entry.identity.clone())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Entry for one node, regardless of age.
    pub fn get(&self, id: &str) -> Option<&NodeEntry> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use rexec_wire::Body;

    use super::*;

    fn node(id: &str, port: u16) -> NodeIdentity {
        NodeIdentity::new(id, "Sandbox", SocketAddr::from(([127, 0, 0, 1], port)))
    }

    fn pong(from: &NodeIdentity, message_id: u64) -> Message {
        Message::new(from, message_id, Body::Pong { timestamp: 1 })
    }

    #[test]
    fn duplicate_beacons_produce_one_entry() {
        let mut registry = NodeRegistry::new("local", 16);
        let remote = node("remote", 4100);
        let now = Instant::now();

        for _ in 0..3 {
            let message = pong(&remote, 7);
            if registry.observe(&message) {
                registry.upsert(message.source(), now);
            }
        }

        assert_eq!(registry.len(), 1);
        assert!(!registry.observe(&pong(&remote, 7)));
        assert!(registry.observe(&pong(&remote, 8)));
    }

    #[test]
    fn own_and_misaddressed_messages_are_ignored() {
        let mut registry = NodeRegistry::new("local", 16);
        assert!(!registry.observe(&pong(&node("local", 1), 1)));

        let elsewhere = pong(&node("remote", 2), 2).with_dest("someone-else");
        assert!(!registry.observe(&elsewhere));

        let to_us = pong(&node("remote", 2), 3).with_dest("local");
        assert!(registry.observe(&to_us));
    }

    #[test]
    fn silent_node_is_absent_from_next_snapshot() {
        let mut registry = NodeRegistry::new("local", 16);
        let start = Instant::now();
        let ttl = Duration::from_millis(500);

        registry.upsert(node("a", 1), start);
        registry.upsert(node("b", 2), start + Duration::from_millis(400));

        let live = registry.snapshot(start + Duration::from_millis(450), ttl);
        assert_eq!(live.len(), 2);

        let live = registry.snapshot(start + Duration::from_millis(600), ttl);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, "b");
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn last_seen_is_monotonic() {
        let mut registry = NodeRegistry::new("local", 16);
        let start = Instant::now();
        let later = start + Duration::from_secs(2);

        assert!(registry.upsert(node("a", 1), later));
        assert!(!registry.upsert(node("a", 9), start));

        let entry = registry.get("a").unwrap();
        assert_eq!(entry.last_seen, later);
        assert_eq!(entry.identity.port, 9);
    }

    #[test]
    fn evict_removes_immediately() {
        let mut registry = NodeRegistry::new("local", 16);
        registry.upsert(node("a", 1), Instant::now());
        assert!(registry.evict("a").is_some());
        assert!(registry.evict("a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_sorted_by_id() {
        let mut registry = NodeRegistry::new("local", 16);
        let now = Instant::now();
        registry.upsert(node("c", 3), now);
        registry.upsert(node("a", 1), now);
        registry.upsert(node("b", 2), now);

        let ids: Vec<_> = registry
            .snapshot(now, Duration::from_secs(1))
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }
}
