use std::collections::{HashSet, VecDeque};

use crate::message::Message;

/// Bounded memory of recently seen `(source_id, message_id)` pairs.
///
/// UDP may deliver a datagram more than once; consumers call
/// [`RecentIds::first_sighting`] and drop repeats. The oldest entry is
/// forgotten once `capacity` is reached.
#[derive(Debug)]
pub struct RecentIds {
    capacity: usize,
    order: VecDeque<(String, u64)>,
    seen: HashSet<(String, u64)>,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `message`; returns false if it was already seen.
    pub fn first_sighting(&mut self, message: &Message) -> bool {
        self.insert(&message.source_id, message.message_id)
    }

    /// Record a raw identity pair; returns false if it was already seen.
    pub fn insert(&mut self, source_id: &str, message_id: u64) -> bool {
        let key = (source_id.to_string(), message_id);
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
