//! Push fanout: delivery of event envelopes to live subscribers by
//! group name (`run.<id>`, `ws.<id>`, `approvals.<id>`).
//!
//! Delivery is best-effort. Subscribers that miss frames (lag, splits,
//! reconnects) recover through the snapshot endpoint using their last
//! received `seq`.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use am_domain::push::PushMessage;

/// Capacity of each per-group broadcast channel. Slow subscribers lag
/// and resync via snapshot rather than applying backpressure.
const GROUP_CHANNEL_CAPACITY: usize = 256;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stateless broker interface for push delivery.
///
/// The engine assumes implementations may drop messages; ordering within
/// a group follows the commit order of the emitting transactions.
pub trait PushBus: Send + Sync {
    /// Deliver a message to current subscribers of a group.
    fn send(&self, group: &str, message: &PushMessage);
    /// Subscribe to a group, creating it if needed.
    fn subscribe(&self, group: &str) -> broadcast::Receiver<PushMessage>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-group `tokio::sync::broadcast` channels.
pub struct MemoryPushBus {
    channels: RwLock<HashMap<String, broadcast::Sender<PushMessage>>>,
}

impl MemoryPushBus {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Drop groups with no remaining subscribers.
    pub fn prune(&self) {
        self.channels.write().retain(|_, tx| tx.receiver_count() > 0);
    }

    /// Number of live groups (monitoring).
    pub fn group_count(&self) -> usize {
        self.channels.read().len()
    }
}

impl Default for MemoryPushBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PushBus for MemoryPushBus {
    fn send(&self, group: &str, message: &PushMessage) {
        let channels = self.channels.read();
        if let Some(tx) = channels.get(group) {
            let _ = tx.send(message.clone());
        }
    }

    fn subscribe(&self, group: &str) -> broadcast::Receiver<PushMessage> {
        let mut channels = self.channels.write();
        let tx = channels
            .entry(group.to_owned())
            .or_insert_with(|| broadcast::channel(GROUP_CHANNEL_CAPACITY).0);
        tx.subscribe()
    }
}
