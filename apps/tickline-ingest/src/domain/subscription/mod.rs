//! Subscription Set
//!
//! Tracks what one stream session is subscribed to. Membership is what
//! matters: re-subscribing an existing key is a no-op, and only a newly
//! inserted key may trigger an upstream subscribe call. Each session owns
//! exactly one set; sets are never shared across sessions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// Kind of data a subscription key selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Top-of-book quote updates.
    Quote,
    /// Trade prints.
    Trade,
    /// Depth-of-market updates.
    Depth,
    /// Order/account lifecycle updates.
    OrderUpdates,
}

/// One subscription entry: a channel plus a venue-specific key
/// (instrument symbol, contract id, or account id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// What kind of data this key selects.
    pub channel: Channel,
    /// Venue-specific identifier.
    pub key: String,
}

impl SubscriptionKey {
    /// Create a key.
    #[must_use]
    pub fn new(channel: Channel, key: impl Into<String>) -> Self {
        Self {
            channel,
            key: key.into(),
        }
    }
}

// =============================================================================
// Subscription Set
// =============================================================================

/// The subscription set owned by one stream session.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    entries: HashSet<SubscriptionKey>,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key. Returns `true` only when the key was not already
    /// present; callers use this to suppress duplicate upstream calls.
    pub fn insert(&mut self, key: SubscriptionKey) -> bool {
        self.entries.insert(key)
    }

    /// Remove a key. Returns `true` when the key was present.
    pub fn remove(&mut self, key: &SubscriptionKey) -> bool {
        self.entries.remove(key)
    }

    /// Whether the key is present.
    #[must_use]
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.entries.contains(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys on the given channel, sorted for stable wire output.
    #[must_use]
    pub fn keys_on(&self, channel: Channel) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.channel == channel)
            .map(|e| e.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Snapshot of every entry, for replay after a reconnect.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SubscriptionKey> {
        let mut entries: Vec<SubscriptionKey> = self.entries.iter().cloned().collect();
        entries.sort_by(|a, b| (a.channel as u8, &a.key).cmp(&(b.channel as u8, &b.key)));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut set = SubscriptionSet::new();
        assert!(set.insert(SubscriptionKey::new(Channel::Quote, "XAU_USD")));
        assert!(!set.insert(SubscriptionKey::new(Channel::Quote, "XAU_USD")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn same_key_on_different_channels_is_distinct() {
        let mut set = SubscriptionSet::new();
        assert!(set.insert(SubscriptionKey::new(Channel::Quote, "MES")));
        assert!(set.insert(SubscriptionKey::new(Channel::Trade, "MES")));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn keys_on_filters_by_channel_and_sorts() {
        let mut set = SubscriptionSet::new();
        set.insert(SubscriptionKey::new(Channel::Quote, "SPY"));
        set.insert(SubscriptionKey::new(Channel::Quote, "AAPL"));
        set.insert(SubscriptionKey::new(Channel::Trade, "SPY"));

        assert_eq!(set.keys_on(Channel::Quote), vec!["AAPL", "SPY"]);
        assert_eq!(set.keys_on(Channel::Trade), vec!["SPY"]);
        assert!(set.keys_on(Channel::Depth).is_empty());
    }

    #[test]
    fn remove_reports_presence() {
        let mut set = SubscriptionSet::new();
        let key = SubscriptionKey::new(Channel::OrderUpdates, "12345");
        set.insert(key.clone());

        assert!(set.remove(&key));
        assert!(!set.remove(&key));
        assert!(set.is_empty());
    }

    #[test]
    fn snapshot_is_stable() {
        let mut set = SubscriptionSet::new();
        set.insert(SubscriptionKey::new(Channel::Trade, "B"));
        set.insert(SubscriptionKey::new(Channel::Quote, "B"));
        set.insert(SubscriptionKey::new(Channel::Quote, "A"));

        let snap = set.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0], SubscriptionKey::new(Channel::Quote, "A"));
        assert_eq!(snap[1], SubscriptionKey::new(Channel::Quote, "B"));
        assert_eq!(snap[2], SubscriptionKey::new(Channel::Trade, "B"));
    }
}
