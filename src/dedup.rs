//! Duplicate suppression.
//!
//! Every candidate resolves to a [`DedupKey`]; the [`SeenSet`] remembers keys
//! for a limited time so the same event delivered by several feeds (or
//! replayed by one) reaches subscribers once.

use std::{
    collections::HashMap,
    fmt,
    time::{Duration, Instant},
};

use itertools::Itertools;
use serde_json::{Map, Value};

use crate::types::{lookup, value_to_text};

/// Fields carrying a transaction hash, in order of preference.
const TX_HASH_FIELDS: &[&str] = &["transactionHash", "txHash", "tx_hash", "hash"];

/// Deterministic identity of a trade event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey(String);

impl DedupKey {
    /// Derives the key preferring, in order: `id`, a transaction hash field,
    /// `transaction.id`, then `blockNumber:logIndex:address`.
    ///
    /// Returns `None` when no source is usable. The composite needs at least
    /// the block number and log index.
    pub fn derive(message: &Map<String, Value>) -> Option<Self> {
        if let Some(id) = message.get("id").and_then(value_to_text) {
            return Some(Self(id));
        }
        if let Some(hash) = lookup(message, TX_HASH_FIELDS).and_then(value_to_text) {
            return Some(Self(hash));
        }
        if let Some(tx_id) = message
            .get("transaction")
            .and_then(|t| t.get("id"))
            .and_then(value_to_text)
        {
            return Some(Self(tx_id));
        }

        let block = lookup(message, &["blockNumber", "block_number"]).and_then(value_to_text)?;
        let log = lookup(message, &["logIndex", "log_index"]).and_then(value_to_text)?;
        let address = message
            .get("address")
            .and_then(value_to_text)
            .unwrap_or_default();
        Some(Self([block, log, address].iter().join(":")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DedupKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Keys observed recently, with the time they were first seen.
///
/// Memory is bounded without a background task: once the set grows past the
/// prune threshold, every insert evicts all entries older than the TTL.
#[derive(Debug)]
pub struct SeenSet {
    entries: HashMap<DedupKey, Instant>,
    ttl: Duration,
    prune_threshold: usize,
}

impl SeenSet {
    pub fn new(ttl: Duration, prune_threshold: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            prune_threshold,
        }
    }

    /// Records `key` as seen at `now`.
    ///
    /// Returns `false` if the key is already present, in which case its
    /// first-seen time is left untouched.
    pub fn check_and_insert(&mut self, key: &DedupKey, now: Instant) -> bool {
        if self.entries.contains_key(key) {
            return false;
        }
        self.entries.insert(key.clone(), now);
        if self.entries.len() > self.prune_threshold {
            self.prune(now);
        }
        true
    }

    /// Removes every entry older than the TTL, returning how many went.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) <= ttl);
        before - self.entries.len()
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
