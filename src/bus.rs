//! Parse, deduplicate and fan out.
//!
//! [`TradeBus::ingest`] is the whole on-message path of a tracked
//! connection. It runs synchronously: by the time it returns, every listener
//! has seen every accepted message of the frame, in frame order.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::{
    config::InterceptorConfig,
    dedup::{DedupKey, SeenSet},
    frame,
    listener::Listeners,
    types::{Frame, TradeMessage},
};

/// Counters of the bus since creation or the last reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Frames ingested.
    pub frames: u64,
    /// Candidates extracted from those frames.
    pub candidates: u64,
    /// Candidates delivered to listeners.
    pub accepted: u64,
    /// Candidates dropped as already seen.
    pub duplicates: u64,
    /// Candidates dropped for lack of a dedup key.
    pub unkeyed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    candidates: AtomicU64,
    accepted: AtomicU64,
    duplicates: AtomicU64,
    unkeyed: AtomicU64,
}

#[derive(Debug)]
pub struct TradeBus {
    seen: Mutex<SeenSet>,
    listeners: Arc<Listeners>,
    counters: Counters,
}

impl TradeBus {
    pub fn new(config: &InterceptorConfig) -> Self {
        Self {
            seen: Mutex::new(SeenSet::new(config.seen_ttl(), config.prune_threshold)),
            listeners: Listeners::new(),
            counters: Counters::default(),
        }
    }

    pub fn listeners(&self) -> &Arc<Listeners> {
        &self.listeners
    }

    /// Runs one frame through parsing, dedup and fan-out.
    ///
    /// Returns the number of messages delivered.
    pub fn ingest(&self, frame: &Frame) -> usize {
        self.ingest_at(frame, Instant::now())
    }

    pub fn ingest_at(&self, frame: &Frame, now: Instant) -> usize {
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        self.emit(frame::candidates(frame), now)
    }

    /// Deduplicates `candidates` and delivers the new ones, in order.
    pub fn emit(&self, candidates: Vec<Value>, now: Instant) -> usize {
        let mut accepted = 0;
        for candidate in candidates {
            self.counters.candidates.fetch_add(1, Ordering::Relaxed);

            let Value::Object(map) = candidate else {
                self.counters.unkeyed.fetch_add(1, Ordering::Relaxed);
                debug!("dropping non-object candidate");
                continue;
            };
            let Some(key) = DedupKey::derive(&map) else {
                self.counters.unkeyed.fetch_add(1, Ordering::Relaxed);
                debug!("dropping candidate without dedup key");
                continue;
            };
            // Lock is released before listeners run.
            if !self.seen.lock().check_and_insert(&key, now) {
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "dropping duplicate trade");
                continue;
            }

            self.counters.accepted.fetch_add(1, Ordering::Relaxed);
            accepted += 1;
            self.listeners.dispatch(&TradeMessage::new(key, map));
        }
        accepted
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            frames: self.counters.frames.load(Ordering::Relaxed),
            candidates: self.counters.candidates.load(Ordering::Relaxed),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            unkeyed: self.counters.unkeyed.load(Ordering::Relaxed),
        }
    }

    /// Number of keys currently remembered.
    pub fn seen_len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Forgets seen keys, listeners and counters.
    pub fn reset(&self) {
        self.seen.lock().clear();
        self.listeners.clear();
        for counter in [
            &self.counters.frames,
            &self.counters.candidates,
            &self.counters.accepted,
            &self.counters.duplicates,
            &self.counters.unkeyed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
