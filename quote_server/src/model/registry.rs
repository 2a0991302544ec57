//! Subscription registry: the de-duplicated set of instruments at least one
//! client has asked for.
//!
//! The registry is not synchronized; the engine keeps it next to the quote cache
//! behind a single mutex. Each entry remembers when it was added so quotes
//! observed before a re-subscription can be told apart from fresh ones.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use quote_common::{InstrumentId, Result};

/// Set of subscribed instruments.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    instruments: HashMap<InstrumentId, Instant>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instrument. Returns `true` if the set changed.
    ///
    /// Fails with `InvalidArgument` if `raw` is blank after trimming.
    pub fn add(&mut self, raw: &str) -> Result<bool> {
        let id = InstrumentId::parse(raw)?;
        if self.instruments.contains_key(&id) {
            return Ok(false);
        }
        self.instruments.insert(id, Instant::now());
        Ok(true)
    }

    /// Remove an instrument. Returns `true` if the set changed.
    pub fn remove(&mut self, raw: &str) -> Result<bool> {
        let id = InstrumentId::parse(raw)?;
        Ok(self.instruments.remove(&id).is_some())
    }

    /// Subscribed ids in lexicographic order.
    pub fn snapshot(&self) -> Vec<InstrumentId> {
        self.watch_set().into_iter().collect()
    }

    /// Subscribed ids as an ordered set, the shape quote sources consume.
    pub fn watch_set(&self) -> BTreeSet<InstrumentId> {
        self.instruments.keys().cloned().collect()
    }

    /// Whether `id` is subscribed.
    pub fn contains(&self, id: &InstrumentId) -> bool {
        self.instruments.contains_key(id)
    }

    /// When `id` was (re)subscribed, if it is subscribed.
    pub fn subscribed_at(&self, id: &InstrumentId) -> Option<Instant> {
        self.instruments.get(id).copied()
    }

    /// Number of subscribed instruments.
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}
