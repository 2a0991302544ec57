//! Last-known quote per instrument.

use std::collections::HashMap;

use quote_common::{InstrumentId, Quote};

use super::registry::SubscriptionRegistry;

/// Quote cache keyed by instrument.
#[derive(Debug, Default)]
pub struct QuoteCache {
    quotes: HashMap<InstrumentId, Quote>,
}

impl QuoteCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `quote` as the latest for its instrument.
    pub fn update(&mut self, quote: Quote) {
        self.quotes.insert(quote.instrument_id.clone(), quote);
    }

    /// Drop the entry for `id`, returning it if present.
    pub fn evict(&mut self, id: &InstrumentId) -> Option<Quote> {
        self.quotes.remove(id)
    }

    /// Latest quote for `id`.
    pub fn get(&self, id: &InstrumentId) -> Option<&Quote> {
        self.quotes.get(id)
    }

    /// Cached quotes for subscribed instruments, ordered by id.
    pub fn snapshot_for(&self, registry: &SubscriptionRegistry) -> Vec<Quote> {
        let mut quotes: Vec<Quote> = self
            .quotes
            .values()
            .filter(|quote| registry.contains(&quote.instrument_id))
            .cloned()
            .collect();
        quotes.sort_by(|a, b| a.instrument_id.cmp(&b.instrument_id));
        quotes
    }

    /// Number of cached instruments.
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}
