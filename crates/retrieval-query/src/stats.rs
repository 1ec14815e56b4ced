//! In-memory search counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::hybrid::SearchTier;

/// Process-lifetime counters. Not persisted.
#[derive(Debug, Default)]
pub struct SearchCounters {
    total_searches: AtomicU64,
    hybrid_searches: AtomicU64,
    native_fusion_searches: AtomicU64,
    manual_fusion_searches: AtomicU64,
    dense_only_searches: AtomicU64,
    query_expansions: AtomicU64,
    rerank_requests: AtomicU64,
}

/// Plain copy of [`SearchCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub total_searches: u64,
    pub hybrid_searches: u64,
    pub native_fusion_searches: u64,
    pub manual_fusion_searches: u64,
    pub dense_only_searches: u64,
    pub query_expansions: u64,
    pub rerank_requests: u64,
}

impl SearchCounters {
    pub fn record_search(&self) {
        self.total_searches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the tier that served one (sub)query.
    pub fn record_tier(&self, tier: SearchTier) {
        let counter = match tier {
            SearchTier::NativeFusion => &self.native_fusion_searches,
            SearchTier::ManualFusion => &self.manual_fusion_searches,
            SearchTier::DenseOnly => &self.dense_only_searches,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if tier.is_hybrid() {
            self.hybrid_searches.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_expansion(&self) {
        self.query_expansions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rerank(&self) {
        self.rerank_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_searches: self.total_searches.load(Ordering::Relaxed),
            hybrid_searches: self.hybrid_searches.load(Ordering::Relaxed),
            native_fusion_searches: self.native_fusion_searches.load(Ordering::Relaxed),
            manual_fusion_searches: self.manual_fusion_searches.load(Ordering::Relaxed),
            dense_only_searches: self.dense_only_searches.load(Ordering::Relaxed),
            query_expansions: self.query_expansions.load(Ordering::Relaxed),
            rerank_requests: self.rerank_requests.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_counts() {
        let counters = SearchCounters::default();
        counters.record_search();
        counters.record_tier(SearchTier::NativeFusion);
        counters.record_tier(SearchTier::ManualFusion);
        counters.record_tier(SearchTier::DenseOnly);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.total_searches, 1);
        assert_eq!(snapshot.hybrid_searches, 2);
        assert_eq!(snapshot.native_fusion_searches, 1);
        assert_eq!(snapshot.manual_fusion_searches, 1);
        assert_eq!(snapshot.dense_only_searches, 1);
    }
}
