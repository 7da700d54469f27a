//! Debug counters for tuning the search.
//!
//! Compiled in with the `search-stats` feature. Without it every call is a
//! no-op and the counters stay at zero.

#[cfg(feature = "search-stats")]
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Hit-rate and running-mean counters shared by all search threads.
#[derive(Debug, Default)]
pub struct SearchStats {
    #[cfg(feature = "search-stats")]
    hits: [AtomicU64; 2],
    #[cfg(feature = "search-stats")]
    means: [AtomicI64; 2],
}

impl SearchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts how often `cond` holds.
    #[inline]
    pub fn dbg_hit_on(&self, cond: bool) {
        #[cfg(feature = "search-stats")]
        {
            self.hits[0].fetch_add(1, Ordering::Relaxed);
            if cond {
                self.hits[1].fetch_add(1, Ordering::Relaxed);
            }
        }
        #[cfg(not(feature = "search-stats"))]
        let _ = cond;
    }

    /// Accumulates `value` into a running mean.
    #[inline]
    pub fn dbg_mean_of(&self, value: i64) {
        #[cfg(feature = "search-stats")]
        {
            self.means[0].fetch_add(1, Ordering::Relaxed);
            self.means[1].fetch_add(value, Ordering::Relaxed);
        }
        #[cfg(not(feature = "search-stats"))]
        let _ = value;
    }

    /// Formats the counters, or `None` when nothing was recorded.
    #[cfg(feature = "search-stats")]
    pub fn dbg_print(&self) -> Option<String> {
        let mut parts = Vec::new();
        let total = self.hits[0].load(Ordering::Relaxed);
        if total > 0 {
            let hits = self.hits[1].load(Ordering::Relaxed);
            parts.push(format!(
                "Total {total} Hits {hits} hit rate (%) {}",
                100 * hits / total
            ));
        }
        let count = self.means[0].load(Ordering::Relaxed);
        if count > 0 {
            let sum = self.means[1].load(Ordering::Relaxed);
            parts.push(format!("Total {count} Mean {:.3}", sum as f64 / count as f64));
        }
        if parts.is_empty() { None } else { Some(parts.join("\n")) }
    }

    #[cfg(not(feature = "search-stats"))]
    pub fn dbg_print(&self) -> Option<String> {
        None
    }

    pub fn reset(&self) {
        #[cfg(feature = "search-stats")]
        for counter in self.hits.iter() {
            counter.store(0, Ordering::Relaxed);
        }
        #[cfg(feature = "search-stats")]
        for counter in self.means.iter() {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
