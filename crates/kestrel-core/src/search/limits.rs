//! Externally supplied constraints for one search.

use std::time::Instant;

use chess::{ChessMove, Color};

use crate::constants::MAX_PLY;
use crate::types::Depth;

/// Constraints for a single `go`. Fixed for the duration of the search.
#[derive(Clone, Debug)]
pub struct SearchLimits {
    /// Remaining clock time per side in milliseconds, indexed by colour.
    pub time: [u64; 2],
    /// Increment per move in milliseconds, indexed by colour.
    pub inc: [u64; 2],
    /// Moves until the next time control, 0 when unknown.
    pub moves_to_go: u32,
    pub depth: Option<Depth>,
    pub movetime: Option<u64>,
    /// Search for a mate in this many moves.
    pub mate: Option<u32>,
    pub nodes: Option<u64>,
    pub infinite: bool,
    pub ponder: bool,
    /// Nodes per millisecond when the clock is measured in nodes, 0 otherwise.
    pub npmsec: u64,
    /// Root moves to consider. Empty means all legal moves.
    pub search_moves: Vec<ChessMove>,
    pub start_time: Instant,
}

impl Default for SearchLimits {
    fn default() -> Self {
        SearchLimits {
            time: [0; 2],
            inc: [0; 2],
            moves_to_go: 0,
            depth: None,
            movetime: None,
            mate: None,
            nodes: None,
            infinite: false,
            ponder: false,
            npmsec: 0,
            search_moves: Vec::new(),
            start_time: Instant::now(),
        }
    }
}

impl SearchLimits {
    /// Limits that only bound the depth.
    pub fn with_depth(depth: Depth) -> Self {
        SearchLimits {
            depth: Some(depth),
            ..Default::default()
        }
    }

    pub fn with_movetime(ms: u64) -> Self {
        SearchLimits {
            movetime: Some(ms),
            ..Default::default()
        }
    }

    pub fn infinite() -> Self {
        SearchLimits {
            infinite: true,
            ..Default::default()
        }
    }

    /// True when none of mate, movetime, depth, nodes or infinite is set, so
    /// the clock decides how long to think.
    pub fn use_time_management(&self) -> bool {
        !(self.mate.is_some()
            || self.movetime.is_some()
            || self.depth.is_some()
            || self.nodes.is_some()
            || self.infinite)
    }

    #[inline]
    pub fn time_left(&self, us: Color) -> u64 {
        self.time[us.to_index()]
    }

    #[inline]
    pub fn increment(&self, us: Color) -> u64 {
        self.inc[us.to_index()]
    }

    /// Deepest iteration allowed, clamped to the search stack capacity.
    pub fn max_depth(&self) -> Depth {
        let cap = MAX_PLY as Depth - 1;
        self.depth.map_or(cap, |d| d.clamp(1, cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_use_time_management() {
        let mut limits = SearchLimits {
            time: [60_000, 60_000],
            ..Default::default()
        };
        assert!(limits.use_time_management());

        limits.movetime = Some(0);
        assert!(!limits.use_time_management());

        let limits = SearchLimits::infinite();
        assert!(!limits.use_time_management());
    }

    /// Requested depths beyond the stack are clamped, not rejected mid-search.
    #[test]
    fn test_max_depth_clamped() {
        assert_eq!(
            SearchLimits::with_depth(10_000).max_depth(),
            MAX_PLY as Depth - 1
        );
        assert_eq!(SearchLimits::with_depth(0).max_depth(), 1);
        assert_eq!(SearchLimits::default().max_depth(), MAX_PLY as Depth - 1);
    }
}
