use std::path::{Path, PathBuf};

use crate::constants::MAX_THREADS;

/// Engine configuration fixed at construction and updated through setters.
#[derive(Clone, Debug)]
pub struct SearchOptions {
    pub tt_mb_size: usize,
    pub n_threads: usize,
    pub multi_pv: usize,
    /// Milliseconds reserved per move for communication lag.
    pub move_overhead: u64,
    /// Milliseconds added to every clock-based allotment.
    pub min_thinking_time: u64,
    /// Percentage scaling of the time spent on the current move.
    pub slow_mover: u64,
    /// Nodes per millisecond when the clock is measured in nodes, 0 to disable.
    pub nodestime: u64,
    /// The GUI may ponder, so allot a little more time per move.
    pub ponder: bool,
    pub own_book: bool,
    pub book_path: Option<PathBuf>,
    /// Always play the highest-weighted book move instead of a weighted pick.
    pub best_book_move: bool,
}

impl SearchOptions {
    /// Create search options with the desired transposition-table size while
    /// relying on defaults for everything else.
    #[must_use]
    pub fn new(tt_mb_size: usize) -> Self {
        SearchOptions {
            tt_mb_size,
            ..Default::default()
        }
    }

    /// Override the number of search threads when the default CPU count is not
    /// appropriate for the caller.
    #[must_use]
    pub fn with_threads(mut self, n_threads: Option<usize>) -> Self {
        if let Some(value) = n_threads {
            self.n_threads = value.clamp(1, MAX_THREADS);
        }
        self
    }

    #[must_use]
    pub fn with_multi_pv(mut self, multi_pv: usize) -> Self {
        self.multi_pv = multi_pv.max(1);
        self
    }

    #[must_use]
    pub fn with_move_overhead(mut self, ms: u64) -> Self {
        self.move_overhead = ms;
        self
    }

    #[must_use]
    pub fn with_nodestime(mut self, npmsec: u64) -> Self {
        self.nodestime = npmsec;
        self
    }

    /// Enable the opening book stored at `path`.
    #[must_use]
    pub fn with_book<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        self.book_path = path.map(|p| p.as_ref().to_path_buf());
        self.own_book = self.book_path.is_some();
        self
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            tt_mb_size: 16,
            n_threads: num_cpus::get().clamp(1, MAX_THREADS),
            multi_pv: 1,
            move_overhead: 30,
            min_thinking_time: 20,
            slow_mover: 89,
            nodestime: 0,
            ponder: false,
            own_book: false,
            book_path: None,
            best_book_move: false,
        }
    }
}
