//! Global constants

/// Maximum number of plies reachable from the root in one search.
pub const MAX_PLY: usize = 128;

/// Upper bound on the number of legal moves in a chess position.
pub const MAX_MOVES: usize = 256;

/// Size of a CPU cache line in bytes.
pub const CACHE_LINE_SIZE: usize = 64;

/// Maximum number of threads supported.
pub const MAX_THREADS: usize = 64;

/// Number of nodes between two polls of the stop flag and the clock.
pub const CHECK_CADENCE: u64 = 1024;
