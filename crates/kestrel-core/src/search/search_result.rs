//! Search result types.

use chess::ChessMove;

use crate::search::root_move::{RootMove, RootMoves};
use crate::types::{Depth, Value};

/// One root move with its score, as reported for MultiPV.
#[derive(Clone, Debug)]
pub struct PvMove {
    pub mv: ChessMove,
    pub score: Value,
    pub pv_line: Vec<ChessMove>,
}

/// Final outcome of a search.
#[derive(Clone, Debug, Default)]
pub struct SearchResult {
    /// `None` only when the root position has no legal move.
    pub best_move: Option<ChessMove>,
    pub ponder_move: Option<ChessMove>,
    pub score: Value,
    /// Deepest fully completed iteration.
    pub depth: Depth,
    pub sel_depth: usize,
    pub n_nodes: u64,
    pub elapsed_ms: u64,
    pub pv_line: Vec<ChessMove>,
    /// All root moves in final order.
    pub pv_moves: Vec<PvMove>,
    pub from_book: bool,
}

impl SearchResult {
    /// A move taken from the opening book without searching.
    pub fn from_book(mv: ChessMove) -> Self {
        Self {
            best_move: Some(mv),
            pv_line: vec![mv],
            from_book: true,
            ..Default::default()
        }
    }

    /// Result for a root position without legal moves.
    pub fn no_move(score: Value) -> Self {
        Self {
            score,
            ..Default::default()
        }
    }

    /// Builds the result from the winning thread's root moves.
    ///
    /// # Arguments
    ///
    /// * `root_moves` - Root moves of the winning thread, sorted.
    /// * `best_move` - The move to report, with its PV possibly extended.
    /// * `n_nodes` - Total nodes searched by all threads.
    /// * `depth` - Completed depth of the winning thread.
    /// * `elapsed_ms` - Wall-clock duration of the search.
    pub fn from_root_move(
        root_moves: &RootMoves,
        best_move: &RootMove,
        n_nodes: u64,
        depth: Depth,
        elapsed_ms: u64,
    ) -> Self {
        let pv_moves = root_moves
            .iter()
            .map(|rm| PvMove {
                mv: rm.mv,
                score: rm.score,
                pv_line: rm.pv.clone(),
            })
            .collect();

        Self {
            best_move: Some(best_move.mv),
            ponder_move: best_move.pv.get(1).copied(),
            score: best_move.score,
            depth,
            sel_depth: best_move.sel_depth,
            n_nodes,
            elapsed_ms,
            pv_line: best_move.pv.clone(),
            pv_moves,
            from_book: false,
        }
    }
}
