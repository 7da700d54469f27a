//! Per-thread state threaded through the recursive search.

use std::sync::Arc;

use chess::ChessMove;

use crate::constants::CHECK_CADENCE;
use crate::search::SearchTask;
use crate::search::history::HistoryTables;
use crate::search::root_move::RootMoves;
use crate::search::signals::Signals;
use crate::search::stack::SearchStack;
use crate::search::threading::Thread;
use crate::transposition_table::TranspositionTable;
use crate::types::{Depth, Value};

/// The search context that maintains all state during search operations.
pub struct SearchContext<'a> {
    /// Number of nodes searched by this thread in the current search.
    pub n_nodes: u64,
    /// Deepest ply reached in the current iteration.
    pub sel_depth: usize,
    /// Depth of the iteration in progress.
    pub root_depth: Depth,
    /// Deepest iteration that finished without being aborted.
    pub completed_depth: Depth,
    /// Decaying count of best-move changes at the root.
    pub best_move_changes: f64,
    pub root_moves: RootMoves,
    pub stack: SearchStack,
    pub history: &'a mut HistoryTables,
    pub tt: Arc<TranspositionTable>,
    pub task: &'a SearchTask,
    thread: &'a Thread,
}

impl<'a> SearchContext<'a> {
    pub fn new(
        task: &'a SearchTask,
        thread: &'a Thread,
        history: &'a mut HistoryTables,
        root_moves: RootMoves,
    ) -> Self {
        SearchContext {
            n_nodes: 0,
            sel_depth: 0,
            root_depth: 0,
            completed_depth: 0,
            best_move_changes: 0.0,
            root_moves,
            stack: SearchStack::new(),
            history,
            tt: Arc::clone(&task.tt),
            task,
            thread,
        }
    }

    #[inline]
    pub fn is_main(&self) -> bool {
        self.thread.is_main()
    }

    #[inline]
    pub fn thread(&self) -> &Thread {
        self.thread
    }

    #[inline]
    pub fn signals(&self) -> &Signals {
        &self.task.signals
    }

    /// Counts a node. Every `CHECK_CADENCE` nodes the count is published for
    /// the pool total and the main thread checks the clock.
    #[inline]
    pub fn increment_nodes(&mut self) {
        self.n_nodes += 1;
        if self.n_nodes.is_multiple_of(CHECK_CADENCE) {
            self.thread.publish_nodes(self.n_nodes);
            if self.is_main() {
                self.check_time();
            }
        }
    }

    /// True once the current iteration must be abandoned. The first
    /// iteration always runs to completion so a scored move exists.
    #[inline]
    pub fn should_abort(&self) -> bool {
        self.root_depth > 1 && self.task.signals.stop()
    }

    /// Raises `stop` when the time or node budget is spent.
    pub fn check_time(&self) {
        let signals = &self.task.signals;
        if signals.stop() || signals.is_pondering() {
            return;
        }

        let limits = &self.task.limits;
        let nodes = self.thread.nodes_searched();
        let time_up = (limits.use_time_management() || limits.movetime.is_some())
            && self.task.time_manager.is_time_up(nodes);
        let nodes_up = limits.nodes.is_some_and(|n| nodes >= n);

        if time_up || nodes_up {
            log::trace!("stop: time_up={time_up} nodes_up={nodes_up} nodes={nodes}");
            signals.request_stop();
        }
    }

    /// Nodes searched by all threads of the pool.
    #[inline]
    pub fn nodes_searched(&self) -> u64 {
        self.thread.nodes_searched()
    }

    #[inline]
    pub fn update_pv(&mut self, ply: usize, mv: ChessMove) {
        self.stack.update_pv(ply, mv);
    }

    /// Records the result of a root move searched at `ply` 0.
    pub fn update_root_move(
        &mut self,
        mv: ChessMove,
        score: Value,
        move_count: usize,
        alpha: Value,
    ) {
        let is_pv = self.root_moves.update(
            mv,
            score,
            move_count,
            alpha,
            self.stack.pv(1),
            self.sel_depth,
        );
        if is_pv && move_count > 1 && self.is_main() {
            self.best_move_changes += 1.0;
        }
    }

    /// Publishes the root moves and counters for the final thread vote.
    pub fn publish(&self) {
        self.thread.publish_nodes(self.n_nodes);
        self.thread
            .publish_result(&self.root_moves, self.completed_depth, self.n_nodes);
    }
}
