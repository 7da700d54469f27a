//! Shared fixtures for search unit tests.

use std::sync::Arc;

use crate::position::Position;
use crate::search::SearchTask;
use crate::search::history::HistoryTables;
use crate::search::limits::SearchLimits;
use crate::search::root_move::RootMoves;
use crate::search::search_context::SearchContext;
use crate::search::signals::Signals;
use crate::search::threading::ThreadPool;
use crate::search::time_control::TimeManager;
use crate::stats::SearchStats;
use crate::transposition_table::TranspositionTable;

pub fn make_task(pos: &Position, limits: SearchLimits) -> SearchTask {
    SearchTask {
        position: pos.clone(),
        limits: Arc::new(limits),
        multi_pv: 1,
        tt: Arc::new(TranspositionTable::new(1)),
        signals: Arc::new(Signals::new()),
        time_manager: Arc::new(TimeManager::new()),
        callback: None,
        stats: Arc::new(SearchStats::new()),
    }
}

/// Runs `f` with a fresh single-thread context rooted at `pos`.
pub fn with_context<R>(
    pos: &mut Position,
    f: impl FnOnce(&mut SearchContext, &mut Position) -> R,
) -> R {
    let task = make_task(pos, SearchLimits::infinite());
    let pool = ThreadPool::new(1);
    let mut history = HistoryTables::default();
    let root_moves = RootMoves::new(pos, &[]);
    let mut ctx = SearchContext::new(&task, pool.main(), &mut history, root_moves);
    ctx.root_depth = 1;
    f(&mut ctx, pos)
}
