//! Game tree search engine.

pub mod deepening;
pub mod endgame;
pub mod history;
pub mod limits;
pub mod node_type;
pub mod options;
pub mod qsearch;
pub mod root_move;
pub mod search_context;
pub mod search_result;
pub mod signals;
pub mod stack;
pub mod threading;
pub mod time_control;

#[cfg(test)]
mod tests_support;

use std::sync::mpsc::Receiver;
use std::sync::{Arc, OnceLock};

use arrayvec::ArrayVec;
use chess::ChessMove;

use crate::book::Book;
use crate::constants::{MAX_PLY, MAX_THREADS};
use crate::eval::{TEMPO, evaluate};
use crate::move_list::{MoveList, OrderingHints};
use crate::perft;
use crate::position::Position;
use crate::search::history::stat_bonus;
use crate::search::limits::SearchLimits;
use crate::search::node_type::{NodeType, NonPV, PV};
use crate::search::options::SearchOptions;
use crate::search::search_context::SearchContext;
use crate::search::search_result::SearchResult;
use crate::search::signals::Signals;
use crate::search::stack::{CounterKey, PlayedMove};
use crate::search::threading::ThreadPool;
use crate::search::time_control::TimeManager;
use crate::stats::SearchStats;
use crate::transposition_table::{
    Bound, DEPTH_NONE, TranspositionTable, value_from_tt, value_to_tt,
};
use crate::types::{Depth, Value};

/// Main search engine structure.
pub struct Search {
    tt: Arc<TranspositionTable>,
    threads: Arc<ThreadPool>,
    signals: Arc<Signals>,
    time_manager: Arc<TimeManager>,
    stats: Arc<SearchStats>,
    options: SearchOptions,
    book: Option<Book>,
}

/// Task structure passed to search threads.
#[derive(Clone)]
pub struct SearchTask {
    pub position: Position,
    pub limits: Arc<SearchLimits>,
    pub multi_pv: usize,
    pub tt: Arc<TranspositionTable>,
    pub signals: Arc<Signals>,
    pub time_manager: Arc<TimeManager>,
    pub callback: Option<Arc<SearchProgressCallback>>,
    pub stats: Arc<SearchStats>,
}

/// One reported principal variation.
#[derive(Clone, Debug)]
pub struct IterationInfo {
    pub depth: Depth,
    pub sel_depth: usize,
    /// 1-based line number.
    pub multi_pv: usize,
    pub score: Value,
    /// Set when the line failed outside its aspiration window.
    pub bound: Option<Bound>,
    pub nodes: u64,
    pub nps: u64,
    /// Table occupancy in per-mille.
    pub hashfull: usize,
    pub time_ms: u64,
    pub pv: Vec<ChessMove>,
}

/// Progress information during search.
#[derive(Clone, Debug)]
pub enum SearchProgress {
    Iteration(IterationInfo),
    CurrentMove {
        depth: Depth,
        mv: ChessMove,
        move_number: usize,
    },
}

/// Type alias for search progress callback.
pub type SearchProgressCallback = dyn Fn(SearchProgress) + Send + Sync + 'static;

/// Xored into the key of a node searched with an excluded move.
const EXCLUSION_KEY: u64 = 0x8A3F_21C4_D9E7_5B61;

/// Reverse futility applies below this depth.
const CHILD_FUTILITY_DEPTH: Depth = 7;

/// Move-count pruning applies below this depth.
const MOVE_COUNT_PRUNING_DEPTH: Depth = 16;

const NULL_MOVE_VERIFICATION_DEPTH: Depth = 12;

const IID_MIN_DEPTH: Depth = 6;

const SINGULAR_MIN_DEPTH: Depth = 8;

const LMR_MIN_DEPTH: Depth = 3;

/// Quiet moves remembered per node for history maluses.
const MAX_QUIETS_SEARCHED: usize = 64;

const REDUCTION_DEPTHS: usize = 64;
const REDUCTION_MOVES: usize = 64;

/// Precomputed late move reductions and move-count pruning limits.
struct SearchTables {
    /// Indexed by `[pv][improving][depth][move_count]`.
    reductions: Box<[[[[Depth; REDUCTION_MOVES]; REDUCTION_DEPTHS]; 2]; 2]>,
    /// Indexed by `[improving][depth]`.
    futility_move_counts: [[usize; MOVE_COUNT_PRUNING_DEPTH as usize]; 2],
}

static SEARCH_TABLES: OnceLock<SearchTables> = OnceLock::new();

impl SearchTables {
    fn build() -> Self {
        let mut reductions = Box::new([[[[0; REDUCTION_MOVES]; REDUCTION_DEPTHS]; 2]; 2]);
        for improving in 0..2 {
            for d in 1..REDUCTION_DEPTHS {
                for mc in 1..REDUCTION_MOVES {
                    let r = (d as f64).ln() * (mc as f64).ln() / 2.0;
                    let mut non_pv = r.round() as Depth;
                    if improving == 0 && r > 1.0 {
                        non_pv += 1;
                    }
                    reductions[0][improving][d][mc] = non_pv;
                    reductions[1][improving][d][mc] = (non_pv - 1).max(0);
                }
            }
        }

        let mut futility_move_counts = [[0; MOVE_COUNT_PRUNING_DEPTH as usize]; 2];
        for d in 0..MOVE_COUNT_PRUNING_DEPTH as usize {
            let df = d as f64;
            futility_move_counts[0][d] = (2.4 + 0.74 * df.powf(1.78)) as usize;
            futility_move_counts[1][d] = (5.0 + 1.0 * df.powf(2.0)) as usize;
        }

        SearchTables {
            reductions,
            futility_move_counts,
        }
    }
}

/// Builds the search lookup tables. Called by [`Search::new`]; calling it
/// again is a no-op.
pub fn init() {
    SEARCH_TABLES.get_or_init(SearchTables::build);
}

#[inline]
fn tables() -> &'static SearchTables {
    SEARCH_TABLES.get_or_init(SearchTables::build)
}

#[inline]
fn reduction(pv: bool, improving: bool, depth: Depth, move_count: usize) -> Depth {
    let d = (depth.max(0) as usize).min(REDUCTION_DEPTHS - 1);
    let mc = move_count.min(REDUCTION_MOVES - 1);
    tables().reductions[pv as usize][improving as usize][d][mc]
}

#[inline]
fn futility_move_count(improving: bool, depth: Depth) -> usize {
    tables().futility_move_counts[improving as usize][depth as usize]
}

#[inline]
fn futility_margin(depth: Depth) -> i32 {
    150 * depth
}

impl Search {
    /// Creates a new search engine with the given options.
    pub fn new(options: &SearchOptions) -> Search {
        let n_threads = options.n_threads.clamp(1, MAX_THREADS);

        // Ensure that dependent tables are initialized
        init();

        Search {
            tt: Arc::new(TranspositionTable::new(options.tt_mb_size)),
            threads: ThreadPool::new(n_threads),
            signals: Arc::new(Signals::new()),
            time_manager: Arc::new(TimeManager::new()),
            stats: Arc::new(SearchStats::new()),
            options: options.clone(),
            book: load_book(options),
        }
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Resets the search state for a new game.
    pub fn clear(&mut self) {
        self.wait_for_search_finished();
        self.tt.clear();
        self.threads.clear();
        self.time_manager.new_game();
    }

    /// Counts leaf nodes of the legal move tree below `pos`.
    pub fn perft(&self, pos: &mut Position, depth: Depth) -> u64 {
        perft::perft(pos, depth)
    }

    /// Reallocates the transposition table.
    pub fn resize_tt(&mut self, mb_size: usize) {
        self.wait_for_search_finished();
        match Arc::get_mut(&mut self.tt) {
            Some(tt) => tt.resize(mb_size),
            None => self.tt = Arc::new(TranspositionTable::new(mb_size)),
        }
        self.options.tt_mb_size = mb_size;
    }

    /// Replaces the thread pool with one of `n_threads` threads.
    pub fn set_threads(&mut self, n_threads: usize) {
        let n_threads = n_threads.clamp(1, MAX_THREADS);
        if n_threads == self.threads.size {
            return;
        }
        self.wait_for_search_finished();
        self.threads = ThreadPool::new(n_threads);
        self.options.n_threads = n_threads;
    }

    /// Applies changed options, reallocating only what changed.
    pub fn set_options(&mut self, options: SearchOptions) {
        if options.tt_mb_size != self.options.tt_mb_size {
            self.resize_tt(options.tt_mb_size);
        }
        if options.n_threads != self.options.n_threads {
            self.set_threads(options.n_threads);
        }
        if options.book_path != self.options.book_path {
            self.book = load_book(&options);
        }
        self.options = options;
    }

    /// Starts a search on the pool and returns the channel the result will
    /// arrive on. Returns immediately.
    ///
    /// # Arguments
    ///
    /// * `pos` - Root position, with the game history for repetition detection
    /// * `limits` - Clock, depth and node limits of this search
    /// * `callback` - Receives progress reports from the main search thread
    pub fn start_thinking(
        &self,
        pos: &Position,
        mut limits: SearchLimits,
        callback: Option<Arc<SearchProgressCallback>>,
    ) -> Receiver<SearchResult> {
        self.wait_for_search_finished();

        if let Some(mv) = self.probe_book(pos, &limits) {
            log::debug!("book move {mv}");
            let (sender, receiver) = std::sync::mpsc::channel();
            // The receiver is still held here, so the send cannot fail.
            let _ = sender.send(SearchResult::from_book(mv));
            return receiver;
        }

        if limits.use_time_management() {
            limits.npmsec = self.options.nodestime;
        }
        self.signals.reset(limits.ponder);
        self.tt.new_search();
        self.stats.reset();
        self.time_manager
            .init(&limits, pos.side_to_move(), pos.game_ply(), &self.options);

        let task = SearchTask {
            position: pos.clone(),
            limits: Arc::new(limits),
            multi_pv: self.options.multi_pv,
            tt: self.tt.clone(),
            signals: self.signals.clone(),
            time_manager: self.time_manager.clone(),
            callback,
            stats: self.stats.clone(),
        };

        self.threads.start_thinking(task)
    }

    /// Runs a search and blocks until it reports.
    pub fn run(
        &self,
        pos: &Position,
        limits: SearchLimits,
        callback: Option<Arc<SearchProgressCallback>>,
    ) -> SearchResult {
        self.start_thinking(pos, limits, callback)
            .recv()
            .unwrap_or_default()
    }

    /// Requests the running search to stop. The result is still delivered.
    pub fn stop(&self) {
        self.signals.request_stop();
    }

    /// The opponent played the expected move; the ponder search becomes a
    /// normal timed search.
    pub fn ponderhit(&self) {
        self.signals.ponderhit();
    }

    pub fn is_thinking(&self) -> bool {
        self.threads.is_thinking()
    }

    pub fn wait_for_search_finished(&self) {
        self.threads.wait_for_think_finished();
    }

    /// Nodes searched by all threads in the current or last search.
    pub fn nodes_searched(&self) -> u64 {
        self.threads.nodes_searched()
    }

    pub fn hashfull(&self) -> usize {
        self.tt.hashfull()
    }

    fn probe_book(&self, pos: &Position, limits: &SearchLimits) -> Option<ChessMove> {
        if !self.options.own_book || limits.infinite || limits.ponder || limits.mate.is_some() {
            return None;
        }
        let book = self.book.as_ref()?;
        let mv = book.probe(pos, self.options.best_book_move)?;
        if limits.search_moves.is_empty() || limits.search_moves.contains(&mv) {
            Some(mv)
        } else {
            None
        }
    }
}

impl Drop for Search {
    fn drop(&mut self) {
        self.signals.request_stop();
        self.wait_for_search_finished();
    }
}

fn load_book(options: &SearchOptions) -> Option<Book> {
    let path = options.book_path.as_ref()?;
    match Book::open(path) {
        Ok(book) => {
            log::info!("opened book {} ({} entries)", path.display(), book.len());
            Some(book)
        }
        Err(err) => {
            log::warn!("failed to open book {}: {err}", path.display());
            None
        }
    }
}

/// Principal variation search.
///
/// # Type Parameters
///
/// * `NT` - Node type (Root, PV, or NonPV) determining search behavior.
///
/// # Arguments
///
/// * `ctx` - Search context.
/// * `pos` - Current position. Restored before returning.
/// * `ply` - Distance from the root.
/// * `alpha` - Alpha bound.
/// * `beta` - Beta bound.
/// * `depth` - Remaining depth. Below one the node is handed to quiescence search.
/// * `cut_node` - The node is expected to fail high.
///
/// # Returns
///
/// Best score found. Meaningless once the search has been stopped.
#[allow(clippy::too_many_arguments)]
pub fn search<NT: NodeType>(
    ctx: &mut SearchContext,
    pos: &mut Position,
    ply: usize,
    mut alpha: Value,
    mut beta: Value,
    depth: Depth,
    cut_node: bool,
) -> Value {
    if depth < 1 {
        return if NT::PV_NODE {
            qsearch::qsearch::<PV>(ctx, pos, ply, alpha, beta)
        } else {
            qsearch::qsearch::<NonPV>(ctx, pos, ply, alpha, beta)
        };
    }

    debug_assert!(alpha < beta);
    debug_assert!(NT::PV_NODE || alpha + 1 == beta);

    if NT::PV_NODE {
        ctx.stack.at_mut(ply).pv.clear();
        ctx.sel_depth = ctx.sel_depth.max(ply + 1);
    }
    ctx.increment_nodes();

    let in_check = pos.in_check();
    let us = pos.side_to_move();

    if !NT::ROOT_NODE {
        if ctx.should_abort() || pos.is_draw() || ply >= MAX_PLY - 1 {
            return if ply >= MAX_PLY - 1 && !in_check {
                evaluate(pos)
            } else {
                Value::DRAW
            };
        }

        // Mate distance pruning
        alpha = alpha.max(Value::mated_in(ply));
        beta = beta.min(Value::mate_in(ply + 1));
        if alpha >= beta {
            return alpha;
        }
    }

    let org_alpha = alpha;
    let excluded_move = ctx.stack.at(ply).excluded_move;
    {
        let ss = ctx.stack.at_mut(ply);
        ss.current_move = PlayedMove::None;
        ss.counter_key = None;
        ss.move_count = 0;
        let child = ctx.stack.at_mut(ply + 1);
        child.excluded_move = None;
        child.skip_early_pruning = false;
        ctx.stack.at_mut(ply + 2).killers = [None; 2];
    }

    // Transposition table probe
    let tt_key = match excluded_move {
        Some(_) => pos.key() ^ EXCLUSION_KEY,
        None => pos.key(),
    };
    let (tt_hit, tt_data, tt_idx) = ctx.tt.probe(tt_key);
    ctx.task.stats.dbg_hit_on(tt_hit);
    let tt_value = if tt_hit {
        value_from_tt(tt_data.value, ply)
    } else {
        Value::NONE
    };
    let tt_move = if NT::ROOT_NODE {
        ctx.root_moves.get_current_pv().map(|rm| rm.mv)
    } else {
        tt_data.mv.filter(|&mv| pos.is_legal(mv))
    };

    // TT cutoff at non-PV nodes
    if !NT::PV_NODE
        && tt_hit
        && tt_data.depth >= depth
        && tt_value != Value::NONE
        && tt_data.can_cut(tt_value, beta)
    {
        if tt_value >= beta
            && let Some(mv) = tt_move
            && !pos.is_capture_or_promotion(mv)
        {
            update_quiet_stats(ctx, pos, ply, mv, &[], depth);
        }
        return tt_value;
    }

    // Known endgame results
    if !NT::ROOT_NODE
        && excluded_move.is_none()
        && let Some(value) = endgame::probe(pos)
    {
        ctx.tt.store(
            tt_idx,
            tt_key,
            value_to_tt(value, ply),
            Bound::Exact,
            depth,
            None,
            Value::NONE,
        );
        return value;
    }

    // Static evaluation
    let static_eval = if in_check {
        Value::NONE
    } else if tt_hit {
        let mut eval = if tt_data.eval == Value::NONE {
            evaluate(pos)
        } else {
            tt_data.eval
        };
        // The search value is a better estimate when its bound allows it
        if tt_value != Value::NONE {
            let needed = if tt_value > eval { Bound::Lower } else { Bound::Upper };
            if tt_data.bound as u8 & needed as u8 != 0 {
                eval = tt_value;
            }
        }
        eval
    } else {
        let eval = if ply > 0 && ctx.stack.ancestor(ply, 1).current_move.is_null() {
            -ctx.stack.ancestor(ply, 1).static_eval + 2 * TEMPO
        } else {
            evaluate(pos)
        };
        ctx.tt.store(
            tt_idx,
            tt_key,
            Value::NONE,
            Bound::None,
            DEPTH_NONE,
            None,
            eval,
        );
        eval
    };
    ctx.stack.at_mut(ply).static_eval = static_eval;

    let skip_early_pruning = ctx.stack.at(ply).skip_early_pruning;
    let non_pawn = pos.non_pawn_material(us);

    if !in_check && !skip_early_pruning {
        // Child node futility pruning
        if !NT::ROOT_NODE
            && depth < CHILD_FUTILITY_DEPTH
            && static_eval - futility_margin(depth) >= beta
            && static_eval < Value::KNOWN_WIN
            && non_pawn > 0
        {
            return static_eval;
        }

        // Null move search with verification
        if !NT::PV_NODE
            && depth >= 2
            && static_eval >= beta
            && non_pawn > 0
            && !ctx.stack.ancestor(ply, 1).current_move.is_null()
            && let Some(value) = null_move_search(ctx, pos, ply, beta, depth, static_eval, cut_node)
        {
            return value;
        }
    }

    // Internal iterative deepening
    let mut tt_move = tt_move;
    if !NT::ROOT_NODE
        && depth >= IID_MIN_DEPTH
        && tt_move.is_none()
        && !skip_early_pruning
        && (NT::PV_NODE || (!in_check && static_eval + 256 >= beta))
    {
        let d = 3 * depth / 4 - 2;
        ctx.stack.at_mut(ply).skip_early_pruning = true;
        search::<NT>(ctx, pos, ply, alpha, beta, d, cut_node);
        ctx.stack.at_mut(ply).skip_early_pruning = false;
        ctx.stack.at_mut(ply).excluded_move = excluded_move;

        let (_, data, _) = ctx.tt.probe(tt_key);
        tt_move = data.mv.filter(|&mv| pos.is_legal(mv));
    }

    let singular_candidate = !NT::ROOT_NODE
        && depth >= SINGULAR_MIN_DEPTH
        && tt_move.is_some()
        && excluded_move.is_none()
        && tt_value != Value::NONE
        && tt_value.raw().abs() < Value::KNOWN_WIN.raw()
        && tt_data.bound as u8 & Bound::Lower as u8 != 0
        && tt_data.depth >= depth - 3;

    let prev_ss_eval = ctx.stack.ancestor(ply, 2).static_eval;
    let improving =
        static_eval == Value::NONE || prev_ss_eval == Value::NONE || static_eval >= prev_ss_eval;

    // Move generation and ordering
    let mut move_list = MoveList::new(pos);
    if NT::ROOT_NODE {
        let root_moves = &ctx.root_moves;
        move_list.retain(|m| root_moves.contains_from_pv_idx(m.mv));
    }
    let counter_move = ply
        .checked_sub(1)
        .and_then(|p| ctx.stack.at(p).counter_key)
        .and_then(|key| ctx.history.counter_moves.get(key.color, key.piece, key.mv));
    if move_list.count() > 1 {
        move_list.evaluate_moves(
            pos,
            &OrderingHints {
                tt_move,
                killers: ctx.stack.at(ply).killers,
                counter_move,
                history: &ctx.history.butterfly,
            },
        );
        move_list.sort();
    }

    let mut best_value = -Value::INF;
    let mut best_move: Option<ChessMove> = None;
    let mut move_count = 0;
    let mut quiets_searched: ArrayVec<ChessMove, MAX_QUIETS_SEARCHED> = ArrayVec::new();

    for ext in move_list.iter() {
        let mv = ext.mv;
        if Some(mv) == excluded_move {
            continue;
        }

        move_count += 1;

        if NT::ROOT_NODE && ctx.is_main() {
            deepening::report_current_move(ctx, depth, mv, move_count + ctx.root_moves.pv_idx());
        }

        let capture_or_promotion = pos.is_capture_or_promotion(mv);
        let gives_check = pos.gives_check(mv);
        let Some(piece) = pos.moved_piece(mv) else {
            continue;
        };

        // Extensions
        let mut extension = 0;
        if singular_candidate && Some(mv) == tt_move {
            let r_beta = tt_value - 2 * depth;
            {
                let ss = ctx.stack.at_mut(ply);
                ss.excluded_move = Some(mv);
                ss.skip_early_pruning = true;
            }
            let value = search::<NonPV>(ctx, pos, ply, r_beta - 1, r_beta, depth / 2, cut_node);
            {
                let ss = ctx.stack.at_mut(ply);
                ss.excluded_move = None;
                ss.skip_early_pruning = false;
            }
            if value < r_beta {
                extension = 1;
            }
        } else if gives_check {
            extension = 1;
        }

        let new_depth = depth - 1 + extension;

        // Pruning at shallow depth
        if !NT::ROOT_NODE
            && !capture_or_promotion
            && !gives_check
            && !in_check
            && best_value > Value::MATED_IN_MAX_PLY
            && non_pawn > 0
        {
            // Move count based pruning
            if depth < MOVE_COUNT_PRUNING_DEPTH
                && move_count >= futility_move_count(improving, depth)
            {
                continue;
            }

            // Futility pruning on the reduced depth
            let lmr_depth =
                (new_depth - reduction(NT::PV_NODE, improving, depth, move_count)).max(0);
            if lmr_depth < 7 && static_eval + 256 + 200 * lmr_depth <= alpha {
                continue;
            }
        }

        {
            let ss = ctx.stack.at_mut(ply);
            ss.move_count = move_count;
            ss.current_move = PlayedMove::Move(mv);
            ss.counter_key = Some(CounterKey {
                color: us,
                piece,
                mv,
            });
        }

        pos.do_move(mv);
        ctx.tt.prefetch(pos.key());

        let mut value = -Value::INF;
        let do_full_depth_search;

        // Late move reduction
        if depth >= LMR_MIN_DEPTH && move_count > 1 && !capture_or_promotion {
            let mut r = reduction(NT::PV_NODE, improving, depth, move_count);
            if cut_node {
                r += 2;
            } else if ctx.stack.at(ply).killers.contains(&Some(mv)) || Some(mv) == counter_move {
                r -= 1;
            }
            r -= ctx.history.butterfly.get(us, mv) / 8_000;
            let d = (new_depth - r.max(0)).max(1);

            value = -search::<NonPV>(ctx, pos, ply + 1, -(alpha + 1), -alpha, d, true);
            do_full_depth_search = value > alpha && d != new_depth;
        } else {
            do_full_depth_search = !NT::PV_NODE || move_count > 1;
        }

        if do_full_depth_search {
            value = -search::<NonPV>(
                ctx,
                pos,
                ply + 1,
                -(alpha + 1),
                -alpha,
                new_depth,
                !cut_node,
            );
        }

        // PV re-search
        if NT::PV_NODE && (move_count == 1 || (value > alpha && (NT::ROOT_NODE || value < beta)))
        {
            value = -search::<PV>(ctx, pos, ply + 1, -beta, -alpha, new_depth, false);
        }

        pos.undo_move();

        if ctx.should_abort() {
            return Value::ZERO;
        }

        if NT::ROOT_NODE {
            ctx.update_root_move(mv, value, move_count, alpha);
        }

        if value > best_value {
            best_value = value;

            if value > alpha {
                best_move = Some(mv);

                if NT::PV_NODE && !NT::ROOT_NODE {
                    ctx.update_pv(ply, mv);
                }

                if NT::PV_NODE && value < beta {
                    alpha = value;
                } else {
                    break; // Beta cutoff
                }
            }
        }

        if !capture_or_promotion && Some(mv) != best_move && !quiets_searched.is_full() {
            quiets_searched.push(mv);
        }
    }

    ctx.task.stats.dbg_mean_of(move_count as i64);

    if move_count == 0 {
        best_value = if excluded_move.is_some() {
            alpha
        } else if in_check {
            Value::mated_in(ply)
        } else {
            Value::DRAW
        };
    } else if let Some(mv) = best_move
        && !pos.is_capture_or_promotion(mv)
    {
        update_quiet_stats(ctx, pos, ply, mv, &quiets_searched, depth);
    }

    if excluded_move.is_none() {
        ctx.tt.store(
            tt_idx,
            tt_key,
            value_to_tt(best_value, ply),
            Bound::classify::<NT>(best_value, org_alpha, beta),
            depth,
            best_move,
            static_eval,
        );
    }

    best_value
}

/// Tries a null move. Returns the cutoff value when passing the turn still
/// fails high, verified by a reduced search at high depth.
fn null_move_search(
    ctx: &mut SearchContext,
    pos: &mut Position,
    ply: usize,
    beta: Value,
    depth: Depth,
    static_eval: Value,
    cut_node: bool,
) -> Option<Value> {
    let r = (823 + 67 * depth) / 256 + ((static_eval - beta).raw() / 200).min(3);

    if !pos.do_null_move() {
        return None;
    }
    {
        let ss = ctx.stack.at_mut(ply);
        ss.current_move = PlayedMove::Null;
        ss.counter_key = None;
    }
    ctx.stack.at_mut(ply + 1).skip_early_pruning = true;
    let mut null_value = -search::<NonPV>(
        ctx,
        pos,
        ply + 1,
        -beta,
        -beta + 1,
        depth - r,
        !cut_node,
    );
    ctx.stack.at_mut(ply + 1).skip_early_pruning = false;
    pos.undo_null_move();
    ctx.stack.at_mut(ply).current_move = PlayedMove::None;

    if ctx.should_abort() || null_value < beta {
        return None;
    }

    // Unproven mates are not returned
    if null_value >= Value::MATE_IN_MAX_PLY {
        null_value = beta;
    }

    if depth < NULL_MOVE_VERIFICATION_DEPTH && beta.raw().abs() < Value::KNOWN_WIN.raw() {
        return Some(null_value);
    }

    // Verification search
    ctx.stack.at_mut(ply).skip_early_pruning = true;
    let value = search::<NonPV>(ctx, pos, ply, beta - 1, beta, depth - r, false);
    ctx.stack.at_mut(ply).skip_early_pruning = false;

    (value >= beta).then_some(null_value)
}

/// Rewards the quiet move that produced a cutoff and penalizes the quiet
/// moves tried before it.
fn update_quiet_stats(
    ctx: &mut SearchContext,
    pos: &Position,
    ply: usize,
    mv: ChessMove,
    quiets: &[ChessMove],
    depth: Depth,
) {
    ctx.stack.update_killers(ply, mv);

    let us = pos.side_to_move();
    let bonus = stat_bonus(depth);
    ctx.history.butterfly.update(us, mv, bonus);
    for &quiet in quiets {
        ctx.history.butterfly.update(us, quiet, -bonus);
    }

    if let Some(prev) = ply.checked_sub(1).and_then(|p| ctx.stack.at(p).counter_key) {
        ctx.history
            .counter_moves
            .set(prev.color, prev.piece, prev.mv, mv);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reductions grow with depth and move number and are smaller at PV nodes.
    #[test]
    fn test_reduction_table() {
        init();
        assert_eq!(reduction(false, true, 1, 1), 0);
        assert!(reduction(false, true, 20, 30) > reduction(false, true, 4, 3));
        assert!(reduction(true, true, 20, 30) < reduction(false, true, 20, 30));
        assert!(reduction(false, false, 20, 30) >= reduction(false, true, 20, 30));
        assert_eq!(
            reduction(false, true, 500, 500),
            reduction(false, true, 63, 63)
        );
    }

    /// Improving nodes allow more moves before move-count pruning starts.
    #[test]
    fn test_futility_move_counts() {
        for d in 1..MOVE_COUNT_PRUNING_DEPTH {
            assert!(futility_move_count(true, d) >= futility_move_count(false, d));
        }
        assert!(futility_move_count(false, 15) > futility_move_count(false, 2));
    }

    /// A mate in one is found by a shallow root search.
    #[test]
    fn test_finds_mate_in_one() {
        let mut pos = Position::from_fen("6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1").unwrap();
        tests_support::with_context(&mut pos, |ctx, pos| {
            let value = search::<node_type::Root>(ctx, pos, 0, -Value::INF, Value::INF, 2, false);
            assert_eq!(value, Value::mate_in(1));
            ctx.root_moves.sort_all();
            let best = ctx.root_moves.get_best().map(|rm| rm.mv.to_string());
            assert_eq!(best.as_deref(), Some("a1a8"));
        });
    }

    /// Stalemate scores as a draw.
    #[test]
    fn test_stalemate_is_draw() {
        let mut pos = Position::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        tests_support::with_context(&mut pos, |ctx, pos| {
            let value = search::<PV>(ctx, pos, 1, -Value::INF, Value::INF, 3, false);
            assert_eq!(value, Value::DRAW);
        });
    }
}
