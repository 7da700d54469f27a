//! Iterative deepening driver.

use chess::ChessMove;

use crate::position::Position;
use crate::search::history::HistoryTables;
use crate::search::node_type::Root;
use crate::search::root_move::RootMoves;
use crate::search::search_context::SearchContext;
use crate::search::signals::Signals;
use crate::search::threading::Thread;
use crate::search::{IterationInfo, SearchProgress, SearchTask, search};
use crate::transposition_table::Bound;
use crate::types::{Depth, Value};

/// Initial aspiration window half-width in centipawns.
const ASPIRATION_DELTA: i32 = 18;

/// Shallower iterations are searched with a full window.
const ASPIRATION_MIN_DEPTH: Depth = 5;

/// Searches running longer than this also report intermediate lines.
const VERBOSE_AFTER_MS: u64 = 3_000;

/// Depth skipping pattern of helper threads, so that helpers spread over
/// neighbouring depths instead of all searching the same one.
const SKIP_SIZE: [Depth; 20] = [1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4, 4, 4];
const SKIP_PHASE: [Depth; 20] = [0, 1, 0, 1, 2, 3, 0, 1, 2, 3, 4, 5, 0, 1, 2, 3, 4, 5, 6, 7];

/// Whether helper `idx` sits out iteration `depth`.
fn skip_depth(idx: usize, depth: Depth, game_ply: Depth) -> bool {
    let i = (idx - 1) % SKIP_SIZE.len();
    ((depth + game_ply + SKIP_PHASE[i]) / SKIP_SIZE[i]) % 2 != 0
}

/// Performs the root search using iterative deepening with aspiration windows.
///
/// Runs until the depth limit, until `stop` is raised, or, on the main
/// thread, until the time manager decides another iteration is not
/// affordable. Results are published on `thread` after every iteration.
///
/// # Arguments
///
/// * `task` - Search task shared by all threads
/// * `thread` - The thread running this search
/// * `history` - The thread's move ordering tables
pub fn search_root(task: &SearchTask, thread: &Thread, history: &mut HistoryTables) {
    let mut pos = task.position.clone();
    let root_moves = RootMoves::new(&pos, &task.limits.search_moves);
    let mut ctx = SearchContext::new(task, thread, history, root_moves);

    if ctx.root_moves.is_empty() {
        ctx.publish();
        return;
    }

    let multi_pv = task.multi_pv.clamp(1, ctx.root_moves.count());
    let max_depth = task.limits.max_depth();
    let game_ply = pos.game_ply() as Depth;

    for depth in 1..=max_depth {
        if depth > 1 && task.signals.stop() {
            break;
        }
        if !ctx.is_main() && skip_depth(thread.idx(), depth, game_ply) {
            continue;
        }

        ctx.root_depth = depth;
        if ctx.is_main() {
            ctx.best_move_changes *= 0.505;
        }
        ctx.root_moves.save_previous_scores();

        // Multi-PV loop: search each PV line with its own aspiration window
        for pv_idx in 0..multi_pv {
            ctx.root_moves.set_pv_idx(pv_idx);
            ctx.sel_depth = 0;

            aspiration_search(&mut ctx, &mut pos, depth, multi_pv);
            ctx.root_moves.sort_up_to_pv_idx();

            if ctx.is_main() {
                for i in 0..=pv_idx {
                    if let Some(rm) = ctx.root_moves.get(i) {
                        rm.insert_pv_in_tt(&mut pos, &ctx.tt);
                    }
                }
                let elapsed = task.time_manager.elapsed_ms();
                if task.signals.stop() || pv_idx + 1 == multi_pv || elapsed > VERBOSE_AFTER_MS {
                    report_lines(&ctx, depth, multi_pv, None);
                }
            }

            if ctx.should_abort() {
                break;
            }
        }

        if !ctx.should_abort() {
            ctx.completed_depth = depth;
        }
        ctx.publish();
        log::trace!(
            "thread {} finished depth {depth} (completed {}), nodes {}",
            thread.idx(),
            ctx.completed_depth,
            ctx.n_nodes
        );

        if ctx.is_main() && !task.signals.stop() {
            decide_iteration_stop(&ctx, depth, multi_pv);
        }
    }

    ctx.publish();
}

/// Main-thread checks after an iteration: mate found, single legal move,
/// or time budget spent.
fn decide_iteration_stop(ctx: &SearchContext, depth: Depth, multi_pv: usize) {
    let task = ctx.task;
    let limits = &task.limits;
    let tm = &task.time_manager;
    let Some(best) = ctx.root_moves.get_best() else {
        return;
    };

    if let Some(mate) = limits.mate
        && best.score >= Value::MATE_IN_MAX_PLY
        && Value::MATE - best.score <= Value::new(2 * mate as i32)
    {
        task.signals.request_stop();
        return;
    }

    if limits.use_time_management() {
        if task.signals.stop_on_ponderhit() {
            return;
        }
        if depth > 4 && multi_pv == 1 {
            tm.pv_instability(ctx.best_move_changes);
        }
        tm.try_extend_time(best.score, depth);

        let elapsed = tm.elapsed(ctx.nodes_searched());
        if ctx.root_moves.count() == 1 || elapsed > tm.available() {
            log::trace!(
                "iteration stop: elapsed={elapsed} available={}",
                tm.available()
            );
            stop_or_defer(&task.signals);
        }
    } else if ctx.root_moves.count() == 1 && !limits.infinite {
        stop_or_defer(&task.signals);
    }
}

/// Stops now, or on ponderhit when the GUI is still pondering.
fn stop_or_defer(signals: &Signals) {
    if signals.is_pondering() {
        signals.set_stop_on_ponderhit(true);
    } else {
        signals.request_stop();
    }
}

/// Searches the current PV line, widening the window around the previous
/// score until the result falls inside it.
fn aspiration_search(
    ctx: &mut SearchContext,
    pos: &mut Position,
    depth: Depth,
    multi_pv: usize,
) -> Value {
    let mut delta = ASPIRATION_DELTA;

    let (mut alpha, mut beta) = ctx
        .root_moves
        .get_current_pv()
        .filter(|_| depth >= ASPIRATION_MIN_DEPTH)
        .map(|rm| {
            (
                (rm.previous_score - delta).max(-Value::INF),
                (rm.previous_score + delta).min(Value::INF),
            )
        })
        .unwrap_or((-Value::INF, Value::INF));

    loop {
        let score = search::<Root>(ctx, pos, 0, alpha, beta, depth, false);

        // Stable sort moves from pv_idx to end, bringing best to pv_idx position
        ctx.root_moves.sort_from_pv_idx();

        if ctx.should_abort() {
            return score;
        }

        let failed = score <= alpha || score >= beta;
        if failed
            && ctx.is_main()
            && multi_pv == 1
            && ctx.task.time_manager.elapsed_ms() > VERBOSE_AFTER_MS
        {
            let bound = if score <= alpha { Bound::Upper } else { Bound::Lower };
            report_lines(ctx, depth, multi_pv, Some(bound));
        }

        if score <= alpha {
            beta = alpha;
            alpha = (score - delta).max(-Value::INF);
            if ctx.is_main() {
                ctx.signals().set_stop_on_ponderhit(false);
            }
        } else if score >= beta {
            alpha = (beta - delta).max(alpha);
            beta = (score + delta).min(Value::INF);
        } else {
            return score;
        }

        delta += delta / 2;
    }
}

/// Emits one progress line per PV. Lines not yet searched at this depth
/// are reported with the previous depth and score.
fn report_lines(ctx: &SearchContext, depth: Depth, multi_pv: usize, bound: Option<Bound>) {
    let Some(callback) = ctx.task.callback.as_ref() else {
        return;
    };

    ctx.thread().publish_nodes(ctx.n_nodes);
    let nodes = ctx.nodes_searched();
    let time_ms = ctx.task.time_manager.elapsed_ms();
    let hashfull = ctx.tt.hashfull();
    let pv_idx = ctx.root_moves.pv_idx();

    for (i, rm) in ctx.root_moves.iter().take(multi_pv).enumerate() {
        let updated = rm.score != -Value::INF;
        if depth == 1 && !updated {
            continue;
        }

        callback(SearchProgress::Iteration(IterationInfo {
            depth: if updated { depth } else { depth - 1 },
            sel_depth: rm.sel_depth,
            multi_pv: i + 1,
            score: if updated { rm.score } else { rm.previous_score },
            bound: if i == pv_idx { bound } else { None },
            nodes,
            nps: nodes * 1000 / time_ms.max(1),
            hashfull,
            time_ms,
            pv: rm.pv.clone(),
        }));
    }
}

/// Reports the root move being searched once the search runs long.
pub(crate) fn report_current_move(
    ctx: &SearchContext,
    depth: Depth,
    mv: ChessMove,
    move_number: usize,
) {
    let Some(callback) = ctx.task.callback.as_ref() else {
        return;
    };
    if ctx.task.time_manager.elapsed_ms() > VERBOSE_AFTER_MS {
        callback(SearchProgress::CurrentMove {
            depth,
            mv,
            move_number,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helpers skip some depths but never all of them.
    #[test]
    fn test_skip_depth_pattern() {
        for idx in 1..8 {
            let searched = (1..=20).filter(|&d| !skip_depth(idx, d, 0)).count();
            assert!(searched > 0 && searched < 20, "helper {idx}");
        }
        // First helper alternates.
        assert_ne!(skip_depth(1, 4, 0), skip_depth(1, 5, 0));
    }
}
