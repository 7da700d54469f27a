//! Quiescence search: resolves captures and promotions below the horizon.

use crate::constants::MAX_PLY;
use crate::eval::{TEMPO, evaluate, piece_value};
use crate::move_list::MoveList;
use crate::position::Position;
use crate::search::node_type::NodeType;
use crate::search::search_context::SearchContext;
use crate::search::stack::{CounterKey, PlayedMove};
use crate::transposition_table::{Bound, DEPTH_NONE, DEPTH_QS, value_from_tt, value_to_tt};
use crate::types::Value;

/// Margin added to the stand-pat score before delta pruning a capture.
const DELTA_MARGIN: i32 = 128;

/// Searches captures and promotions until the position is quiet. When the
/// side to move is in check every evasion is searched instead and there is
/// no stand-pat.
///
/// # Arguments
///
/// * `ctx` - Search context.
/// * `pos` - Current position. Restored before returning.
/// * `ply` - Distance from the root.
/// * `alpha` - Alpha bound.
/// * `beta` - Beta bound.
pub fn qsearch<NT: NodeType>(
    ctx: &mut SearchContext,
    pos: &mut Position,
    ply: usize,
    mut alpha: Value,
    beta: Value,
) -> Value {
    debug_assert!(!NT::ROOT_NODE);

    if NT::PV_NODE {
        ctx.stack.at_mut(ply).pv.clear();
        ctx.sel_depth = ctx.sel_depth.max(ply + 1);
    }
    ctx.increment_nodes();

    let org_alpha = alpha;
    let in_check = pos.in_check();
    let us = pos.side_to_move();

    if ctx.should_abort() || pos.is_draw() || ply >= MAX_PLY - 1 {
        return if ply >= MAX_PLY - 1 && !in_check {
            evaluate(pos)
        } else {
            Value::DRAW
        };
    }

    {
        let ss = ctx.stack.at_mut(ply);
        ss.current_move = PlayedMove::None;
        ss.counter_key = None;
    }

    let tt_key = pos.key();
    let (tt_hit, tt_data, tt_idx) = ctx.tt.probe(tt_key);
    let tt_value = if tt_hit {
        value_from_tt(tt_data.value, ply)
    } else {
        Value::NONE
    };
    let tt_move = tt_data.mv.filter(|&mv| pos.is_legal(mv));

    if !NT::PV_NODE
        && tt_hit
        && tt_data.depth >= DEPTH_QS
        && tt_value != Value::NONE
        && tt_data.can_cut(tt_value, beta)
    {
        return tt_value;
    }

    // Stand pat
    let mut best_value;
    let futility_base;
    let static_eval;
    let mut move_list;
    if in_check {
        static_eval = Value::NONE;
        best_value = -Value::INF;
        futility_base = -Value::INF;
        move_list = MoveList::new(pos);
    } else {
        static_eval = if tt_hit && tt_data.eval != Value::NONE {
            tt_data.eval
        } else if ply > 0 && ctx.stack.ancestor(ply, 1).current_move.is_null() {
            -ctx.stack.ancestor(ply, 1).static_eval + 2 * TEMPO
        } else {
            evaluate(pos)
        };
        best_value = static_eval;

        if tt_value != Value::NONE {
            let needed = if tt_value > best_value { Bound::Lower } else { Bound::Upper };
            if tt_data.bound as u8 & needed as u8 != 0 {
                best_value = tt_value;
            }
        }

        if best_value >= beta {
            if !tt_hit {
                ctx.tt.store(
                    tt_idx,
                    tt_key,
                    value_to_tt(best_value, ply),
                    Bound::Lower,
                    DEPTH_NONE,
                    None,
                    static_eval,
                );
            }
            return best_value;
        }

        if NT::PV_NODE && best_value > alpha {
            alpha = best_value;
        }

        futility_base = best_value + DELTA_MARGIN;
        move_list = MoveList::captures(pos);
    }
    ctx.stack.at_mut(ply).static_eval = static_eval;

    if move_list.count() > 1 {
        move_list.evaluate_captures(pos, tt_move);
        move_list.sort();
    }

    let mut best_move = None;
    let mut move_count = 0;

    for ext in move_list.iter() {
        let mv = ext.mv;
        move_count += 1;

        let gives_check = pos.gives_check(mv);

        // Delta pruning
        if !in_check
            && !gives_check
            && futility_base > -Value::KNOWN_WIN
            && mv.get_promotion().is_none()
        {
            let gain = pos.captured_piece(mv).map_or(0, piece_value);
            let futility_value = futility_base + gain;
            if futility_value <= alpha {
                best_value = best_value.max(futility_value);
                continue;
            }
        }

        let Some(piece) = pos.moved_piece(mv) else {
            continue;
        };
        {
            let ss = ctx.stack.at_mut(ply);
            ss.current_move = PlayedMove::Move(mv);
            ss.counter_key = Some(CounterKey {
                color: us,
                piece,
                mv,
            });
        }

        pos.do_move(mv);
        let value = -qsearch::<NT>(ctx, pos, ply + 1, -beta, -alpha);
        pos.undo_move();

        if ctx.should_abort() {
            return Value::ZERO;
        }

        if value > best_value {
            best_value = value;

            if value > alpha {
                if NT::PV_NODE {
                    ctx.update_pv(ply, mv);
                }

                if NT::PV_NODE && value < beta {
                    alpha = value;
                    best_move = Some(mv);
                } else {
                    ctx.tt.store(
                        tt_idx,
                        tt_key,
                        value_to_tt(value, ply),
                        Bound::Lower,
                        DEPTH_QS,
                        Some(mv),
                        static_eval,
                    );
                    return value;
                }
            }
        }
    }

    // All evasions searched and none is legal: mated
    if in_check && move_count == 0 {
        return Value::mated_in(ply);
    }

    let bound = if NT::PV_NODE && best_value > org_alpha {
        Bound::Exact
    } else {
        Bound::Upper
    };
    ctx.tt.store(
        tt_idx,
        tt_key,
        value_to_tt(best_value, ply),
        bound,
        DEPTH_QS,
        best_move,
        static_eval,
    );

    best_value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::node_type::PV;
    use crate::search::tests_support::with_context;

    /// A hanging queen is taken: the score exceeds the static evaluation.
    #[test]
    fn test_wins_hanging_queen() {
        let mut pos = Position::from_fen("4k3/8/8/3q4/4P3/8/8/4K3 w - - 0 1").unwrap();
        let stand_pat = evaluate(&pos);
        with_context(&mut pos, |ctx, pos| {
            let value = qsearch::<PV>(ctx, pos, 1, -Value::INF, Value::INF);
            assert!(value > stand_pat + 500);
            assert_eq!(
                ctx.stack.pv(1).first().map(|m| m.to_string()),
                Some("e4d5".into())
            );
        });
    }

    /// Checkmate is detected when in check with no evasions.
    #[test]
    fn test_mated_in_check() {
        let mut pos = Position::from_fen("R5k1/5ppp/8/8/8/8/8/6K1 b - - 0 1").unwrap();
        with_context(&mut pos, |ctx, pos| {
            let value = qsearch::<PV>(ctx, pos, 3, -Value::INF, Value::INF);
            assert_eq!(value, Value::mated_in(3));
        });
    }

    /// The position is restored after the search.
    #[test]
    fn test_position_restored() {
        let mut pos = Position::from_fen("r3k3/8/8/3q4/4P3/2N5/8/4K2R w - - 0 1").unwrap();
        let key = pos.key();
        with_context(&mut pos, |ctx, pos| {
            qsearch::<PV>(ctx, pos, 1, -Value::INF, Value::INF);
            assert_eq!(pos.key(), key);
        });
    }
}
