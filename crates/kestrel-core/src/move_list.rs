//! Move generation and ordering.

use arrayvec::ArrayVec;
use chess::ChessMove;
use std::slice;

use crate::constants::MAX_MOVES;
use crate::eval::piece_value;
use crate::position::Position;
use crate::search::history::ButterflyHistory;

/// Value assigned to the move suggested by the transposition table.
const TT_MOVE_VALUE: i32 = 1 << 30;

/// Base value for captures and promotions, ordered by MVV/LVA above it.
const CAPTURE_VALUE: i32 = 1 << 24;

const KILLER_VALUES: [i32; 2] = [1 << 22, (1 << 22) - 1];

const COUNTER_MOVE_VALUE: i32 = 1 << 21;

/// A move together with its ordering value.
#[derive(Clone, Copy, Debug)]
pub struct ExtMove {
    pub mv: ChessMove,
    /// Ordering score (higher = searched earlier).
    pub value: i32,
}

/// Ordering hints gathered from the search stack and the per-thread tables.
pub struct OrderingHints<'a> {
    pub tt_move: Option<ChessMove>,
    pub killers: [Option<ChessMove>; 2],
    pub counter_move: Option<ChessMove>,
    pub history: &'a ButterflyHistory,
}

/// Fixed-capacity list of moves.
#[derive(Clone, Debug, Default)]
pub struct MoveList {
    moves: ArrayVec<ExtMove, MAX_MOVES>,
}

impl MoveList {
    /// Generates all legal moves.
    pub fn new(pos: &Position) -> MoveList {
        let mut moves = ArrayVec::new();
        for mv in pos.legal_moves() {
            moves.push(ExtMove { mv, value: 0 });
        }
        MoveList { moves }
    }

    /// Generates legal captures and promotions, the move set of quiescence search.
    pub fn captures(pos: &Position) -> MoveList {
        let mut moves = ArrayVec::new();
        for mv in pos.legal_moves() {
            if pos.is_capture_or_promotion(mv) {
                moves.push(ExtMove { mv, value: 0 });
            }
        }
        MoveList { moves }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.moves.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, ExtMove> {
        self.moves.iter()
    }

    #[inline]
    pub fn contains(&self, mv: ChessMove) -> bool {
        self.moves.iter().any(|m| m.mv == mv)
    }

    /// Keeps only the moves for which `f` returns true.
    pub fn retain<F: FnMut(&ExtMove) -> bool>(&mut self, mut f: F) {
        self.moves.retain(|m| f(m));
    }

    /// Assigns ordering values: TT move, captures by MVV/LVA, killers,
    /// counter move, then quiet history.
    pub fn evaluate_moves(&mut self, pos: &Position, hints: &OrderingHints) {
        let us = pos.side_to_move();
        for m in self.moves.iter_mut() {
            m.value = if Some(m.mv) == hints.tt_move {
                TT_MOVE_VALUE
            } else if let Some(victim) = pos.captured_piece(m.mv) {
                let attacker = pos.moved_piece(m.mv).map_or(0, piece_value);
                CAPTURE_VALUE + piece_value(victim) * 16 - attacker / 16
                    + m.mv.get_promotion().map_or(0, piece_value)
            } else if let Some(promo) = m.mv.get_promotion() {
                CAPTURE_VALUE + piece_value(promo) - 1000
            } else if Some(m.mv) == hints.killers[0] {
                KILLER_VALUES[0]
            } else if Some(m.mv) == hints.killers[1] {
                KILLER_VALUES[1]
            } else if Some(m.mv) == hints.counter_move {
                COUNTER_MOVE_VALUE
            } else {
                hints.history.get(us, m.mv)
            };
        }
    }

    /// Orders captures for quiescence search by MVV/LVA only.
    pub fn evaluate_captures(&mut self, pos: &Position, tt_move: Option<ChessMove>) {
        for m in self.moves.iter_mut() {
            m.value = if Some(m.mv) == tt_move {
                TT_MOVE_VALUE
            } else {
                let victim = pos.captured_piece(m.mv).map_or(0, piece_value);
                let attacker = pos.moved_piece(m.mv).map_or(0, piece_value);
                victim * 16 - attacker / 16 + m.mv.get_promotion().map_or(0, piece_value)
            };
        }
    }

    /// Stable sort, highest value first.
    #[inline]
    pub fn sort(&mut self) {
        self.moves.sort_by(|a, b| b.value.cmp(&a.value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The start position has twenty legal moves and no captures.
    #[test]
    fn test_generation() {
        let pos = Position::startpos();
        assert_eq!(MoveList::new(&pos).count(), 20);
        assert!(MoveList::captures(&pos).is_empty());
    }

    /// Filtering keeps only the selected moves.
    #[test]
    fn test_retain() {
        let pos = Position::startpos();
        let e4 = pos.parse_move("e2e4").unwrap();
        let d4 = pos.parse_move("d2d4").unwrap();

        let mut list = MoveList::new(&pos);
        list.retain(|m| m.mv == e4 || m.mv == d4);
        assert_eq!(list.count(), 2);
        assert!(list.contains(e4) && list.contains(d4));
    }

    /// The TT move is ordered first, then the capture, then the killer.
    #[test]
    fn test_ordering() {
        let pos = Position::from_fen("4k3/8/8/3p4/4P3/8/8/R3K3 w - - 0 1").unwrap();
        let history = ButterflyHistory::new();
        let tt_move = pos.parse_move("a1a7").unwrap();
        let killer = pos.parse_move("e1f2").unwrap();
        let capture = pos.parse_move("e4d5").unwrap();

        let mut list = MoveList::new(&pos);
        list.evaluate_moves(
            &pos,
            &OrderingHints {
                tt_move: Some(tt_move),
                killers: [Some(killer), None],
                counter_move: None,
                history: &history,
            },
        );
        list.sort();

        let order: Vec<ChessMove> = list.iter().map(|m| m.mv).collect();
        assert_eq!(order[0], tt_move);
        assert_eq!(order[1], capture);
        assert_eq!(order[2], killer);
    }
}
