//! Root move management.

use chess::ChessMove;

use crate::position::Position;
use crate::transposition_table::{Bound, DEPTH_NONE, TranspositionTable};
use crate::types::Value;

/// Represents a root move with its search results and statistics.
#[derive(Clone, Debug)]
pub struct RootMove {
    pub mv: ChessMove,
    /// Score of this move in the current iteration, `-INF` until searched
    /// as a PV move.
    pub score: Value,
    /// Score from the previous iteration, used for aspiration windows.
    pub previous_score: Value,
    pub sel_depth: usize,
    /// Principal variation starting with `mv`.
    pub pv: Vec<ChessMove>,
}

impl RootMove {
    pub fn new(mv: ChessMove) -> Self {
        Self {
            mv,
            score: -Value::INF,
            previous_score: -Value::INF,
            sel_depth: 0,
            pv: vec![mv],
        }
    }

    /// Writes the PV back into the table so that later probes, including
    /// the next search, find the same line. Entries that already hold the
    /// right move are left alone.
    pub fn insert_pv_in_tt(&self, pos: &mut Position, tt: &TranspositionTable) {
        let mut played = 0;
        for &mv in &self.pv {
            if !pos.is_legal(mv) {
                break;
            }
            let key = pos.key();
            let (hit, tt_data, idx) = tt.probe(key);
            if !hit || tt_data.mv != Some(mv) {
                tt.store(
                    idx,
                    key,
                    Value::NONE,
                    Bound::None,
                    DEPTH_NONE,
                    Some(mv),
                    Value::NONE,
                );
            }
            pos.do_move(mv);
            played += 1;
        }
        for _ in 0..played {
            pos.undo_move();
        }
    }

    /// Extends a one-move PV with the reply stored in the table, giving the
    /// protocol layer a move to ponder on.
    pub fn extract_ponder_from_tt(&mut self, pos: &mut Position, tt: &TranspositionTable) -> bool {
        if self.pv.len() != 1 || !pos.is_legal(self.mv) {
            return false;
        }

        pos.do_move(self.mv);
        let (hit, tt_data, _) = tt.probe(pos.key());
        let reply = tt_data.mv.filter(|&m| hit && pos.is_legal(m));
        pos.undo_move();

        match reply {
            Some(m) => {
                self.pv.push(m);
                true
            }
            None => false,
        }
    }
}

/// Candidate moves at the root, ranked by score.
///
/// Each search thread owns its own table. Moves at indices below `pv_idx`
/// already form the earlier lines of a MultiPV search.
#[derive(Clone, Debug, Default)]
pub struct RootMoves {
    moves: Vec<RootMove>,
    pv_idx: usize,
}

impl RootMoves {
    /// Builds the table from the legal moves, keeping only `search_moves`
    /// when that list is not empty.
    pub fn new(pos: &Position, search_moves: &[ChessMove]) -> Self {
        let moves = pos
            .legal_moves()
            .filter(|mv| search_moves.is_empty() || search_moves.contains(mv))
            .map(RootMove::new)
            .collect();
        Self { moves, pv_idx: 0 }
    }

    /// Updates a root move with its search results.
    ///
    /// # Arguments
    ///
    /// * `mv` - Root move.
    /// * `score` - Search score.
    /// * `move_count` - Move index in search order (1-based).
    /// * `alpha` - Alpha bound before the move was searched.
    /// * `child_pv` - PV of the position after `mv`.
    /// * `sel_depth` - Selective depth reached so far.
    ///
    /// # Returns
    ///
    /// True when the move became a PV move.
    pub fn update(
        &mut self,
        mv: ChessMove,
        score: Value,
        move_count: usize,
        alpha: Value,
        child_pv: &[ChessMove],
        sel_depth: usize,
    ) -> bool {
        let Some(rm) = self.moves.iter_mut().find(|rm| rm.mv == mv) else {
            return false;
        };

        if move_count == 1 || score > alpha {
            rm.score = score;
            rm.sel_depth = sel_depth;
            rm.pv.truncate(1);
            rm.pv.extend_from_slice(child_pv);
            true
        } else {
            // Ordering is kept by the stable sort for moves that did not raise alpha.
            rm.score = -Value::INF;
            false
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<&RootMove> {
        self.moves.get(idx)
    }

    #[inline]
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut RootMove> {
        self.moves.get_mut(idx)
    }

    /// Gets the best root move (the one at index 0 after sorting).
    #[inline]
    pub fn get_best(&self) -> Option<&RootMove> {
        self.moves.first()
    }

    /// Gets the root move at the current PV index.
    #[inline]
    pub fn get_current_pv(&self) -> Option<&RootMove> {
        self.moves.get(self.pv_idx)
    }

    #[inline]
    pub fn set_pv_idx(&mut self, idx: usize) {
        self.pv_idx = idx;
    }

    #[inline]
    pub fn pv_idx(&self) -> usize {
        self.pv_idx
    }

    /// Saves current scores as previous scores before starting a new iteration.
    pub fn save_previous_scores(&mut self) {
        for rm in self.moves.iter_mut() {
            rm.previous_score = rm.score;
        }
    }

    /// Sorts root moves from pv_idx to end by score (stable sort).
    pub fn sort_from_pv_idx(&mut self) {
        let pv_idx = self.pv_idx;
        if pv_idx < self.moves.len() {
            self.moves[pv_idx..].sort_by(|a, b| b.score.cmp(&a.score));
        }
    }

    /// Sorts the lines found so far, `0..=pv_idx`.
    pub fn sort_up_to_pv_idx(&mut self) {
        let end = (self.pv_idx + 1).min(self.moves.len());
        self.moves[..end].sort_by(|a, b| b.score.cmp(&a.score));
    }

    /// Sorts all root moves by score for final result ordering.
    pub fn sort_all(&mut self) {
        self.moves.sort_by(|a, b| b.score.cmp(&a.score));
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.moves.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RootMove> {
        self.moves.iter()
    }

    /// Checks if a move exists in the remaining moves (from pv_idx onwards).
    pub fn contains_from_pv_idx(&self, mv: ChessMove) -> bool {
        self.moves[self.pv_idx.min(self.moves.len())..]
            .iter()
            .any(|rm| rm.mv == mv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess::Square;

    fn mv(from: Square, to: Square) -> ChessMove {
        ChessMove::new(from, to, None)
    }

    /// Only PV moves keep a score; sorting is a stable descending order.
    #[test]
    fn test_update_and_sort() {
        let pos = Position::startpos();
        let mut rms = RootMoves::new(&pos, &[]);
        assert_eq!(rms.count(), 20);

        let e4 = mv(Square::E2, Square::E4);
        let d4 = mv(Square::D2, Square::D4);
        let nf3 = mv(Square::G1, Square::F3);

        assert!(rms.update(e4, Value::new(20), 1, -Value::INF, &[], 1));
        assert!(!rms.update(nf3, Value::new(5), 2, Value::new(20), &[], 1));
        assert!(rms.update(
            d4,
            Value::new(30),
            3,
            Value::new(20),
            &[mv(Square::D7, Square::D5)],
            2,
        ));
        rms.sort_all();

        let scores: Vec<Value> = rms.iter().map(|rm| rm.score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        let best = rms.get_best().unwrap();
        assert_eq!(best.mv, d4);
        assert_eq!(best.pv, vec![d4, mv(Square::D7, Square::D5)]);
        assert_eq!(rms.get(1).unwrap().mv, e4);
    }

    /// `searchmoves` restricts the table.
    #[test]
    fn test_search_moves_filter() {
        let pos = Position::startpos();
        let only = [mv(Square::E2, Square::E4), mv(Square::B1, Square::C3)];
        let rms = RootMoves::new(&pos, &only);
        assert_eq!(rms.count(), 2);
        assert!(rms.contains_from_pv_idx(only[1]));
        assert!(!rms.contains_from_pv_idx(mv(Square::D2, Square::D4)));
    }

    /// Earlier MultiPV lines are excluded from the remaining moves.
    #[test]
    fn test_pv_idx_exclusion() {
        let pos = Position::startpos();
        let mut rms = RootMoves::new(&pos, &[]);
        let first = rms.get(0).unwrap().mv;
        rms.set_pv_idx(1);
        assert!(!rms.contains_from_pv_idx(first));
        assert_eq!(
            rms.get_current_pv().map(|rm| rm.mv),
            rms.get(1).map(|rm| rm.mv)
        );
    }

    /// An inserted PV is walked back out of the table as the ponder move.
    #[test]
    fn test_insert_and_extract_ponder() {
        let tt = TranspositionTable::new(1);
        let mut pos = Position::startpos();
        let key = pos.key();

        let e4 = mv(Square::E2, Square::E4);
        let c5 = mv(Square::C7, Square::C5);
        let mut rm = RootMove::new(e4);
        rm.pv.push(c5);
        rm.insert_pv_in_tt(&mut pos, &tt);
        assert_eq!(pos.key(), key);

        let mut short = RootMove::new(e4);
        assert!(short.extract_ponder_from_tt(&mut pos, &tt));
        assert_eq!(short.pv, vec![e4, c5]);
        assert_eq!(pos.key(), key);

        let mut unknown = RootMove::new(mv(Square::A2, Square::A3));
        assert!(!unknown.extract_ponder_from_tt(&mut pos, &tt));
        assert_eq!(unknown.pv.len(), 1);
    }
}
