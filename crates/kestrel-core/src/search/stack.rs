//! Per-ply scratch state of the recursive search.

use arrayvec::ArrayVec;
use chess::{ChessMove, Color, Piece};

use crate::constants::MAX_PLY;
use crate::types::Value;

/// Entries below ply 0, so that `ply - 2` is always addressable.
const STACK_OFFSET: usize = 2;

/// Entries above the deepest ply, so that `ply + 2` is always addressable.
const STACK_MARGIN: usize = 3;

/// The move played from a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlayedMove {
    #[default]
    None,
    Null,
    Move(ChessMove),
}

impl PlayedMove {
    #[inline]
    pub fn as_move(self) -> Option<ChessMove> {
        match self {
            PlayedMove::Move(mv) => Some(mv),
            _ => None,
        }
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self == PlayedMove::Null
    }
}

/// The move that led to a node, as indexed in the counter-move table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterKey {
    pub color: Color,
    pub piece: Piece,
    pub mv: ChessMove,
}

/// A record stored for each ply in the search stack.
#[derive(Clone, Debug)]
pub struct StackEntry {
    /// Principal variation from this ply, built on the way back up.
    pub pv: ArrayVec<ChessMove, MAX_PLY>,
    pub ply: usize,
    pub current_move: PlayedMove,
    /// Move skipped by a singular-extension verification search.
    pub excluded_move: Option<ChessMove>,
    pub killers: [Option<ChessMove>; 2],
    pub static_eval: Value,
    /// Disables null move, razoring-style pruning and IID at this node.
    pub skip_early_pruning: bool,
    pub move_count: usize,
    pub counter_key: Option<CounterKey>,
}

impl StackEntry {
    fn new(ply: usize) -> Self {
        StackEntry {
            pv: ArrayVec::new(),
            ply,
            current_move: PlayedMove::None,
            excluded_move: None,
            killers: [None; 2],
            static_eval: Value::NONE,
            skip_early_pruning: false,
            move_count: 0,
            counter_key: None,
        }
    }
}

/// Fixed-size array of stack entries indexed by ply. Allocated once per
/// search thread and reused across iterations.
pub struct SearchStack {
    entries: Box<[StackEntry]>,
}

impl Default for SearchStack {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchStack {
    pub fn new() -> Self {
        let entries = (0..MAX_PLY + STACK_OFFSET + STACK_MARGIN)
            .map(|i| StackEntry::new(i.saturating_sub(STACK_OFFSET)))
            .collect();
        SearchStack { entries }
    }

    #[inline]
    pub fn at(&self, ply: usize) -> &StackEntry {
        &self.entries[ply + STACK_OFFSET]
    }

    #[inline]
    pub fn at_mut(&mut self, ply: usize) -> &mut StackEntry {
        &mut self.entries[ply + STACK_OFFSET]
    }

    /// Entry `back` plies above `ply`. Plies above the root read as empty
    /// entries.
    #[inline]
    pub fn ancestor(&self, ply: usize, back: usize) -> &StackEntry {
        debug_assert!(back <= STACK_OFFSET);
        &self.entries[ply + STACK_OFFSET - back]
    }

    /// Sets the PV at `ply` to `mv` followed by the PV of `ply + 1`.
    pub fn update_pv(&mut self, ply: usize, mv: ChessMove) {
        let idx = ply + STACK_OFFSET;
        let (head, tail) = self.entries.split_at_mut(idx + 1);
        let pv = &mut head[idx].pv;
        pv.clear();
        pv.push(mv);
        let child = &tail[0].pv;
        let room = pv.remaining_capacity();
        pv.extend(child.iter().take(room).copied());
    }

    #[inline]
    pub fn pv(&self, ply: usize) -> &[ChessMove] {
        &self.at(ply).pv
    }

    /// Records `mv` as the newest killer at `ply`.
    pub fn update_killers(&mut self, ply: usize, mv: ChessMove) {
        let killers = &mut self.at_mut(ply).killers;
        if killers[0] != Some(mv) {
            killers[1] = killers[0];
            killers[0] = Some(mv);
        }
    }

    /// Resets every entry before a new search.
    pub fn clear(&mut self) {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            *entry = StackEntry::new(i.saturating_sub(STACK_OFFSET));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess::Square;

    fn mv(from: Square, to: Square) -> ChessMove {
        ChessMove::new(from, to, None)
    }

    /// A parent PV is the move followed by the child's PV.
    #[test]
    fn test_update_pv() {
        let mut stack = SearchStack::new();
        stack.update_pv(2, mv(Square::E7, Square::E5));
        stack.update_pv(1, mv(Square::E2, Square::E4));
        assert_eq!(
            stack.pv(1),
            &[mv(Square::E2, Square::E4), mv(Square::E7, Square::E5)]
        );
        assert_eq!(stack.at(1).ply, 1);
    }

    /// Entries above the root are addressable and empty.
    #[test]
    fn test_ancestor_of_root() {
        let stack = SearchStack::new();
        assert_eq!(stack.ancestor(0, 2).current_move, PlayedMove::None);
        assert_eq!(stack.ancestor(0, 1).static_eval, Value::NONE);
        let _ = stack.at(MAX_PLY + 2);
    }

    #[test]
    fn test_killers_shift() {
        let mut stack = SearchStack::new();
        let a = mv(Square::B1, Square::C3);
        let b = mv(Square::G1, Square::F3);
        stack.update_killers(3, a);
        stack.update_killers(3, a);
        stack.update_killers(3, b);
        assert_eq!(stack.at(3).killers, [Some(b), Some(a)]);
    }
}
