//! Per-thread move ordering statistics.

use chess::{ChessMove, Color, Piece};

/// Saturation bound of history scores.
const HISTORY_MAX: i32 = 16_384;

/// Bonus for a quiet move that caused or failed to cause a cutoff at `depth`.
#[inline]
pub fn stat_bonus(depth: i32) -> i32 {
    (depth * depth + 2 * depth - 2).clamp(0, 1_600)
}

/// History scores indexed by side to move, from-square and to-square.
pub struct ButterflyHistory {
    table: Box<[[[i32; 64]; 64]; 2]>,
}

impl Default for ButterflyHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ButterflyHistory {
    pub fn new() -> Self {
        ButterflyHistory {
            table: Box::new([[[0; 64]; 64]; 2]),
        }
    }

    #[inline]
    pub fn get(&self, color: Color, mv: ChessMove) -> i32 {
        self.table[color.to_index()][mv.get_source().to_index()][mv.get_dest().to_index()]
    }

    /// Moves the entry towards `bonus` with gravity so it stays within
    /// `[-HISTORY_MAX, HISTORY_MAX]`.
    pub fn update(&mut self, color: Color, mv: ChessMove, bonus: i32) {
        let entry =
            &mut self.table[color.to_index()][mv.get_source().to_index()][mv.get_dest().to_index()];
        let bonus = bonus.clamp(-HISTORY_MAX, HISTORY_MAX);
        *entry += bonus - *entry * bonus.abs() / HISTORY_MAX;
    }

    pub fn clear(&mut self) {
        for side in self.table.iter_mut() {
            for from in side.iter_mut() {
                from.fill(0);
            }
        }
    }
}

/// Reply that refuted a given (piece, destination) on the previous ply.
pub struct CounterMoves {
    table: Box<[[Option<ChessMove>; 64]; 12]>,
}

impl Default for CounterMoves {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterMoves {
    pub fn new() -> Self {
        CounterMoves {
            table: Box::new([[None; 64]; 12]),
        }
    }

    #[inline]
    fn index(color: Color, piece: Piece) -> usize {
        color.to_index() * 6 + piece.to_index()
    }

    /// Counter move recorded against `prev`, played by a `piece` of `color`.
    #[inline]
    pub fn get(&self, color: Color, piece: Piece, prev: ChessMove) -> Option<ChessMove> {
        self.table[Self::index(color, piece)][prev.get_dest().to_index()]
    }

    #[inline]
    pub fn set(&mut self, color: Color, piece: Piece, prev: ChessMove, mv: ChessMove) {
        self.table[Self::index(color, piece)][prev.get_dest().to_index()] = Some(mv);
    }

    pub fn clear(&mut self) {
        for row in self.table.iter_mut() {
            row.fill(None);
        }
    }
}

/// Ordering tables owned by one search thread and kept between searches.
#[derive(Default)]
pub struct HistoryTables {
    pub butterfly: ButterflyHistory,
    pub counter_moves: CounterMoves,
}

impl HistoryTables {
    pub fn clear(&mut self) {
        self.butterfly.clear();
        self.counter_moves.clear();
    }
}
