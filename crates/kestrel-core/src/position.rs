//! Chess position with reversible move application.
//!
//! Rules and move generation come from the `chess` crate, whose `Board` is a
//! copy-make value. `Position` layers an undo stack on top of it together with
//! the state the board does not track: the fifty-move clock, the repetition
//! history and the game ply.

use std::fmt;
use std::str::FromStr;

use chess::{BitBoard, Board, BoardStatus, ChessMove, Color, EMPTY, MoveGen, Piece};
use thiserror::Error;

use crate::eval::piece_value;

/// FEN of the standard starting position.
pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Errors raised while building a position or parsing a move.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("invalid FEN `{0}`")]
    InvalidFen(String),

    #[error("illegal or malformed move `{0}`")]
    IllegalMove(String),
}

/// Snapshot restored by [`Position::undo_move`] and [`Position::undo_null_move`].
#[derive(Clone, Copy)]
struct StateInfo {
    board: Board,
    rule50: u32,
    plies_from_null: u32,
}

/// A chess position plus the history needed for draw detection.
#[derive(Clone)]
pub struct Position {
    board: Board,
    rule50: u32,
    plies_from_null: u32,
    game_ply: u32,
    states: Vec<StateInfo>,
    keys: Vec<u64>,
}

impl Default for Position {
    fn default() -> Self {
        Self::startpos()
    }
}

impl Position {
    /// Returns the standard starting position.
    pub fn startpos() -> Position {
        Position::from_board(Board::default())
    }

    /// Wraps a bare board with empty history and zeroed counters.
    pub fn from_board(board: Board) -> Position {
        Position {
            board,
            rule50: 0,
            plies_from_null: 0,
            game_ply: 0,
            states: Vec::with_capacity(256),
            keys: Vec::with_capacity(256),
        }
    }

    /// Parses a FEN string, honouring the halfmove clock and fullmove number.
    pub fn from_fen(fen: &str) -> Result<Position, PositionError> {
        let board = Board::from_str(fen.trim())
            .map_err(|_| PositionError::InvalidFen(fen.to_string()))?;
        let fields: Vec<&str> = fen.split_whitespace().collect();
        let rule50 = fields.get(4).and_then(|s| s.parse().ok()).unwrap_or(0);
        let fullmove: u32 = fields.get(5).and_then(|s| s.parse().ok()).unwrap_or(1);

        let mut pos = Position::from_board(board);
        pos.rule50 = rule50;
        pos.plies_from_null = rule50;
        pos.game_ply =
            2 * fullmove.saturating_sub(1) + u32::from(board.side_to_move() == Color::Black);
        Ok(pos)
    }

    #[inline]
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Zobrist key of the position.
    #[inline]
    pub fn key(&self) -> u64 {
        self.board.get_hash()
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    /// Number of half moves played since the start of the game.
    #[inline]
    pub fn game_ply(&self) -> u32 {
        self.game_ply
    }

    #[inline]
    pub fn rule50_count(&self) -> u32 {
        self.rule50
    }

    #[inline]
    pub fn in_check(&self) -> bool {
        *self.board.checkers() != EMPTY
    }

    #[inline]
    pub fn checkers(&self) -> BitBoard {
        *self.board.checkers()
    }

    /// Iterator over all legal moves.
    #[inline]
    pub fn legal_moves(&self) -> MoveGen {
        MoveGen::new_legal(&self.board)
    }

    /// Whether `mv` is legal here. Used to validate moves read from shared tables.
    #[inline]
    pub fn is_legal(&self, mv: ChessMove) -> bool {
        self.board.legal(mv)
    }

    #[inline]
    pub fn moved_piece(&self, mv: ChessMove) -> Option<Piece> {
        self.board.piece_on(mv.get_source())
    }

    /// Piece removed from the board by `mv`, including en passant victims.
    pub fn captured_piece(&self, mv: ChessMove) -> Option<Piece> {
        if let Some(piece) = self.board.piece_on(mv.get_dest()) {
            return Some(piece);
        }
        if self.is_en_passant(mv) {
            return Some(Piece::Pawn);
        }
        None
    }

    #[inline]
    fn is_en_passant(&self, mv: ChessMove) -> bool {
        self.board.piece_on(mv.get_source()) == Some(Piece::Pawn)
            && mv.get_source().get_file() != mv.get_dest().get_file()
            && self.board.piece_on(mv.get_dest()).is_none()
    }

    #[inline]
    pub fn is_capture(&self, mv: ChessMove) -> bool {
        self.captured_piece(mv).is_some()
    }

    #[inline]
    pub fn is_capture_or_promotion(&self, mv: ChessMove) -> bool {
        mv.get_promotion().is_some() || self.is_capture(mv)
    }

    /// Whether playing `mv` puts the opponent in check.
    pub fn gives_check(&self, mv: ChessMove) -> bool {
        *self.board.make_move_new(mv).checkers() != EMPTY
    }

    /// Material of knights, bishops, rooks and queens for `color`.
    pub fn non_pawn_material(&self, color: Color) -> i32 {
        let ours = self.board.color_combined(color);
        [Piece::Knight, Piece::Bishop, Piece::Rook, Piece::Queen]
            .iter()
            .map(|&piece| (self.board.pieces(piece) & ours).popcnt() as i32 * piece_value(piece))
            .sum()
    }

    /// Applies a legal move.
    pub fn do_move(&mut self, mv: ChessMove) {
        debug_assert!(self.board.legal(mv));
        let resets_clock = self.moved_piece(mv) == Some(Piece::Pawn) || self.is_capture(mv);

        self.push_state();
        self.board = self.board.make_move_new(mv);
        self.rule50 = if resets_clock { 0 } else { self.rule50 + 1 };
        self.plies_from_null += 1;
        self.game_ply += 1;
    }

    /// Takes back the last move applied with [`Position::do_move`].
    pub fn undo_move(&mut self) {
        self.pop_state();
        self.game_ply -= 1;
    }

    /// Passes the turn. Returns `false` and leaves the position untouched when
    /// the side to move is in check.
    pub fn do_null_move(&mut self) -> bool {
        let Some(next) = self.board.null_move() else {
            return false;
        };
        self.push_state();
        self.board = next;
        self.rule50 += 1;
        self.plies_from_null = 0;
        true
    }

    pub fn undo_null_move(&mut self) {
        self.pop_state();
    }

    fn push_state(&mut self) {
        self.states.push(StateInfo {
            board: self.board,
            rule50: self.rule50,
            plies_from_null: self.plies_from_null,
        });
        self.keys.push(self.board.get_hash());
    }

    fn pop_state(&mut self) {
        if let Some(state) = self.states.pop() {
            self.board = state.board;
            self.rule50 = state.rule50;
            self.plies_from_null = state.plies_from_null;
            self.keys.pop();
        }
    }

    /// Forgets the undo stack but keeps the repetition keys, so a position set
    /// up from a move list can be searched without unwinding past its root.
    pub fn truncate_history(&mut self) {
        self.states.clear();
    }

    /// Whether the position repeats one seen since the last irreversible move.
    pub fn is_repetition(&self) -> bool {
        let end = self.rule50.min(self.plies_from_null) as usize;
        let key = self.key();
        let n = self.keys.len();
        (4..=end)
            .step_by(2)
            .take_while(|&i| i <= n)
            .any(|i| self.keys[n - i] == key)
    }

    /// Draw by the fifty-move rule or repetition. Material draws are left to
    /// `endgame::probe` so they can be stored as exact results.
    pub fn is_draw(&self) -> bool {
        if self.rule50 > 99 && (!self.in_check() || self.legal_moves().len() > 0) {
            return true;
        }
        self.is_repetition()
    }

    /// Neither side can deliver mate with the material left.
    pub fn has_insufficient_material(&self) -> bool {
        let board = &self.board;
        let heavy =
            board.pieces(Piece::Pawn) | board.pieces(Piece::Rook) | board.pieces(Piece::Queen);
        if heavy != EMPTY {
            return false;
        }
        let knights = board.pieces(Piece::Knight).popcnt();
        let bishops = *board.pieces(Piece::Bishop);
        let minors = knights + bishops.popcnt();
        if minors <= 1 {
            return true;
        }
        if knights == 0 {
            let light = bishops & BitBoard::new(LIGHT_SQUARES);
            return light == EMPTY || light == bishops;
        }
        false
    }

    #[inline]
    pub fn status(&self) -> BoardStatus {
        self.board.status()
    }

    /// Resolves a move in coordinate notation (`e2e4`, `e7e8q`).
    pub fn parse_move(&self, text: &str) -> Result<ChessMove, PositionError> {
        let text = text.trim().to_ascii_lowercase();
        self.legal_moves()
            .find(|mv| mv.to_string() == text)
            .ok_or(PositionError::IllegalMove(text))
    }

    pub fn fen(&self) -> String {
        self.board.to_string()
    }
}

/// Bitmask of the light squares (b1, d1, ..., a2, ...).
const LIGHT_SQUARES: u64 = 0x55AA_55AA_55AA_55AA;

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Position")
            .field("fen", &self.fen())
            .field("rule50", &self.rule50)
            .field("game_ply", &self.game_ply)
            .finish()
    }
}
