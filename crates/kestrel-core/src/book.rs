//! Opening book.
//!
//! Polyglot format: 16-byte big-endian records of `(key, move, weight,
//! learn)` sorted by the Polyglot hash of the position.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chess::{ALL_SQUARES, ChessMove, File as BoardFile, Piece, Square};
use rand::RngExt;
use shakmaty::fen::Fen;
use shakmaty::zobrist::Zobrist64;
use shakmaty::Position as _;
use shakmaty::{CastlingMode, Chess, EnPassantMode};
use thiserror::Error;

use crate::position::Position;

/// Size of one record in bytes.
const ENTRY_SIZE: u64 = 16;

#[derive(Debug, Error)]
pub enum BookError {
    #[error("failed to read book: {0}")]
    Io(#[from] io::Error),

    #[error("book size {0} is not a multiple of {ENTRY_SIZE} bytes")]
    Truncated(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BookEntry {
    key: u64,
    mv: u16,
    weight: u16,
}

/// Read-only opening book held in memory.
#[derive(Debug, Default)]
pub struct Book {
    entries: Vec<BookEntry>,
}

impl Book {
    /// Loads a book file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Book, BookError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        if size % ENTRY_SIZE != 0 {
            return Err(BookError::Truncated(size));
        }
        Self::from_reader(BufReader::new(file), (size / ENTRY_SIZE) as usize)
    }

    /// Reads `count` records from `reader`.
    pub fn from_reader<R: Read>(mut reader: R, count: usize) -> Result<Book, BookError> {
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = BookEntry {
                key: reader.read_u64::<BigEndian>()?,
                mv: reader.read_u16::<BigEndian>()?,
                weight: reader.read_u16::<BigEndian>()?,
            };
            // Learning data is not used
            reader.read_u32::<BigEndian>()?;
            entries.push(entry);
        }
        // Lookups binary search on the key
        entries.sort_by_key(|e| e.key);
        Ok(Book { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Picks a book move for `pos`.
    ///
    /// # Arguments
    ///
    /// * `pos` - Position to look up
    /// * `pick_best` - Return the highest-weighted move instead of a
    ///   weight-proportional random choice
    ///
    /// # Returns
    ///
    /// A legal move, or `None` when the position is not in the book.
    pub fn probe(&self, pos: &Position, pick_best: bool) -> Option<ChessMove> {
        let key = polyglot_key(pos)?;
        let start = self.entries.partition_point(|e| e.key < key);
        let candidates: Vec<(ChessMove, u32)> = self.entries[start..]
            .iter()
            .take_while(|e| e.key == key)
            .filter_map(|e| {
                let mv = decode_move(pos, e.mv);
                pos.is_legal(mv).then_some((mv, u32::from(e.weight)))
            })
            .collect();

        if candidates.is_empty() {
            return None;
        }

        if pick_best {
            return candidates
                .iter()
                .max_by_key(|(_, weight)| *weight)
                .map(|&(mv, _)| mv);
        }

        let total: u32 = candidates.iter().map(|(_, w)| *w).sum();
        if total == 0 {
            return candidates.first().map(|&(mv, _)| mv);
        }
        let mut pick = rand::rng().random_range(0..total);
        for &(mv, weight) in &candidates {
            if pick < weight {
                return Some(mv);
            }
            pick -= weight;
        }
        candidates.last().map(|&(mv, _)| mv)
    }
}

/// Accumulates weighted moves and writes them as a book file.
#[derive(Debug, Default)]
pub struct BookWriter {
    entries: BTreeMap<(u64, u16), u32>,
}

impl BookWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `weight` to `mv` in `pos`. Weights of repeated moves accumulate.
    pub fn add(&mut self, pos: &Position, mv: ChessMove, weight: u16) {
        let Some(key) = polyglot_key(pos) else {
            log::warn!("cannot hash {} for the book", pos.fen());
            return;
        };
        let slot = self.entries.entry((key, encode_move(pos, mv))).or_insert(0);
        *slot += u32::from(weight);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes all records in key order. Weights are capped at `u16::MAX`.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for (&(key, mv), &weight) in &self.entries {
            writer.write_u64::<BigEndian>(key)?;
            writer.write_u16::<BigEndian>(mv)?;
            writer.write_u16::<BigEndian>(weight.min(u32::from(u16::MAX)) as u16)?;
            writer.write_u32::<BigEndian>(0)?;
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()
    }
}

/// Polyglot hash of `pos`. The en passant square only counts when a
/// capture is legal.
pub fn polyglot_key(pos: &Position) -> Option<u64> {
    let fen: Fen = pos.fen().parse().ok()?;
    let chess: Chess = fen.into_position(CastlingMode::Standard).ok()?;
    let hash: Zobrist64 = chess.zobrist_hash(EnPassantMode::Legal);
    Some(hash.0)
}

/// Whether `mv` is a king move of two files, i.e. castling.
fn is_castling(pos: &Position, mv: ChessMove) -> bool {
    let from = mv.get_source().get_file().to_index();
    let to = mv.get_dest().get_file().to_index();
    pos.moved_piece(mv) == Some(Piece::King) && from.abs_diff(to) == 2
}

/// Bits: to file (3), to rank (3), from file (3), from rank (3), promotion (3).
/// Castling is stored as the king capturing its own rook.
fn encode_move(pos: &Position, mv: ChessMove) -> u16 {
    let from = mv.get_source();
    let mut to = mv.get_dest();
    if is_castling(pos, mv) {
        let rook_file = if to.get_file() == BoardFile::G { BoardFile::H } else { BoardFile::A };
        to = Square::make_square(to.get_rank(), rook_file);
    }
    let promo = match mv.get_promotion() {
        Some(Piece::Knight) => 1,
        Some(Piece::Bishop) => 2,
        Some(Piece::Rook) => 3,
        Some(Piece::Queen) => 4,
        _ => 0,
    };
    (promo << 12)
        | ((from.get_rank().to_index() as u16) << 9)
        | ((from.get_file().to_index() as u16) << 6)
        | ((to.get_rank().to_index() as u16) << 3)
        | to.get_file().to_index() as u16
}

fn decode_move(pos: &Position, bits: u16) -> ChessMove {
    let to = ALL_SQUARES[(((bits >> 3) & 7) * 8 + (bits & 7)) as usize];
    let from = ALL_SQUARES[(((bits >> 9) & 7) * 8 + ((bits >> 6) & 7)) as usize];
    let promo = match (bits >> 12) & 7 {
        1 => Some(Piece::Knight),
        2 => Some(Piece::Bishop),
        3 => Some(Piece::Rook),
        4 => Some(Piece::Queen),
        _ => None,
    };

    let castles = pos.moved_piece(ChessMove::new(from, to, None)) == Some(Piece::King)
        && pos.board().piece_on(to) == Some(Piece::Rook)
        && pos.board().color_on(to) == Some(pos.side_to_move());
    if castles {
        let king_file = if to.get_file() == BoardFile::H { BoardFile::G } else { BoardFile::C };
        return ChessMove::new(from, Square::make_square(to.get_rank(), king_file), None);
    }
    ChessMove::new(from, to, promo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn book_from(writer: &BookWriter) -> Book {
        let mut bytes = Vec::new();
        writer.write(&mut bytes).unwrap();
        let count = bytes.len() / ENTRY_SIZE as usize;
        Book::from_reader(Cursor::new(bytes), count).unwrap()
    }

    /// The heaviest move wins when picking the best.
    #[test]
    fn test_pick_best() {
        let pos = Position::startpos();
        let mut writer = BookWriter::new();
        writer.add(&pos, pos.parse_move("e2e4").unwrap(), 10);
        writer.add(&pos, pos.parse_move("d2d4").unwrap(), 30);
        writer.add(&pos, pos.parse_move("c2c4").unwrap(), 5);

        let book = book_from(&writer);
        assert_eq!(book.len(), 3);
        assert_eq!(
            book.probe(&pos, true).map(|m| m.to_string()),
            Some("d2d4".into())
        );

        let random = book.probe(&pos, false).unwrap().to_string();
        assert!(["e2e4", "d2d4", "c2c4"].contains(&random.as_str()));
    }

    /// Castling survives the king-takes-rook encoding.
    #[test]
    fn test_castling_round_trip() {
        let pos = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let castle = pos.parse_move("e1g1").unwrap();
        assert_eq!(encode_move(&pos, castle) & 7, 7);

        let mut writer = BookWriter::new();
        writer.add(&pos, castle, 1);
        assert_eq!(book_from(&writer).probe(&pos, true), Some(castle));
    }

    /// Keys match the published Polyglot test vectors.
    #[test]
    fn test_polyglot_keys() {
        let mut pos = Position::startpos();
        assert_eq!(polyglot_key(&pos), Some(0x463b_9618_1691_fc9c));

        pos.do_move(pos.parse_move("e2e4").unwrap());
        assert_eq!(polyglot_key(&pos), Some(0x823c_9b50_fd11_4196));

        pos.do_move(pos.parse_move("d7d5").unwrap());
        assert_eq!(polyglot_key(&pos), Some(0x0756_b944_61c5_0fb0));
    }

    /// A record written with the published start position key is found.
    #[test]
    fn test_reads_published_key() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x463b_9618_1691_fc9cu64.to_be_bytes());
        // e2e4: to e4 (file 4, rank 3), from e2 (file 4, rank 1)
        let e2e4: u16 = (1 << 9) | (4 << 6) | (3 << 3) | 4;
        bytes.extend_from_slice(&e2e4.to_be_bytes());
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());

        let book = Book::from_reader(Cursor::new(bytes), 1).unwrap();
        let mv = book.probe(&Position::startpos(), true);
        assert_eq!(mv.map(|m| m.to_string()), Some("e2e4".into()));
    }

    /// Unknown positions and torn files are reported as such.
    #[test]
    fn test_missing_and_truncated() {
        let book = Book::default();
        assert!(book.probe(&Position::startpos(), true).is_none());

        let err = Book::from_reader(Cursor::new(vec![0u8; 10]), 1).unwrap_err();
        assert!(matches!(err, BookError::Io(_)));
    }
}
