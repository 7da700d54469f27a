//! Shared transposition table.
//!
//! Entries are two 64-bit words written without locks: the packed data and
//! `key ^ data`. A reader accepts an entry only when the two words agree with
//! the probed key, so a write torn by a concurrent store reads as a miss.

use aligned_vec::{AVec, ConstAlign};
use chess::{ALL_SQUARES, ChessMove, Piece};
use std::mem;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use crate::constants::CACHE_LINE_SIZE;
use crate::search::node_type::NodeType;
use crate::types::{Depth, Value};

/// Number of entries per cluster. One cluster fills one cache line.
const CLUSTER_SIZE: usize = 4;

/// Offset added to depths so that quiescence depths fit an unsigned byte.
/// A stored depth byte of zero marks a slot that was never written.
const DEPTH_OFFSET: Depth = 9;

/// Depth stored for quiescence entries.
pub const DEPTH_QS: Depth = 0;

/// Depth of entries that only carry a move or a static evaluation, such as
/// an inserted PV.
pub const DEPTH_NONE: Depth = 1 - DEPTH_OFFSET;

/// Unpacked depth of an empty slot.
const DEPTH_EMPTY: Depth = -DEPTH_OFFSET;

/// Generation counter wraps at this value.
const GENERATION_CYCLE: u8 = 64;

/// Bound type for transposition table entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Bound {
    None = 0,
    /// Fail-high: the true score is at least the stored one.
    Lower = 1,
    /// Fail-low: the true score is at most the stored one.
    Upper = 2,
    Exact = 3,
}

impl Bound {
    /// Chooses the bound for a node result searched with window `(alpha, beta)`.
    #[inline]
    pub fn classify<NT: NodeType>(best: Value, alpha: Value, beta: Value) -> Bound {
        if best >= beta {
            Bound::Lower
        } else if NT::PV_NODE && best > alpha {
            Bound::Exact
        } else {
            Bound::Upper
        }
    }

    #[inline]
    fn from_bits(bits: u64) -> Bound {
        match bits & 3 {
            1 => Bound::Lower,
            2 => Bound::Upper,
            3 => Bound::Exact,
            _ => Bound::None,
        }
    }
}

/// Converts a search score to the form stored in the table: mate scores
/// become relative to the stored node instead of the root.
#[inline]
pub fn value_to_tt(v: Value, ply: usize) -> Value {
    if v >= Value::MATE_IN_MAX_PLY {
        v + ply as i32
    } else if v <= Value::MATED_IN_MAX_PLY {
        v - ply as i32
    } else {
        v
    }
}

/// Inverse of [`value_to_tt`].
#[inline]
pub fn value_from_tt(v: Value, ply: usize) -> Value {
    if v == Value::NONE {
        v
    } else if v >= Value::MATE_IN_MAX_PLY {
        v - ply as i32
    } else if v <= Value::MATED_IN_MAX_PLY {
        v + ply as i32
    } else {
        v
    }
}

/// Packs a move into 16 bits: from (6), to (6), promotion (3), present flag (1).
#[inline]
fn encode_move(mv: Option<ChessMove>) -> u64 {
    let Some(mv) = mv else {
        return 0;
    };
    let promo = match mv.get_promotion() {
        Some(Piece::Knight) => 1,
        Some(Piece::Bishop) => 2,
        Some(Piece::Rook) => 3,
        Some(Piece::Queen) => 4,
        _ => 0,
    };
    (1 << 15)
        | (promo << 12)
        | ((mv.get_dest().to_index() as u64) << 6)
        | mv.get_source().to_index() as u64
}

#[inline]
fn decode_move(bits: u64) -> Option<ChessMove> {
    if bits & (1 << 15) == 0 {
        return None;
    }
    let promo = match (bits >> 12) & 7 {
        1 => Some(Piece::Knight),
        2 => Some(Piece::Bishop),
        3 => Some(Piece::Rook),
        4 => Some(Piece::Queen),
        _ => None,
    };
    Some(ChessMove::new(
        ALL_SQUARES[(bits & 63) as usize],
        ALL_SQUARES[((bits >> 6) & 63) as usize],
        promo,
    ))
}

/// A single table slot.
///
/// # Data Format
///
/// - 16 bits: best move
/// - 16 bits: search value
/// - 16 bits: static evaluation
/// - 8 bits: depth (offset by `DEPTH_OFFSET`, zero when empty)
/// - 2 bits: bound
/// - 6 bits: generation
#[derive(Default)]
struct TTEntry {
    key_xor_data: AtomicU64,
    data: AtomicU64,
}

impl TTEntry {
    const MOVE_SHIFT: u32 = 0;
    const MOVE_MASK: u64 = 0xFFFF;

    const VALUE_SHIFT: u32 = 16;
    const EVAL_SHIFT: u32 = 32;
    const SCORE_MASK: u64 = 0xFFFF;

    const DEPTH_SHIFT: u32 = 48;
    const DEPTH_MASK: u64 = 0xFF;

    const BOUND_SHIFT: u32 = 56;

    const GENERATION_SHIFT: u32 = 58;
    const GENERATION_MASK: u64 = 0x3F;

    #[inline]
    fn pack(
        mv: Option<ChessMove>,
        value: Value,
        eval: Value,
        depth: Depth,
        bound: Bound,
        generation: u8,
    ) -> u64 {
        let depth = (depth + DEPTH_OFFSET).clamp(1, 255) as u64;
        (encode_move(mv) << Self::MOVE_SHIFT)
            | (((value.raw() as i16) as u16 as u64) << Self::VALUE_SHIFT)
            | (((eval.raw() as i16) as u16 as u64) << Self::EVAL_SHIFT)
            | (depth << Self::DEPTH_SHIFT)
            | ((bound as u64) << Self::BOUND_SHIFT)
            | (((generation as u64) & Self::GENERATION_MASK) << Self::GENERATION_SHIFT)
    }

    #[inline]
    fn unpack_score(bits: u64) -> Value {
        Value::new((bits & Self::SCORE_MASK) as u16 as i16 as i32)
    }

    #[inline]
    fn unpack(data: u64) -> TTData {
        TTData {
            mv: decode_move((data >> Self::MOVE_SHIFT) & Self::MOVE_MASK),
            value: Self::unpack_score(data >> Self::VALUE_SHIFT),
            eval: Self::unpack_score(data >> Self::EVAL_SHIFT),
            depth: ((data >> Self::DEPTH_SHIFT) & Self::DEPTH_MASK) as Depth - DEPTH_OFFSET,
            bound: Bound::from_bits(data >> Self::BOUND_SHIFT),
            generation: ((data >> Self::GENERATION_SHIFT) & Self::GENERATION_MASK) as u8,
        }
    }

    /// Loads the entry, returning the data only if it verifies against `key`.
    #[inline]
    fn load_verified(&self, key: u64) -> Option<TTData> {
        let data = self.data.load(Ordering::Relaxed);
        let check = self.key_xor_data.load(Ordering::Relaxed);
        if check ^ data != key {
            return None;
        }
        let tt_data = Self::unpack(data);
        tt_data.is_occupied().then_some(tt_data)
    }

    #[inline]
    fn load_raw(&self) -> TTData {
        Self::unpack(self.data.load(Ordering::Relaxed))
    }

    #[allow(clippy::too_many_arguments)]
    fn save(
        &self,
        key: u64,
        value: Value,
        bound: Bound,
        depth: Depth,
        mv: Option<ChessMove>,
        eval: Value,
        generation: u8,
    ) {
        let old = self.load_verified(key);
        let same_key = old.is_some();
        let old = old.unwrap_or_default();

        // Keep the previous move when this store carries none.
        let mv = if mv.is_none() && same_key { old.mv } else { mv };

        let data = if !same_key
            || bound == Bound::Exact
            || depth > old.depth - 4
            || old.generation != generation
        {
            Self::pack(mv, value, eval, depth, bound, generation)
        } else if mv != old.mv {
            // A new best move is recorded even when the rest is kept.
            Self::pack(
                mv,
                old.value,
                old.eval,
                old.depth,
                old.bound,
                old.generation,
            )
        } else {
            return;
        };
        self.data.store(data, Ordering::Relaxed);
        self.key_xor_data.store(key ^ data, Ordering::Relaxed);
    }

    #[inline]
    fn clear(&self) {
        self.data.store(0, Ordering::Relaxed);
        self.key_xor_data.store(0, Ordering::Relaxed);
    }
}

/// Unpacked view of a table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TTData {
    pub mv: Option<ChessMove>,
    /// Search value, mate scores relative to the stored node.
    pub value: Value,
    pub eval: Value,
    pub depth: Depth,
    pub bound: Bound,
    pub generation: u8,
}

impl Default for TTData {
    fn default() -> Self {
        TTData {
            mv: None,
            value: Value::NONE,
            eval: Value::NONE,
            depth: DEPTH_NONE,
            bound: Bound::None,
            generation: 0,
        }
    }
}

impl TTData {
    /// Whether the stored bound proves `value` is on the right side of `beta`.
    #[inline]
    pub fn can_cut(&self, value: Value, beta: Value) -> bool {
        let needed = if value >= beta { Bound::Lower } else { Bound::Upper };
        (self.bound as u8 & needed as u8) != 0
    }

    /// Whether the slot was ever written. Entries holding only a static
    /// evaluation count as occupied.
    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.depth != DEPTH_EMPTY
    }

    /// Age of the entry in generations, accounting for wrap-around.
    #[inline]
    fn relative_age(&self, generation: u8) -> i32 {
        ((GENERATION_CYCLE + generation - self.generation) % GENERATION_CYCLE) as i32
    }
}

/// The main transposition table structure.
pub struct TranspositionTable {
    entries: AVec<TTEntry, ConstAlign<CACHE_LINE_SIZE>>,
    cluster_count: u64,
    generation: AtomicU8,
}

impl TranspositionTable {
    /// Allocates a table of roughly `mb_size` megabytes.
    pub fn new(mb_size: usize) -> Self {
        let cluster_byte_size = mem::size_of::<TTEntry>() * CLUSTER_SIZE;
        let cluster_count = ((mb_size as u64 * 1024 * 1024) / cluster_byte_size as u64).max(16);
        let entries_size = cluster_count as usize * CLUSTER_SIZE;

        log::debug!("allocating transposition table: {mb_size} MB, {cluster_count} clusters");

        TranspositionTable {
            entries: AVec::from_iter(
                CACHE_LINE_SIZE,
                (0..entries_size).map(|_| TTEntry::default()),
            ),
            cluster_count,
            generation: AtomicU8::new(0),
        }
    }

    /// Reallocates the table, dropping every entry.
    pub fn resize(&mut self, mb_size: usize) {
        *self = Self::new(mb_size);
    }

    /// Clears all entries and resets the generation.
    pub fn clear(&self) {
        for entry in self.entries.iter() {
            entry.clear();
        }
        self.generation.store(0, Ordering::Relaxed);
    }

    /// Starts a new search generation so older entries age out first.
    pub fn new_search(&self) {
        let next = (self.generation.load(Ordering::Relaxed) + 1) % GENERATION_CYCLE;
        self.generation.store(next, Ordering::Relaxed);
    }

    #[inline]
    pub fn generation(&self) -> u8 {
        self.generation.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn prefetch(&self, key: u64) {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            let index = self.get_cluster_idx(key);
            let addr = self.entries.as_ptr().add(index) as *const i8;
            std::arch::x86_64::_mm_prefetch(addr, std::arch::x86_64::_MM_HINT_T0);
        }
        #[cfg(not(target_arch = "x86_64"))]
        let _ = key;
    }

    /// Probes the table for `key`.
    ///
    /// # Returns
    ///
    /// A tuple containing:
    /// - `bool`: Whether a verified entry was found
    /// - `TTData`: The entry data (default if not found)
    /// - `usize`: The slot to pass to [`TranspositionTable::store`], either
    ///   the matching entry or the best replacement candidate
    pub fn probe(&self, key: u64) -> (bool, TTData, usize) {
        let generation = self.generation();
        let cluster_idx = self.get_cluster_idx(key);
        let cluster = &self.entries[cluster_idx..cluster_idx + CLUSTER_SIZE];

        for (i, entry) in cluster.iter().enumerate() {
            if let Some(tt_data) = entry.load_verified(key) {
                return (true, tt_data, cluster_idx + i);
            }
        }

        // Replacement score: depth - 8 * age. The lowest score is replaced.
        let replace_idx = cluster
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| {
                let data = entry.load_raw();
                data.depth - data.relative_age(generation) * 8
            })
            .map_or(0, |(i, _)| i);

        (false, TTData::default(), cluster_idx + replace_idx)
    }

    /// Stores a result at the slot returned by [`TranspositionTable::probe`].
    #[inline]
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &self,
        entry_index: usize,
        key: u64,
        value: Value,
        bound: Bound,
        depth: Depth,
        mv: Option<ChessMove>,
        eval: Value,
    ) {
        if let Some(entry) = self.entries.get(entry_index) {
            entry.save(key, value, bound, depth, mv, eval, self.generation());
        }
    }

    /// Approximate fill rate in per-mille, counting current-generation entries
    /// in the first thousand slots.
    pub fn hashfull(&self) -> usize {
        let generation = self.generation();
        self.entries
            .iter()
            .take(1000)
            .filter(|entry| {
                let data = entry.load_raw();
                data.is_occupied() && data.generation == generation
            })
            .count()
    }

    #[inline(always)]
    fn get_cluster_idx(&self, key: u64) -> usize {
        (Self::mul_hi64(key, self.cluster_count) as usize) * CLUSTER_SIZE
    }

    /// High 64 bits of the 128-bit product, mapping a key uniformly onto
    /// `0..b`.
    #[inline(always)]
    fn mul_hi64(a: u64, b: u64) -> u64 {
        (((a as u128) * (b as u128)) >> 64) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::node_type::{NonPV, PV};
    use chess::Square;

    fn mv(from: Square, to: Square) -> Option<ChessMove> {
        Some(ChessMove::new(from, to, None))
    }

    /// Packing round-trips every field including negative scores and depths.
    #[test]
    fn test_entry_store_and_read() {
        let entry = TTEntry::default();
        let key = 0xDEAD_BEEF_1234_5678;
        let best = Some(ChessMove::new(Square::A7, Square::A8, Some(Piece::Queen)));
        entry.save(
            key,
            Value::new(-512),
            Bound::Exact,
            -1,
            best,
            Value::new(77),
            63,
        );

        let data = entry.load_verified(key).unwrap();
        assert_eq!(data.mv, best);
        assert_eq!(data.value, Value::new(-512));
        assert_eq!(data.eval, Value::new(77));
        assert_eq!(data.depth, -1);
        assert_eq!(data.bound, Bound::Exact);
        assert_eq!(data.generation, 63);
    }

    /// An entry whose check word disagrees with its data is a miss.
    #[test]
    fn test_torn_entry_is_a_miss() {
        let entry = TTEntry::default();
        let key = 42;
        entry.save(key, Value::new(10), Bound::Lower, 5, None, Value::ZERO, 1);
        assert!(entry.load_verified(key).is_some());

        // Simulate a concurrent writer that replaced only the data word.
        let other = TTEntry::pack(
            mv(Square::E2, Square::E4),
            Value::new(99),
            Value::ZERO,
            9,
            Bound::Exact,
            1,
        );
        entry.data.store(other, Ordering::Relaxed);
        assert!(entry.load_verified(key).is_none());
    }

    /// Shallower non-exact results do not overwrite deeper ones, the move is kept
    /// when a store carries none, and an exact bound always wins.
    #[test]
    fn test_entry_replacement_policy() {
        let entry = TTEntry::default();
        let key = 100;
        entry.save(
            key,
            Value::new(50),
            Bound::Lower,
            10,
            mv(Square::E2, Square::E4),
            Value::ZERO,
            1,
        );

        entry.save(key, Value::new(60), Bound::Lower, 4, None, Value::ZERO, 1);
        let data = entry.load_verified(key).unwrap();
        assert_eq!(data.value, Value::new(50));

        entry.save(key, Value::new(70), Bound::Upper, 8, None, Value::ZERO, 1);
        let data = entry.load_verified(key).unwrap();
        assert_eq!(data.value, Value::new(70));
        assert_eq!(data.mv, mv(Square::E2, Square::E4));

        entry.save(key, Value::new(80), Bound::Exact, 1, None, Value::ZERO, 1);
        assert_eq!(entry.load_verified(key).unwrap().bound, Bound::Exact);

        entry.save(200, Value::new(90), Bound::Upper, 1, None, Value::ZERO, 1);
        assert!(entry.load_verified(key).is_none());
        assert_eq!(entry.load_verified(200).unwrap().value, Value::new(90));
    }

    /// A move-only store is visible and replaces the move of a deeper entry.
    #[test]
    fn test_move_only_entry() {
        let entry = TTEntry::default();
        let key = 7;
        entry.save(
            key,
            Value::NONE,
            Bound::None,
            DEPTH_NONE,
            mv(Square::D2, Square::D4),
            Value::NONE,
            2,
        );
        let data = entry.load_verified(key).unwrap();
        assert_eq!(data.mv, mv(Square::D2, Square::D4));
        assert!(!data.can_cut(Value::new(10), Value::new(5)));

        entry.save(key, Value::new(40), Bound::Lower, 12, None, Value::ZERO, 2);
        entry.save(
            key,
            Value::NONE,
            Bound::None,
            DEPTH_NONE,
            mv(Square::C2, Square::C4),
            Value::NONE,
            2,
        );
        let data = entry.load_verified(key).unwrap();
        assert_eq!(data.mv, mv(Square::C2, Square::C4));
        assert_eq!(data.depth, 12);
        assert_eq!(data.bound, Bound::Lower);
    }

    #[test]
    fn test_bound_classify() {
        let (alpha, beta) = (Value::new(-10), Value::new(10));
        assert_eq!(
            Bound::classify::<PV>(Value::new(20), alpha, beta),
            Bound::Lower
        );
        assert_eq!(
            Bound::classify::<PV>(Value::new(0), alpha, beta),
            Bound::Exact
        );
        assert_eq!(
            Bound::classify::<PV>(Value::new(-20), alpha, beta),
            Bound::Upper
        );
        assert_eq!(
            Bound::classify::<NonPV>(Value::new(0), alpha, beta),
            Bound::Upper
        );
    }

    /// Mate scores are stored relative to the node and restored relative to the root.
    #[test]
    fn test_mate_value_adjustment() {
        let v = Value::mate_in(7);
        let stored = value_to_tt(v, 3);
        assert_eq!(stored, Value::mate_in(4));
        assert_eq!(value_from_tt(stored, 3), v);
        assert_eq!(
            value_from_tt(value_to_tt(Value::new(35), 9), 9),
            Value::new(35)
        );
    }

    /// A store carrying only a static evaluation is found again with it.
    #[test]
    fn test_eval_only_entry() {
        let tt = TranspositionTable::new(1);
        let key = 0x0BAD_CAFE_0000_0001;
        let (_, _, idx) = tt.probe(key);
        tt.store(
            idx,
            key,
            Value::NONE,
            Bound::None,
            DEPTH_NONE,
            None,
            Value::new(77),
        );

        let (found, data, _) = tt.probe(key);
        assert!(found);
        assert_eq!(data.eval, Value::new(77));
        assert_eq!(data.value, Value::NONE);
        assert_eq!(data.bound, Bound::None);
        assert!(data.mv.is_none());
    }

    /// A zeroed slot is empty even for the key that matches its check word.
    #[test]
    fn test_cleared_slot_is_empty() {
        let entry = TTEntry::default();
        assert!(!entry.load_raw().is_occupied());
        assert!(entry.load_verified(0).is_none());

        let tt = TranspositionTable::new(1);
        assert_eq!(tt.hashfull(), 0);
    }

    /// A stored position is found again; an absent one is not.
    #[test]
    fn test_probe_and_store() {
        let tt = TranspositionTable::new(1);
        let key = 0x1234_5678_9ABC_DEF0;
        let (found, _, idx) = tt.probe(key);
        assert!(!found);

        tt.store(
            idx,
            key,
            Value::new(33),
            Bound::Exact,
            7,
            mv(Square::G1, Square::F3),
            Value::new(12),
        );
        let (found, data, idx2) = tt.probe(key);
        assert!(found);
        assert_eq!(idx, idx2);
        assert_eq!(data.value, Value::new(33));
        assert_eq!(data.depth, 7);
        assert_eq!(data.mv, mv(Square::G1, Square::F3));

        assert!(!tt.probe(key ^ 1).0);
    }

    /// Old-generation entries are preferred for replacement over fresh deep ones.
    #[test]
    fn test_generation_aging() {
        let tt = TranspositionTable::new(0);
        let base_key = 0xABCD_0000_0000_0000u64;
        let (_, _, idx) = tt.probe(base_key);
        tt.store(
            idx,
            base_key,
            Value::ZERO,
            Bound::Exact,
            20,
            None,
            Value::ZERO,
        );

        for _ in 0..5 {
            tt.new_search();
        }

        let data = tt.entries[idx].load_raw();
        assert_eq!(data.relative_age(tt.generation()), 5);
        assert!(data.depth - data.relative_age(tt.generation()) * 8 < 20);
    }

    #[test]
    fn test_clear_and_hashfull() {
        let tt = TranspositionTable::new(1);
        for i in 0..5_000u64 {
            let key = i.wrapping_mul(0x9E37_79B9_7F4A_7C15);
            let (_, _, idx) = tt.probe(key);
            tt.store(idx, key, Value::ZERO, Bound::Lower, 1, None, Value::ZERO);
        }
        assert!(tt.hashfull() > 0);
        tt.clear();
        assert_eq!(tt.hashfull(), 0);
        assert_eq!(tt.generation(), 0);
    }

    #[test]
    fn test_mul_hi64() {
        assert_eq!(TranspositionTable::mul_hi64(u64::MAX, 16), 15);
        assert_eq!(TranspositionTable::mul_hi64(0, 16), 0);
        assert_eq!(TranspositionTable::mul_hi64(1 << 63, 16), 8);
    }
}
