//! Exact results for material configurations that cannot be won.

use crate::position::Position;
use crate::types::Value;

/// Returns the exact value of `pos` when it is a known endgame.
///
/// Only dead-drawn material is recognized: bare kings, a single minor piece,
/// and bishops confined to one square colour.
#[inline]
pub fn probe(pos: &Position) -> Option<Value> {
    pos.has_insufficient_material().then_some(Value::DRAW)
}
