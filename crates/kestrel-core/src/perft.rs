use chess::ChessMove;

use crate::move_list::MoveList;
use crate::position::Position;
use crate::types::Depth;

/// Executes a perft run starting from the standard initial position.
///
/// # Arguments
///
/// * `depth` - Number of plies to expand from the initial position. A depth of
///   `1` counts the immediate legal moves; larger values walk the tree
///   recursively.
///
/// # Returns
///
/// The total node count the search visits from the initial position.
pub fn perft_root(depth: Depth) -> u64 {
    let mut pos = Position::startpos();
    perft(&mut pos, depth)
}

/// Counts the leaves of the legal move tree of `depth` plies below `pos`.
/// The position is restored before returning.
pub fn perft(pos: &mut Position, depth: Depth) -> u64 {
    if depth <= 0 {
        return 1;
    }

    let move_list = MoveList::new(pos);
    if depth == 1 {
        return move_list.count() as u64;
    }

    let mut nodes = 0;
    for m in move_list.iter() {
        pos.do_move(m.mv);
        nodes += perft(pos, depth - 1);
        pos.undo_move();
    }
    nodes
}

/// Per-move leaf counts of a perft run, in move generation order.
pub fn perft_divide(pos: &mut Position, depth: Depth) -> Vec<(ChessMove, u64)> {
    let move_list = MoveList::new(pos);
    move_list
        .iter()
        .map(|m| {
            pos.do_move(m.mv);
            let nodes = perft(pos, depth - 1);
            pos.undo_move();
            (m.mv, nodes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divide_sums_to_total() {
        let mut pos = Position::startpos();
        let divide = perft_divide(&mut pos, 3);
        assert_eq!(divide.len(), 20);
        assert_eq!(
            divide.iter().map(|(_, n)| n).sum::<u64>(),
            perft(&mut pos, 3)
        );
    }

    #[test]
    fn test_zero_depth_is_one_node() {
        let mut pos = Position::startpos();
        assert_eq!(perft(&mut pos, 0), 1);
    }
}
