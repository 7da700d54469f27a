use kestrel_core::perft::{perft, perft_divide, perft_root};
use kestrel_core::position::Position;

#[test]
fn test_perft() {
    let nodes = perft_root(4);
    assert_eq!(nodes, 197_281);
}

#[test]
fn test_perft_kiwipete() {
    let mut pos = Position::from_fen(
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    )
    .unwrap();
    assert_eq!(perft(&mut pos, 1), 48);
    assert_eq!(perft(&mut pos, 2), 2_039);
    assert_eq!(perft(&mut pos, 3), 97_862);
}

#[test]
fn test_perft_endgame_en_passant() {
    let mut pos = Position::from_fen("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1").unwrap();
    assert_eq!(perft(&mut pos, 4), 43_238);
}

/// Divide counts add up, and the position is unchanged afterwards.
#[test]
fn test_perft_divide_consistent() {
    let mut pos = Position::startpos();
    let key = pos.key();
    let divide = perft_divide(&mut pos, 3);
    assert_eq!(divide.iter().map(|&(_, n)| n).sum::<u64>(), 8_902);
    assert_eq!(pos.key(), key);
}
