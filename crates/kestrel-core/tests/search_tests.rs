use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};

use kestrel_core::position::Position;
use kestrel_core::search::limits::SearchLimits;
use kestrel_core::search::options::SearchOptions;
use kestrel_core::search::{Search, SearchProgress, SearchProgressCallback};
use kestrel_core::types::Value;

fn new_search(n_threads: usize) -> Search {
    Search::new(&SearchOptions::new(8).with_threads(Some(n_threads)))
}

fn is_legal_move(pos: &Position, mv: Option<kestrel_core::ChessMove>) -> bool {
    mv.is_some_and(|mv| pos.legal_moves().any(|m| m == mv))
}

#[test]
fn test_single_legal_move_at_depth_one() {
    // The rook covers the second rank, so only Kg1 is legal.
    let pos = Position::from_fen("7k/8/8/8/8/8/r7/7K w - - 0 1").unwrap();
    assert_eq!(pos.legal_moves().len(), 1);

    let search = new_search(1);
    let result = search.run(&pos, SearchLimits::with_depth(1), None);
    assert_eq!(
        result.best_move.map(|m| m.to_string()).as_deref(),
        Some("h1g1")
    );
    assert_eq!(result.depth, 1);
}

#[test]
fn test_movetime_zero_returns_move() {
    let pos = Position::startpos();
    let search = new_search(1);
    let result = search.run(&pos, SearchLimits::with_movetime(0), None);
    assert!(is_legal_move(&pos, result.best_move));
    assert!(result.depth >= 1);
}

#[test]
fn test_stop_right_after_start() {
    let pos = Position::startpos();
    let search = new_search(2);
    let receiver = search.start_thinking(&pos, SearchLimits::infinite(), None);
    search.stop();
    let result = receiver.recv().unwrap();
    assert!(is_legal_move(&pos, result.best_move));
}

#[test]
fn test_stop_is_honoured_promptly() {
    let pos = Position::startpos();
    let search = new_search(2);
    let receiver = search.start_thinking(&pos, SearchLimits::infinite(), None);
    sleep(Duration::from_millis(100));

    let stopped_at = Instant::now();
    search.stop();
    let result = receiver.recv().unwrap();
    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert!(is_legal_move(&pos, result.best_move));
}

#[test]
fn test_finds_back_rank_mate() {
    let pos = Position::from_fen("6k1/5ppp/8/8/8/8/5PPP/3QR1K1 w - - 0 1").unwrap();
    let search = new_search(1);
    let result = search.run(&pos, SearchLimits::with_depth(5), None);
    assert!(result.score.is_mate());
    assert!(result.score > Value::ZERO);
    assert_eq!(result.score.mate_moves(), 1);
}

#[test]
fn test_mate_limit_stops_early() {
    let pos = Position::from_fen("6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1").unwrap();
    let search = new_search(1);
    let limits = SearchLimits {
        mate: Some(1),
        ..Default::default()
    };
    let result = search.run(&pos, limits, None);
    assert_eq!(
        result.best_move.map(|m| m.to_string()).as_deref(),
        Some("a1a8")
    );
    assert_eq!(result.score, Value::mate_in(1));
}

#[test]
fn test_checkmated_root_has_no_move() {
    let pos = Position::from_fen("R5k1/5ppp/8/8/8/8/8/6K1 b - - 0 1").unwrap();
    let search = new_search(1);
    let result = search.run(&pos, SearchLimits::with_depth(3), None);
    assert!(result.best_move.is_none());
    assert_eq!(result.score, Value::mated_in(0));
}

#[test]
fn test_multi_pv_sorted_descending() {
    let pos = Position::startpos();
    let search = Search::new(&SearchOptions::new(8).with_threads(Some(1)).with_multi_pv(3));
    let result = search.run(&pos, SearchLimits::with_depth(4), None);

    let top: Vec<Value> = result.pv_moves.iter().take(3).map(|pv| pv.score).collect();
    assert_eq!(top.len(), 3);
    assert!(top.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(result.best_move, Some(result.pv_moves[0].mv));
}

#[test]
fn test_search_moves_restrict_root() {
    let pos = Position::startpos();
    let only = pos.parse_move("a2a3").unwrap();
    let search = new_search(1);
    let limits = SearchLimits {
        depth: Some(3),
        search_moves: vec![only],
        ..Default::default()
    };
    let result = search.run(&pos, limits, None);
    assert_eq!(result.best_move, Some(only));
}

#[test]
fn test_node_limit() {
    let pos = Position::startpos();
    let search = new_search(1);
    let limits = SearchLimits {
        nodes: Some(20_000),
        ..Default::default()
    };
    let result = search.run(&pos, limits, None);
    assert!(is_legal_move(&pos, result.best_move));
    // The limit is checked every 1024 nodes; the first iteration always completes.
    assert!(result.n_nodes < 20_000 + 50_000);
}

#[test]
fn test_clock_search_returns_in_time() {
    let pos = Position::startpos();
    let search = new_search(2);
    let limits = SearchLimits {
        time: [1_000, 1_000],
        ..Default::default()
    };
    let start = Instant::now();
    let result = search.run(&pos, limits, None);
    assert!(is_legal_move(&pos, result.best_move));
    assert!(start.elapsed() < Duration::from_millis(1_000));
}

#[test]
fn test_progress_reports_each_depth() {
    let pos = Position::startpos();
    let search = new_search(1);
    let depths = Arc::new(Mutex::new(Vec::new()));
    let sink = depths.clone();
    let callback: Arc<SearchProgressCallback> = Arc::new(move |progress: SearchProgress| {
        if let SearchProgress::Iteration(info) = progress {
            sink.lock().unwrap().push(info.depth);
        }
    });

    search.run(&pos, SearchLimits::with_depth(4), Some(callback));
    let depths = depths.lock().unwrap();
    assert_eq!(*depths, vec![1, 2, 3, 4]);
}

#[test]
fn test_ponder_waits_for_ponderhit() {
    let pos = Position::startpos();
    let search = new_search(1);
    let limits = SearchLimits {
        depth: Some(2),
        ponder: true,
        ..Default::default()
    };
    let receiver = search.start_thinking(&pos, limits, None);
    sleep(Duration::from_millis(50));
    assert!(receiver.try_recv().is_err());

    search.ponderhit();
    let result = receiver.recv().unwrap();
    assert!(is_legal_move(&pos, result.best_move));
}

#[test]
fn test_clear_and_search_again() {
    let pos = Position::startpos();
    let mut search = new_search(2);
    let first = search.run(&pos, SearchLimits::with_depth(3), None);
    search.clear();
    let second = search.run(&pos, SearchLimits::with_depth(3), None);
    assert!(is_legal_move(&pos, first.best_move));
    assert!(is_legal_move(&pos, second.best_move));
}

#[test]
fn test_perft_through_search() {
    let mut pos = Position::startpos();
    let search = new_search(1);
    assert_eq!(search.perft(&mut pos, 3), 8_902);
}

/// With nodes as time the clock is a node budget and the search still reports.
#[test]
fn test_nodes_as_time_search() {
    let pos = Position::startpos();
    let options = SearchOptions::new(8)
        .with_threads(Some(1))
        .with_nodestime(50);
    let search = Search::new(&options);
    let limits = SearchLimits {
        time: [2_000, 2_000],
        ..Default::default()
    };
    let result = search.run(&pos, limits, None);
    assert!(is_legal_move(&pos, result.best_move));
    assert!(result.n_nodes <= 2_000 * 50);
}
