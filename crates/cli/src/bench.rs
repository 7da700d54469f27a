//! Fixed-depth benchmark and perft runners.

use std::time::{Duration, Instant};

use kestrel_core::perft::perft_divide;
use kestrel_core::position::Position;
use kestrel_core::search::Search;
use kestrel_core::search::limits::SearchLimits;
use kestrel_core::search::options::SearchOptions;
use kestrel_core::types::Depth;
use num_format::{Locale, ToFormattedString};

/// Middlegame and endgame positions searched by `bench`.
const BENCH_FENS: &[&str] = &[
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
    "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 10",
    "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 11",
    "4rrk1/pp1n3p/3q2pQ/2p1pb2/2PP4/2P3N1/P2B2PP/4RRK1 b - - 7 19",
    "rq3rk1/ppp2ppp/1bnpb3/3N2B1/3NP3/7P/PPPQ1PP1/2KR3R w - - 7 14",
    "r1bq1r1k/1pp1n1pp/1p1p4/4p2Q/4Pp2/1BNP4/PPP2PPP/3R1RK1 w - - 2 14",
    "r3r1k1/2p2ppp/p1p1bn2/8/1q2P3/2NPQN2/PPP3PP/R4RK1 b - - 2 15",
    "r1bbk1nr/pp3p1p/2n5/1N4p1/2Np1B2/8/PPP2PPP/2KR1B1R w kq - 0 13",
    "r1bq1rk1/ppp1nppp/4n3/3p3Q/3P4/1BP1B3/PP1N2PP/R4RK1 w - - 1 16",
    "4r1k1/r1q2ppp/ppp2n2/4P3/5Rb1/1N1BQ3/PPP3PP/R5K1 w - - 1 17",
    "6k1/6p1/6Pp/ppp5/3pn2P/1P3K2/1PP2P2/3N4 b - - 0 1",
    "3b4/5kp1/1p1p1p1p/pP1PpP1P/P1P1P3/3KN3/8/8 w - - 0 1",
    "8/8/8/8/5kp1/P7/8/1K1N4 w - - 0 80",
    "8/6pk/1p6/8/PP3p1p/5P2/4KP1q/3Q4 w - - 0 1",
];

fn nps(nodes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { (nodes as f64 / secs).round() as u64 } else { 0 }
}

/// Searches every bench position to `depth` and prints a summary table.
///
/// # Arguments
/// * `search_options` - Hash size and thread count
/// * `depth` - Search depth for each position
pub fn run(search_options: &SearchOptions, depth: Depth) {
    let mut search = Search::new(search_options);
    let mut total_nodes = 0u64;
    let mut total_time = Duration::ZERO;

    println!(
        "| {:^3} | {:^5} | {:^9} | {:^14} | {:^13} | {:<6} | {:>9} |",
        "#", "Depth", "Time(s)", "Nodes", "NPS", "Move", "Score"
    );
    println!("|----:|------:|----------:|---------------:|--------------:|:-------|----------:|");

    for (i, fen) in BENCH_FENS.iter().enumerate() {
        let pos = match Position::from_fen(fen) {
            Ok(pos) => pos,
            Err(e) => {
                log::error!("bench position {}: {e}", i + 1);
                continue;
            }
        };
        search.clear();

        let start = Instant::now();
        let result = search.run(&pos, SearchLimits::with_depth(depth), None);
        let elapsed = start.elapsed();

        total_nodes += result.n_nodes;
        total_time += elapsed;

        let best = result
            .best_move
            .map_or_else(|| "(none)".to_string(), |mv| mv.to_string());
        println!(
            "| {:>3} | {:>5} | {:>9.4} | {:>14} | {:>13} | {:<6} | {:>9} |",
            i + 1,
            result.depth,
            elapsed.as_secs_f64(),
            result.n_nodes.to_formatted_string(&Locale::en),
            nps(result.n_nodes, elapsed).to_formatted_string(&Locale::en),
            best,
            result.score.to_string()
        );
    }

    println!();
    println!("- Total time : {:.4}s", total_time.as_secs_f64());
    println!(
        "- Total nodes: {}",
        total_nodes.to_formatted_string(&Locale::en)
    );
    println!(
        "- NPS        : {}",
        nps(total_nodes, total_time).to_formatted_string(&Locale::en)
    );
}

/// Prints the per-move node counts and their total.
pub fn perft(mut pos: Position, depth: Depth) {
    let start = Instant::now();
    let divide = perft_divide(&mut pos, depth);
    let elapsed = start.elapsed();

    for (mv, nodes) in &divide {
        println!("{mv}: {nodes}");
    }
    let total: u64 = divide.iter().map(|(_, n)| n).sum();
    println!();
    println!("Nodes searched: {}", total.to_formatted_string(&Locale::en));
    println!(
        "Time: {:.3}s ({} nps)",
        elapsed.as_secs_f64(),
        nps(total, elapsed).to_formatted_string(&Locale::en)
    );
}
