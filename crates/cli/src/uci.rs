//! UCI protocol loop.

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use kestrel_core::engine_info;
use kestrel_core::perft::perft_divide;
use kestrel_core::position::{Position, PositionError};
use kestrel_core::search::limits::SearchLimits;
use kestrel_core::search::options::SearchOptions;
use kestrel_core::search::search_result::SearchResult;
use kestrel_core::search::{IterationInfo, Search, SearchProgress, SearchProgressCallback};
use kestrel_core::transposition_table::Bound;
use kestrel_core::types::Depth;
use kestrel_core::{ChessMove, Color};
use thiserror::Error;

use crate::options::{OptionValue, OptionsMap};
use crate::output::Output;

#[derive(Debug, Error)]
pub enum UciError {
    #[error(transparent)]
    Position(#[from] PositionError),

    #[error("missing value after `{0}`")]
    MissingValue(String),

    #[error("invalid value `{value}` for `{token}`")]
    InvalidValue { token: String, value: String },
}

/// A parsed `go` command.
#[derive(Debug)]
pub enum GoCommand {
    Search(SearchLimits),
    Perft(Depth),
}

pub struct UciEngine {
    search: Search,
    options: OptionsMap,
    position: Position,
    output: Arc<Output>,
    /// Waits for the running search and prints its `bestmove`.
    reporter: Option<JoinHandle<()>>,
}

impl UciEngine {
    pub fn new(search_options: SearchOptions) -> Self {
        Self {
            search: Search::new(&search_options),
            options: OptionsMap::new(&search_options),
            position: Position::startpos(),
            output: Arc::new(Output::new()),
            reporter: None,
        }
    }

    pub fn run(&mut self) {
        let stdin = io::stdin();

        for line in stdin.lock().lines() {
            match line {
                Ok(input) => {
                    let input = input.trim();
                    if input.is_empty() {
                        continue;
                    }
                    self.output.log_input(input);

                    if !self.handle_command(input) {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("error reading input: {e}");
                    break;
                }
            }
        }

        self.search.stop();
        self.join_reporter();
    }

    /// Handles one input line. Returns `false` on `quit`.
    fn handle_command(&mut self, input: &str) -> bool {
        let mut tokens = input.split_whitespace();
        let Some(cmd) = tokens.next() else {
            return true;
        };
        let args: Vec<&str> = tokens.collect();

        match cmd {
            "uci" => {
                self.output.line(&engine_info(true));
                self.output.line(&self.options.to_string());
                self.output.line("uciok");
            }
            "isready" => self.output.line("readyok"),
            "setoption" => self.set_option(&args),
            "ucinewgame" => {
                self.wait_for_search();
                self.search.clear();
            }
            "position" => match parse_position(&args) {
                Ok(pos) => self.position = pos,
                Err(e) => self.info_string(&e.to_string()),
            },
            "go" => match parse_go(&args, &self.position) {
                Ok(GoCommand::Search(limits)) => self.go(limits),
                Ok(GoCommand::Perft(depth)) => {
                    self.wait_for_search();
                    self.perft(depth);
                }
                Err(e) => self.info_string(&e.to_string()),
            },
            "stop" => {
                self.search.stop();
                self.join_reporter();
            }
            "ponderhit" => self.search.ponderhit(),
            "quit" => return false,
            "d" => {
                self.output.line(&format!("Fen: {}", self.position.fen()));
                self.output.line(&format!("Key: {:016X}", self.position.key()));
            }
            _ => self.info_string(&format!("unknown command: {input}")),
        }
        true
    }

    fn info_string(&self, text: &str) {
        log::warn!("{text}");
        self.output.line(&format!("info string {text}"));
    }

    /// `setoption name <id> [value <x>]`, names may contain spaces.
    fn set_option(&mut self, args: &[&str]) {
        let value_at = args.iter().position(|&t| t == "value");
        let name_end = value_at.unwrap_or(args.len());
        let name = args
            .get(1..name_end)
            .map(|n| n.join(" "))
            .unwrap_or_default();
        let value = value_at
            .map(|i| args[i + 1..].join(" "))
            .unwrap_or_default();

        match self.options.set(&name, &value) {
            Ok((name, value)) => {
                self.wait_for_search();
                self.apply_option(name, value);
            }
            Err(e) => self.info_string(&e.to_string()),
        }
    }

    fn apply_option(&mut self, name: &str, value: OptionValue) {
        match (name, value) {
            ("Clear Hash", _) => self.search.clear(),
            ("UCI_Chess960", OptionValue::Check(enabled)) => {
                if enabled {
                    self.info_string("only standard chess is supported");
                }
            }
            ("Debug Log File", OptionValue::Text(path)) => {
                let path = (!path.is_empty()).then(|| Path::new(&path).to_path_buf());
                if let Err(e) = self.output.set_log_file(path.as_deref()) {
                    self.info_string(&format!("cannot open log file: {e}"));
                }
            }
            _ => self.search.set_options(self.options.search_options()),
        }
    }

    fn go(&mut self, limits: SearchLimits) {
        self.wait_for_search();

        let output = self.output.clone();
        let callback: Arc<SearchProgressCallback> = Arc::new(move |progress| {
            output.line(&format_progress(&progress));
        });

        let receiver = self
            .search
            .start_thinking(&self.position, limits, Some(callback));

        let output = self.output.clone();
        self.reporter = Some(std::thread::spawn(move || {
            match receiver.recv() {
                Ok(result) => output.line(&format_bestmove(&result)),
                Err(_) => log::error!("search ended without a result"),
            }
        }));
    }

    fn perft(&self, depth: Depth) {
        let start = Instant::now();
        let mut pos = self.position.clone();
        let divide = perft_divide(&mut pos, depth);
        let mut lines: Vec<String> = divide.iter().map(|(mv, n)| format!("{mv}: {n}")).collect();
        let total: u64 = divide.iter().map(|(_, n)| n).sum();
        lines.push(String::new());
        lines.push(format!("Nodes searched: {total}"));
        lines.push(format!("Time: {} ms", start.elapsed().as_millis()));
        self.output.line(&lines.join("\n"));
    }

    /// Blocks until the current search, if any, has reported.
    fn wait_for_search(&mut self) {
        if self.search.is_thinking() {
            log::debug!("waiting for the running search");
        }
        self.search.wait_for_search_finished();
        self.join_reporter();
    }

    fn join_reporter(&mut self) {
        if let Some(handle) = self.reporter.take()
            && handle.join().is_err()
        {
            log::error!("bestmove reporter panicked");
        }
    }
}

/// `position (startpos | fen <fen>) [moves <m1> ...]`
pub fn parse_position(args: &[&str]) -> Result<Position, UciError> {
    let moves_at = args.iter().position(|&t| t == "moves");
    let setup = &args[..moves_at.unwrap_or(args.len())];

    let mut pos = match setup.first() {
        Some(&"startpos") => Position::startpos(),
        Some(&"fen") => Position::from_fen(&setup[1..].join(" "))?,
        _ => return Err(UciError::MissingValue("position".to_string())),
    };

    if let Some(i) = moves_at {
        for text in &args[i + 1..] {
            let mv = pos.parse_move(text)?;
            pos.do_move(mv);
        }
    }
    pos.truncate_history();
    Ok(pos)
}

fn next_value<'a, T: std::str::FromStr>(
    tokens: &mut impl Iterator<Item = &'a str>,
    token: &str,
) -> Result<T, UciError> {
    let value = tokens
        .next()
        .ok_or_else(|| UciError::MissingValue(token.to_string()))?;
    value.parse().map_err(|_| UciError::InvalidValue {
        token: token.to_string(),
        value: value.to_string(),
    })
}

/// Parses the arguments of `go`. `searchmoves` consumes every following
/// token that is a legal move in `pos`.
pub fn parse_go(args: &[&str], pos: &Position) -> Result<GoCommand, UciError> {
    let mut limits = SearchLimits {
        start_time: Instant::now(),
        ..Default::default()
    };
    let white = Color::White.to_index();
    let black = Color::Black.to_index();

    let mut tokens = args.iter().copied().peekable();
    while let Some(token) = tokens.next() {
        match token {
            "wtime" => limits.time[white] = next_value::<i64>(&mut tokens, token)?.max(0) as u64,
            "btime" => limits.time[black] = next_value::<i64>(&mut tokens, token)?.max(0) as u64,
            "winc" => limits.inc[white] = next_value::<i64>(&mut tokens, token)?.max(0) as u64,
            "binc" => limits.inc[black] = next_value::<i64>(&mut tokens, token)?.max(0) as u64,
            "movestogo" => limits.moves_to_go = next_value(&mut tokens, token)?,
            "depth" => limits.depth = Some(next_value(&mut tokens, token)?),
            "nodes" => limits.nodes = Some(next_value(&mut tokens, token)?),
            "movetime" => limits.movetime = Some(next_value(&mut tokens, token)?),
            "mate" => limits.mate = Some(next_value(&mut tokens, token)?),
            "infinite" => limits.infinite = true,
            "ponder" => limits.ponder = true,
            "perft" => return Ok(GoCommand::Perft(next_value(&mut tokens, token)?)),
            "searchmoves" => {
                while let Some(mv) = tokens.peek().and_then(|t| pos.parse_move(t).ok()) {
                    limits.search_moves.push(mv);
                    tokens.next();
                }
            }
            _ => log::debug!("ignoring go token `{token}`"),
        }
    }
    Ok(GoCommand::Search(limits))
}

fn format_pv(pv: &[ChessMove]) -> String {
    pv.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn format_info(info: &IterationInfo) -> String {
    let bound = match info.bound {
        Some(Bound::Lower) => " lowerbound",
        Some(Bound::Upper) => " upperbound",
        _ => "",
    };
    format!(
        "info depth {} seldepth {} multipv {} score {}{} nodes {} nps {} hashfull {} time {} pv {}",
        info.depth,
        info.sel_depth,
        info.multi_pv,
        info.score,
        bound,
        info.nodes,
        info.nps,
        info.hashfull,
        info.time_ms,
        format_pv(&info.pv)
    )
}

pub fn format_progress(progress: &SearchProgress) -> String {
    match progress {
        SearchProgress::Iteration(info) => format_info(info),
        SearchProgress::CurrentMove {
            depth,
            mv,
            move_number,
        } => format!("info depth {depth} currmove {mv} currmovenumber {move_number}"),
    }
}

pub fn format_bestmove(result: &SearchResult) -> String {
    match (result.best_move, result.ponder_move) {
        (Some(best), Some(ponder)) => format!("bestmove {best} ponder {ponder}"),
        (Some(best), None) => format!("bestmove {best}"),
        (None, _) => "bestmove (none)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::types::Value;

    #[test]
    fn test_parse_position_with_moves() {
        let pos = parse_position(&["startpos", "moves", "e2e4", "e7e5"]).unwrap();
        assert_eq!(pos.side_to_move(), Color::White);
        assert_eq!(pos.game_ply(), 2);
        assert!(pos.fen().starts_with("rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w"));

        let fen = ["fen", "8/8/4k3/8/8/3K4/8/8", "w", "-", "-", "0", "1"];
        assert!(parse_position(&fen).is_ok());
        assert!(parse_position(&["startpos", "moves", "e2e5"]).is_err());
        assert!(parse_position(&[]).is_err());
    }

    #[test]
    fn test_parse_go_clock() {
        let pos = Position::startpos();
        let args = [
            "wtime", "60000", "btime", "-50", "winc", "1000", "movestogo", "20",
        ];
        let Ok(GoCommand::Search(limits)) = parse_go(&args, &pos) else {
            panic!("expected a search");
        };
        assert_eq!(limits.time, [60_000, 0]);
        assert_eq!(limits.inc, [1_000, 0]);
        assert_eq!(limits.moves_to_go, 20);
        assert!(limits.use_time_management());
    }

    #[test]
    fn test_parse_go_search_moves_and_perft() {
        let pos = Position::startpos();
        let args = ["searchmoves", "e2e4", "d2d4", "depth", "5"];
        let Ok(GoCommand::Search(limits)) = parse_go(&args, &pos) else {
            panic!("expected a search");
        };
        assert_eq!(limits.search_moves.len(), 2);
        assert_eq!(limits.depth, Some(5));

        assert!(matches!(parse_go(&["perft", "3"], &pos), Ok(GoCommand::Perft(3))));
        assert!(matches!(parse_go(&["depth"], &pos), Err(UciError::MissingValue(_))));
        assert!(matches!(
            parse_go(&["nodes", "many"], &pos),
            Err(UciError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_format_info_and_bestmove() {
        let pos = Position::startpos();
        let e4 = pos.parse_move("e2e4").unwrap();
        let e3 = pos.parse_move("e2e3").unwrap();
        let info = IterationInfo {
            depth: 7,
            sel_depth: 11,
            multi_pv: 1,
            score: Value::new(23),
            bound: Some(Bound::Lower),
            nodes: 12_345,
            nps: 500_000,
            hashfull: 4,
            time_ms: 24,
            pv: vec![e4],
        };
        assert_eq!(
            format_info(&info),
            "info depth 7 seldepth 11 multipv 1 score cp 23 lowerbound nodes 12345 nps 500000 hashfull 4 time 24 pv e2e4"
        );

        let result = SearchResult {
            best_move: Some(e4),
            ponder_move: Some(e3),
            ..Default::default()
        };
        assert_eq!(format_bestmove(&result), "bestmove e2e4 ponder e2e3");
        assert_eq!(format_bestmove(&SearchResult::default()), "bestmove (none)");
    }
}
