mod bench;
mod options;
mod output;
mod uci;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kestrel_core::position::Position;
use kestrel_core::search::options::SearchOptions;
use kestrel_core::types::Depth;

#[derive(Parser, Debug, Clone)]
struct EngineParams {
    /// Transposition table size in megabytes
    #[arg(long, default_value = "16")]
    hash: usize,

    #[arg(long)]
    threads: Option<usize>,

    /// Opening book built with the engine's book writer
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    book: Option<PathBuf>,
}

impl EngineParams {
    fn search_options(&self) -> SearchOptions {
        SearchOptions::new(self.hash)
            .with_threads(self.threads)
            .with_book(self.book.as_deref())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<SubCommands>,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    debug: bool,

    #[command(flatten)]
    engine_params: EngineParams,
}

#[derive(Debug, Subcommand)]
enum SubCommands {
    /// Search a fixed set of positions and report nodes per second
    Bench {
        #[arg(default_value = "10")]
        depth: Depth,

        #[command(flatten)]
        engine_params: EngineParams,
    },
    /// Count leaf nodes of the move tree, divided by root move
    Perft {
        depth: Depth,

        #[arg(long)]
        fen: Option<String>,
    },
}

fn init_logger(debug: bool) {
    let level = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, level),
    )
    .format(|buf, record| {
        writeln!(
            buf,
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        )
    })
    .write_style(env_logger::WriteStyle::Never)
    // stdout belongs to the protocol
    .target(env_logger::Target::Stderr)
    .init();
}

fn main() -> ExitCode {
    let args = Cli::parse();
    init_logger(args.debug);
    kestrel_core::init();

    match args.command {
        Some(SubCommands::Bench {
            depth,
            engine_params,
        }) => {
            bench::run(&engine_params.search_options(), depth);
        }
        Some(SubCommands::Perft { depth, fen }) => {
            let pos = match fen.as_deref().map(Position::from_fen).transpose() {
                Ok(pos) => pos.unwrap_or_default(),
                Err(err) => {
                    eprintln!("{err}");
                    return ExitCode::FAILURE;
                }
            };
            bench::perft(pos, depth);
        }
        None => {
            let mut engine = uci::UciEngine::new(args.engine_params.search_options());
            engine.run();
        }
    }
    ExitCode::SUCCESS
}
