pub mod book;
pub mod constants;
pub mod eval;
pub mod move_list;
pub mod perft;
pub mod position;
pub mod search;
pub mod stats;
pub mod transposition_table;
pub mod types;
mod util;

pub use chess::{ChessMove, Color};

const ENGINE_NAME: &str = "Kestrel";
const ENGINE_AUTHORS: &str = "the Kestrel developers";

pub fn init() {
    search::init();
}

/// Engine name and version, or the `id` lines of the `uci` handshake when
/// `to_uci` is set.
pub fn engine_info(to_uci: bool) -> String {
    let version = env!("CARGO_PKG_VERSION");
    if to_uci {
        format!("id name {ENGINE_NAME} {version}\nid author {ENGINE_AUTHORS}")
    } else {
        format!("{ENGINE_NAME} {version} by {ENGINE_AUTHORS}")
    }
}
