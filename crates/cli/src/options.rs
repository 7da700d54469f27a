//! Engine options exposed through `setoption`.

use std::fmt;

use kestrel_core::constants::MAX_THREADS;
use kestrel_core::search::options::SearchOptions;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionError {
    #[error("no such option: {0}")]
    Unknown(String),

    #[error("invalid value `{value}` for option {name}")]
    InvalidValue { name: String, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionValue {
    Check(bool),
    Spin(i64),
    Button,
    Text(String),
}

#[derive(Clone, Debug)]
enum OptionKind {
    Check { default: bool },
    Spin { default: i64, min: i64, max: i64 },
    Button,
    Text { default: String },
}

#[derive(Clone, Debug)]
struct UciOption {
    name: &'static str,
    kind: OptionKind,
    value: OptionValue,
}

/// Options in declaration order. Lookup ignores case, as the protocol asks.
pub struct OptionsMap {
    options: Vec<UciOption>,
}

impl OptionsMap {
    /// Declares every option with defaults taken from `defaults`.
    pub fn new(defaults: &SearchOptions) -> Self {
        let mut map = OptionsMap { options: Vec::new() };
        map.spin("Hash", defaults.tt_mb_size as i64, 1, 65_536);
        map.button("Clear Hash");
        map.spin("Threads", defaults.n_threads as i64, 1, MAX_THREADS as i64);
        map.spin("MultiPV", defaults.multi_pv as i64, 1, 500);
        map.check("Ponder", defaults.ponder);
        map.spin("Move Overhead", defaults.move_overhead as i64, 0, 5_000);
        map.spin(
            "Minimum Thinking Time",
            defaults.min_thinking_time as i64,
            0,
            5_000,
        );
        map.spin("Slow Mover", defaults.slow_mover as i64, 10, 1_000);
        map.spin("nodestime", defaults.nodestime as i64, 0, 10_000);
        map.check("OwnBook", defaults.own_book);
        map.text(
            "Book File",
            defaults
                .book_path
                .as_ref()
                .map_or_else(String::new, |p| p.display().to_string()),
        );
        map.check("Best Book Move", defaults.best_book_move);
        map.text("Debug Log File", String::new());
        map.check("UCI_Chess960", false);
        map
    }

    fn spin(&mut self, name: &'static str, default: i64, min: i64, max: i64) {
        self.push(
            name,
            OptionKind::Spin { default, min, max },
            OptionValue::Spin(default),
        );
    }

    fn check(&mut self, name: &'static str, default: bool) {
        self.push(
            name,
            OptionKind::Check { default },
            OptionValue::Check(default),
        );
    }

    fn button(&mut self, name: &'static str) {
        self.push(name, OptionKind::Button, OptionValue::Button);
    }

    fn text(&mut self, name: &'static str, default: String) {
        let value = OptionValue::Text(default.clone());
        self.push(name, OptionKind::Text { default }, value);
    }

    fn push(&mut self, name: &'static str, kind: OptionKind, value: OptionValue) {
        self.options.push(UciOption { name, kind, value });
    }

    fn find(&self, name: &str) -> Option<&UciOption> {
        self.options
            .iter()
            .find(|o| o.name.eq_ignore_ascii_case(name))
    }

    /// Parses and stores `value`. Returns the canonical option name and the
    /// parsed value so the caller can apply it.
    pub fn set(
        &mut self,
        name: &str,
        value: &str,
    ) -> Result<(&'static str, OptionValue), OptionError> {
        let option = self
            .options
            .iter_mut()
            .find(|o| o.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| OptionError::Unknown(name.to_string()))?;

        let invalid = || OptionError::InvalidValue {
            name: option.name.to_string(),
            value: value.to_string(),
        };
        let parsed = match &option.kind {
            OptionKind::Check { .. } => match value.to_ascii_lowercase().as_str() {
                "true" => OptionValue::Check(true),
                "false" => OptionValue::Check(false),
                _ => return Err(invalid()),
            },
            OptionKind::Spin { min, max, .. } => match value.parse::<i64>() {
                Ok(v) if (*min..=*max).contains(&v) => OptionValue::Spin(v),
                _ => return Err(invalid()),
            },
            OptionKind::Button => OptionValue::Button,
            OptionKind::Text { .. } => OptionValue::Text(value.to_string()),
        };

        option.value = parsed.clone();
        Ok((option.name, parsed))
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.find(name).map(|o| &o.value)
    }

    fn spin_value(&self, name: &str) -> i64 {
        match self.get(name) {
            Some(OptionValue::Spin(v)) => *v,
            _ => 0,
        }
    }

    fn check_value(&self, name: &str) -> bool {
        matches!(self.get(name), Some(OptionValue::Check(true)))
    }

    fn text_value(&self, name: &str) -> &str {
        match self.get(name) {
            Some(OptionValue::Text(v)) => v,
            _ => "",
        }
    }

    /// Engine options reflecting the current values.
    pub fn search_options(&self) -> SearchOptions {
        let book = self.text_value("Book File");
        SearchOptions {
            tt_mb_size: self.spin_value("Hash") as usize,
            n_threads: self.spin_value("Threads") as usize,
            multi_pv: self.spin_value("MultiPV") as usize,
            move_overhead: self.spin_value("Move Overhead") as u64,
            min_thinking_time: self.spin_value("Minimum Thinking Time") as u64,
            slow_mover: self.spin_value("Slow Mover") as u64,
            nodestime: self.spin_value("nodestime") as u64,
            ponder: self.check_value("Ponder"),
            own_book: self.check_value("OwnBook"),
            book_path: (!book.is_empty()).then(|| book.into()),
            best_book_move: self.check_value("Best Book Move"),
        }
    }
}

impl fmt::Display for OptionsMap {
    /// The `option name ... type ...` lines of the `uci` handshake.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, option) in self.options.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "option name {} type ", option.name)?;
            match &option.kind {
                OptionKind::Check { default } => write!(f, "check default {default}")?,
                OptionKind::Spin { default, min, max } => {
                    write!(f, "spin default {default} min {min} max {max}")?
                }
                OptionKind::Button => write!(f, "button")?,
                OptionKind::Text { default } if default.is_empty() => {
                    write!(f, "string default <empty>")?
                }
                OptionKind::Text { default } => write!(f, "string default {default}")?,
            }
        }
        Ok(())
    }
}
