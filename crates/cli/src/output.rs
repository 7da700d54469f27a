//! Serialized protocol output.
//!
//! The input loop, the search callback and the bestmove reporter all write
//! to stdout from different threads. Every write goes through one lock so
//! that multi-line blocks are never interleaved.

use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

struct Sink {
    stdout: Stdout,
    /// Copy of the traffic in both directions, for debugging a GUI session.
    log: Option<File>,
}

impl Sink {
    /// A failed write closes the session log; stdout is unaffected.
    fn write_log(&mut self, direction: &str, text: &str) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        if let Err(err) = writeln!(log, "{direction} {text}") {
            log::warn!("failed to write the session log, closing it: {err}");
            self.log = None;
        }
    }
}

pub struct Output {
    sink: Mutex<Sink>,
}

impl Output {
    pub fn new() -> Self {
        Output {
            sink: Mutex::new(Sink {
                stdout: io::stdout(),
                log: None,
            }),
        }
    }

    /// Starts (or with `None`, stops) logging the session to `path`.
    pub fn set_log_file(&self, path: Option<&Path>) -> io::Result<()> {
        let file = match path {
            Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
            None => None,
        };
        self.lock().log = file;
        Ok(())
    }

    /// Writes `text` followed by a newline and flushes.
    pub fn line(&self, text: &str) {
        let mut sink = self.lock();
        let result = writeln!(sink.stdout, "{text}")
            .and_then(|_| sink.stdout.flush());
        if let Err(err) = result {
            log::warn!("failed to write to stdout: {err}");
        }
        for l in text.lines() {
            sink.write_log(">>", l);
        }
    }

    /// Records a command received from the GUI in the session log.
    pub fn log_input(&self, text: &str) {
        self.lock().write_log("<<", text);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Sink> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_log() {
        let path = std::env::temp_dir().join(format!("kestrel-log-{}.txt", std::process::id()));
        let output = Output::new();
        output.set_log_file(Some(&path)).unwrap();
        output.log_input("isready");
        output.line("readyok");
        output.set_log_file(None).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(text, "<< isready\n>> readyok\n");
    }

    /// A log file that rejects writes is dropped instead of failing every line.
    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_log_write_closes_log() {
        let output = Output::new();
        output.set_log_file(Some(Path::new("/dev/full"))).unwrap();
        output.log_input("uci");
        assert!(output.lock().log.is_none());
    }
}
