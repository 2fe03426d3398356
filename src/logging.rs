//! Output sinks for phase containers
//!
//! Phase output is written line by line to a `LogSink`. The CLI prints it,
//! library callers usually route it into `tracing`.

use crate::orchestration::OutputStream;
use console::style;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Two-stream, append-only destination for phase output
pub trait LogSink: Send + Sync {
    /// A line from a container's standard output
    fn out(&self, line: &str);

    /// A line from a container's standard error
    fn err(&self, line: &str);

    /// Dispatch a tagged line
    fn write(&self, stream: OutputStream, line: &str) {
        match stream {
            OutputStream::Stdout => self.out(line),
            OutputStream::Stderr => self.err(line),
        }
    }
}

/// Sends phase output to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn out(&self, line: &str) {
        debug!(target: "pack::phase", "{}", line);
    }

    fn err(&self, line: &str) {
        warn!(target: "pack::phase", "{}", line);
    }
}

/// Prints phase output to the terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink {
    quiet: bool,
}

impl ConsoleSink {
    /// Create a sink; a quiet sink only prints standard error
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl LogSink for ConsoleSink {
    fn out(&self, line: &str) {
        if !self.quiet {
            println!("{} {}", style("│").dim(), line);
        }
    }

    fn err(&self, line: &str) {
        eprintln!("{} {}", style("│").red().dim(), line);
    }
}

/// Collects lines in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(OutputStream, String)>>,
}

impl MemorySink {
    /// Snapshot of everything written so far
    pub fn lines(&self) -> Vec<(OutputStream, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Standard output lines only
    pub fn stdout(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(s, _)| *s == OutputStream::Stdout)
            .map(|(_, l)| l)
            .collect()
    }

    fn push(&self, stream: OutputStream, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((stream, line.to_string()));
        }
    }
}

impl LogSink for MemorySink {
    fn out(&self, line: &str) {
        self.push(OutputStream::Stdout, line);
    }

    fn err(&self, line: &str) {
        self.push(OutputStream::Stderr, line);
    }
}
