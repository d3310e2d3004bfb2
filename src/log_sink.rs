//! Log sink module
//!
//! `log` backend for the bridge firmware. Every record becomes one line of the
//! form `millis [LEVEL] [thread] message` and is handed to each registered
//! sink. With no sinks the records go nowhere, which is what a release build
//! without a debug console wants.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use heapless::HistoryBuffer;
use log::{LevelFilter, Log, Metadata, Record};

use crate::error::{Error, Result};

/// Destination for formatted log lines
pub trait LogSink: Send + Sync {
    fn append_line(&self, line: &str);
}

/// Writes lines to stdout, which is the debug console on the device
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn append_line(&self, line: &str) {
        println!("{}", line);
    }
}

/// Keeps the last `N` lines for a status page
pub struct RecentLines<const N: usize> {
    lines: Mutex<HistoryBuffer<String, N>>,
}

impl<const N: usize> RecentLines<N> {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(HistoryBuffer::new()),
        }
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.oldest_ordered().cloned().collect()
    }
}

impl<const N: usize> Default for RecentLines<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LogSink for RecentLines<N> {
    fn append_line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(line.to_string());
    }
}

pub struct SinkLogger {
    level: LevelFilter,
    started: Instant,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl SinkLogger {
    pub fn new(level: LevelFilter) -> Self {
        Self {
            level,
            started: Instant::now(),
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    fn format(&self, record: &Record) -> String {
        let millis = self.started.elapsed().as_millis();
        let current = thread::current();
        let name = current.name().unwrap_or("main");
        format!("{} [{}] [{}] {}", millis, record.level(), name, record.args())
    }

    /// Make this the global logger. Fails if one is already installed.
    pub fn install(self) -> Result<()> {
        let level = self.level;
        log::set_logger(Box::leak(Box::new(self)))
            .map_err(|e| Error::General(format!("Failed to install logger: {}", e)))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) || self.sinks.is_empty() {
            return;
        }
        let line = self.format(record);
        for sink in &self.sinks {
            sink.append_line(&line);
        }
    }

    fn flush(&self) {}
}
