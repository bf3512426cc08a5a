//! Diagnostic output of the analysis components
//!
//! The library never logs through a global. Every component receives a [`DiagnosticSink`]
//! from its [`crate::Analyser`] and reports through it.

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.emit(Level::Debug, message)
    }

    fn info(&self, message: &str) {
        self.emit(Level::Info, message)
    }

    fn warn(&self, message: &str) {
        self.emit(Level::Warn, message)
    }

    fn error(&self, message: &str) {
        self.emit(Level::Error, message)
    }
}

/// Forwards to the `tracing` macros; whatever subscriber the host installed decides what is kept
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, level: Level, message: &str) {
        match level {
            Level::Debug => tracing::debug!(target: "binscope", "{}", message),
            Level::Info => tracing::info!(target: "binscope", "{}", message),
            Level::Warn => tracing::warn!(target: "binscope", "{}", message),
            Level::Error => tracing::error!(target: "binscope", "{}", message),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _level: Level, _message: &str) {}
}

/// Keeps every message in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<(Level, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(Level, String)> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, level: Level, fragment: &str) -> bool {
        self.messages()
            .iter()
            .any(|(l, m)| *l == level && m.contains(fragment))
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, level: Level, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((level, message.to_owned()));
        }
    }
}
