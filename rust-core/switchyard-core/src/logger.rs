//! # Dispatch Logger
//!
//! The logging collaborator the dispatch engine reports uncaught handler and
//! middleware failures to, plus the process-wide tracing setup.

use crate::error::Error;
use std::sync::Mutex;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Sink for failures the engine catches and swallows
pub trait Logger: Send + Sync {
    /// Report an uncaught handler or middleware failure
    fn fatal(&self, error: &Error);
}

/// Default logger - forwards to `tracing` at error level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn fatal(&self, err: &Error) {
        error!(error = %err, "Uncaught error during dispatch");
    }
}

/// Logger that keeps every reported message, for tests
#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<String>>,
}

impl RecordingLogger {
    /// Create an empty recording logger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages reported so far
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of messages reported so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Check if nothing was reported
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Logger for RecordingLogger {
    fn fatal(&self, err: &Error) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(err.to_string());
    }
}

/// Initialize JSON tracing output
///
/// Honors `RUST_LOG`; defaults to `switchyard=info`. Safe to call more than
/// once, later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("switchyard=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_logger_collects_messages() {
        let logger = RecordingLogger::new();
        assert!(logger.is_empty());

        logger.fatal(&Error::Panic {
            route: "users".to_string(),
            message: "boom".to_string(),
        });

        assert_eq!(logger.len(), 1);
        assert!(logger.entries()[0].contains("boom"));
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
