//! The diagnostic logging collaborator.
//!
//! Strategies, the dispatcher and the agent report what they find through a [`Logger`]. The
//! logger is purely observational: whether it is enabled, disabled or absent never changes a
//! rewrite result.
//!
//! Three implementations are provided:
//! - [`TracingLogger`] forwards to the `tracing` ecosystem (target `hotpatch`)
//! - [`NullLogger`] discards everything
//! - any `Fn(&str) + Send + Sync` closure
//!
//! # Example
//! ```rust
//! use std::sync::Mutex;
//! use hotpatch::logger::Logger;
//!
//! let lines = Mutex::new(Vec::new());
//! let logger = |message: &str| lines.lock().unwrap().push(message.to_string());
//! logger.log("Found CachedIntrospectionResults::<init>");
//! assert_eq!(lines.lock().unwrap().len(), 1);
//! ```

/// Sink for diagnostic messages.
pub trait Logger: Send + Sync {
    /// Records one message.
    fn log(&self, message: &str);

    /// Whether messages are recorded at all; callers may skip formatting when `false`.
    fn enabled(&self) -> bool {
        true
    }
}

impl<F> Logger for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message);
    }
}

/// Discards all messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _message: &str) {}

    fn enabled(&self) -> bool {
        false
    }
}

/// Emits every message as a `tracing` event at `INFO` level with target `hotpatch`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::info!(target: "hotpatch", "{}", message);
    }

    fn enabled(&self) -> bool {
        tracing::enabled!(target: "hotpatch", tracing::Level::INFO)
    }
}
