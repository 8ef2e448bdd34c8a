//! Telemetry: structured logging for Strand.
//!
//! Metrics are emitted through the `metrics` facade at the call sites
//! (`strand_errors_total`, `strand_append_conflicts_total`,
//! `strand_read_retries_total`, `strand_commands_total`); installing a
//! recorder is left to the embedding binary.
//!
//! # Example
//!
//! ```rust,no_run
//! use strand_core::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default(), "production").expect("Failed to initialize logging");
//! ```

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig, SpanEventConfig};
