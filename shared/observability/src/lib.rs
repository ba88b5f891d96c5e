//! Observability for the knowledge-graph RAG services
//!
//! - Tracing subscriber setup with JSON, pretty or compact output
//! - Domain event logging for batch jobs and agent steps
//! - Timing and external-call logging macros

pub mod domain_events;
pub mod init;
pub mod macros;

pub use domain_events::*;
pub use init::*;

// Re-export tracing for convenience
pub use tracing::{debug, error, info, instrument, trace, warn, Instrument, Level};
