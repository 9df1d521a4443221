//! # Configuration Module
//!
//! Immutable configuration objects built once at startup and passed into the
//! session. Nothing in here is mutated after the pipeline starts running.

pub mod limits;
pub mod provider;
pub mod watch;

pub use limits::PipelineLimits;
pub use provider::{Provider, ProviderConfig};
pub use watch::WatchConfig;
