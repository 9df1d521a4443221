//! # Core Infrastructure Module
//!
//! Small shared building blocks used by the pipeline and the watcher: path
//! validation, secure scratch files, the per-file stabilization queue, event
//! debouncing, outbound rate limiting and the cooperative shutdown flag.

pub mod debounce;
pub mod path_guard;
pub mod rate_limit;
pub mod shutdown;
pub mod stabilization;
pub mod temp_file;

pub use debounce::DebounceMap;
pub use path_guard::PathGuard;
pub use rate_limit::RateLimiter;
pub use shutdown::Shutdown;
pub use stabilization::StabilizationTracker;
pub use temp_file::SecureTempFile;
