//! Core pipeline modules: fingerprinting, caching, guard rails, progress
//! reporting and orchestration.

pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod pipeline;
pub mod progress;
pub mod verify;

// Re-export main types
pub use config::ExportConfig;
pub use fingerprint::fingerprint;
pub use pipeline::{run_export, run_gif_export, ExportKind, ExportRequest};
pub use progress::{LogProgress, NullProgress, ProgressSink, StepProgress};
