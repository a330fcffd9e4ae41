//! fetchgate - HTTP gateway in front of yt-dlp
//!
//! Validates a `{url, quality}` request, runs the extractor as a subprocess
//! and either returns the video's metadata or streams the media bytes back
//! as a chunked response, killing the extractor as soon as the client goes
//! away.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, metrics and the HTTP servers
//! - `download`: process launch, stream relay, metadata collection and the
//!   relay lifecycle

pub mod cli;
pub mod core;
pub mod download;

// Re-export commonly used types for convenience
pub use crate::core::{config, AppError, AppResult};
pub use crate::download::{ExtractionMode, Launcher, LifecycleState};
