//! Extractor processes and what happens to their output

pub mod coordinator;
pub mod diagnostics;
pub mod launcher;
pub mod metadata;
pub mod process;
pub mod relay;

pub use coordinator::{run_relay, spawn_relay, LifecycleState, RelayReport};
pub use launcher::{ExtractionMode, ExtractorCommand, Launcher};
pub use metadata::{collect_metadata, MetadataRecord};
pub use process::{ExtractionProcess, TerminationStatus};
