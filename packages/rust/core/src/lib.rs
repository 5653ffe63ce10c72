//! Research pipeline orchestration for DeepResearch.
//!
//! This crate runs the four-stage pipeline (research, draft, fact-check,
//! finalize) over injected collaborators, and exposes it synchronously
//! ([`SynchronousRunner`]) or as background tasks whose progress is streamed
//! ([`AsyncRunner`], [`ProgressStreamer`]).

pub mod orchestrator;
pub mod research;
pub mod runner;
pub mod state;
pub mod stream;
pub mod tasks;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use orchestrator::{PipelineSettings, ProgressReporter, SilentProgress, Stage, StageOrchestrator};
pub use runner::{AsyncRunner, STARTING_PROGRESS, SynchronousRunner};
pub use state::{PipelineState, StageOutput};
pub use stream::{ProgressStream, ProgressStreamer};
pub use tasks::{ProgressReceiver, ProgressSender, TaskRegistry};
