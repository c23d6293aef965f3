//! WoeUSB workflow orchestration.
//!
//! This crate holds deterministic workflow execution primitives: the
//! monotonic installation [`stage::Stage`] machine, the [`stage_runner`] that
//! drives a job through it, and the [`task`] primitives (cancellation token,
//! background task with progress channel). The pipeline crate provides the
//! concrete job state and stage bodies.

pub mod stage;
pub mod stage_runner;
pub mod task;

pub use stage::{Stage, StageTracker, TransitionError};
pub use stage_runner::{RunError, StageDefinition, StageRunner, WorkflowState};
pub use task::{BackgroundTask, CancelToken, TaskContext, TaskError};
