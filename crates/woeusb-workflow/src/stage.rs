//! Installation stages and the forward-only tracker that records them.

use std::fmt;
use thiserror::Error;

/// Pipeline stages in execution order, plus the terminal `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    PreInit,
    EnterInit,
    StartMounting,
    StartCopying,
    StartUnmounting,
    Finalized,
    Failed,
}

impl Stage {
    /// The successful path, in order.
    pub const SEQUENCE: [Stage; 6] = [
        Stage::PreInit,
        Stage::EnterInit,
        Stage::StartMounting,
        Stage::StartCopying,
        Stage::StartUnmounting,
        Stage::Finalized,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::PreInit => "pre-init",
            Stage::EnterInit => "enter-init",
            Stage::StartMounting => "start-mounting",
            Stage::StartCopying => "start-copying",
            Stage::StartUnmounting => "start-unmounting",
            Stage::Finalized => "finalized",
            Stage::Failed => "failed",
        }
    }

    /// Successor on the successful path. Terminal states have none.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::PreInit => Some(Stage::EnterInit),
            Stage::EnterInit => Some(Stage::StartMounting),
            Stage::StartMounting => Some(Stage::StartCopying),
            Stage::StartCopying => Some(Stage::StartUnmounting),
            Stage::StartUnmounting => Some(Stage::Finalized),
            Stage::Finalized | Stage::Failed => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("illegal stage transition {from} -> {to}")]
pub struct TransitionError {
    pub from: Stage,
    pub to: Stage,
}

/// Current stage of one job.
///
/// Only moves forward one step at a time. `failed` can be entered from
/// anywhere; `last_reached` keeps the stage the job was in when it failed so
/// cleanup knows what was acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTracker {
    current: Stage,
    last_reached: Stage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            current: Stage::PreInit,
            last_reached: Stage::PreInit,
        }
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    /// Last non-failed stage entered.
    pub fn last_reached(&self) -> Stage {
        self.last_reached
    }

    pub fn advance(&mut self, to: Stage) -> Result<(), TransitionError> {
        if self.current.next() != Some(to) {
            return Err(TransitionError {
                from: self.current,
                to,
            });
        }
        self.current = to;
        self.last_reached = to;
        Ok(())
    }

    pub fn fail(&mut self) {
        self.current = Stage::Failed;
    }

    pub fn is_failed(&self) -> bool {
        self.current == Stage::Failed
    }

    pub fn is_finalized(&self) -> bool {
        self.current == Stage::Finalized
    }

    /// True once the job has entered `stage` (or gone past it).
    pub fn reached(&self, stage: Stage) -> bool {
        stage != Stage::Failed && self.last_reached >= stage
    }
}
