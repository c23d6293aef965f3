use crate::stage::{Stage, StageTracker, TransitionError};
use crate::task::CancelToken;
use thiserror::Error;

pub type StageFn<'a, S, E> = Box<dyn Fn(&mut S) -> Result<(), E> + 'a>;

pub struct StageDefinition<'a, S, E> {
    pub stage: Stage,
    pub run: StageFn<'a, S, E>,
}

impl<'a, S, E> StageDefinition<'a, S, E> {
    pub fn new(stage: Stage, run: impl Fn(&mut S) -> Result<(), E> + 'a) -> Self {
        Self {
            stage,
            run: Box::new(run),
        }
    }
}

/// State carried through a run. The runner only touches its stage tracker.
pub trait WorkflowState {
    fn tracker(&self) -> &StageTracker;
    fn tracker_mut(&mut self) -> &mut StageTracker;
}

#[derive(Debug, Error)]
pub enum RunError<E> {
    #[error("cancelled before {stage}")]
    Cancelled { stage: Stage },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("{stage} failed: {source}")]
    Failed {
        stage: Stage,
        #[source]
        source: E,
    },
}

impl<E> RunError<E> {
    /// Stage the error was raised in (or, for cancellation, would have entered).
    pub fn stage(&self) -> Stage {
        match self {
            RunError::Cancelled { stage } => *stage,
            RunError::Transition(err) => err.to,
            RunError::Failed { stage, .. } => *stage,
        }
    }
}

/// Drives a state through consecutive stages.
///
/// Each stage is entered on the tracker before its body runs. Any error (or a
/// cancellation observed at a stage boundary) marks the state failed and stops
/// the run.
pub struct StageRunner {
    cancel: CancelToken,
}

impl StageRunner {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    pub fn run<S, E>(
        &self,
        state: &mut S,
        stages: &[StageDefinition<'_, S, E>],
    ) -> Result<(), RunError<E>>
    where
        S: WorkflowState,
    {
        for stage in stages {
            if self.cancel.is_cancelled() {
                log::warn!("Cancellation requested; not entering {}", stage.stage);
                state.tracker_mut().fail();
                return Err(RunError::Cancelled { stage: stage.stage });
            }

            if let Err(err) = state.tracker_mut().advance(stage.stage) {
                state.tracker_mut().fail();
                return Err(err.into());
            }
            log::info!("📍 Entering stage: {}", stage.stage);

            if let Err(source) = (stage.run)(state) {
                state.tracker_mut().fail();
                return Err(RunError::Failed {
                    stage: stage.stage,
                    source,
                });
            }
        }

        Ok(())
    }
}
