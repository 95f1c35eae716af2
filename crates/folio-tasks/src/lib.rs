//! Background task pipeline.
//!
//! `work` runs on a dedicated worker thread; its `completion` runs back on the
//! owner context (the thread that created the [`Dispatcher`]) when the owner
//! pumps with [`Dispatcher::update`] or [`Dispatcher::wait_idle`].
//!
//! ```text
//!  owner thread                         worker thread "folio-<name>"
//!  ────────────                         ────────────────────────────
//!  queue.submit(work, completion)
//!     │  completion parked by TaskId
//!     └──── Job{id, work} ──────────────▶ work(&mut WorkerContext)
//!                                          │ catch_unwind
//!  dispatcher.update()  ◀──── Finished ────┘
//!     └─ completion(TaskOutcome)
//! ```
//!
//! Completions are never dropped: a panic in `work` arrives as
//! [`TaskOutcome::Failed`], and completions still parked when the dispatcher
//! goes away are invoked with [`TaskError::Shutdown`].

mod dispatcher;
mod queue;
mod worker;

pub use dispatcher::Dispatcher;
pub use queue::TaskQueue;
pub use worker::WorkerContext;

use thiserror::Error;

/// Why a task produced no value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task pipeline shut down before delivery")]
    Shutdown,
    #[error("task result had an unexpected type")]
    ResultType,
}

impl From<TaskError> for folio_types::FolioError {
    fn from(err: TaskError) -> Self {
        folio_types::FolioError::TaskFailed(err.to_string())
    }
}

/// What a completion receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Done(T),
    Failed(TaskError),
}

impl<T> TaskOutcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskOutcome::Done(_))
    }

    pub fn into_result(self) -> Result<T, TaskError> {
        match self {
            TaskOutcome::Done(value) => Ok(value),
            TaskOutcome::Failed(err) => Err(err),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TaskOutcome<U> {
        match self {
            TaskOutcome::Done(value) => TaskOutcome::Done(f(value)),
            TaskOutcome::Failed(err) => TaskOutcome::Failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_into_result() {
        assert_eq!(TaskOutcome::Done(3).into_result(), Ok(3));
        assert_eq!(
            TaskOutcome::<u8>::Failed(TaskError::Shutdown).into_result(),
            Err(TaskError::Shutdown)
        );
    }

    #[test]
    fn outcome_map_keeps_failure() {
        let failed: TaskOutcome<u8> = TaskOutcome::Failed(TaskError::Panicked("boom".into()));
        assert!(!failed.map(|v| v + 1).is_done());
        assert_eq!(TaskOutcome::Done(1).map(|v| v + 1), TaskOutcome::Done(2));
    }

    #[test]
    fn task_error_into_folio_error() {
        let err: folio_types::FolioError = TaskError::Shutdown.into();
        assert!(matches!(err, folio_types::FolioError::TaskFailed(_)));
    }
}
