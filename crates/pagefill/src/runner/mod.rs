//! Subreport runners.
//!
//! A runner drives the fill work of one subreport as a resumable unit. The
//! work reports each completed page to its coordinator, which asks the runner
//! to suspend until the parent has started its next page.
//!
//! Two strategies implement [`SubreportRunner`]:
//!
//! - [`CooperativeRunner`] runs the work on the caller's thread. Suspension
//!   is an explicit return from [`FillWork::fill`]; the work keeps its
//!   progress in its own state and continues on the next call.
//! - [`ThreadRunner`] runs the work on a dedicated worker thread. Suspension
//!   blocks the worker until the parent resumes it, and the parent blocks
//!   until the worker suspends or terminates.
//!
//! In both, exactly one side computes at any time. The strategy is chosen per
//! fill session through [`RunnerStrategy`].

mod cooperative;
mod thread;

pub use cooperative::CooperativeRunner;
pub use thread::ThreadRunner;

use std::fmt;
use std::sync::Arc;

use pagefill_core::{FillError, FillResult, RunnerStrategy, WorkerConfig};

/// Outcome of one runner step.
#[derive(Debug)]
pub enum RunResult {
    /// The work has not reached a hand-off point yet.
    Filling,
    /// The work completed a page and waits to be resumed.
    Suspended,
    /// The work completed.
    Finished,
    /// The work stopped on request.
    Aborted,
    /// The work failed.
    Failed(FillError),
}

/// Lifecycle state of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerState {
    Idle,
    Running,
    Suspended,
    Finished,
    Aborted,
    Failed,
}

impl RunnerState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted | Self::Failed)
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the work returned control to the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// The work suspended after a page and can be continued.
    Yielded,
    /// The work completed.
    Completed,
}

/// A resumable unit of fill work.
pub trait FillWork: Send {
    /// Run until the work yields or completes.
    ///
    /// Called again after a yield to continue. The work must check
    /// [`RunnerControl::take_yield`] after every suspension point.
    fn fill(&mut self, control: &dyn RunnerControl) -> FillResult<WorkStatus>;

    /// Restart the work from the beginning.
    fn rewind(&mut self) -> FillResult<()>;

    /// Name used for worker threads and logs.
    fn name(&self) -> &str;
}

/// Hand-off capability shared by a runner, its work and the coordinator.
pub trait RunnerControl: Send + Sync {
    /// Suspend the running work at a page boundary.
    ///
    /// Only called from inside the work. Blocking strategies return once the
    /// runner is resumed; cooperative ones record the request, to be picked
    /// up by [`take_yield`](Self::take_yield). Fails with
    /// [`FillError::Aborted`] once the runner has been aborted.
    fn suspend(&self) -> FillResult<()>;

    /// Whether the work must return now because a suspension was requested.
    /// Clears the request.
    fn take_yield(&self) -> bool;

    /// Request termination. Observed at the next suspension point.
    fn abort(&self);

    fn is_aborted(&self) -> bool;
}

/// A subreport runner.
pub trait SubreportRunner: Send {
    fn state(&self) -> RunnerState;

    /// Whether the work has started and not yet terminated.
    fn is_filling(&self) -> bool {
        matches!(self.state(), RunnerState::Running | RunnerState::Suspended)
    }

    /// Control handle to bind to the coordinator.
    fn control(&self) -> Arc<dyn RunnerControl>;

    /// Start the work from scratch. Only valid when idle.
    fn start(&mut self) -> RunResult;

    /// Continue suspended work. Only valid when suspended.
    fn resume(&mut self) -> RunResult;

    /// Abort the work. Suspended work is torn down without producing
    /// further pages.
    fn abort(&mut self);

    /// Make a finished or aborted runner idle again, rewinding the work.
    fn reset(&mut self) -> FillResult<()>;
}

/// Create the runner selected by `strategy`.
pub fn create_runner(
    strategy: RunnerStrategy,
    worker: &WorkerConfig,
    work: Box<dyn FillWork>,
) -> Box<dyn SubreportRunner> {
    tracing::debug!(
        target: crate::logging::targets::RUNNER,
        ?strategy,
        subreport = work.name(),
        "creating subreport runner"
    );
    match strategy {
        RunnerStrategy::Cooperative => Box::new(CooperativeRunner::new(work)),
        RunnerStrategy::Thread => Box::new(ThreadRunner::new(work, worker.clone())),
    }
}

pub(crate) fn invalid_state(operation: &'static str, state: RunnerState) -> RunResult {
    RunResult::Failed(FillError::InvalidRunnerState {
        operation,
        state: state.name(),
    })
}

static_assertions::assert_impl_all!(CooperativeRunner: Send);
static_assertions::assert_impl_all!(ThreadRunner: Send);
