use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pagefill_core::{CancellationToken, FillError, FillResult};

use super::{
    FillWork, RunResult, RunnerControl, RunnerState, SubreportRunner, WorkStatus, invalid_state,
};
use crate::logging::targets;

/// Control of a [`CooperativeRunner`]: suspension is a flag the work checks
/// before returning.
#[derive(Debug, Default)]
pub struct CooperativeControl {
    yield_requested: AtomicBool,
    cancellation: CancellationToken,
}

impl RunnerControl for CooperativeControl {
    fn suspend(&self) -> FillResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(FillError::Aborted);
        }
        self.yield_requested.store(true, Ordering::Release);
        Ok(())
    }

    fn take_yield(&self) -> bool {
        self.yield_requested.swap(false, Ordering::AcqRel)
    }

    fn abort(&self) {
        self.cancellation.cancel();
    }

    fn is_aborted(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Runner executing the work on the caller's thread.
///
/// Parent and child steps interleave deterministically: `start` and `resume`
/// run the work until its next page hand-off and return.
pub struct CooperativeRunner {
    work: Box<dyn FillWork>,
    control: Arc<CooperativeControl>,
    state: RunnerState,
}

impl CooperativeRunner {
    pub fn new(work: Box<dyn FillWork>) -> Self {
        Self {
            work,
            control: Arc::new(CooperativeControl::default()),
            state: RunnerState::Idle,
        }
    }

    fn step(&mut self) -> RunResult {
        if self.control.is_aborted() {
            self.state = RunnerState::Aborted;
            return RunResult::Aborted;
        }
        self.state = RunnerState::Running;
        let outcome = self.work.fill(self.control.as_ref());
        let result = match outcome {
            Ok(WorkStatus::Yielded) => {
                self.state = RunnerState::Suspended;
                RunResult::Suspended
            }
            Ok(WorkStatus::Completed) => {
                self.state = RunnerState::Finished;
                RunResult::Finished
            }
            Err(FillError::Aborted) => {
                self.state = RunnerState::Aborted;
                RunResult::Aborted
            }
            Err(err) => {
                self.state = RunnerState::Failed;
                RunResult::Failed(err)
            }
        };
        tracing::debug!(
            target: targets::RUNNER,
            subreport = self.work.name(),
            state = %self.state,
            "cooperative runner returned"
        );
        result
    }
}

impl SubreportRunner for CooperativeRunner {
    fn state(&self) -> RunnerState {
        self.state
    }

    fn control(&self) -> Arc<dyn RunnerControl> {
        self.control.clone()
    }

    fn start(&mut self) -> RunResult {
        if self.state != RunnerState::Idle {
            return invalid_state("start", self.state);
        }
        self.step()
    }

    fn resume(&mut self) -> RunResult {
        if self.state != RunnerState::Suspended {
            return invalid_state("resume", self.state);
        }
        self.step()
    }

    fn abort(&mut self) {
        self.control.abort();
        if !self.state.is_terminal() {
            self.state = RunnerState::Aborted;
        }
    }

    fn reset(&mut self) -> FillResult<()> {
        if !matches!(self.state, RunnerState::Finished | RunnerState::Aborted) {
            return Err(FillError::InvalidRunnerState {
                operation: "reset",
                state: self.state.name(),
            });
        }
        self.work.rewind()?;
        self.control.cancellation.reset();
        self.control.yield_requested.store(false, Ordering::Release);
        self.state = RunnerState::Idle;
        Ok(())
    }
}

impl std::fmt::Debug for CooperativeRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooperativeRunner")
            .field("subreport", &self.work.name())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::CountingWork;

    #[test]
    fn test_suspends_after_each_page() {
        let (work, produced) = CountingWork::new(3);
        let mut runner = CooperativeRunner::new(Box::new(work));

        assert!(matches!(runner.start(), RunResult::Suspended));
        assert_eq!(*produced.lock(), vec![1]);
        assert!(runner.is_filling());
        assert!(matches!(runner.resume(), RunResult::Suspended));
        assert!(matches!(runner.resume(), RunResult::Finished));
        assert_eq!(*produced.lock(), vec![1, 2, 3]);
        assert!(!runner.is_filling());
    }

    #[test]
    fn test_resume_when_idle_is_rejected() {
        let (work, _) = CountingWork::new(1);
        let mut runner = CooperativeRunner::new(Box::new(work));
        assert!(matches!(
            runner.resume(),
            RunResult::Failed(FillError::InvalidRunnerState { operation: "resume", state: "idle" })
        ));
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[test]
    fn test_abort_while_suspended_stops_output() {
        let (work, produced) = CountingWork::new(5);
        let mut runner = CooperativeRunner::new(Box::new(work));
        runner.start();
        runner.control().abort();

        assert!(matches!(runner.resume(), RunResult::Aborted));
        assert_eq!(*produced.lock(), vec![1]);
        assert_eq!(runner.state(), RunnerState::Aborted);
    }

    #[test]
    fn test_reset_allows_rerun() {
        let (work, produced) = CountingWork::new(1);
        let mut runner = CooperativeRunner::new(Box::new(work));
        assert!(matches!(runner.start(), RunResult::Finished));
        assert!(runner.reset().is_ok());
        assert!(matches!(runner.start(), RunResult::Finished));
        assert_eq!(*produced.lock(), vec![1]);
    }
}
