use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use pagefill_core::{CancellationToken, FillError, FillResult, WorkerConfig};

use super::{FillWork, RunResult, RunnerControl, RunnerState, SubreportRunner, WorkStatus, invalid_state};
use crate::logging::targets;

/// Parent-to-worker message.
enum Command {
    Continue,
    Abort,
}

/// Worker-to-parent message.
enum Status {
    Suspended,
    Finished,
    Aborted,
    Failed(FillError),
}

/// Control of a [`ThreadRunner`]: suspension blocks the worker thread until
/// the parent sends the next command.
pub struct ThreadControl {
    resume_tx: Sender<Command>,
    resume_rx: Receiver<Command>,
    status_tx: Sender<Status>,
    cancellation: CancellationToken,
}

impl RunnerControl for ThreadControl {
    fn suspend(&self) -> FillResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(FillError::Aborted);
        }
        self.status_tx
            .send(Status::Suspended)
            .map_err(|_| FillError::Aborted)?;
        match self.resume_rx.recv() {
            Ok(Command::Continue) if !self.cancellation.is_cancelled() => Ok(()),
            _ => Err(FillError::Aborted),
        }
    }

    fn take_yield(&self) -> bool {
        false
    }

    fn abort(&self) {
        self.cancellation.cancel();
        // A full queue already holds a command the worker checks the token after.
        let _ = self.resume_tx.try_send(Command::Abort);
    }

    fn is_aborted(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl std::fmt::Debug for ThreadControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadControl")
            .field("aborted", &self.cancellation.is_cancelled())
            .finish()
    }
}

/// Runner executing the work on a dedicated worker thread.
///
/// The worker is spawned by `start` and lives until the work terminates. A
/// page hand-off blocks the worker inside [`RunnerControl::suspend`] while the
/// parent continues; `resume` unblocks it and waits for the next hand-off.
pub struct ThreadRunner {
    name: String,
    config: WorkerConfig,
    work: Option<Box<dyn FillWork>>,
    handle: Option<JoinHandle<Box<dyn FillWork>>>,
    control: Arc<ThreadControl>,
    status_rx: Receiver<Status>,
    state: RunnerState,
    awaiting: bool,
}

impl ThreadRunner {
    pub fn new(work: Box<dyn FillWork>, config: WorkerConfig) -> Self {
        let (resume_tx, resume_rx) = bounded(1);
        let (status_tx, status_rx) = bounded(1);
        Self {
            name: work.name().to_string(),
            config,
            work: Some(work),
            handle: None,
            control: Arc::new(ThreadControl {
                resume_tx,
                resume_rx,
                status_tx,
                cancellation: CancellationToken::new(),
            }),
            status_rx,
            state: RunnerState::Idle,
            awaiting: false,
        }
    }

    /// Spawn the worker without waiting for its first hand-off.
    pub fn start_detached(&mut self) -> FillResult<()> {
        if self.state != RunnerState::Idle {
            return Err(FillError::InvalidRunnerState {
                operation: "start",
                state: self.state.name(),
            });
        }
        let Some(mut work) = self.work.take() else {
            return Err(FillError::InvalidRunnerState {
                operation: "start",
                state: self.state.name(),
            });
        };

        let control = self.control.clone();
        let report = self.name.clone();
        let mut builder = thread::Builder::new().name(format!("{}-{}", self.config.name_prefix, self.name));
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let spawned = builder.spawn(move || {
            let status = run_work(work.as_mut(), &control, &report);
            // The parent may already be gone; nothing is left to report to.
            let _ = control.status_tx.send(status);
            work
        });
        match spawned {
            Ok(handle) => {
                tracing::debug!(target: targets::RUNNER, subreport = %self.name, "worker thread started");
                self.handle = Some(handle);
                self.state = RunnerState::Running;
                self.awaiting = true;
                Ok(())
            }
            Err(err) => {
                self.state = RunnerState::Failed;
                Err(FillError::Spawn(err))
            }
        }
    }

    /// Let suspended work continue without waiting for its next hand-off.
    pub fn resume_detached(&mut self) -> FillResult<()> {
        if self.state != RunnerState::Suspended {
            return Err(FillError::InvalidRunnerState {
                operation: "resume",
                state: self.state.name(),
            });
        }
        // An aborted worker already has its abort command queued.
        if !self.control.is_aborted() && self.control.resume_tx.send(Command::Continue).is_err() {
            self.state = RunnerState::Aborted;
            return Err(FillError::Aborted);
        }
        self.state = RunnerState::Running;
        self.awaiting = true;
        Ok(())
    }

    /// Check for a hand-off without blocking.
    ///
    /// Returns [`RunResult::Filling`] while the worker is still computing.
    pub fn poll(&mut self) -> RunResult {
        if !self.awaiting {
            return self.settled();
        }
        match self.status_rx.try_recv() {
            Ok(status) => self.apply(status),
            Err(TryRecvError::Empty) => RunResult::Filling,
            Err(TryRecvError::Disconnected) => self.apply(Status::Aborted),
        }
    }

    /// Block until the worker suspends or terminates.
    pub fn wait(&mut self) -> RunResult {
        if !self.awaiting {
            return self.settled();
        }
        match self.status_rx.recv() {
            Ok(status) => self.apply(status),
            Err(_) => self.apply(Status::Aborted),
        }
    }

    fn settled(&self) -> RunResult {
        match self.state {
            RunnerState::Suspended => RunResult::Suspended,
            RunnerState::Finished => RunResult::Finished,
            RunnerState::Aborted => RunResult::Aborted,
            state => invalid_state("wait", state),
        }
    }

    fn apply(&mut self, status: Status) -> RunResult {
        self.awaiting = false;
        let result = match status {
            Status::Suspended => {
                self.state = RunnerState::Suspended;
                return RunResult::Suspended;
            }
            Status::Finished => {
                self.state = RunnerState::Finished;
                RunResult::Finished
            }
            Status::Aborted => {
                self.state = RunnerState::Aborted;
                RunResult::Aborted
            }
            Status::Failed(err) => {
                self.state = RunnerState::Failed;
                RunResult::Failed(err)
            }
        };
        self.join();
        tracing::debug!(
            target: targets::RUNNER,
            subreport = %self.name,
            state = %self.state,
            "worker thread terminated"
        );
        result
    }

    fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match handle.join() {
            Ok(work) => self.work = Some(work),
            Err(_) => self.state = RunnerState::Failed,
        }
    }

    fn drain(&self) {
        while self.status_rx.try_recv().is_ok() {}
        while self.control.resume_rx.try_recv().is_ok() {}
    }
}

fn run_work(work: &mut dyn FillWork, control: &Arc<ThreadControl>, report: &str) -> Status {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        loop {
            match work.fill(control.as_ref()) {
                Ok(WorkStatus::Yielded) => continue,
                other => return other,
            }
        }
    }));
    match outcome {
        Ok(Ok(_)) => Status::Finished,
        Ok(Err(FillError::Aborted)) => Status::Aborted,
        Ok(Err(err)) => Status::Failed(err),
        Err(_) => {
            tracing::error!(target: targets::RUNNER, subreport = report, "subreport fill panicked");
            Status::Failed(FillError::RunnerPanicked {
                report: report.to_string(),
            })
        }
    }
}

impl SubreportRunner for ThreadRunner {
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
        match self.start_detached() {
            Ok(()) => self.wait(),
            Err(err) => RunResult::Failed(err),
        }
    }

    fn resume(&mut self) -> RunResult {
        if self.state != RunnerState::Suspended {
            return invalid_state("resume", self.state);
        }
        match self.resume_detached() {
            Ok(()) => self.wait(),
            Err(FillError::Aborted) => RunResult::Aborted,
            Err(err) => RunResult::Failed(err),
        }
    }

    fn abort(&mut self) {
        self.control.abort();
        match self.state {
            RunnerState::Idle => self.state = RunnerState::Aborted,
            RunnerState::Running | RunnerState::Suspended => {
                // The worker unblocks on the abort command and reports back.
                self.awaiting = true;
                while matches!(self.wait(), RunResult::Suspended) {
                    self.awaiting = true;
                }
                if !self.state.is_terminal() {
                    self.state = RunnerState::Aborted;
                }
            }
            _ => {}
        }
    }

    fn reset(&mut self) -> FillResult<()> {
        if !matches!(self.state, RunnerState::Finished | RunnerState::Aborted) {
            return Err(FillError::InvalidRunnerState {
                operation: "reset",
                state: self.state.name(),
            });
        }
        let Some(work) = self.work.as_mut() else {
            return Err(FillError::InvalidRunnerState {
                operation: "reset",
                state: self.state.name(),
            });
        };
        work.rewind()?;
        self.drain();
        self.control.cancellation.reset();
        self.state = RunnerState::Idle;
        self.awaiting = false;
        Ok(())
    }
}

impl Drop for ThreadRunner {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.control.abort();
            // Don't block in drop; the worker exits on its own.
        }
    }
}

impl std::fmt::Debug for ThreadRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRunner")
            .field("subreport", &self.name)
            .field("state", &self.state)
            .finish()
    }
}
