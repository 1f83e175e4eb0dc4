//! Coordination between a subreport filler and the filler containing it.

use std::sync::{Arc, Weak};

use pagefill_core::{FillError, FillResult};
use parking_lot::Mutex;

use super::shared::FillerShared;
use crate::context::FillerId;
use crate::expr::{Evaluator, StyleContext};
use crate::logging::targets;
use crate::print::{Bookmark, PrintPage};
use crate::runner::RunnerControl;

/// One finished page of a subreport.
#[derive(Debug, Clone)]
pub struct PageCompletedEvent {
    /// The filler that produced the page.
    pub filler: FillerId,
    /// Height of the page content, applied to the subreport element.
    pub stretch_height: u32,
    /// Whether this was the subreport's last page.
    pub report_ended: bool,
    pub page: PrintPage,
}

/// What a containing filler exposes to a nested filler.
pub trait FillerParent: Send + Sync {
    /// Name of the element or report the nested filler is filled for.
    fn report_name(&self) -> &str;

    /// Id of the containing filler, if it is registered.
    fn filler_id(&self) -> Option<FillerId> {
        None
    }

    fn register_child(&self, child: FillerId);

    /// Idempotent.
    fn unregister_child(&self, child: FillerId);

    /// Signal the bound runner of `child` to stop. No further pages are
    /// accepted from it afterwards.
    fn abort_child(&self, child: FillerId);

    fn is_page_break_allowed(&self) -> bool;

    /// Whether a split-prevented band of the child may split anyway. Not
    /// cacheable: the answer follows the parent's band position.
    fn is_split_policy_overridden(&self, top_level: bool) -> bool;

    /// Called by the child after each page.
    ///
    /// Returns once the parent has placed the page and wants the next one,
    /// or immediately when the child has ended.
    fn on_page_completed(&self, event: PageCompletedEvent) -> FillResult<()>;

    fn update_bookmark(&self, bookmark: Bookmark);

    fn style_context(&self) -> StyleContext;

    /// Evaluator the child reuses.
    fn evaluator(&self) -> Arc<dyn Evaluator>;

    /// Height available for the child's next page.
    fn available_height(&self) -> u32;
}

#[derive(Default)]
struct CoordinatorState {
    child: Option<FillerId>,
    runner: Option<Arc<dyn RunnerControl>>,
    stretch_height: u32,
    available_height: u32,
    delivered: Option<PrintPage>,
    bookmarks: Vec<Bookmark>,
    pages_completed: u32,
    report_ended: bool,
    aborted: bool,
}

/// The [`FillerParent`] of a subreport element.
///
/// Bridges the parent filler and at most one child filler at a time. The
/// completed child page is kept until the parent's element takes it, along
/// with the bookmarks the child placed on it.
pub struct SubreportParent {
    element: String,
    parent: Arc<FillerShared>,
    evaluator: Arc<dyn Evaluator>,
    this: Weak<SubreportParent>,
    state: Mutex<CoordinatorState>,
}

impl SubreportParent {
    pub(crate) fn new(element: &str, parent: Arc<FillerShared>, evaluator: Arc<dyn Evaluator>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            element: element.to_string(),
            parent,
            evaluator,
            this: this.clone(),
            state: Mutex::new(CoordinatorState::default()),
        })
    }

    /// Bind the runner that suspends on non-final pages.
    pub fn bind_runner(&self, control: Arc<dyn RunnerControl>) {
        self.state.lock().runner = Some(control);
    }

    pub fn unbind_runner(&self) {
        self.state.lock().runner = None;
    }

    pub fn set_available_height(&self, height: u32) {
        self.state.lock().available_height = height;
    }

    /// The last page the child delivered, if the parent has not taken it.
    pub fn take_delivered(&self) -> Option<PrintPage> {
        self.state.lock().delivered.take()
    }

    /// Bookmarks of the child pages delivered so far. They take effect when
    /// the parent places the page, with the parent's page number.
    pub fn take_bookmarks(&self) -> Vec<Bookmark> {
        std::mem::take(&mut self.state.lock().bookmarks)
    }

    /// Stretch height of the last completed page.
    pub fn stretch_height(&self) -> u32 {
        self.state.lock().stretch_height
    }

    pub fn pages_completed(&self) -> u32 {
        self.state.lock().pages_completed
    }

    pub fn has_report_ended(&self) -> bool {
        self.state.lock().report_ended
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// Abort the current child, if any.
    pub fn abort(&self) {
        let runner = {
            let mut state = self.state.lock();
            state.aborted = true;
            state.runner.clone()
        };
        tracing::debug!(target: targets::RUNNER, element = %self.element, "aborting subreport");
        if let Some(runner) = runner {
            runner.abort();
        }
    }

    /// Prepare for a new child after the previous one terminated.
    pub fn reset(&self) {
        *self.state.lock() = CoordinatorState::default();
    }

    fn child_name(&self, child: FillerId) -> String {
        self.parent
            .context()
            .filler_name(child)
            .unwrap_or_else(|| self.element.clone())
    }
}

impl FillerParent for SubreportParent {
    fn report_name(&self) -> &str {
        &self.element
    }

    fn filler_id(&self) -> Option<FillerId> {
        Some(self.parent.id())
    }

    fn register_child(&self, child: FillerId) {
        self.state.lock().child = Some(child);
        self.parent.register_child(child, self.this.clone());
    }

    fn unregister_child(&self, child: FillerId) {
        {
            let mut state = self.state.lock();
            if state.child == Some(child) {
                state.child = None;
            }
        }
        self.parent.unregister_child(child);
    }

    fn abort_child(&self, child: FillerId) {
        let matches = self.state.lock().child == Some(child);
        if matches {
            self.abort();
        }
    }

    fn is_page_break_allowed(&self) -> bool {
        self.parent.is_page_break_allowed()
    }

    fn is_split_policy_overridden(&self, top_level: bool) -> bool {
        self.parent.is_split_prevent_inhibited(top_level)
    }

    fn on_page_completed(&self, event: PageCompletedEvent) -> FillResult<()> {
        let mut state = self.state.lock();
        if state.aborted {
            return Err(FillError::Aborted);
        }
        state.stretch_height = event.stretch_height;
        state.pages_completed += 1;

        if event.report_ended {
            state.report_ended = true;
            state.delivered = Some(event.page);
            tracing::debug!(
                target: targets::RUNNER,
                element = %self.element,
                stretch = event.stretch_height,
                "subreport ended"
            );
            return Ok(());
        }

        if !self.parent.is_band_overflow_allowed() {
            drop(state);
            return Err(FillError::UnsupportedOverflow {
                report: self.child_name(event.filler),
            });
        }
        let Some(runner) = state.runner.clone() else {
            drop(state);
            return Err(FillError::NoRunnerBound {
                report: self.child_name(event.filler),
            });
        };
        state.delivered = Some(event.page);
        let page = state.pages_completed;
        drop(state);

        tracing::debug!(
            target: targets::RUNNER,
            element = %self.element,
            page,
            stretch = event.stretch_height,
            "subreport page completed, suspending"
        );
        runner.suspend()
    }

    fn update_bookmark(&self, bookmark: Bookmark) {
        self.state.lock().bookmarks.push(bookmark);
    }

    fn style_context(&self) -> StyleContext {
        self.parent.style_context()
    }

    fn evaluator(&self) -> Arc<dyn Evaluator> {
        self.evaluator.clone()
    }

    fn available_height(&self) -> u32 {
        self.state.lock().available_height
    }
}

impl std::fmt::Debug for SubreportParent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SubreportParent")
            .field("element", &self.element)
            .field("parent", &self.parent.name())
            .field("child", &state.child)
            .field("pages_completed", &state.pages_completed)
            .field("report_ended", &state.report_ended)
            .field("aborted", &state.aborted)
            .finish()
    }
}
