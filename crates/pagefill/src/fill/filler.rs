use std::collections::HashMap;
use std::sync::{Arc, Weak};

use pagefill_core::{CancelHookId, FillError, FillResult, Value};

use super::band::{BandFill, BandOutput};
use super::delayed::{BoundTime, DelayedElements};
use super::element::ElementContext;
use super::parent::{FillerParent, PageCompletedEvent};
use super::shared::FillerShared;
use super::variable::VariableFill;
use crate::context::FillContext;
use crate::data::DataSource;
use crate::design::{BandKind, ReportDesign};
use crate::expr::{Evaluation, Evaluator, FillScope, StyleContext};
use crate::logging::{span_names, targets};
use crate::print::{Bookmark, PrintPage};
use crate::runner::{FillWork, RunnerControl, WorkStatus};
use crate::virtualization::PageStore;

/// The output of a master fill.
pub struct PrintDocument {
    pub name: String,
    pub pages: PageStore,
    pub bookmarks: Vec<Bookmark>,
}

impl std::fmt::Debug for PrintDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintDocument")
            .field("name", &self.name)
            .field("pages", &self.pages.len())
            .field("bookmarks", &self.bookmarks.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Title,
    Detail,
    Summary,
    Done,
}

/// A band that did not finish on the previous page.
#[derive(Debug, Clone, Copy)]
enum Carry {
    /// Moved whole to the next page, keeping its evaluated values.
    Deferred(BandKind),
    /// Printed in part; pending elements continue on the next page.
    Continuing(BandKind),
}

/// Vertical layout state of the page being filled.
#[derive(Debug)]
struct PageCursor {
    y: u32,
    limit: u32,
}

impl PageCursor {
    fn available(&self) -> u32 {
        self.limit.saturating_sub(self.y)
    }
}

/// Fills one report, master or subreport.
///
/// A master is driven with [`fill`](Self::fill). A subreport is handed to a
/// runner as [`FillWork`] and delivers every page to its parent.
pub struct ReportFiller {
    design: Arc<ReportDesign>,
    shared: Arc<FillerShared>,
    evaluator: Arc<dyn Evaluator>,
    data: Box<dyn DataSource>,
    scope: FillScope,
    variables: Vec<VariableFill>,
    bands: Vec<BandFill>,
    phase: Phase,
    carry: Option<Carry>,
    delayed: DelayedElements,
    page_count: u32,
    started: bool,
    ended: bool,
    cancel_hook: Option<CancelHookId>,
}

impl ReportFiller {
    /// Create the top-level filler of a session.
    pub fn master(
        design: Arc<ReportDesign>,
        context: Arc<FillContext>,
        evaluator: Arc<dyn Evaluator>,
        data: Box<dyn DataSource>,
    ) -> FillResult<Self> {
        let shared = FillerShared::new(context.clone(), &design.name, None);
        let weak: Weak<FillerShared> = Arc::downgrade(&shared);
        let mut filler = Self::with_shared(design, shared, evaluator, data, HashMap::new())?;
        filler.cancel_hook = Some(context.cancellation().on_cancel(move || {
            if let Some(shared) = weak.upgrade() {
                shared.abort_children();
            }
        }));
        Ok(filler)
    }

    /// Create the filler of a subreport nested under `parent`.
    pub fn subreport(
        design: Arc<ReportDesign>,
        context: Arc<FillContext>,
        parent: Arc<dyn FillerParent>,
        data: Box<dyn DataSource>,
        parameters: HashMap<String, Value>,
    ) -> FillResult<Self> {
        let evaluator = parent.evaluator();
        let shared = FillerShared::new(context, &design.name, Some(parent));
        Self::with_shared(design, shared, evaluator, data, parameters)
    }

    fn with_shared(
        design: Arc<ReportDesign>,
        shared: Arc<FillerShared>,
        evaluator: Arc<dyn Evaluator>,
        data: Box<dyn DataSource>,
        parameters: HashMap<String, Value>,
    ) -> FillResult<Self> {
        let variables = design
            .variables
            .iter()
            .map(VariableFill::new)
            .collect::<FillResult<Vec<_>>>()?;
        let bands = design
            .bands
            .iter()
            .map(|band| BandFill::new(band, &design.variables, shared.context()))
            .collect();
        Ok(Self {
            design,
            shared,
            evaluator,
            data,
            scope: FillScope::with_parameters(parameters),
            variables,
            bands,
            phase: Phase::Title,
            carry: None,
            delayed: DelayedElements::default(),
            page_count: 0,
            started: false,
            ended: false,
            cancel_hook: None,
        })
    }

    /// Set a report parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.scope.set_parameter(name, value.into());
        self
    }

    /// Override the locale and time zone inherited by subreports.
    pub fn with_style_context(self, style: StyleContext) -> Self {
        self.shared.set_style_context(style);
        self
    }

    pub fn name(&self) -> &str {
        &self.design.name
    }

    pub fn shared(&self) -> &Arc<FillerShared> {
        &self.shared
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Abort every subreport of this filler.
    pub fn abort(&self) {
        self.shared.abort_children();
    }

    /// Fill the whole report.
    pub fn fill(&mut self) -> FillResult<PrintDocument> {
        let context = self.shared.context().clone();
        let mut pages = PageStore::new(context.store().clone(), &context.config().virtualization);
        tracing::debug!(target: targets::FILL, report = %self.design.name, "filling report");

        let result = self.fill_pages(&mut pages).and_then(|()| {
            let mut pending = context.take_resolutions();
            pages.apply_resolutions(&mut pending)?;
            if !pending.is_empty() {
                tracing::debug!(
                    target: targets::FILL,
                    report = %self.design.name,
                    unplaced = pending.len(),
                    "delayed values without a placed element"
                );
            }
            Ok(())
        });
        if let Err(err) = result {
            if !err.is_abort() {
                tracing::warn!(target: targets::FILL, report = %self.design.name, error = %err, "fill failed");
            }
            self.shared.abort_children();
            return Err(err);
        }

        tracing::debug!(
            target: targets::FILL,
            report = %self.design.name,
            pages = pages.len(),
            "report filled"
        );
        Ok(PrintDocument {
            name: self.design.name.clone(),
            pages,
            bookmarks: self.shared.take_bookmarks(),
        })
    }

    fn fill_pages(&mut self, pages: &mut PageStore) -> FillResult<()> {
        self.start()?;
        while !self.ended {
            let page = self.next_page()?;
            pages.push(page)?;
        }
        Ok(())
    }

    fn start(&mut self) -> FillResult<()> {
        if self.started {
            return Ok(());
        }
        for variable in &mut self.variables {
            variable.initialize(self.evaluator.as_ref(), &mut self.scope)?;
        }
        self.started = true;
        Ok(())
    }

    fn page_height(&self) -> u32 {
        match self.shared.parent() {
            Some(parent) => parent.available_height(),
            None => self.design.page_height,
        }
    }

    fn band_height(&self, kind: BandKind) -> u32 {
        self.design.band(kind).map_or(0, |band| band.height)
    }

    /// Fill the next page.
    fn next_page(&mut self) -> FillResult<PrintPage> {
        if self.shared.context().cancellation().is_cancelled() {
            return Err(FillError::Aborted);
        }
        self.page_count += 1;
        let number = self.page_count;
        let _span = tracing::debug_span!(span_names::PAGE, report = %self.design.name, page = number).entered();

        self.shared.set_page_number(number);
        self.scope.set_page_number(number);
        for variable in self.variables.iter_mut().filter(|variable| variable.resets_on_page()) {
            variable.initialize(self.evaluator.as_ref(), &mut self.scope)?;
        }

        let height = self.page_height();
        let mut page = PrintPage::new(number, self.design.page_width, height);
        let mut cursor = PageCursor {
            y: 0,
            limit: height.saturating_sub(self.band_height(BandKind::PageFooter)),
        };

        self.shared.set_first_band_on_page(true);
        let header = self.fill_fixed_band(BandKind::PageHeader, cursor.available())?;
        cursor.y += self.place(&mut page, cursor.y, header);
        self.shared.set_first_band_on_page(true);

        self.fill_body(&mut page, &mut cursor)?;

        let footer_y = cursor.limit;
        let footer = self.fill_fixed_band(BandKind::PageFooter, height.saturating_sub(footer_y))?;
        self.place(&mut page, footer_y, footer);

        if self.ended {
            self.resolve_delayed(|_| true, &mut page)?;
        } else {
            self.resolve_delayed(|time| *time == BoundTime::Page, &mut page)?;
        }

        tracing::debug!(
            target: targets::FILL,
            report = %self.design.name,
            page = number,
            elements = page.elements.len(),
            ended = self.ended,
            "page filled"
        );
        Ok(page)
    }

    fn fill_body(&mut self, page: &mut PrintPage, cursor: &mut PageCursor) -> FillResult<()> {
        if let Some(carry) = self.carry.take() {
            let full = match carry {
                Carry::Continuing(kind) => self.continue_band(kind, page, cursor)?,
                Carry::Deferred(kind) => self.place_band(kind, page, cursor)?,
            };
            if full {
                return Ok(());
            }
        }

        loop {
            match self.phase {
                Phase::Title => {
                    self.phase = Phase::Detail;
                    if self.evaluate_band(BandKind::Title)? && self.place_band(BandKind::Title, page, cursor)? {
                        return Ok(());
                    }
                }
                Phase::Detail => {
                    let Some(record) = self.data.next()? else {
                        self.phase = Phase::Summary;
                        continue;
                    };
                    // Groups that end are resolved against the last record
                    // of the group, before its variables reset.
                    if !record.changed_groups.is_empty() {
                        let groups = record.changed_groups.clone();
                        self.resolve_delayed(|time| time.is_group(&groups), page)?;
                    }
                    self.scope.advance(record);
                    for variable in &mut self.variables {
                        if variable.resets_on_group(self.scope.changed_groups()) {
                            variable.initialize(self.evaluator.as_ref(), &mut self.scope)?;
                        }
                        variable.increment(self.evaluator.as_ref(), &mut self.scope)?;
                    }
                    if self.evaluate_band(BandKind::Detail)? && self.place_band(BandKind::Detail, page, cursor)? {
                        return Ok(());
                    }
                }
                Phase::Summary => {
                    self.phase = Phase::Done;
                    if self.evaluate_band(BandKind::Summary)? && self.place_band(BandKind::Summary, page, cursor)? {
                        return Ok(());
                    }
                }
                Phase::Done => {
                    self.ended = true;
                    return Ok(());
                }
            }
        }
    }

    /// Evaluate a band if the report has one.
    fn evaluate_band(&mut self, kind: BandKind) -> FillResult<bool> {
        let ctx = ElementContext {
            scope: &self.scope,
            evaluator: &self.evaluator,
            shared: &self.shared,
        };
        let Some(band) = self.bands.iter_mut().find(|band| band.kind() == kind) else {
            return Ok(false);
        };
        band.evaluate(&ctx, Evaluation::Current)?;
        Ok(true)
    }

    /// Evaluate and fill a band that never continues on another page.
    fn fill_fixed_band(&mut self, kind: BandKind, available: u32) -> FillResult<BandOutput> {
        if !self.evaluate_band(kind)? {
            return Ok(BandOutput::default());
        }
        let ctx = ElementContext {
            scope: &self.scope,
            evaluator: &self.evaluator,
            shared: &self.shared,
        };
        let Some(band) = self.bands.iter_mut().find(|band| band.kind() == kind) else {
            return Ok(BandOutput::default());
        };
        let mut output = band.fill(&ctx, available, false)?;
        output.stretch = output.stretch.min(available);
        Ok(output)
    }

    /// Place an evaluated band. Returns whether the page is full.
    fn place_band(&mut self, kind: BandKind, page: &mut PrintPage, cursor: &mut PageCursor) -> FillResult<bool> {
        let ctx = ElementContext {
            scope: &self.scope,
            evaluator: &self.evaluator,
            shared: &self.shared,
        };
        let Some(band) = self.bands.iter_mut().find(|band| band.kind() == kind) else {
            return Ok(false);
        };
        let available = cursor.available();
        let first = ctx.shared.is_first_band_on_page();

        if !first && band.design().break_height() > available {
            self.carry = Some(Carry::Deferred(kind));
            return Ok(true);
        }
        if !first && band.design().page_break_before && ctx.shared.is_page_break_allowed() {
            self.carry = Some(Carry::Deferred(kind));
            return Ok(true);
        }

        let _span = tracing::trace_span!(span_names::BAND, band = kind.name()).entered();
        let output = band.fill(&ctx, available, false)?;
        if output.will_overflow && band.is_split_prevented() && !ctx.shared.is_split_prevent_inhibited(true) {
            tracing::trace!(target: targets::FILL, band = kind.name(), "split prevented, moving band");
            band.rewind_prepared(&ctx)?;
            self.carry = Some(Carry::Deferred(kind));
            return Ok(true);
        }
        self.place_output(kind, page, cursor, output)
    }

    /// Fill the pending part of a band that overflowed the previous page.
    fn continue_band(&mut self, kind: BandKind, page: &mut PrintPage, cursor: &mut PageCursor) -> FillResult<bool> {
        let ctx = ElementContext {
            scope: &self.scope,
            evaluator: &self.evaluator,
            shared: &self.shared,
        };
        let Some(band) = self.bands.iter_mut().find(|band| band.kind() == kind) else {
            return Ok(false);
        };
        let output = band.fill(&ctx, cursor.available(), true)?;
        if output.will_overflow && !output.progressed {
            return Err(FillError::InfiniteOverflow {
                report: self.design.name.clone(),
                band: kind.name().to_string(),
            });
        }
        self.place_output(kind, page, cursor, output)
    }

    fn place_output(
        &mut self,
        kind: BandKind,
        page: &mut PrintPage,
        cursor: &mut PageCursor,
        output: BandOutput,
    ) -> FillResult<bool> {
        let overflow = output.will_overflow;
        cursor.y += self.place(page, cursor.y, output);
        self.shared.set_first_band_on_page(false);
        if overflow {
            self.carry = Some(Carry::Continuing(kind));
        }
        Ok(overflow)
    }

    /// Append a band's elements at `y` and commit what they staged. Returns
    /// the height used.
    fn place(&mut self, page: &mut PrintPage, y: u32, output: BandOutput) -> u32 {
        let BandOutput {
            elements,
            stretch,
            staged,
            ..
        } = output;
        let page_number = self.shared.page_number();
        for mut bookmark in staged.bookmarks {
            bookmark.page_number = page_number;
            self.shared.add_bookmark(bookmark);
        }
        self.delayed.bind(staged.bound);
        page.elements
            .extend(elements.into_iter().map(|element| element.translated(y)));
        stretch
    }

    /// Resolve the delayed elements that are due, filling them in on `page`
    /// or queueing them with the session when they were printed earlier.
    fn resolve_delayed(&mut self, due: impl Fn(&BoundTime) -> bool, page: &mut PrintPage) -> FillResult<()> {
        let mut resolved = self.delayed.resolve(due, self.evaluator.as_ref(), &self.scope)?;
        if resolved.is_empty() {
            return Ok(());
        }
        tracing::trace!(
            target: targets::FILL,
            report = %self.design.name,
            resolved = resolved.len(),
            waiting = self.delayed.len(),
            "delayed values resolved"
        );
        let context = self.shared.context();
        context.store().apply_resolutions(&mut page.elements, &mut resolved)?;
        if !resolved.is_empty() {
            context.post_resolutions(resolved);
        }
        Ok(())
    }

    fn deliver_pages(&mut self, parent: &dyn FillerParent, control: &dyn RunnerControl) -> FillResult<WorkStatus> {
        self.start()?;
        loop {
            if control.is_aborted() {
                return Err(FillError::Aborted);
            }
            let page = self.next_page()?;
            let event = PageCompletedEvent {
                filler: self.shared.id(),
                stretch_height: page.content_height(),
                report_ended: self.ended,
                page,
            };
            parent.on_page_completed(event)?;
            if self.ended {
                return Ok(WorkStatus::Completed);
            }
            if control.take_yield() {
                return Ok(WorkStatus::Yielded);
            }
        }
    }
}


impl FillWork for ReportFiller {
    fn fill(&mut self, control: &dyn RunnerControl) -> FillResult<WorkStatus> {
        let Some(parent) = self.shared.parent().cloned() else {
            return Err(FillError::NoRunnerBound {
                report: self.design.name.clone(),
            });
        };
        let result = self.deliver_pages(parent.as_ref(), control);
        if !matches!(result, Ok(WorkStatus::Yielded)) {
            self.shared.detach();
        }
        result
    }

    fn rewind(&mut self) -> FillResult<()> {
        self.data.rewind()?;
        self.scope.clear_records();
        for band in &mut self.bands {
            band.rewind();
        }
        self.phase = Phase::Title;
        self.carry = None;
        self.delayed.clear();
        self.page_count = 0;
        self.started = false;
        self.ended = false;
        self.shared.attach();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.design.name
    }
}

impl Drop for ReportFiller {
    fn drop(&mut self) {
        self.shared.detach();
        let context = self.shared.context();
        if let Some(hook) = self.cancel_hook.take() {
            context.cancellation().remove_hook(hook);
        }
        context.unregister_filler(self.shared.id());
    }
}

impl std::fmt::Debug for ReportFiller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportFiller")
            .field("report", &self.design.name)
            .field("shared", &self.shared)
            .field("phase", &self.phase)
            .field("page_count", &self.page_count)
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}
