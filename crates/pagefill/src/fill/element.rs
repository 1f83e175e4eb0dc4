//! Per-element fill state machine.
//!
//! For every band pass an element is evaluated, then prepared against the
//! space left on the page and, if printable, materialized into an immutable
//! [`PrintElement`]:
//!
//! ```text
//! Initial -> Evaluated -> Printable | Suppressed | Overflowed
//! ```
//!
//! `reprinted` is a flag on top of `Printable`.
//!
//! Bookmarks and delayed values of a printable element are staged with it
//! and only take effect once the filler places its band on a page.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use pagefill_core::{FillError, FillResult, Value};

use super::delayed::{BoundElement, BoundTime};
use super::filler::ReportFiller;
use super::parent::SubreportParent;
use super::shared::FillerShared;
use crate::context::FillContext;
use crate::design::{ElementDesign, ElementKind, EvaluationMode, SubreportDesign, VariableDesign};
use crate::expr::{Evaluation, Evaluator, Expression, FillScope, evaluate_expression};
use crate::logging::targets;
use crate::print::{Bookmark, ElementList, PrintElement, PrintElementId, PrintKind, RecordedValues};
use crate::runner::{RunResult, SubreportRunner, create_runner};

/// What elements see of their filler during a pass.
pub(crate) struct ElementContext<'a> {
    pub scope: &'a FillScope,
    pub evaluator: &'a Arc<dyn Evaluator>,
    pub shared: &'a Arc<FillerShared>,
}

impl ElementContext<'_> {
    fn evaluate(&self, expression: &Expression, evaluation: Evaluation) -> FillResult<Value> {
        evaluate_expression(self.evaluator.as_ref(), expression, self.scope, evaluation)
    }

    fn evaluate_text(&self, expression: Option<&Expression>, evaluation: Evaluation) -> FillResult<Option<String>> {
        let Some(expression) = expression else {
            return Ok(None);
        };
        let value = self.evaluate(expression, evaluation)?;
        Ok((!value.is_null()).then(|| value.to_string()))
    }
}

/// Where the band being filled sits on the page.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BandPosition {
    /// The band is the first whole band on the page or column.
    pub first_whole_band: bool,
    /// Vertical offset subtracted from design positions on continuation
    /// passes.
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Initial,
    Evaluated,
    Printable,
    Suppressed,
    Overflowed,
}

impl ElementState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Evaluated => "evaluated",
            Self::Printable => "printable",
            Self::Suppressed => "suppressed",
            Self::Overflowed => "overflowed",
        }
    }
}

/// Result of [`ElementFill::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// The element prints now. `overflows` means it has more content for
    /// the next page.
    Print { reprinted: bool, overflows: bool },
    Suppressed,
    /// The element does not fit; the band continues on the next page.
    Overflowed,
}

/// Effects of printed elements that take hold once their band is placed.
#[derive(Debug, Default)]
pub(crate) struct Staged {
    pub bookmarks: Vec<Bookmark>,
    pub bound: Vec<BoundElement>,
}

impl Staged {
    pub(crate) fn append(&mut self, other: &mut Staged) {
        self.bookmarks.append(&mut other.bookmarks);
        self.bound.append(&mut other.bound);
    }

    fn clear(&mut self) {
        self.bookmarks.clear();
        self.bound.clear();
    }
}

struct SubreportRun {
    coordinator: Arc<SubreportParent>,
    runner: Box<dyn SubreportRunner>,
}

/// Fill state of one design element.
pub(crate) struct ElementFill {
    design: ElementDesign,
    /// Set for text fields whose value is resolved after printing.
    bound: Option<BoundTime>,
    origin: u32,
    prints: u32,
    state: ElementState,
    print_when: Option<bool>,
    value: Value,
    previous_value: Option<Value>,
    value_repeats: bool,
    style: Option<String>,
    anchor: Option<String>,
    parameters: BTreeMap<String, Value>,
    recorded: Option<RecordedValues>,
    already_printed: bool,
    reprinted: bool,
    pending: bool,
    relative_y: u32,
    height: u32,
    content: Option<PrintKind>,
    staged: Staged,
    children: Vec<ElementFill>,
    subreport: Option<SubreportRun>,
}

impl ElementFill {
    /// `variables` are the report's, used to place delayed values.
    pub(crate) fn new(design: &ElementDesign, variables: &[VariableDesign], context: &FillContext) -> Self {
        let children = match &design.kind {
            ElementKind::Frame(children) => children
                .iter()
                .map(|child| ElementFill::new(child, variables, context))
                .collect(),
            _ => Vec::new(),
        };
        Self {
            design: design.clone(),
            bound: BoundTime::of(design, variables),
            origin: context.next_origin(),
            prints: 0,
            state: ElementState::Initial,
            print_when: None,
            value: Value::Null,
            previous_value: None,
            value_repeats: false,
            style: None,
            anchor: None,
            parameters: BTreeMap::new(),
            recorded: None,
            already_printed: false,
            reprinted: false,
            pending: false,
            relative_y: design.y,
            height: design.height,
            content: None,
            staged: Staged::default(),
            children,
            subreport: None,
        }
    }

    pub(crate) fn design_y(&self) -> u32 {
        self.design.y
    }

    /// Whether the element has content left for a continuation pass.
    pub(crate) fn is_pending(&self) -> bool {
        self.pending
    }

    /// Bookmarks and delayed values of the last print, for the band to
    /// commit once it is placed.
    pub(crate) fn take_staged(&mut self) -> Staged {
        std::mem::take(&mut self.staged)
    }

    fn print_id(&self) -> PrintElementId {
        PrintElementId::new(self.origin, self.prints)
    }

    fn invalid_state(&self, operation: &'static str) -> FillError {
        FillError::InvalidElementState {
            element: self.design.name.clone(),
            operation,
            state: self.state.name(),
        }
    }

    /// Evaluate the element's expressions for a new band pass.
    pub(crate) fn evaluate(&mut self, ctx: &ElementContext<'_>, evaluation: Evaluation) -> FillResult<()> {
        self.reprinted = false;
        self.pending = false;
        self.content = None;
        self.abandon_subreport();

        self.print_when = match &self.design.print_when {
            Some(expression) => Some(ctx.evaluate(expression, evaluation)?.as_bool().unwrap_or(false)),
            None => None,
        };
        self.style = ctx.evaluate_text(self.design.style.as_ref(), evaluation)?;
        self.anchor = ctx.evaluate_text(self.design.anchor.as_ref(), evaluation)?;

        match &self.design.kind {
            ElementKind::StaticText(text) => {
                self.value = Value::Text(text.clone());
                self.value_repeats = true;
            }
            ElementKind::Graphic(_) => {
                self.value = Value::Null;
                self.value_repeats = true;
            }
            // Printed empty; the value is resolved at the bound time.
            ElementKind::TextField(_) if self.bound.is_some() => {
                self.value = Value::Null;
                self.value_repeats = false;
            }
            ElementKind::TextField(expression) => {
                let value = ctx.evaluate(expression, evaluation)?;
                self.value_repeats = self.previous_value.as_ref() == Some(&value);
                self.previous_value = Some(value.clone());
                self.value = value;
            }
            ElementKind::Generic { parameters, .. } => {
                let mut values = BTreeMap::new();
                for (name, expression) in parameters {
                    values.insert(name.clone(), ctx.evaluate(expression, evaluation)?);
                }
                self.parameters = values;
                self.value_repeats = false;
            }
            ElementKind::Frame(_) => {
                for child in &mut self.children {
                    child.evaluate(ctx, evaluation)?;
                }
                self.value_repeats = false;
            }
            ElementKind::Subreport(_) => self.value_repeats = false,
        }

        if self.design.evaluation_mode == EvaluationMode::Auto && self.bound.is_none() {
            let mut recorded = RecordedValues::new();
            for time in Evaluation::ALL {
                let value = match &self.design.kind {
                    ElementKind::TextField(expression) if time != evaluation => ctx.evaluate(expression, time)?,
                    _ => self.value.clone(),
                };
                recorded.record(time, value);
            }
            self.recorded = Some(recorded);
        }

        self.state = ElementState::Evaluated;
        Ok(())
    }

    /// Decide whether the element prints in this pass.
    pub(crate) fn prepare(
        &mut self,
        ctx: &ElementContext<'_>,
        position: &BandPosition,
        available: u32,
        is_overflow: bool,
    ) -> FillResult<PrepareOutcome> {
        if self.state == ElementState::Initial {
            return Err(self.invalid_state("prepare"));
        }
        let relative_y = self.design.y.saturating_sub(position.offset);

        if is_overflow && self.pending && self.subreport.is_some() {
            return self.continue_subreport(ctx, relative_y, available);
        }

        if !is_overflow {
            self.already_printed = false;
        }
        self.pending = false;
        self.reprinted = false;
        self.content = None;
        self.staged.clear();

        if !self.is_to_print(ctx, position, is_overflow) {
            self.state = ElementState::Suppressed;
            return Ok(PrepareOutcome::Suppressed);
        }

        if available < relative_y + self.design.height {
            tracing::trace!(
                target: targets::FILL,
                element = %self.design.name,
                available,
                bottom = relative_y + self.design.height,
                "element overflows"
            );
            self.state = ElementState::Overflowed;
            self.pending = true;
            return Ok(PrepareOutcome::Overflowed);
        }

        let reprinted = is_overflow
            && self.design.print_when_detail_overflows
            && (self.already_printed || !self.design.print_repeated_values);
        self.prints += 1;
        self.relative_y = relative_y;
        self.height = self.design.height;

        let overflows = match &self.design.kind {
            ElementKind::Subreport(subreport) => {
                let subreport = subreport.clone();
                self.start_subreport(ctx, &subreport, available - relative_y)?
            }
            ElementKind::Frame(_) => {
                let children = self.prepare_frame(ctx, position)?;
                self.content = Some(PrintKind::Frame {
                    children: self.element_list(ctx, children)?,
                });
                false
            }
            _ => {
                self.content = Some(self.print_kind());
                false
            }
        };
        Ok(self.printable(ctx, reprinted, overflows))
    }

    fn is_to_print(&self, ctx: &ElementContext<'_>, position: &BandPosition, is_overflow: bool) -> bool {
        let design = &self.design;
        if self.print_when == Some(false) {
            return false;
        }
        if is_overflow && self.already_printed && !design.print_when_detail_overflows {
            return false;
        }
        if self.print_when.is_none() && !design.print_repeated_values && self.value_repeats {
            let first_whole_band = design.print_in_first_whole_band && position.first_whole_band;
            let group_changed = design
                .print_when_group_changes
                .as_ref()
                .is_some_and(|group| ctx.scope.changed_groups().contains(group));
            let overflow_print = is_overflow && design.print_when_detail_overflows;
            if !(first_whole_band || group_changed || overflow_print) {
                return false;
            }
        }
        if let ElementKind::Generic {
            skip_when_empty: true,
            ..
        } = design.kind
        {
            if self.parameters.values().all(Value::is_null) {
                return false;
            }
        }
        true
    }

    fn printable(&mut self, ctx: &ElementContext<'_>, reprinted: bool, overflows: bool) -> PrepareOutcome {
        self.already_printed = true;
        self.reprinted = reprinted;
        self.pending = overflows;
        self.state = ElementState::Printable;
        let id = self.print_id();
        if let Some(label) = &self.anchor {
            self.staged.bookmarks.insert(
                0,
                Bookmark {
                    label: label.clone(),
                    page_number: ctx.shared.page_number(),
                    element: id,
                },
            );
        }
        if let (Some(time), ElementKind::TextField(expression)) = (&self.bound, &self.design.kind) {
            self.staged.bound.push(BoundElement {
                id,
                time: time.clone(),
                expression: expression.clone(),
            });
        }
        PrepareOutcome::Print { reprinted, overflows }
    }

    fn print_kind(&self) -> PrintKind {
        match &self.design.kind {
            ElementKind::StaticText(text) => PrintKind::Text { text: text.clone() },
            ElementKind::TextField(_) => PrintKind::Text {
                text: self.value.to_string(),
            },
            ElementKind::Graphic(shape) => PrintKind::Graphic { shape: *shape },
            ElementKind::Generic { type_name, .. } => PrintKind::Generic {
                type_name: type_name.clone(),
                parameters: self.parameters.clone(),
            },
            ElementKind::Frame(_) | ElementKind::Subreport(_) => PrintKind::Frame {
                children: ElementList::default(),
            },
        }
    }

    /// Children are clipped to the frame.
    fn prepare_frame(&mut self, ctx: &ElementContext<'_>, position: &BandPosition) -> FillResult<Vec<PrintElement>> {
        let inner = BandPosition {
            first_whole_band: position.first_whole_band,
            offset: 0,
        };
        let mut printed = Vec::new();
        for child in &mut self.children {
            if let PrepareOutcome::Print { overflows, .. } = child.prepare(ctx, &inner, self.design.height, false)? {
                printed.push(child.fill()?);
                self.staged.append(&mut child.staged);
                if overflows {
                    child.abandon_subreport();
                }
            }
        }
        Ok(printed)
    }

    /// Wrap children, handing large lists to the virtualization store.
    fn element_list(&self, ctx: &ElementContext<'_>, elements: Vec<PrintElement>) -> FillResult<ElementList> {
        let context = ctx.shared.context();
        let virtualization = &context.config().virtualization;
        let count: usize = elements.iter().map(PrintElement::deep_count).sum();
        if virtualization.enabled && count > virtualization.frame_element_threshold {
            let handle = context.store().manage(self.print_id(), elements)?;
            tracing::trace!(
                target: targets::VIRTUALIZATION,
                element = %self.design.name,
                count,
                "frame children handed to store"
            );
            return Ok(ElementList::Managed(handle));
        }
        Ok(ElementList::Inline(elements))
    }

    fn start_subreport(
        &mut self,
        ctx: &ElementContext<'_>,
        design: &SubreportDesign,
        child_height: u32,
    ) -> FillResult<bool> {
        let mut parameters = HashMap::new();
        for (name, expression) in &design.parameters {
            parameters.insert(name.clone(), ctx.evaluate(expression, Evaluation::Current)?);
        }
        let data = (design.data)(ctx.scope)?;
        let context = ctx.shared.context().clone();

        let coordinator = SubreportParent::new(&self.design.name, ctx.shared.clone(), ctx.evaluator.clone());
        coordinator.set_available_height(child_height);
        let child = ReportFiller::subreport(
            design.report.clone(),
            context.clone(),
            coordinator.clone(),
            data,
            parameters,
        )?;

        let config = context.config();
        let mut runner = create_runner(config.runner, &config.worker, Box::new(child));
        coordinator.bind_runner(runner.control());
        let _span = tracing::debug_span!(
            crate::logging::span_names::SUBREPORT,
            element = %self.design.name
        )
        .entered();
        let result = runner.start();
        self.subreport = Some(SubreportRun { coordinator, runner });
        self.collect_subreport(ctx, result, child_height)
    }

    fn continue_subreport(
        &mut self,
        ctx: &ElementContext<'_>,
        relative_y: u32,
        available: u32,
    ) -> FillResult<PrepareOutcome> {
        let child_height = available.saturating_sub(relative_y);
        let Some(run) = self.subreport.as_mut() else {
            return Err(self.invalid_state("continue"));
        };
        run.coordinator.set_available_height(child_height);
        let _span = tracing::debug_span!(
            crate::logging::span_names::SUBREPORT,
            element = %self.design.name
        )
        .entered();
        let result = run.runner.resume();

        self.prints += 1;
        self.relative_y = relative_y;
        self.staged.clear();
        let overflows = self.collect_subreport(ctx, result, child_height)?;
        Ok(self.printable(ctx, false, overflows))
    }

    /// Place the page the child delivered. Returns whether more pages follow.
    fn collect_subreport(
        &mut self,
        ctx: &ElementContext<'_>,
        result: RunResult,
        child_height: u32,
    ) -> FillResult<bool> {
        let Some(run) = self.subreport.as_mut() else {
            return Err(self.invalid_state("collect"));
        };
        let overflows = match result {
            RunResult::Suspended => true,
            RunResult::Finished => {
                run.coordinator.unbind_runner();
                false
            }
            RunResult::Aborted => return Err(FillError::Aborted),
            RunResult::Failed(err) => return Err(err),
            RunResult::Filling => {
                return Err(FillError::InvalidRunnerState {
                    operation: "collect",
                    state: run.runner.state().name(),
                });
            }
        };
        let page = run.coordinator.take_delivered().unwrap_or_default();
        self.staged.bookmarks.extend(run.coordinator.take_bookmarks());
        let stretch = run.coordinator.stretch_height();
        self.height = stretch.max(self.design.height.min(child_height));
        let children = self.element_list(ctx, page.elements)?;
        self.content = Some(PrintKind::Frame { children });
        Ok(overflows)
    }

    /// Abort a subreport that is still filling and forget it.
    fn abandon_subreport(&mut self) {
        if let Some(mut run) = self.subreport.take() {
            if run.runner.is_filling() {
                run.runner.abort();
            }
        }
    }

    /// Materialize the prepared element.
    pub(crate) fn fill(&self) -> FillResult<PrintElement> {
        if self.state != ElementState::Printable {
            return Err(self.invalid_state("fill"));
        }
        let Some(kind) = &self.content else {
            return Err(self.invalid_state("fill"));
        };
        Ok(PrintElement {
            id: self.print_id(),
            x: self.design.x,
            y: self.relative_y,
            width: self.design.width,
            height: self.height,
            style: self.style.clone(),
            anchor: self.anchor.clone(),
            recorded: self.recorded.clone(),
            kind: kind.clone(),
        })
    }

    /// Discard the outcome of the last prepare so the element can be
    /// prepared again for another page.
    pub(crate) fn rewind_prepared(&mut self, ctx: &ElementContext<'_>) -> FillResult<()> {
        if let Some(PrintKind::Frame {
            children: ElementList::Managed(handle),
        }) = &self.content
        {
            ctx.shared.context().store().release(handle)?;
        }
        self.abandon_subreport();
        for child in &mut self.children {
            child.rewind_prepared(ctx)?;
        }
        self.staged.clear();
        self.content = None;
        self.pending = false;
        self.reprinted = false;
        if self.state != ElementState::Initial {
            self.state = ElementState::Evaluated;
        }
        Ok(())
    }

    /// Forget all state from previous passes.
    pub(crate) fn rewind(&mut self) {
        self.abandon_subreport();
        for child in &mut self.children {
            child.rewind();
        }
        self.state = ElementState::Initial;
        self.previous_value = None;
        self.value_repeats = false;
        self.already_printed = false;
        self.recorded = None;
        self.content = None;
        self.staged.clear();
        self.pending = false;
        self.reprinted = false;
    }
}

impl fmt::Debug for ElementFill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementFill")
            .field("name", &self.design.name)
            .field("origin", &self.origin)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use pagefill_core::FillConfig;

    use super::*;
    use crate::data::Record;
    use crate::expr::ScopeEvaluator;
    use crate::print::Shape;

    struct Harness {
        scope: FillScope,
        evaluator: Arc<dyn Evaluator>,
        shared: Arc<FillerShared>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(FillConfig::default())
        }

        fn with_config(config: FillConfig) -> Self {
            let context = FillContext::new(config);
            Self {
                scope: FillScope::default(),
                evaluator: Arc::new(ScopeEvaluator),
                shared: FillerShared::new(context, "test", None),
            }
        }

        fn ctx(&self) -> ElementContext<'_> {
            ElementContext {
                scope: &self.scope,
                evaluator: &self.evaluator,
                shared: &self.shared,
            }
        }

        fn element(&self, design: ElementDesign) -> ElementFill {
            ElementFill::new(&design, &[], self.shared.context())
        }

        fn record(&mut self, pairs: &[(&str, Value)]) {
            self.scope.advance(Record::new(pairs.iter().cloned()));
        }
    }

    fn first_band() -> BandPosition {
        BandPosition {
            first_whole_band: true,
            offset: 0,
        }
    }

    fn later_band() -> BandPosition {
        BandPosition::default()
    }

    fn amount_field() -> ElementDesign {
        ElementDesign::text_field("amount", 0, 10, 50, 20, Expression::field("amount"))
    }

    #[test]
    fn test_print_when_false_always_suppresses() {
        let harness = Harness::new();
        let mut element = harness.element(amount_field().with_print_when(Expression::constant(false)));
        for available in [0, 25, 1000] {
            element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
            assert_eq!(
                element.prepare(&harness.ctx(), &first_band(), available, false).unwrap(),
                PrepareOutcome::Suppressed
            );
            assert_eq!(
                element.prepare(&harness.ctx(), &first_band(), available, true).unwrap(),
                PrepareOutcome::Suppressed
            );
        }
    }

    #[test]
    fn test_null_print_when_counts_as_false() {
        let harness = Harness::new();
        let mut element = harness.element(amount_field().with_print_when(Expression::field("missing")));
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        assert_eq!(
            element.prepare(&harness.ctx(), &first_band(), 100, false).unwrap(),
            PrepareOutcome::Suppressed
        );
    }

    #[test]
    fn test_overflow_when_space_is_short() {
        let mut harness = Harness::new();
        harness.record(&[("amount", Value::Int(5))]);
        let mut element = harness.element(amount_field());
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();

        assert_eq!(
            element.prepare(&harness.ctx(), &first_band(), 29, false).unwrap(),
            PrepareOutcome::Overflowed
        );
        assert!(element.is_pending());
        assert!(matches!(
            element.fill(),
            Err(FillError::InvalidElementState {
                operation: "fill",
                state: "overflowed",
                ..
            })
        ));

        assert_eq!(
            element.prepare(&harness.ctx(), &first_band(), 30, false).unwrap(),
            PrepareOutcome::Print {
                reprinted: false,
                overflows: false
            }
        );
    }

    #[test]
    fn test_fill_is_idempotent() {
        let mut harness = Harness::new();
        harness.record(&[("amount", Value::Int(5))]);
        let mut element = harness.element(amount_field().with_style(Expression::constant("bold")));
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        element.prepare(&harness.ctx(), &first_band(), 100, false).unwrap();

        let first = element.fill().unwrap();
        let second = element.fill().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.text(), Some("5"));
        assert_eq!(first.style.as_deref(), Some("bold"));
        assert_eq!(first.y, 10);
    }

    #[test]
    fn test_prepare_requires_evaluation() {
        let harness = Harness::new();
        let mut element = harness.element(amount_field());
        assert!(matches!(
            element.prepare(&harness.ctx(), &first_band(), 100, false),
            Err(FillError::InvalidElementState {
                operation: "prepare",
                ..
            })
        ));
    }

    #[test]
    fn test_repeated_values_are_suppressed() {
        let mut harness = Harness::new();
        let mut element = harness.element(amount_field().with_print_repeated_values(false));

        harness.record(&[("amount", Value::Int(5))]);
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        assert!(matches!(
            element.prepare(&harness.ctx(), &later_band(), 100, false).unwrap(),
            PrepareOutcome::Print { .. }
        ));

        harness.record(&[("amount", Value::Int(5))]);
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        assert_eq!(
            element.prepare(&harness.ctx(), &later_band(), 100, false).unwrap(),
            PrepareOutcome::Suppressed
        );

        harness.record(&[("amount", Value::Int(6))]);
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        assert!(matches!(
            element.prepare(&harness.ctx(), &later_band(), 100, false).unwrap(),
            PrepareOutcome::Print { .. }
        ));
    }

    #[test]
    fn test_repeated_value_prints_in_first_whole_band() {
        let harness = Harness::new();
        let mut element = harness.element(
            ElementDesign::static_text("label", 0, 0, 50, 10, "Total")
                .with_print_repeated_values(false)
                .with_print_in_first_whole_band(true),
        );
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        assert_eq!(
            element.prepare(&harness.ctx(), &later_band(), 100, false).unwrap(),
            PrepareOutcome::Suppressed
        );
        assert!(matches!(
            element.prepare(&harness.ctx(), &first_band(), 100, false).unwrap(),
            PrepareOutcome::Print { .. }
        ));
    }

    #[test]
    fn test_repeated_value_prints_on_group_change() {
        let mut harness = Harness::new();
        let mut element = harness.element(
            ElementDesign::graphic("rule", 0, 0, 50, 1, Shape::Line)
                .with_print_repeated_values(false)
                .with_print_when_group_changes("customer"),
        );

        harness.scope.advance(Record::default().with_changed_group("customer"));
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        assert!(matches!(
            element.prepare(&harness.ctx(), &later_band(), 100, false).unwrap(),
            PrepareOutcome::Print { .. }
        ));

        harness.scope.advance(Record::default());
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        assert_eq!(
            element.prepare(&harness.ctx(), &later_band(), 100, false).unwrap(),
            PrepareOutcome::Suppressed
        );
    }

    #[test]
    fn test_overflow_pass_suppresses_or_reprints() {
        let mut harness = Harness::new();
        harness.record(&[("amount", Value::Int(5))]);
        let mut plain = harness.element(amount_field());
        let mut reprinting = harness.element(amount_field().with_print_when_detail_overflows(true));
        for element in [&mut plain, &mut reprinting] {
            element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
            element.prepare(&harness.ctx(), &first_band(), 100, false).unwrap();
        }

        assert_eq!(
            plain.prepare(&harness.ctx(), &first_band(), 100, true).unwrap(),
            PrepareOutcome::Suppressed
        );
        assert_eq!(
            reprinting.prepare(&harness.ctx(), &first_band(), 100, true).unwrap(),
            PrepareOutcome::Print {
                reprinted: true,
                overflows: false
            }
        );
        assert!(reprinting.reprinted);
    }

    #[test]
    fn test_overflowed_element_prints_on_continuation() {
        let mut harness = Harness::new();
        harness.record(&[("amount", Value::Int(5))]);
        let mut element = harness.element(amount_field());
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        assert_eq!(
            element.prepare(&harness.ctx(), &later_band(), 15, false).unwrap(),
            PrepareOutcome::Overflowed
        );

        let continuation = BandPosition {
            first_whole_band: true,
            offset: 10,
        };
        assert_eq!(
            element.prepare(&harness.ctx(), &continuation, 100, true).unwrap(),
            PrepareOutcome::Print {
                reprinted: false,
                overflows: false
            }
        );
        assert_eq!(element.fill().unwrap().y, 0);
    }

    #[test]
    fn test_auto_evaluation_records_every_time() {
        let mut harness = Harness::new();
        harness.record(&[("amount", Value::Int(1))]);
        harness.record(&[("amount", Value::Int(2))]);
        let mut element = harness.element(amount_field().with_evaluation_mode(EvaluationMode::Auto));
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();

        let recorded = element.recorded.clone().unwrap();
        assert_eq!(recorded.get(Evaluation::Current), Some(&Value::Int(2)));
        assert_eq!(recorded.get(Evaluation::PreviousPass), Some(&Value::Int(1)));
        assert_eq!(recorded.get(Evaluation::Estimated), Some(&Value::Int(2)));

        element.prepare(&harness.ctx(), &first_band(), 100, false).unwrap();
        assert_eq!(element.fill().unwrap().recorded, Some(recorded));
    }

    #[test]
    fn test_generic_skipped_when_empty() {
        let harness = Harness::new();
        let mut element = harness.element(
            ElementDesign::generic(
                "barcode",
                0,
                0,
                50,
                20,
                "barcode",
                vec![("code".to_string(), Expression::field("code"))],
            )
            .with_skip_when_empty(true),
        );
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        assert_eq!(
            element.prepare(&harness.ctx(), &first_band(), 100, false).unwrap(),
            PrepareOutcome::Suppressed
        );
    }

    #[test]
    fn test_large_frame_children_are_managed() {
        let mut config = FillConfig::default();
        config.virtualization.frame_element_threshold = 1;
        let harness = Harness::with_config(config);
        let children = (0..3)
            .map(|i| ElementDesign::static_text(format!("t{i}"), 0, i * 10, 50, 10, format!("line {i}")))
            .collect();
        let mut element = harness.element(ElementDesign::frame("frame", 0, 0, 50, 25, children));
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        element.prepare(&harness.ctx(), &first_band(), 100, false).unwrap();

        let frame = element.fill().unwrap();
        let PrintKind::Frame { children } = &frame.kind else {
            panic!("expected a frame");
        };
        assert!(children.is_managed());
        let store = harness.shared.context().store();
        let resolved = children.resolve(store).unwrap();
        // The third child does not fit in the frame and is clipped.
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[1].text(), Some("line 1"));
    }

    #[test]
    fn test_anchor_is_staged_until_placed() {
        let harness = Harness::new();
        harness.shared.set_page_number(3);
        let mut element = harness.element(
            ElementDesign::static_text("heading", 0, 0, 50, 10, "Intro").with_anchor(Expression::constant("intro")),
        );
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        element.prepare(&harness.ctx(), &first_band(), 100, false).unwrap();
        assert!(harness.shared.take_bookmarks().is_empty());

        let staged = element.take_staged();
        assert_eq!(staged.bookmarks.len(), 1);
        assert_eq!(staged.bookmarks[0].label, "intro");
        assert_eq!(staged.bookmarks[0].element, element.fill().unwrap().id);
        assert!(element.take_staged().bookmarks.is_empty());
    }

    #[test]
    fn test_rewind_prepared_drops_staged_anchor() {
        let harness = Harness::new();
        let mut element = harness.element(
            ElementDesign::static_text("heading", 0, 0, 50, 10, "Intro").with_anchor(Expression::constant("intro")),
        );
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        element.prepare(&harness.ctx(), &first_band(), 100, false).unwrap();
        element.rewind_prepared(&harness.ctx()).unwrap();
        assert!(element.take_staged().bookmarks.is_empty());
    }

    #[test]
    fn test_frame_stages_child_anchors() {
        let harness = Harness::new();
        let children = vec![
            ElementDesign::static_text("a", 0, 0, 50, 10, "a").with_anchor(Expression::constant("a")),
            ElementDesign::static_text("b", 0, 10, 50, 10, "b").with_anchor(Expression::constant("b")),
        ];
        let mut element = harness.element(
            ElementDesign::frame("frame", 0, 0, 50, 20, children).with_anchor(Expression::constant("frame")),
        );
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        element.prepare(&harness.ctx(), &first_band(), 100, false).unwrap();

        let labels: Vec<String> = element
            .take_staged()
            .bookmarks
            .into_iter()
            .map(|bookmark| bookmark.label)
            .collect();
        assert_eq!(labels, vec!["frame", "a", "b"]);
    }

    #[test]
    fn test_delayed_field_prints_empty_and_stages_binding() {
        let mut harness = Harness::new();
        harness.record(&[("amount", Value::Int(5))]);
        let mut element = harness.element(amount_field().with_evaluation_mode(EvaluationMode::Report));
        element.evaluate(&harness.ctx(), Evaluation::Current).unwrap();
        element.prepare(&harness.ctx(), &first_band(), 100, false).unwrap();

        let printed = element.fill().unwrap();
        assert_eq!(printed.text(), Some(""));
        assert!(printed.recorded.is_none());
        let staged = element.take_staged();
        assert_eq!(staged.bound.len(), 1);
        assert_eq!(staged.bound[0].id, printed.id);
        assert_eq!(staged.bound[0].time, BoundTime::Report);
    }
}
