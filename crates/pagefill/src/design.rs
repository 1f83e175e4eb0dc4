//! Report designs consumed by the fill engine.
//!
//! Designs are built in code; parsing and compiling report templates happen
//! elsewhere. A design is immutable once filling starts and is shared between
//! fillers through `Arc`.
//!
//! ```
//! use pagefill::design::{BandDesign, BandKind, ElementDesign, ReportDesign};
//! use pagefill::expr::Expression;
//!
//! let design = ReportDesign::new("orders", 200, 100)
//!     .with_band(BandDesign::new(BandKind::PageHeader, 10).with_element(
//!         ElementDesign::static_text("title", 0, 0, 200, 10, "Orders"),
//!     ))
//!     .with_band(BandDesign::new(BandKind::Detail, 20).with_element(
//!         ElementDesign::text_field("id", 0, 0, 50, 20, Expression::field("id")),
//!     ));
//! assert!(design.band(BandKind::Detail).is_some());
//! ```

use std::fmt;
use std::sync::Arc;

use pagefill_core::{Calculation, FillResult};

use crate::data::DataSource;
use crate::expr::{Expression, FillScope};
use crate::print::Shape;

/// Position of a band in the report layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandKind {
    /// Printed once, at the top of the first page.
    Title,
    /// Printed at the top of every page.
    PageHeader,
    /// Printed once per record.
    Detail,
    /// Printed once, after the last record.
    Summary,
    /// Printed at the bottom of every page.
    PageFooter,
}

impl BandKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::PageHeader => "pageHeader",
            Self::Detail => "detail",
            Self::Summary => "summary",
            Self::PageFooter => "pageFooter",
        }
    }
}

/// How a band behaves when it does not fit on the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitType {
    /// The band starts on the current page if its design height fits and
    /// continues on the next one.
    #[default]
    Stretch,
    /// The band moves whole to the next page unless splitting is inhibited.
    Prevent,
    /// The band starts on the current page if its first element fits.
    Immediate,
}

/// When an element's value is evaluated.
///
/// Only text fields can be delayed. Other elements always evaluate now.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EvaluationMode {
    /// Evaluated once, while filling.
    #[default]
    Now,
    /// Printed empty and filled in once the page is complete.
    Page,
    /// Printed empty and filled in once the report is complete.
    Report,
    /// Printed empty and filled in when the named group ends.
    Group(String),
    /// Values are recorded per evaluation time. A text field showing a
    /// single variable is delayed to that variable's reset time.
    Auto,
}

/// When a variable is reset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResetType {
    #[default]
    Report,
    Page,
    /// Reset whenever the named group changes.
    Group(String),
}

/// A report variable.
#[derive(Debug, Clone)]
pub struct VariableDesign {
    pub name: String,
    pub expression: Expression,
    pub calculation: Calculation,
    /// Incrementer factory kind, looked up in the value cache.
    pub factory: String,
    pub initial: Option<Expression>,
    pub reset: ResetType,
}

impl VariableDesign {
    pub fn new(name: impl Into<String>, expression: Expression, calculation: Calculation) -> Self {
        Self {
            name: name.into(),
            expression,
            calculation,
            factory: "number".to_string(),
            initial: None,
            reset: ResetType::Report,
        }
    }

    pub fn with_factory(mut self, factory: impl Into<String>) -> Self {
        self.factory = factory.into();
        self
    }

    pub fn with_initial(mut self, initial: Expression) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn with_reset(mut self, reset: ResetType) -> Self {
        self.reset = reset;
        self
    }
}

/// Creates a subreport's data source from the parent's scope.
pub type DataSourceFactory = dyn Fn(&FillScope) -> FillResult<Box<dyn DataSource>> + Send + Sync;

/// A nested report.
#[derive(Clone)]
pub struct SubreportDesign {
    pub report: Arc<ReportDesign>,
    pub data: Arc<DataSourceFactory>,
    /// Parameters passed to the subreport, evaluated in the parent.
    pub parameters: Vec<(String, Expression)>,
}

impl SubreportDesign {
    pub fn new<F>(report: Arc<ReportDesign>, data: F) -> Self
    where
        F: Fn(&FillScope) -> FillResult<Box<dyn DataSource>> + Send + Sync + 'static,
    {
        Self {
            report,
            data: Arc::new(data),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, expression: Expression) -> Self {
        self.parameters.push((name.into(), expression));
        self
    }
}

impl fmt::Debug for SubreportDesign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubreportDesign")
            .field("report", &self.report.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// What an element displays.
#[derive(Debug, Clone)]
pub enum ElementKind {
    StaticText(String),
    TextField(Expression),
    Graphic(Shape),
    Generic {
        type_name: String,
        parameters: Vec<(String, Expression)>,
        /// Do not print when every parameter evaluates to null.
        skip_when_empty: bool,
    },
    Frame(Vec<ElementDesign>),
    Subreport(SubreportDesign),
}

/// A band element.
#[derive(Debug, Clone)]
pub struct ElementDesign {
    pub name: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub print_when: Option<Expression>,
    pub print_repeated_values: bool,
    pub print_in_first_whole_band: bool,
    pub print_when_detail_overflows: bool,
    pub print_when_group_changes: Option<String>,
    pub style: Option<Expression>,
    pub anchor: Option<Expression>,
    pub evaluation_mode: EvaluationMode,
    pub kind: ElementKind,
}

impl ElementDesign {
    pub fn new(name: impl Into<String>, x: u32, y: u32, width: u32, height: u32, kind: ElementKind) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            width,
            height,
            print_when: None,
            print_repeated_values: true,
            print_in_first_whole_band: false,
            print_when_detail_overflows: false,
            print_when_group_changes: None,
            style: None,
            anchor: None,
            evaluation_mode: EvaluationMode::Now,
            kind,
        }
    }

    pub fn static_text(
        name: impl Into<String>,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        text: impl Into<String>,
    ) -> Self {
        Self::new(name, x, y, width, height, ElementKind::StaticText(text.into()))
    }

    pub fn text_field(
        name: impl Into<String>,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        expression: Expression,
    ) -> Self {
        Self::new(name, x, y, width, height, ElementKind::TextField(expression))
    }

    pub fn graphic(name: impl Into<String>, x: u32, y: u32, width: u32, height: u32, shape: Shape) -> Self {
        Self::new(name, x, y, width, height, ElementKind::Graphic(shape))
    }

    pub fn frame(
        name: impl Into<String>,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        children: Vec<ElementDesign>,
    ) -> Self {
        Self::new(name, x, y, width, height, ElementKind::Frame(children))
    }

    pub fn subreport(
        name: impl Into<String>,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        subreport: SubreportDesign,
    ) -> Self {
        Self::new(name, x, y, width, height, ElementKind::Subreport(subreport))
    }

    pub fn generic(
        name: impl Into<String>,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        type_name: impl Into<String>,
        parameters: Vec<(String, Expression)>,
    ) -> Self {
        Self::new(
            name,
            x,
            y,
            width,
            height,
            ElementKind::Generic {
                type_name: type_name.into(),
                parameters,
                skip_when_empty: false,
            },
        )
    }

    pub fn with_print_when(mut self, expression: Expression) -> Self {
        self.print_when = Some(expression);
        self
    }

    pub fn with_print_repeated_values(mut self, print: bool) -> Self {
        self.print_repeated_values = print;
        self
    }

    pub fn with_print_in_first_whole_band(mut self, print: bool) -> Self {
        self.print_in_first_whole_band = print;
        self
    }

    pub fn with_print_when_detail_overflows(mut self, print: bool) -> Self {
        self.print_when_detail_overflows = print;
        self
    }

    pub fn with_print_when_group_changes(mut self, group: impl Into<String>) -> Self {
        self.print_when_group_changes = Some(group.into());
        self
    }

    pub fn with_style(mut self, expression: Expression) -> Self {
        self.style = Some(expression);
        self
    }

    pub fn with_anchor(mut self, expression: Expression) -> Self {
        self.anchor = Some(expression);
        self
    }

    pub fn with_evaluation_mode(mut self, mode: EvaluationMode) -> Self {
        self.evaluation_mode = mode;
        self
    }

    /// Generic elements only: skip printing when every parameter is null.
    pub fn with_skip_when_empty(mut self, skip: bool) -> Self {
        if let ElementKind::Generic { skip_when_empty, .. } = &mut self.kind {
            *skip_when_empty = skip;
        }
        self
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// A layout band.
#[derive(Debug, Clone)]
pub struct BandDesign {
    pub kind: BandKind,
    pub height: u32,
    pub split_type: SplitType,
    /// Detail bands only: start a new page before each record.
    pub page_break_before: bool,
    /// Whether content of this band may continue on the next page. Subreports
    /// in a band that disallows overflow must fit on one page.
    pub overflow_allowed: bool,
    pub elements: Vec<ElementDesign>,
}

impl BandDesign {
    pub fn new(kind: BandKind, height: u32) -> Self {
        Self {
            kind,
            height,
            split_type: SplitType::default(),
            page_break_before: false,
            overflow_allowed: !matches!(kind, BandKind::PageHeader | BandKind::PageFooter),
            elements: Vec::new(),
        }
    }

    pub fn with_element(mut self, element: ElementDesign) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_split_type(mut self, split_type: SplitType) -> Self {
        self.split_type = split_type;
        self
    }

    pub fn with_page_break_before(mut self, page_break: bool) -> Self {
        self.page_break_before = page_break;
        self
    }

    pub fn with_overflow_allowed(mut self, allowed: bool) -> Self {
        self.overflow_allowed = allowed;
        self
    }

    /// Height that must be available for the band to start on a page.
    pub fn break_height(&self) -> u32 {
        match self.split_type {
            SplitType::Immediate => self
                .elements
                .iter()
                .map(ElementDesign::bottom)
                .min()
                .unwrap_or(0),
            SplitType::Stretch | SplitType::Prevent => self.height,
        }
    }
}

/// A report design.
#[derive(Debug, Clone)]
pub struct ReportDesign {
    pub name: String,
    pub page_width: u32,
    pub page_height: u32,
    pub bands: Vec<BandDesign>,
    pub variables: Vec<VariableDesign>,
}

impl ReportDesign {
    pub fn new(name: impl Into<String>, page_width: u32, page_height: u32) -> Self {
        Self {
            name: name.into(),
            page_width,
            page_height,
            bands: Vec::new(),
            variables: Vec::new(),
        }
    }

    /// Add a band, replacing any band of the same kind.
    pub fn with_band(mut self, band: BandDesign) -> Self {
        self.bands.retain(|b| b.kind != band.kind);
        self.bands.push(band);
        self
    }

    pub fn with_variable(mut self, variable: VariableDesign) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn band(&self, kind: BandKind) -> Option<&BandDesign> {
        self.bands.iter().find(|band| band.kind == kind)
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}
