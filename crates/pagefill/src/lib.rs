//! Report pagination engine.
//!
//! This crate turns a report design and a data source into an immutable,
//! page-oriented element tree:
//!
//! - **Fill engine**: [`ReportFiller`] and the per-element state machine
//! - **Coordination**: [`FillerParent`], the protocol between a subreport and
//!   the filler containing it
//! - **Runners**: cooperative and threaded [`SubreportRunner`]s that suspend a
//!   subreport at every page break of its parent
//! - **Virtualization**: [`VirtualizationStore`] and [`PageStore`], which
//!   write parts of the page tree out and reload them on demand
//! - **Logging**: target names and [`PrintTreeDebug`](logging::PrintTreeDebug)
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use pagefill::{
//!     BandDesign, BandKind, ElementDesign, Expression, FillConfig, FillContext, ReportDesign,
//!     ReportFiller, ScopeEvaluator, VecDataSource,
//! };
//!
//! let design = ReportDesign::new("numbers", 200, 100)
//!     .with_band(BandDesign::new(BandKind::Detail, 20).with_element(
//!         ElementDesign::text_field("n", 0, 0, 200, 20, Expression::field("n")),
//!     ))
//!     .into_shared();
//!
//! let context = FillContext::new(FillConfig::default());
//! let mut filler = ReportFiller::master(
//!     design,
//!     context.clone(),
//!     Arc::new(ScopeEvaluator),
//!     Box::new(VecDataSource::numbered("n", 12)),
//! )?;
//! let document = filler.fill()?;
//! assert_eq!(document.pages.len(), 3);
//! # Ok::<(), pagefill::FillError>(())
//! ```

pub mod context;
pub mod data;
pub mod design;
pub mod expr;
pub mod fill;
pub mod logging;
pub mod print;
pub mod runner;
pub mod virtualization;

pub use context::{FillContext, FillerId};
pub use data::{DataSource, Record, VecDataSource};
pub use design::{
    BandDesign, BandKind, ElementDesign, ElementKind, EvaluationMode, ReportDesign, ResetType,
    SplitType, SubreportDesign, VariableDesign,
};
pub use expr::{
    Evaluation, Evaluator, Expression, FillScope, FnEvaluator, ScopeEvaluator, StyleContext,
};
pub use fill::{
    FillerParent, FillerShared, PageCompletedEvent, PrintDocument, ReportFiller, SubreportParent,
};
pub use print::{
    Bookmark, ElementList, ListHandle, PrintElement, PrintElementId, PrintKind, PrintPage,
    RecordedValues, Resolution, Shape,
};
pub use runner::{
    CooperativeRunner, FillWork, RunResult, RunnerControl, RunnerState, SubreportRunner,
    ThreadRunner, WorkStatus, create_runner,
};
pub use virtualization::{
    FileSwap, MemorySwap, PageStore, SwapSpace, VirtualizationInput, VirtualizationOutput,
    VirtualizationStore,
};

pub use pagefill_core::{
    CancellationToken, Calculation, FillConfig, FillError, FillResult, RunnerStrategy, Value,
    VirtualizationConfig, WorkerConfig,
};

static_assertions::assert_impl_all!(ReportFiller: Send);
static_assertions::assert_impl_all!(FillContext: Send, Sync);
static_assertions::assert_impl_all!(SubreportParent: Send, Sync);
