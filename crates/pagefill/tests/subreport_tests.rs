//! End-to-end tests for subreports under both runner strategies.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use pagefill::{
    BandDesign, BandKind, CooperativeRunner, DataSource, ElementDesign, Evaluator, Expression,
    FillConfig, FillContext, FillError, FillerId, FillerParent, FnEvaluator, PageCompletedEvent,
    PrintDocument, ReportDesign, ReportFiller, RunResult, RunnerControl, RunnerStrategy,
    ScopeEvaluator, StyleContext, SubreportDesign, SubreportRunner, ThreadRunner, Value,
    VecDataSource, WorkerConfig,
};

fn items_design() -> Arc<ReportDesign> {
    ReportDesign::new("items", 100, 1000)
        .with_band(BandDesign::new(BandKind::Detail, 20).with_element(ElementDesign::text_field(
            "n",
            0,
            0,
            100,
            20,
            Expression::field("n"),
        )))
        .into_shared()
}

fn subreport(records: usize) -> SubreportDesign {
    SubreportDesign::new(items_design(), move |_| {
        Ok(Box::new(VecDataSource::numbered("n", records)))
    })
}

fn orders_design(records: usize, overflow_allowed: bool) -> Arc<ReportDesign> {
    ReportDesign::new("orders", 100, 100)
        .with_band(
            BandDesign::new(BandKind::Title, 20)
                .with_overflow_allowed(overflow_allowed)
                .with_element(ElementDesign::subreport("items", 0, 0, 100, 20, subreport(records))),
        )
        .into_shared()
}

fn fill(design: Arc<ReportDesign>, strategy: RunnerStrategy) -> Result<PrintDocument, FillError> {
    let context = FillContext::new(FillConfig::default().with_runner(strategy));
    ReportFiller::master(
        design,
        context,
        Arc::new(ScopeEvaluator),
        Box::new(VecDataSource::empty()),
    )?
    .fill()
}

fn page_texts(document: &PrintDocument) -> Vec<Vec<String>> {
    document
        .pages
        .iter()
        .map(|page| page.unwrap().texts(document.pages.store()).unwrap())
        .collect()
}

/// Parent that records every page event and suspends the bound runner on
/// non-final pages.
struct RecordingParent {
    height: u32,
    control: Mutex<Option<Arc<dyn RunnerControl>>>,
    events: Mutex<Vec<PageCompletedEvent>>,
    children: Mutex<Vec<FillerId>>,
}

impl RecordingParent {
    fn new(height: u32) -> Arc<Self> {
        Arc::new(Self {
            height,
            control: Mutex::new(None),
            events: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
        })
    }

    fn bind(&self, control: Arc<dyn RunnerControl>) {
        *self.control.lock() = Some(control);
    }

    fn ended_flags(&self) -> Vec<bool> {
        self.events.lock().iter().map(|event| event.report_ended).collect()
    }

    fn texts(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .flat_map(|event| event.page.elements.iter())
            .filter_map(|element| element.text().map(str::to_string))
            .collect()
    }
}

impl FillerParent for RecordingParent {
    fn report_name(&self) -> &str {
        "recording"
    }

    fn register_child(&self, child: FillerId) {
        self.children.lock().push(child);
    }

    fn unregister_child(&self, child: FillerId) {
        self.children.lock().retain(|id| *id != child);
    }

    fn abort_child(&self, _child: FillerId) {
        if let Some(control) = self.control.lock().as_ref() {
            control.abort();
        }
    }

    fn is_page_break_allowed(&self) -> bool {
        true
    }

    fn is_split_policy_overridden(&self, _top_level: bool) -> bool {
        false
    }

    fn on_page_completed(&self, event: PageCompletedEvent) -> Result<(), FillError> {
        let ended = event.report_ended;
        self.events.lock().push(event);
        if ended {
            return Ok(());
        }
        let control = self.control.lock().clone();
        match control {
            Some(control) => control.suspend(),
            None => Err(FillError::NoRunnerBound {
                report: "items".into(),
            }),
        }
    }

    fn update_bookmark(&self, _bookmark: pagefill::Bookmark) {}

    fn style_context(&self) -> StyleContext {
        StyleContext::default()
    }

    fn evaluator(&self) -> Arc<dyn Evaluator> {
        Arc::new(ScopeEvaluator)
    }

    fn available_height(&self) -> u32 {
        self.height
    }
}

fn child_filler(parent: &Arc<RecordingParent>, records: usize) -> ReportFiller {
    let context = FillContext::new(FillConfig::default());
    ReportFiller::subreport(
        items_design(),
        context,
        parent.clone(),
        Box::new(VecDataSource::numbered("n", records)),
        HashMap::new(),
    )
    .unwrap()
}

#[test]
fn test_two_page_subreport_spans_two_master_pages() {
    for strategy in [RunnerStrategy::Cooperative, RunnerStrategy::Thread] {
        let document = fill(orders_design(7, true), strategy).unwrap();
        assert_eq!(document.pages.len(), 2, "{strategy:?}");
        assert_eq!(
            page_texts(&document),
            vec![vec!["0", "1", "2", "3", "4"], vec!["5", "6"]],
            "{strategy:?}"
        );

        let second = document.pages.get(1).unwrap().unwrap();
        assert_eq!(second.elements.len(), 1);
        assert_eq!(second.elements[0].height, 40);
    }
}

#[test]
fn test_subreport_in_band_without_overflow_fails() {
    for strategy in [RunnerStrategy::Cooperative, RunnerStrategy::Thread] {
        let err = fill(orders_design(7, false), strategy).unwrap_err();
        assert!(
            matches!(err, FillError::UnsupportedOverflow { ref report } if report == "items"),
            "{strategy:?}: {err}"
        );
    }
}

#[test]
fn test_single_page_subreport_fits_band_without_overflow() {
    let document = fill(orders_design(3, false), RunnerStrategy::Thread).unwrap();
    assert_eq!(page_texts(&document), vec![vec!["0", "1", "2"]]);
}

#[test]
fn test_cooperative_pages_match_unsuspended_fill() {
    let parent = RecordingParent::new(40);
    let mut runner = CooperativeRunner::new(Box::new(child_filler(&parent, 5)));
    parent.bind(runner.control());

    assert!(matches!(runner.start(), RunResult::Suspended));
    assert_eq!(parent.ended_flags(), vec![false]);
    assert!(matches!(runner.resume(), RunResult::Suspended));
    assert!(matches!(runner.resume(), RunResult::Finished));
    assert_eq!(parent.ended_flags(), vec![false, false, true]);
    assert!(parent.children.lock().is_empty());

    let unsuspended = RecordingParent::new(1000);
    let mut runner = CooperativeRunner::new(Box::new(child_filler(&unsuspended, 5)));
    unsuspended.bind(runner.control());
    assert!(matches!(runner.start(), RunResult::Finished));

    assert_eq!(parent.texts(), unsuspended.texts());
    assert_eq!(parent.texts(), vec!["0", "1", "2", "3", "4"]);
}

#[test]
fn test_thread_runner_delivers_same_pages() {
    let parent = RecordingParent::new(40);
    let mut runner = ThreadRunner::new(Box::new(child_filler(&parent, 5)), WorkerConfig::default());
    parent.bind(runner.control());

    assert!(matches!(runner.start(), RunResult::Suspended));
    assert!(matches!(runner.resume(), RunResult::Suspended));
    assert!(matches!(runner.resume(), RunResult::Finished));
    assert_eq!(parent.ended_flags(), vec![false, false, true]);
    assert_eq!(parent.texts(), vec!["0", "1", "2", "3", "4"]);
}

#[test]
fn test_abort_stops_suspended_subreport() {
    for cooperative in [true, false] {
        let parent = RecordingParent::new(40);
        let work = Box::new(child_filler(&parent, 50));
        let mut runner: Box<dyn SubreportRunner> = if cooperative {
            Box::new(CooperativeRunner::new(work))
        } else {
            Box::new(ThreadRunner::new(work, WorkerConfig::default()))
        };
        parent.bind(runner.control());

        assert!(matches!(runner.start(), RunResult::Suspended));
        let child = parent.children.lock()[0];
        parent.abort_child(child);
        runner.abort();

        assert!(matches!(runner.resume(), RunResult::Failed(FillError::InvalidRunnerState { .. })));
        assert_eq!(parent.events.lock().len(), 1);
    }
}

#[test]
fn test_session_abort_stops_master_fill() {
    let context = FillContext::new(FillConfig::default());
    let hook = context.clone();
    let evaluator = FnEvaluator::new(move |_, _, scope, _| {
        let n = scope.field("n", pagefill::Evaluation::Current).cloned().unwrap_or_default();
        if n == Value::Int(3) {
            hook.abort();
        }
        Ok(n)
    });
    let design = ReportDesign::new("numbers", 100, 40)
        .with_band(BandDesign::new(BandKind::Detail, 20).with_element(ElementDesign::text_field(
            "n",
            0,
            0,
            100,
            20,
            Expression::Custom {
                id: 1,
                text: "$F{n}".into(),
            },
        )))
        .into_shared();

    let mut filler = ReportFiller::master(
        design,
        context,
        Arc::new(evaluator),
        Box::new(VecDataSource::numbered("n", 10)),
    )
    .unwrap();
    assert!(matches!(filler.fill(), Err(FillError::Aborted)));
}

#[test]
fn test_subreport_parameters_and_bookmarks() {
    let child = ReportDesign::new("greeting", 100, 1000)
        .with_band(
            BandDesign::new(BandKind::Title, 10).with_element(
                ElementDesign::text_field("who", 0, 0, 100, 10, Expression::parameter("customer"))
                    .with_anchor(Expression::constant("greeting")),
            ),
        )
        .into_shared();
    let data = |_: &pagefill::FillScope| -> Result<Box<dyn DataSource>, FillError> {
        Ok(Box::new(VecDataSource::empty()))
    };
    let design = ReportDesign::new("letter", 100, 100)
        .with_band(BandDesign::new(BandKind::Detail, 10).with_element(ElementDesign::subreport(
            "greeting",
            0,
            0,
            100,
            10,
            SubreportDesign::new(child, data).with_parameter("customer", Expression::field("name")),
        )))
        .into_shared();

    let records: Vec<pagefill::Record> = ["Ada", "Grace"]
        .into_iter()
        .map(|name| pagefill::Record::new([("name", Value::from(name))]))
        .collect();
    for strategy in [RunnerStrategy::Cooperative, RunnerStrategy::Thread] {
        let context = FillContext::new(FillConfig::default().with_runner(strategy));
        let document = ReportFiller::master(
            design.clone(),
            context.clone(),
            Arc::new(ScopeEvaluator),
            Box::new(VecDataSource::new(Vec::clone(&records))),
        )
        .unwrap()
        .fill()
        .unwrap();

        assert_eq!(page_texts(&document), vec![vec!["Ada", "Grace"]]);
        let labels: Vec<_> = document.bookmarks.iter().map(|b| (b.label.as_str(), b.page_number)).collect();
        assert_eq!(labels, vec![("greeting", 1), ("greeting", 1)]);
        assert_eq!(context.filler_count(), 0);
    }
}

#[test]
fn test_moved_subreport_bookmarks_only_where_placed() {
    let child = ReportDesign::new("greeting", 100, 1000)
        .with_band(
            BandDesign::new(BandKind::Title, 10).with_element(
                ElementDesign::text_field("who", 0, 0, 100, 10, Expression::parameter("customer"))
                    .with_anchor(Expression::parameter("customer")),
            ),
        )
        .into_shared();
    let data = |_: &pagefill::FillScope| -> Result<Box<dyn DataSource>, FillError> {
        Ok(Box::new(VecDataSource::empty()))
    };
    let band = BandDesign::new(BandKind::Detail, 20)
        .with_split_type(pagefill::SplitType::Prevent)
        .with_element(ElementDesign::subreport(
            "greeting",
            0,
            0,
            100,
            10,
            SubreportDesign::new(child, data).with_parameter("customer", Expression::field("name")),
        ))
        .with_element(ElementDesign::static_text("after", 0, 20, 100, 10, "after"));
    let design = ReportDesign::new("letter", 100, 50).with_band(band).into_shared();

    let records: Vec<pagefill::Record> = ["Ada", "Grace"]
        .into_iter()
        .map(|name| pagefill::Record::new([("name", Value::from(name))]))
        .collect();
    for strategy in [RunnerStrategy::Cooperative, RunnerStrategy::Thread] {
        let context = FillContext::new(FillConfig::default().with_runner(strategy));
        let document = ReportFiller::master(
            design.clone(),
            context,
            Arc::new(ScopeEvaluator),
            Box::new(VecDataSource::new(Vec::clone(&records))),
        )
        .unwrap()
        .fill()
        .unwrap();

        assert_eq!(
            page_texts(&document),
            vec![vec!["Ada", "after"], vec!["Grace", "after"]],
            "{strategy:?}"
        );
        let labels: Vec<_> = document.bookmarks.iter().map(|b| (b.label.as_str(), b.page_number)).collect();
        assert_eq!(labels, vec![("Ada", 1), ("Grace", 2)], "{strategy:?}");
    }
}

#[test]
fn test_subreport_report_time_value_reaches_master_page() {
    let child = ReportDesign::new("items", 100, 1000)
        .with_band(
            BandDesign::new(BandKind::Title, 10).with_element(
                ElementDesign::text_field("count", 0, 0, 100, 10, Expression::variable("count"))
                    .with_evaluation_mode(pagefill::EvaluationMode::Report),
            ),
        )
        .with_band(BandDesign::new(BandKind::Detail, 10).with_element(ElementDesign::text_field(
            "n",
            0,
            0,
            100,
            10,
            Expression::field("n"),
        )))
        .with_variable(pagefill::VariableDesign::new(
            "count",
            Expression::field("n"),
            pagefill::Calculation::Count,
        ))
        .into_shared();
    let data = |_: &pagefill::FillScope| -> Result<Box<dyn DataSource>, FillError> {
        Ok(Box::new(VecDataSource::numbered("n", 6)))
    };
    let design = ReportDesign::new("orders", 100, 50)
        .with_band(
            BandDesign::new(BandKind::Title, 10)
                .with_element(ElementDesign::subreport("items", 0, 0, 100, 10, SubreportDesign::new(child, data))),
        )
        .into_shared();

    for strategy in [RunnerStrategy::Cooperative, RunnerStrategy::Thread] {
        let document = fill(design.clone(), strategy).unwrap();
        assert_eq!(
            page_texts(&document),
            vec![vec!["6", "0", "1", "2", "3"], vec!["4", "5"]],
            "{strategy:?}"
        );
    }
}
