//! Logging and debugging facilities for the fill engine.
//!
//! This module provides:
//! - Target and span names for filtering the engine's `tracing` output
//! - Debug visualization of produced page trees
//!
//! # Tracing Integration
//!
//! The engine only emits events; install a subscriber to see them:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("pagefill::runner=debug,pagefill::virtualization=trace")
//!     .init();
//! ```
//!
//! # Debug Visualization
//!
//! Use [`PrintTreeDebug`] to render pages as a tree:
//!
//! ```ignore
//! use pagefill::logging::PrintTreeDebug;
//!
//! let debug = PrintTreeDebug::new(document.pages.store().clone());
//! println!("{}", debug.format_pages(&document.pages)?);
//! ```

use std::fmt::Write as FmtWrite;
use std::sync::Arc;

use pagefill_core::FillResult;

use crate::print::{PrintElement, PrintKind, PrintPage};
use crate::virtualization::{PageStore, VirtualizationStore};

/// Span names used by the engine.
pub mod span_names {
    /// Filling one page of a report.
    pub const PAGE: &str = "pagefill::page";
    /// Filling one band.
    pub const BAND: &str = "pagefill::band";
    /// Driving a subreport runner.
    pub const SUBREPORT: &str = "pagefill::subreport";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem. The
/// incrementer cache logs under [`pagefill_core::value_cache::LOG_TARGET`].
pub mod targets {
    /// Report, band and element filling.
    pub const FILL: &str = "pagefill::fill";
    /// Subreport runners and parent coordination.
    pub const RUNNER: &str = "pagefill::runner";
    /// Page tree virtualization.
    pub const VIRTUALIZATION: &str = "pagefill::virtualization";
}

/// Style options for page tree visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
    /// Compact single-line representation.
    Compact,
}

/// Configuration for page tree debug output.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    pub style: TreeStyle,
    /// Whether to show element ids.
    pub show_ids: bool,
    /// Whether to show position and size.
    pub show_geometry: bool,
    /// Whether to show recorded expression values.
    pub show_recorded: bool,
    /// Maximum frame depth to traverse (None for unlimited).
    pub max_depth: Option<usize>,
    /// Indent size for each level.
    pub indent_size: usize,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_ids: true,
            show_geometry: true,
            show_recorded: false,
            max_depth: None,
            indent_size: 2,
        }
    }
}

impl TreeFormatOptions {
    /// Create options for detailed debugging output.
    pub fn detailed() -> Self {
        Self {
            show_recorded: true,
            ..Default::default()
        }
    }

    /// Create options for minimal output.
    pub fn minimal() -> Self {
        Self {
            show_ids: false,
            show_geometry: false,
            show_recorded: false,
            ..Default::default()
        }
    }
}

/// Debug utility for visualizing produced pages.
///
/// Frames whose children were handed to the virtualization store are
/// expanded by reloading them.
#[derive(Debug, Clone)]
pub struct PrintTreeDebug {
    store: Arc<VirtualizationStore>,
    options: TreeFormatOptions,
}

impl PrintTreeDebug {
    pub fn new(store: Arc<VirtualizationStore>) -> Self {
        Self::with_options(store, TreeFormatOptions::default())
    }

    pub fn with_options(store: Arc<VirtualizationStore>, options: TreeFormatOptions) -> Self {
        Self { store, options }
    }

    /// Format every page of a document.
    pub fn format_pages(&self, pages: &PageStore) -> FillResult<String> {
        let mut output = String::new();
        writeln!(output, "Document ({} pages):", pages.len()).expect("write to String");
        if pages.is_empty() {
            writeln!(output, "  (empty)").expect("write to String");
        }
        for page in pages.iter() {
            self.format_page_into(&page?, &mut output)?;
        }
        Ok(output)
    }

    /// Format a single page.
    pub fn format_page(&self, page: &PrintPage) -> FillResult<String> {
        let mut output = String::new();
        self.format_page_into(page, &mut output)?;
        Ok(output)
    }

    fn format_page_into(&self, page: &PrintPage, output: &mut String) -> FillResult<()> {
        write!(output, "Page {}", page.number).expect("write to String");
        if self.options.show_geometry {
            write!(output, " ({}x{})", page.width, page.height).expect("write to String");
        }
        output.push('\n');
        self.format_elements_into(&page.elements, 1, output)
    }

    fn format_elements_into(
        &self,
        elements: &[PrintElement],
        depth: usize,
        output: &mut String,
    ) -> FillResult<()> {
        if let Some(max) = self.options.max_depth {
            if depth > max {
                return Ok(());
            }
        }

        let count = elements.len();
        for (i, element) in elements.iter().enumerate() {
            let is_last = i == count - 1;
            output.push_str(&self.build_prefix(depth, is_last));
            self.format_element_line(element, output);

            if self.options.show_recorded {
                if let Some(recorded) = &element.recorded {
                    let prefix = self.build_detail_prefix(depth);
                    for (evaluation, value) in recorded.iter() {
                        writeln!(output, "{prefix}  .{evaluation:?} = {value}").expect("write to String");
                    }
                }
            }

            if let PrintKind::Frame { children } = &element.kind {
                let children = children.resolve(&self.store)?;
                self.format_elements_into(&children, depth + 1, output)?;
            }
        }
        Ok(())
    }

    fn format_element_line(&self, element: &PrintElement, output: &mut String) {
        output.push_str(element.kind.name());
        if self.options.show_ids {
            write!(output, " [{}]", element.id).expect("write to String");
        }
        if self.options.show_geometry {
            write!(
                output,
                " @{},{} {}x{}",
                element.x, element.y, element.width, element.height
            )
            .expect("write to String");
        }
        match &element.kind {
            PrintKind::Text { text } => write!(output, " {text:?}").expect("write to String"),
            PrintKind::Graphic { shape } => write!(output, " {shape:?}").expect("write to String"),
            PrintKind::Frame { children } if children.is_managed() => output.push_str(" (managed)"),
            PrintKind::Generic { type_name, .. } => {
                write!(output, " {type_name}").expect("write to String")
            }
            PrintKind::Frame { .. } => {}
        }
        if let Some(anchor) = &element.anchor {
            write!(output, " #{anchor}").expect("write to String");
        }
        output.push('\n');
    }

    /// Build the prefix string for a tree node.
    fn build_prefix(&self, depth: usize, is_last: bool) -> String {
        if depth == 0 {
            return String::new();
        }

        let (branch, corner, last) = match self.options.style {
            TreeStyle::Ascii => ("|", "+-- ", "`-- "),
            TreeStyle::Unicode => (
                "\u{2502}",
                "\u{251c}\u{2500}\u{2500} ",
                "\u{2514}\u{2500}\u{2500} ",
            ),
            TreeStyle::Compact => ("", "- ", "- "),
        };

        let mut prefix = String::new();
        for _ in 0..(depth - 1) {
            prefix.push_str(branch);
            for _ in 0..self.options.indent_size {
                prefix.push(' ');
            }
        }
        prefix.push_str(if is_last { last } else { corner });
        prefix
    }

    fn build_detail_prefix(&self, depth: usize) -> String {
        let branch = match self.options.style {
            TreeStyle::Ascii => "|",
            TreeStyle::Unicode => "\u{2502}",
            TreeStyle::Compact => "",
        };
        let mut prefix = String::new();
        for _ in 0..depth {
            prefix.push_str(branch);
            for _ in 0..self.options.indent_size {
                prefix.push(' ');
            }
        }
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Evaluation;
    use crate::print::{ElementList, PrintElementId, Shape};
    use pagefill_core::Value;

    fn element(origin: u32, y: u32, kind: PrintKind) -> PrintElement {
        PrintElement {
            id: PrintElementId::new(origin, 1),
            x: 0,
            y,
            width: 100,
            height: 10,
            style: None,
            anchor: None,
            recorded: None,
            kind,
        }
    }

    fn sample_page() -> PrintPage {
        let mut page = PrintPage::new(1, 200, 300);
        page.elements.push(element(1, 0, PrintKind::Text { text: "Title".into() }));
        page.elements.push(element(
            2,
            10,
            PrintKind::Frame {
                children: ElementList::Inline(vec![element(
                    3,
                    0,
                    PrintKind::Graphic { shape: Shape::Line },
                )]),
            },
        ));
        page
    }

    #[test]
    fn test_minimal_format() {
        let debug = PrintTreeDebug::with_options(
            Arc::new(VirtualizationStore::in_memory()),
            TreeFormatOptions {
                style: TreeStyle::Ascii,
                ..TreeFormatOptions::minimal()
            },
        );
        let output = debug.format_page(&sample_page()).unwrap();
        assert_eq!(
            output,
            "Page 1\n+-- text \"Title\"\n`-- frame\n|  `-- graphic Line\n"
        );
    }

    #[test]
    fn test_managed_frames_are_expanded() {
        let store = Arc::new(VirtualizationStore::in_memory());
        let frame_id = PrintElementId::new(2, 1);
        let handle = store
            .manage(frame_id, vec![element(3, 0, PrintKind::Text { text: "inner".into() })])
            .unwrap();
        let mut page = PrintPage::new(1, 200, 300);
        page.elements.push(element(
            2,
            0,
            PrintKind::Frame {
                children: ElementList::Managed(handle),
            },
        ));

        let output = PrintTreeDebug::new(store).format_page(&page).unwrap();
        assert!(output.contains("(managed)"));
        assert!(output.contains("\"inner\""));
    }

    #[test]
    fn test_detailed_shows_recorded_values() {
        let mut page = PrintPage::new(1, 200, 300);
        let mut text = element(1, 0, PrintKind::Text { text: "4".into() });
        text.recorded = Some([(Evaluation::Current, Value::Int(4))].into_iter().collect());
        page.elements.push(text);

        let debug = PrintTreeDebug::with_options(
            Arc::new(VirtualizationStore::in_memory()),
            TreeFormatOptions::detailed(),
        );
        let output = debug.format_page(&page).unwrap();
        assert!(output.contains(".Current = 4"));
        assert!(output.contains("[1.1]"));
    }

    #[test]
    fn test_max_depth_limits_frames() {
        let debug = PrintTreeDebug::with_options(
            Arc::new(VirtualizationStore::in_memory()),
            TreeFormatOptions {
                max_depth: Some(1),
                ..TreeFormatOptions::minimal()
            },
        );
        let output = debug.format_page(&sample_page()).unwrap();
        assert!(!output.contains("graphic"));
    }
}
