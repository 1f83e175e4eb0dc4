//! The produced page tree.
//!
//! Print elements are immutable once a filler has produced them. A frame
//! either owns its children inline or, once they have been handed to the
//! [`VirtualizationStore`](crate::virtualization::VirtualizationStore),
//! refers to them through a [`ListHandle`].

mod recorded;

pub use recorded::RecordedValues;

use std::collections::BTreeMap;
use std::fmt;

use pagefill_core::{FillResult, Value};

use crate::expr::Evaluation;
use crate::virtualization::VirtualizationStore;

/// Stable identity of a print element.
///
/// `origin` identifies the element instance of a filler that produced it and
/// `print_index` counts the prints of that instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrintElementId {
    pub origin: u32,
    pub print_index: u32,
}

impl PrintElementId {
    pub const fn new(origin: u32, print_index: u32) -> Self {
        Self { origin, print_index }
    }
}

impl fmt::Display for PrintElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.origin, self.print_index)
    }
}

/// Shape of a graphic element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Rectangle,
    Line,
    Ellipse,
}

/// Handle to a child list owned by the virtualization store.
///
/// Handles compare by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListHandle {
    id: PrintElementId,
}

impl ListHandle {
    pub(crate) fn new(id: PrintElementId) -> Self {
        Self { id }
    }

    /// Identity of the frame the list belongs to.
    pub fn id(&self) -> PrintElementId {
        self.id
    }
}

/// Children of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementList {
    /// Children owned by the frame.
    Inline(Vec<PrintElement>),
    /// Children owned by the virtualization store.
    Managed(ListHandle),
}

impl ElementList {
    /// Whether the children are owned by the store.
    pub fn is_managed(&self) -> bool {
        matches!(self, Self::Managed(_))
    }

    /// The children, reloading them from `store` if they are managed.
    pub fn resolve(&self, store: &VirtualizationStore) -> FillResult<Vec<PrintElement>> {
        match self {
            Self::Inline(children) => Ok(children.clone()),
            Self::Managed(handle) => Ok(store.elements(handle)?),
        }
    }
}

impl Default for ElementList {
    fn default() -> Self {
        Self::Inline(Vec::new())
    }
}

/// What a print element displays.
#[derive(Debug, Clone, PartialEq)]
pub enum PrintKind {
    Text { text: String },
    Graphic { shape: Shape },
    Frame { children: ElementList },
    Generic {
        type_name: String,
        parameters: BTreeMap<String, Value>,
    },
}

impl PrintKind {
    /// Short name used in debug output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Graphic { .. } => "graphic",
            Self::Frame { .. } => "frame",
            Self::Generic { .. } => "generic",
        }
    }
}

/// An immutable unit of produced output.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintElement {
    pub id: PrintElementId,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub style: Option<String>,
    pub anchor: Option<String>,
    pub recorded: Option<RecordedValues>,
    pub kind: PrintKind,
}

impl PrintElement {
    /// A copy moved down by `dy`.
    pub fn translated(mut self, dy: u32) -> Self {
        self.y += dy;
        self
    }

    /// Bottom edge relative to the element's container.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Number of elements in this subtree, counting inline children only.
    pub fn deep_count(&self) -> usize {
        1 + match &self.kind {
            PrintKind::Frame {
                children: ElementList::Inline(children),
            } => children.iter().map(PrintElement::deep_count).sum(),
            _ => 0,
        }
    }

    /// Text content, if this is a text element.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            PrintKind::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Fill in the value of a delayed text element.
    pub fn resolve(&mut self, resolution: Resolution) {
        self.kind = PrintKind::Text { text: resolution.text };
        self.recorded = Some(resolution.recorded);
    }
}

/// The late value of a delayed element, evaluated at its bound time.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub text: String,
    pub recorded: RecordedValues,
}

impl Resolution {
    /// Display the current value of `recorded`.
    pub fn new(recorded: RecordedValues) -> Self {
        let text = recorded
            .get(Evaluation::Current)
            .map(Value::to_string)
            .unwrap_or_default();
        Self { text, recorded }
    }
}

/// A navigation entry for an anchored element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub label: String,
    /// Master page number the element was printed on.
    pub page_number: u32,
    pub element: PrintElementId,
}

/// One completed page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrintPage {
    pub number: u32,
    pub width: u32,
    pub height: u32,
    pub elements: Vec<PrintElement>,
}

impl PrintPage {
    pub fn new(number: u32, width: u32, height: u32) -> Self {
        Self {
            number,
            width,
            height,
            elements: Vec::new(),
        }
    }

    /// Bottom edge of the lowest element.
    pub fn content_height(&self) -> u32 {
        self.elements.iter().map(PrintElement::bottom).max().unwrap_or(0)
    }

    /// Text of all text elements in the subtree, depth first, reloading
    /// managed frames from `store`.
    pub fn texts(&self, store: &VirtualizationStore) -> FillResult<Vec<String>> {
        let mut texts = Vec::new();
        collect_texts(&self.elements, store, &mut texts)?;
        Ok(texts)
    }
}

fn collect_texts(
    elements: &[PrintElement],
    store: &VirtualizationStore,
    out: &mut Vec<String>,
) -> FillResult<()> {
    for element in elements {
        match &element.kind {
            PrintKind::Text { text } => out.push(text.clone()),
            PrintKind::Frame { children } => collect_texts(&children.resolve(store)?, store, out)?,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(origin: u32, y: u32, text: &str) -> PrintElement {
        PrintElement {
            id: PrintElementId::new(origin, 1),
            x: 0,
            y,
            width: 100,
            height: 10,
            style: None,
            anchor: None,
            recorded: None,
            kind: PrintKind::Text { text: text.into() },
        }
    }

    #[test]
    fn test_deep_count_includes_inline_children() {
        let mut frame = text(1, 0, "");
        frame.kind = PrintKind::Frame {
            children: ElementList::Inline(vec![text(2, 0, "a"), text(3, 10, "b")]),
        };
        assert_eq!(frame.deep_count(), 3);

        frame.kind = PrintKind::Frame {
            children: ElementList::Managed(ListHandle::new(frame.id)),
        };
        assert_eq!(frame.deep_count(), 1);
    }

    #[test]
    fn test_resolve_replaces_text_and_records() {
        let mut element = text(1, 0, "");
        let recorded: RecordedValues = [
            (Evaluation::Current, Value::Int(12)),
            (Evaluation::PreviousPass, Value::Int(9)),
        ]
        .into_iter()
        .collect();
        element.resolve(Resolution::new(recorded));
        assert_eq!(element.text(), Some("12"));
        assert_eq!(
            element.recorded.as_ref().and_then(|r| r.get(Evaluation::PreviousPass)),
            Some(&Value::Int(9))
        );
    }

    #[test]
    fn test_content_height() {
        let mut page = PrintPage::new(1, 200, 300);
        assert_eq!(page.content_height(), 0);
        page.elements.push(text(1, 0, "a"));
        page.elements.push(text(2, 40, "b").translated(5));
        assert_eq!(page.content_height(), 55);
    }
}
