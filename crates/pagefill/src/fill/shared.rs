use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::parent::{FillerParent, SubreportParent};
use crate::context::{FillContext, FillerId};
use crate::expr::StyleContext;
use crate::logging::targets;
use crate::print::Bookmark;

/// Filler state readable by the filler's children.
///
/// Children only read the band flags while their parent is blocked in the
/// subreport hand-off, so plain atomics are enough.
pub struct FillerShared {
    id: FillerId,
    name: String,
    parent: Option<Arc<dyn FillerParent>>,
    context: Arc<FillContext>,
    first_band_on_page: AtomicBool,
    band_printed: AtomicBool,
    band_overflow_allowed: AtomicBool,
    page_number: AtomicU32,
    attached: AtomicBool,
    style: RwLock<StyleContext>,
    children: Mutex<HashMap<FillerId, Weak<SubreportParent>>>,
    bookmarks: Mutex<Vec<Bookmark>>,
}

impl FillerShared {
    pub(crate) fn new(
        context: Arc<FillContext>,
        name: &str,
        parent: Option<Arc<dyn FillerParent>>,
    ) -> Arc<Self> {
        let parent_id = parent.as_ref().and_then(|parent| parent.filler_id());
        let id = context.register_filler(name, parent_id);
        let style = parent
            .as_ref()
            .map(|parent| parent.style_context())
            .unwrap_or_default();
        let shared = Arc::new(Self {
            id,
            name: name.to_string(),
            parent,
            context,
            first_band_on_page: AtomicBool::new(true),
            band_printed: AtomicBool::new(false),
            band_overflow_allowed: AtomicBool::new(true),
            page_number: AtomicU32::new(0),
            attached: AtomicBool::new(false),
            style: RwLock::new(style),
            children: Mutex::new(HashMap::new()),
            bookmarks: Mutex::new(Vec::new()),
        });
        shared.attach();
        shared
    }

    pub fn id(&self) -> FillerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Arc<FillContext> {
        &self.context
    }

    pub fn parent(&self) -> Option<&Arc<dyn FillerParent>> {
        self.parent.as_ref()
    }

    pub fn is_subreport(&self) -> bool {
        self.parent.is_some()
    }

    pub fn style_context(&self) -> StyleContext {
        self.style.read().clone()
    }

    pub(crate) fn set_style_context(&self, style: StyleContext) {
        *self.style.write() = style;
    }

    pub fn page_number(&self) -> u32 {
        self.page_number.load(Ordering::Acquire)
    }

    pub(crate) fn set_page_number(&self, page_number: u32) {
        self.page_number.store(page_number, Ordering::Release);
    }

    pub fn is_first_band_on_page(&self) -> bool {
        self.first_band_on_page.load(Ordering::Acquire)
    }

    pub(crate) fn set_first_band_on_page(&self, first: bool) {
        self.first_band_on_page.store(first, Ordering::Release);
    }

    /// Reset the band flags before a band is filled.
    pub(crate) fn begin_band(&self, overflow_allowed: bool) {
        self.band_printed.store(false, Ordering::Release);
        self.band_overflow_allowed.store(overflow_allowed, Ordering::Release);
    }

    pub(crate) fn mark_band_printed(&self) {
        self.band_printed.store(true, Ordering::Release);
    }

    /// Whether the band being filled may continue on the next page.
    pub fn is_band_overflow_allowed(&self) -> bool {
        self.band_overflow_allowed.load(Ordering::Acquire)
    }

    /// A page break is inhibited while nothing has been printed in the first
    /// band of a page, here or in any ancestor.
    pub fn is_page_break_inhibited(&self) -> bool {
        let inhibited = self.is_first_band_on_page() && !self.band_printed.load(Ordering::Acquire);
        inhibited
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| !parent.is_page_break_allowed())
    }

    pub fn is_page_break_allowed(&self) -> bool {
        !self.is_page_break_inhibited()
    }

    /// Whether a split-prevented band may split anyway.
    ///
    /// Only the first band on a page can override the policy. A subreport
    /// defers to its parent, which answers for its own band position.
    pub fn is_split_prevent_inhibited(&self, top_level: bool) -> bool {
        if !self.is_first_band_on_page() {
            return false;
        }
        if !top_level && self.band_printed.load(Ordering::Acquire) {
            return false;
        }
        match &self.parent {
            Some(parent) => parent.is_split_policy_overridden(false),
            None => true,
        }
    }

    /// Record a bookmark with the master filler.
    pub(crate) fn add_bookmark(&self, bookmark: Bookmark) {
        match &self.parent {
            Some(parent) => parent.update_bookmark(bookmark),
            None => self.bookmarks.lock().push(bookmark),
        }
    }

    pub(crate) fn take_bookmarks(&self) -> Vec<Bookmark> {
        std::mem::take(&mut *self.bookmarks.lock())
    }

    pub(crate) fn register_child(&self, child: FillerId, coordinator: Weak<SubreportParent>) {
        self.children.lock().insert(child, coordinator);
    }

    pub(crate) fn unregister_child(&self, child: FillerId) {
        self.children.lock().remove(&child);
    }

    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }

    /// Abort every registered child.
    pub(crate) fn abort_children(&self) {
        let children: Vec<_> = self.children.lock().values().filter_map(Weak::upgrade).collect();
        if !children.is_empty() {
            tracing::debug!(
                target: targets::FILL,
                report = %self.name,
                children = children.len(),
                "aborting subreports"
            );
        }
        for child in children {
            child.abort();
        }
    }

    /// Join the parent's child registry.
    pub(crate) fn attach(&self) {
        if self.attached.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(parent) = &self.parent {
            parent.register_child(self.id);
        }
    }

    /// Leave the parent's child registry.
    pub(crate) fn detach(&self) {
        if !self.attached.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(parent) = &self.parent {
            parent.unregister_child(self.id);
        }
    }
}

impl std::fmt::Debug for FillerShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FillerShared")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("subreport", &self.is_subreport())
            .field("page_number", &self.page_number())
            .finish_non_exhaustive()
    }
}
