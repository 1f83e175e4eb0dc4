use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use pagefill_core::{FillResult, VirtualizationConfig};

use super::store::VirtualizationStore;
use crate::logging::targets;
use crate::print::{PrintElementId, PrintPage, Resolution};

enum PageSlot {
    Resident(PrintPage),
    Swapped { key: u64 },
}

/// The completed pages of a document.
///
/// When a resident page limit is configured, the oldest resident pages are
/// written to the store's swap, together with the managed lists they
/// reference, and reloaded on access.
pub struct PageStore {
    store: Arc<VirtualizationStore>,
    max_resident: Option<usize>,
    slots: Vec<PageSlot>,
    resident: VecDeque<usize>,
}

impl PageStore {
    pub fn new(store: Arc<VirtualizationStore>, config: &VirtualizationConfig) -> Self {
        Self {
            store,
            max_resident: config.max_resident_pages.filter(|_| config.enabled),
            slots: Vec::new(),
            resident: VecDeque::new(),
        }
    }

    /// Add a completed page, swapping out older pages over the limit.
    pub fn push(&mut self, page: PrintPage) -> FillResult<()> {
        self.resident.push_back(self.slots.len());
        self.slots.push(PageSlot::Resident(page));

        let Some(limit) = self.max_resident else {
            return Ok(());
        };
        while self.resident.len() > limit {
            let Some(index) = self.resident.pop_front() else {
                break;
            };
            self.swap_out(index)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of pages currently held in memory.
    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    /// The page at `index`, reloading it if it was swapped out.
    pub fn get(&self, index: usize) -> FillResult<Option<PrintPage>> {
        match self.slots.get(index) {
            None => Ok(None),
            Some(PageSlot::Resident(page)) => Ok(Some(page.clone())),
            Some(PageSlot::Swapped { key }) => {
                let bytes = self.store.swap_in(*key)?;
                Ok(Some(self.store.decode_page(bytes)?))
            }
        }
    }

    /// All pages in order.
    pub fn iter(&self) -> impl Iterator<Item = FillResult<PrintPage>> + '_ {
        (0..self.slots.len()).filter_map(|index| self.get(index).transpose())
    }

    /// Fill in delayed elements on the stored pages. Swapped pages that
    /// change are written back under a new block. Applied resolutions are
    /// removed from `pending`.
    pub fn apply_resolutions(&mut self, pending: &mut HashMap<PrintElementId, Resolution>) -> FillResult<()> {
        for slot in &mut self.slots {
            if pending.is_empty() {
                break;
            }
            match slot {
                PageSlot::Resident(page) => self.store.apply_resolutions(&mut page.elements, pending)?,
                PageSlot::Swapped { key } => {
                    let mut page = self.store.decode_page(self.store.swap_in(*key)?)?;
                    let before = pending.len();
                    self.store.apply_resolutions(&mut page.elements, pending)?;
                    if pending.len() < before {
                        let old = std::mem::replace(key, self.store.swap_out(self.store.encode_page(&page))?);
                        self.store.discard(old)?;
                        tracing::trace!(target: targets::VIRTUALIZATION, page = page.number, key = *key, "rewrote swapped page");
                    }
                }
            }
        }
        Ok(())
    }

    /// The store backing this document.
    pub fn store(&self) -> &Arc<VirtualizationStore> {
        &self.store
    }

    fn swap_out(&mut self, index: usize) -> FillResult<()> {
        let Some(slot) = self.slots.get_mut(index) else {
            return Ok(());
        };
        let PageSlot::Resident(page) = slot else {
            return Ok(());
        };

        for handle in VirtualizationStore::managed_handles(&page.elements) {
            self.store.evict(&handle)?;
        }
        let key = self.store.swap_out(self.store.encode_page(page))?;
        tracing::trace!(target: targets::VIRTUALIZATION, page = page.number, key, "swapped out page");
        *slot = PageSlot::Swapped { key };
        Ok(())
    }
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("pages", &self.slots.len())
            .field("resident", &self.resident.len())
            .field("max_resident", &self.max_resident)
            .finish()
    }
}
