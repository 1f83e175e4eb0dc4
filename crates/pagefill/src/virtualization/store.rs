use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use pagefill_core::VirtualizationError;
use parking_lot::Mutex;

use super::codec::{
    KIND_FRAME, KIND_GENERIC, KIND_GRAPHIC, KIND_TEXT, MANAGED_LIST_SENTINEL, VirtualizationInput,
    VirtualizationOutput,
};
use super::swap::{MemorySwap, SwapSpace};
use crate::logging::targets;
use crate::print::{ElementList, ListHandle, PrintElement, PrintElementId, PrintKind, PrintPage, Resolution};

type Result<T> = std::result::Result<T, VirtualizationError>;

enum ListSlot {
    Resident(Vec<PrintElement>),
    Paged { key: u64, len: usize },
}

/// Owner of store-managed child lists and of swapped-out blocks.
///
/// One store serves one top-level fill and the subreport fillers beneath it.
/// A list handed to the store is only changed through [`append`],
/// [`extend`] and [`replace`]; a frame keeps nothing but its [`ListHandle`],
/// so a resident list and its paged copy can never diverge.
///
/// The lists map is locked per operation. It must not be held while
/// decoding, which checks sentinels against it.
///
/// [`append`]: VirtualizationStore::append
/// [`extend`]: VirtualizationStore::extend
/// [`replace`]: VirtualizationStore::replace
pub struct VirtualizationStore {
    swap: Box<dyn SwapSpace>,
    lists: Mutex<HashMap<PrintElementId, ListSlot>>,
    next_key: AtomicU64,
}

impl VirtualizationStore {
    /// Create a store writing blocks to `swap`.
    pub fn new(swap: Box<dyn SwapSpace>) -> Self {
        Self {
            swap,
            lists: Mutex::new(HashMap::new()),
            next_key: AtomicU64::new(1),
        }
    }

    /// Create a store with a [`MemorySwap`].
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemorySwap::new()))
    }

    /// Hand `elements` to the store as the children of frame `id`.
    ///
    /// Managing an id twice appends to the live list.
    pub fn manage(&self, id: PrintElementId, elements: Vec<PrintElement>) -> Result<ListHandle> {
        let handle = ListHandle::new(id);
        let mut lists = self.lists.lock();
        if !lists.contains_key(&id) {
            tracing::trace!(target: targets::VIRTUALIZATION, %id, len = elements.len(), "managing element list");
            lists.insert(id, ListSlot::Resident(elements));
            return Ok(handle);
        }
        drop(lists);
        self.extend(&handle, elements)?;
        Ok(handle)
    }

    /// Whether a list is registered under `id`.
    pub fn is_managed(&self, id: PrintElementId) -> bool {
        self.lists.lock().contains_key(&id)
    }

    /// Whether the list behind `handle` is currently swapped out.
    pub fn is_paged(&self, handle: &ListHandle) -> bool {
        matches!(self.lists.lock().get(&handle.id()), Some(ListSlot::Paged { .. }))
    }

    /// Number of managed lists.
    pub fn managed_count(&self) -> usize {
        self.lists.lock().len()
    }

    /// Number of swapped-out blocks, pages included.
    pub fn swapped_blocks(&self) -> usize {
        self.swap.block_count()
    }

    /// Length of the list behind `handle`.
    pub fn len(&self, handle: &ListHandle) -> Result<usize> {
        match self.lists.lock().get(&handle.id()) {
            Some(ListSlot::Resident(elements)) => Ok(elements.len()),
            Some(ListSlot::Paged { len, .. }) => Ok(*len),
            None => Err(missing(handle.id())),
        }
    }

    /// The elements behind `handle`, reloading them if they are swapped out.
    /// A reload leaves the list swapped out.
    pub fn elements(&self, handle: &ListHandle) -> Result<Vec<PrintElement>> {
        let key = match self.lists.lock().get(&handle.id()) {
            Some(ListSlot::Resident(elements)) => return Ok(elements.clone()),
            Some(ListSlot::Paged { key, .. }) => *key,
            None => return Err(missing(handle.id())),
        };
        tracing::trace!(target: targets::VIRTUALIZATION, id = %handle.id(), key, "reloading element list");
        self.load_list(key)
    }

    /// Append one element to the live list behind `handle`.
    pub fn append(&self, handle: &ListHandle, element: PrintElement) -> Result<()> {
        self.extend(handle, vec![element])
    }

    /// Append elements to the live list behind `handle`.
    ///
    /// A swapped-out list is brought back into memory first.
    pub fn extend(&self, handle: &ListHandle, elements: Vec<PrintElement>) -> Result<()> {
        let id = handle.id();
        loop {
            let paged_key = match self.lists.lock().get_mut(&id) {
                Some(ListSlot::Resident(live)) => {
                    live.extend(elements);
                    return Ok(());
                }
                Some(ListSlot::Paged { key, .. }) => *key,
                None => return Err(missing(id)),
            };

            let mut reloaded = self.load_list(paged_key)?;
            let mut lists = self.lists.lock();
            let slot = lists.get_mut(&id).ok_or_else(|| missing(id))?;
            let current_key = match slot {
                ListSlot::Paged { key, .. } => Some(*key),
                ListSlot::Resident(_) => None,
            };
            // Reloaded or evicted again by another caller; start over.
            if current_key != Some(paged_key) {
                continue;
            }
            reloaded.extend(elements);
            *slot = ListSlot::Resident(reloaded);
            drop(lists);
            tracing::trace!(target: targets::VIRTUALIZATION, %id, key = paged_key, "reloaded element list for append");
            return self.swap.remove(paged_key);
        }
    }

    /// Replace the list behind `handle`. A swapped-out list stays swapped
    /// out under a new block.
    pub fn replace(&self, handle: &ListHandle, elements: Vec<PrintElement>) -> Result<()> {
        let id = handle.id();
        let mut lists = self.lists.lock();
        let slot = lists.get_mut(&id).ok_or_else(|| missing(id))?;
        let old_key = match slot {
            ListSlot::Resident(live) => {
                *live = elements;
                return Ok(());
            }
            ListSlot::Paged { key, .. } => *key,
        };

        let len = elements.len();
        let mut out = VirtualizationOutput::new();
        write_list(&mut out, &elements);
        let key = self.swap_out(out.finish())?;
        *slot = ListSlot::Paged { key, len };
        drop(lists);
        tracing::trace!(target: targets::VIRTUALIZATION, %id, key, len, "rewrote paged element list");
        self.swap.remove(old_key)
    }

    /// Fill in delayed elements found in `elements` or in the frames beneath
    /// them, rewriting managed lists that changed. Applied resolutions are
    /// removed from `pending`.
    pub fn apply_resolutions(
        &self,
        elements: &mut [PrintElement],
        pending: &mut HashMap<PrintElementId, Resolution>,
    ) -> Result<()> {
        for element in elements {
            if pending.is_empty() {
                break;
            }
            if let Some(resolution) = pending.remove(&element.id) {
                element.resolve(resolution);
                continue;
            }
            let PrintKind::Frame { children } = &mut element.kind else {
                continue;
            };
            match children {
                ElementList::Inline(children) => self.apply_resolutions(children, pending)?,
                ElementList::Managed(handle) => {
                    let mut children = self.elements(handle)?;
                    let before = pending.len();
                    self.apply_resolutions(&mut children, pending)?;
                    if pending.len() < before {
                        self.replace(handle, children)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Swap out the list behind `handle`. Returns `false` if it already was.
    pub fn evict(&self, handle: &ListHandle) -> Result<bool> {
        let id = handle.id();
        let mut lists = self.lists.lock();
        let slot = lists.get_mut(&id).ok_or_else(|| missing(id))?;
        let ListSlot::Resident(elements) = slot else {
            return Ok(false);
        };

        let len = elements.len();
        let mut out = VirtualizationOutput::new();
        write_list(&mut out, elements);
        let key = self.swap_out(out.finish())?;
        tracing::trace!(target: targets::VIRTUALIZATION, %id, key, len, "evicted element list");
        *slot = ListSlot::Paged { key, len };
        Ok(true)
    }

    /// Drop the list behind `handle` and its swapped block.
    pub fn release(&self, handle: &ListHandle) -> Result<()> {
        let slot = self.lists.lock().remove(&handle.id());
        if let Some(ListSlot::Paged { key, .. }) = slot {
            self.swap.remove(key)?;
        }
        Ok(())
    }

    /// Write `element` to `out`.
    ///
    /// Store-managed child lists are written as a sentinel followed by the
    /// list identity, never inline.
    pub fn write_element(&self, out: &mut VirtualizationOutput, element: &PrintElement) {
        write_element(out, element);
    }

    /// Read an element written by [`write_element`](Self::write_element).
    ///
    /// A sentinel resolves to the list registered under its identity.
    pub fn read_element(&self, input: &mut VirtualizationInput) -> Result<PrintElement> {
        self.decode_element(input)
    }

    /// Serialize a page.
    pub fn encode_page(&self, page: &PrintPage) -> Bytes {
        let mut out = VirtualizationOutput::new();
        out.write_u32(page.number);
        out.write_u32(page.width);
        out.write_u32(page.height);
        write_list(&mut out, &page.elements);
        out.finish()
    }

    /// Deserialize a page written by [`encode_page`](Self::encode_page).
    pub fn decode_page(&self, bytes: Bytes) -> Result<PrintPage> {
        let mut input = VirtualizationInput::new(bytes);
        let number = input.read_u32("page number")?;
        let width = input.read_u32("page width")?;
        let height = input.read_u32("page height")?;
        let elements = self.decode_list(&mut input)?;
        Ok(PrintPage {
            number,
            width,
            height,
            elements,
        })
    }

    /// Write a block to swap, returning its key.
    pub fn swap_out(&self, data: Bytes) -> Result<u64> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.swap.write(key, data)?;
        Ok(key)
    }

    /// Read a block from swap.
    pub fn swap_in(&self, key: u64) -> Result<Bytes> {
        self.swap.read(key)
    }

    /// Drop a block written with [`swap_out`](Self::swap_out).
    pub fn discard(&self, key: u64) -> Result<()> {
        self.swap.remove(key)
    }

    /// Managed list handles referenced from `elements`, depth first.
    pub fn managed_handles(elements: &[PrintElement]) -> Vec<ListHandle> {
        let mut handles = Vec::new();
        collect_handles(elements, &mut handles);
        handles
    }

    fn load_list(&self, key: u64) -> Result<Vec<PrintElement>> {
        let bytes = self.swap.read(key)?;
        let mut input = VirtualizationInput::new(bytes);
        self.decode_list(&mut input)
    }

    fn decode_list(&self, input: &mut VirtualizationInput) -> Result<Vec<PrintElement>> {
        let len = input
            .read_len("element list")?
            .ok_or(VirtualizationError::Truncated { context: "element list" })?;
        let mut elements = Vec::with_capacity(len.min(input.remaining()));
        for _ in 0..len {
            elements.push(self.decode_element(input)?);
        }
        Ok(elements)
    }

    fn decode_element(&self, input: &mut VirtualizationInput) -> Result<PrintElement> {
        let id = input.read_id()?;
        let x = input.read_u32("element x")?;
        let y = input.read_u32("element y")?;
        let width = input.read_u32("element width")?;
        let height = input.read_u32("element height")?;
        let style = input.read_opt_str("element style")?;
        let anchor = input.read_opt_str("element anchor")?;
        let recorded = input.read_recorded()?;

        let kind = match input.read_u8("element kind")? {
            KIND_TEXT => PrintKind::Text {
                text: input.read_str("text")?,
            },
            KIND_GRAPHIC => PrintKind::Graphic {
                shape: input.read_shape()?,
            },
            KIND_FRAME => PrintKind::Frame {
                children: self.decode_children(input)?,
            },
            KIND_GENERIC => {
                let type_name = input.read_str("generic type")?;
                let len = input
                    .read_len("generic parameters")?
                    .ok_or(VirtualizationError::Truncated { context: "generic parameters" })?;
                let mut parameters = std::collections::BTreeMap::new();
                for _ in 0..len {
                    let name = input.read_str("parameter name")?;
                    parameters.insert(name, input.read_value()?);
                }
                PrintKind::Generic {
                    type_name,
                    parameters,
                }
            }
            tag => return Err(VirtualizationError::UnknownTag { kind: "element", tag }),
        };

        Ok(PrintElement {
            id,
            x,
            y,
            width,
            height,
            style,
            anchor,
            recorded,
            kind,
        })
    }

    fn decode_children(&self, input: &mut VirtualizationInput) -> Result<ElementList> {
        let len = input.read_int("frame children")?;
        if len == MANAGED_LIST_SENTINEL {
            let id = input.read_id()?;
            if !self.is_managed(id) {
                return Err(missing(id));
            }
            return Ok(ElementList::Managed(ListHandle::new(id)));
        }
        let len = usize::try_from(len).map_err(|_| VirtualizationError::Truncated {
            context: "frame children",
        })?;
        let mut children = Vec::with_capacity(len.min(input.remaining()));
        for _ in 0..len {
            children.push(self.decode_element(input)?);
        }
        Ok(ElementList::Inline(children))
    }
}

impl Default for VirtualizationStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for VirtualizationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualizationStore")
            .field("managed_lists", &self.managed_count())
            .field("swapped_blocks", &self.swapped_blocks())
            .finish()
    }
}

fn missing(id: PrintElementId) -> VirtualizationError {
    VirtualizationError::MissingList { id: id.to_string() }
}

fn write_list(out: &mut VirtualizationOutput, elements: &[PrintElement]) {
    out.write_len(elements.len());
    for element in elements {
        write_element(out, element);
    }
}

fn write_element(out: &mut VirtualizationOutput, element: &PrintElement) {
    out.write_id(element.id);
    out.write_u32(element.x);
    out.write_u32(element.y);
    out.write_u32(element.width);
    out.write_u32(element.height);
    out.write_opt_str(element.style.as_deref());
    out.write_opt_str(element.anchor.as_deref());
    out.write_recorded(element.recorded.as_ref());

    match &element.kind {
        PrintKind::Text { text } => {
            out.write_u8(KIND_TEXT);
            out.write_str(text);
        }
        PrintKind::Graphic { shape } => {
            out.write_u8(KIND_GRAPHIC);
            out.write_shape(*shape);
        }
        PrintKind::Frame { children } => {
            out.write_u8(KIND_FRAME);
            match children {
                ElementList::Inline(children) => write_list(out, children),
                ElementList::Managed(handle) => {
                    out.write_int(MANAGED_LIST_SENTINEL);
                    out.write_id(handle.id());
                }
            }
        }
        PrintKind::Generic {
            type_name,
            parameters,
        } => {
            out.write_u8(KIND_GENERIC);
            out.write_str(type_name);
            out.write_len(parameters.len());
            for (name, value) in parameters {
                out.write_str(name);
                out.write_value(value);
            }
        }
    }
}

fn collect_handles(elements: &[PrintElement], out: &mut Vec<ListHandle>) {
    for element in elements {
        if let PrintKind::Frame { children } = &element.kind {
            match children {
                ElementList::Inline(children) => collect_handles(children, out),
                ElementList::Managed(handle) => out.push(*handle),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::print::Shape;

    fn graphic(origin: u32) -> PrintElement {
        PrintElement {
            id: PrintElementId::new(origin, 1),
            x: origin,
            y: 0,
            width: 10,
            height: 10,
            style: None,
            anchor: None,
            recorded: None,
            kind: PrintKind::Graphic {
                shape: Shape::Rectangle,
            },
        }
    }

    #[test]
    fn test_evicted_list_reloads() {
        let store = VirtualizationStore::in_memory();
        let handle = store
            .manage(PrintElementId::new(100, 1), vec![graphic(1), graphic(2)])
            .unwrap();

        assert!(store.evict(&handle).unwrap());
        assert!(!store.evict(&handle).unwrap());
        assert!(store.is_paged(&handle));
        assert_eq!(store.len(&handle).unwrap(), 2);
        assert_eq!(store.elements(&handle).unwrap(), vec![graphic(1), graphic(2)]);
        assert!(store.is_paged(&handle));
    }

    #[test]
    fn test_append_goes_through_live_list() {
        let store = VirtualizationStore::in_memory();
        let handle = store.manage(PrintElementId::new(100, 1), vec![graphic(1)]).unwrap();
        store.evict(&handle).unwrap();

        store.append(&handle, graphic(2)).unwrap();
        assert!(!store.is_paged(&handle));
        assert_eq!(store.swapped_blocks(), 0);

        store.manage(handle.id(), vec![graphic(3)]).unwrap();
        let elements = store.elements(&handle).unwrap();
        assert_eq!(elements.iter().map(|e| e.x).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_sentinel_requires_registered_list() {
        let writer = VirtualizationStore::in_memory();
        let handle = writer.manage(PrintElementId::new(5, 1), vec![graphic(1)]).unwrap();
        let mut frame = graphic(5);
        frame.kind = PrintKind::Frame {
            children: ElementList::Managed(handle),
        };

        let mut out = VirtualizationOutput::new();
        writer.write_element(&mut out, &frame);
        let bytes = out.finish();

        let read = writer
            .read_element(&mut VirtualizationInput::new(bytes.clone()))
            .unwrap();
        assert_eq!(read, frame);

        let other = VirtualizationStore::in_memory();
        assert!(matches!(
            other.read_element(&mut VirtualizationInput::new(bytes)),
            Err(VirtualizationError::MissingList { .. })
        ));
    }

    #[test]
    fn test_resolutions_rewrite_paged_lists() {
        let store = VirtualizationStore::in_memory();
        let mut delayed = graphic(2);
        delayed.kind = PrintKind::Text { text: String::new() };
        let handle = store
            .manage(PrintElementId::new(7, 1), vec![graphic(1), delayed])
            .unwrap();
        store.evict(&handle).unwrap();

        let mut frame = graphic(7);
        frame.kind = PrintKind::Frame {
            children: ElementList::Managed(handle),
        };
        let recorded = [(crate::expr::Evaluation::Current, pagefill_core::Value::Int(42))]
            .into_iter()
            .collect();
        let mut pending = HashMap::from([(PrintElementId::new(2, 1), Resolution::new(recorded))]);

        store.apply_resolutions(std::slice::from_mut(&mut frame), &mut pending).unwrap();
        assert!(pending.is_empty());
        assert!(store.is_paged(&handle));
        assert_eq!(store.swapped_blocks(), 1);
        let children = store.elements(&handle).unwrap();
        assert_eq!(children[1].text(), Some("42"));
        assert!(children[1].recorded.is_some());
    }

    #[test]
    fn test_release_drops_block() {
        let store = VirtualizationStore::in_memory();
        let handle = store.manage(PrintElementId::new(9, 1), vec![graphic(1)]).unwrap();
        store.evict(&handle).unwrap();
        assert_eq!(store.swapped_blocks(), 1);
        store.release(&handle).unwrap();
        assert_eq!(store.swapped_blocks(), 0);
        assert!(store.elements(&handle).is_err());
    }
}
