//! Per-session fill context.
//!
//! A [`FillContext`] is shared by the master filler and every subreport
//! filler of one fill session. It owns the session configuration, the
//! virtualization store, the session cancellation token and the registry of
//! live fillers. Delayed element values that could not be applied where they
//! were resolved wait here for the master.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use pagefill_core::{CancellationToken, FillConfig};
use parking_lot::Mutex;
use slotmap::SlotMap;

use crate::logging::targets;
use crate::print::{PrintElementId, Resolution};
use crate::virtualization::{SwapSpace, VirtualizationStore};

slotmap::new_key_type! {
    /// Key of a filler in the session registry.
    pub struct FillerId;
}

#[derive(Debug, Clone)]
struct FillerInfo {
    name: String,
    parent: Option<FillerId>,
}

/// Shared state of one fill session.
pub struct FillContext {
    config: FillConfig,
    store: Arc<VirtualizationStore>,
    cancellation: CancellationToken,
    fillers: Mutex<SlotMap<FillerId, FillerInfo>>,
    next_origin: AtomicU32,
    resolutions: Mutex<HashMap<PrintElementId, Resolution>>,
}

impl FillContext {
    /// Create a session backed by an in-memory swap.
    pub fn new(config: FillConfig) -> Arc<Self> {
        Self::with_store(config, Arc::new(VirtualizationStore::in_memory()))
    }

    /// Create a session swapping to `swap`.
    pub fn with_swap(config: FillConfig, swap: Box<dyn SwapSpace>) -> Arc<Self> {
        Self::with_store(config, Arc::new(VirtualizationStore::new(swap)))
    }

    fn with_store(config: FillConfig, store: Arc<VirtualizationStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            cancellation: CancellationToken::new(),
            fillers: Mutex::new(SlotMap::with_key()),
            next_origin: AtomicU32::new(1),
            resolutions: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &FillConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<VirtualizationStore> {
        &self.store
    }

    /// Token cancelled when the whole session is aborted.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Abort every filler of the session.
    pub fn abort(&self) {
        tracing::debug!(target: targets::FILL, fillers = self.filler_count(), "aborting fill session");
        self.cancellation.cancel();
    }

    /// Allocate a print element origin, unique within the session.
    pub fn next_origin(&self) -> u32 {
        self.next_origin.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue resolved values of elements printed on pages already handed on.
    pub(crate) fn post_resolutions(&self, resolutions: HashMap<PrintElementId, Resolution>) {
        tracing::trace!(target: targets::FILL, count = resolutions.len(), "delayed values queued");
        self.resolutions.lock().extend(resolutions);
    }

    /// Take every queued resolution.
    pub(crate) fn take_resolutions(&self) -> HashMap<PrintElementId, Resolution> {
        std::mem::take(&mut *self.resolutions.lock())
    }

    pub(crate) fn register_filler(&self, name: &str, parent: Option<FillerId>) -> FillerId {
        let id = self.fillers.lock().insert(FillerInfo {
            name: name.to_string(),
            parent,
        });
        tracing::trace!(target: targets::FILL, ?id, ?parent, report = name, "filler registered");
        id
    }

    pub(crate) fn unregister_filler(&self, id: FillerId) {
        if self.fillers.lock().remove(id).is_some() {
            tracing::trace!(target: targets::FILL, ?id, "filler unregistered");
        }
    }

    /// Name of a live filler.
    pub fn filler_name(&self, id: FillerId) -> Option<String> {
        self.fillers.lock().get(id).map(|info| info.name.clone())
    }

    /// Parent of a live filler, `None` for the master or unknown ids.
    pub fn filler_parent(&self, id: FillerId) -> Option<FillerId> {
        self.fillers.lock().get(id).and_then(|info| info.parent)
    }

    /// Number of live fillers.
    pub fn filler_count(&self) -> usize {
        self.fillers.lock().len()
    }
}

impl std::fmt::Debug for FillContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FillContext")
            .field("config", &self.config)
            .field("fillers", &self.filler_count())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_tracks_parents() {
        let context = FillContext::new(FillConfig::default());
        let master = context.register_filler("master", None);
        let child = context.register_filler("child", Some(master));

        assert_eq!(context.filler_count(), 2);
        assert_eq!(context.filler_name(child).as_deref(), Some("child"));
        assert_eq!(context.filler_parent(child), Some(master));
        assert_eq!(context.filler_parent(master), None);

        context.unregister_filler(child);
        context.unregister_filler(child);
        assert_eq!(context.filler_count(), 1);
        assert_eq!(context.filler_name(child), None);
    }

    #[test]
    fn test_origins_are_unique() {
        let context = FillContext::new(FillConfig::default());
        let a = context.next_origin();
        let b = context.next_origin();
        assert_ne!(a, b);
    }

    #[test]
    fn test_abort_cancels_session_token() {
        let context = FillContext::new(FillConfig::default());
        assert!(!context.cancellation().is_cancelled());
        context.abort();
        assert!(context.cancellation().is_cancelled());
    }
}
