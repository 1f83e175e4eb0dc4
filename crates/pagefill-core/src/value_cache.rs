//! Process-wide cache of incrementer factories.
//!
//! Every report variable needs the [`IncrementerFactory`] of its value type.
//! Factories are stateless, so one instance per kind is shared by all fills
//! in the process, including fills running concurrently on other threads.
//!
//! A kind is identified by its name. The typed lookup
//! [`IncrementerCache::get`] uses [`FactoryKind::KIND`], so it shares its
//! entry with [`IncrementerCache::get_named`] for the same name.
//!
//! # Locking
//!
//! The kind-to-slot map is guarded by an `RwLock` that is only held long
//! enough to find or insert a slot. Construction happens under the slot's own
//! mutex, so at most one instance is built per kind while unrelated kinds are
//! constructed in parallel.
//!
//! # Eviction
//!
//! Entries are reference counted. [`IncrementerCache::evict_unused`] drops
//! every entry no longer referenced outside the cache; nothing is evicted
//! automatically. Callers must not rely on an entry surviving an eviction
//! pass, but two `get` calls with no eviction in between always return the
//! same instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::error::{FillError, FillResult};
use crate::incrementer::{
    ComparableIncrementerFactory, DefaultIncrementerFactory, FactoryKind, IncrementerFactory,
    NumberIncrementerFactory,
};

/// Target of the cache's log events.
pub const LOG_TARGET: &str = "pagefill_core::value_cache";

/// Constructor registered for a named strategy kind.
pub type FactoryConstructor = fn() -> Result<Arc<dyn IncrementerFactory>, String>;

type Slot = Arc<Mutex<Option<Arc<dyn IncrementerFactory>>>>;

/// Global cache instance.
static GLOBAL_CACHE: OnceLock<IncrementerCache> = OnceLock::new();

/// Cache mapping a strategy kind to its singleton factory.
pub struct IncrementerCache {
    slots: RwLock<HashMap<String, Slot>>,
    constructors: RwLock<HashMap<String, FactoryConstructor>>,
}

impl IncrementerCache {
    /// Create an empty cache with the builtin named kinds registered
    /// (`default`, `comparable`, `number`).
    pub fn new() -> Self {
        let cache = Self {
            slots: RwLock::new(HashMap::new()),
            constructors: RwLock::new(HashMap::new()),
        };
        cache.register(DefaultIncrementerFactory::KIND, || {
            Ok(Arc::new(DefaultIncrementerFactory))
        });
        cache.register(ComparableIncrementerFactory::KIND, || {
            Ok(Arc::new(ComparableIncrementerFactory))
        });
        cache.register(NumberIncrementerFactory::KIND, || {
            Ok(Arc::new(NumberIncrementerFactory))
        });
        cache
    }

    /// The process-wide cache.
    pub fn global() -> &'static IncrementerCache {
        GLOBAL_CACHE.get_or_init(IncrementerCache::new)
    }

    /// Register the constructor used for a named kind.
    ///
    /// Replacing a constructor does not affect an instance already built.
    pub fn register(&self, kind: impl Into<String>, constructor: FactoryConstructor) {
        self.constructors.write().insert(kind.into(), constructor);
    }

    /// The singleton factory of kind `F::KIND`.
    ///
    /// If no instance exists yet it is built with `F::default()`, without
    /// consulting the constructor registered under the same name.
    pub fn get<F: FactoryKind>(&self) -> Arc<dyn IncrementerFactory> {
        let slot = self.slot(F::KIND);
        let mut guard = slot.lock();
        if let Some(factory) = guard.as_ref() {
            return factory.clone();
        }
        let factory: Arc<dyn IncrementerFactory> = Arc::new(F::default());
        tracing::debug!(target: LOG_TARGET, kind = F::KIND, "constructed incrementer factory");
        *guard = Some(factory.clone());
        factory
    }

    /// The singleton factory registered under `kind`.
    ///
    /// Fails with [`FillError::StrategyInstantiation`] if no constructor is
    /// registered for the kind or the constructor fails. Failures are not
    /// cached and not retried.
    pub fn get_named(&self, kind: &str) -> FillResult<Arc<dyn IncrementerFactory>> {
        let slot = self.slot(kind);
        let mut guard = slot.lock();
        if let Some(factory) = guard.as_ref() {
            return Ok(factory.clone());
        }

        let constructor = self.constructors.read().get(kind).copied();
        let constructor = constructor.ok_or_else(|| FillError::StrategyInstantiation {
            kind: kind.to_string(),
            message: "no constructor registered".to_string(),
        })?;
        let factory = constructor().map_err(|message| {
            tracing::warn!(target: LOG_TARGET, kind, %message, "incrementer factory construction failed");
            FillError::StrategyInstantiation {
                kind: kind.to_string(),
                message,
            }
        })?;

        tracing::debug!(target: LOG_TARGET, kind, "constructed incrementer factory");
        *guard = Some(factory.clone());
        Ok(factory)
    }

    /// Drop entries that are not referenced outside the cache.
    ///
    /// Returns the number of entries removed. Slots currently being
    /// constructed are skipped.
    pub fn evict_unused(&self) -> usize {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, slot| match slot.try_lock() {
            Some(guard) => match guard.as_ref() {
                Some(factory) => Arc::strong_count(factory) > 1,
                None => false,
            },
            None => true,
        });
        let evicted = before - slots.len();
        if evicted > 0 {
            tracing::trace!(target: LOG_TARGET, evicted, "evicted unused incrementer factories");
        }
        evicted
    }

    /// Number of cached kinds.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether the cache holds no kinds.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, kind: &str) -> Slot {
        if let Some(slot) = self.slots.read().get(kind) {
            return slot.clone();
        }
        self.slots.write().entry(kind.to_string()).or_default().clone()
    }
}

impl Default for IncrementerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IncrementerCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementerCache")
            .field("cached", &self.len())
            .field("registered", &self.constructors.read().len())
            .finish()
    }
}
