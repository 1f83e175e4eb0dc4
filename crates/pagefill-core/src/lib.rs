//! Core types for pagefill.
//!
//! This crate holds the pieces of the fill engine that do not depend on the
//! page tree:
//!
//! - **Errors**: [`FillError`] and its layer-specific causes
//! - **Values**: the dynamically typed [`Value`] produced by evaluation
//! - **Cancellation**: the cooperative [`CancellationToken`]
//! - **Incrementers**: variable calculation strategies
//! - **Value Cache**: the process-wide [`IncrementerCache`]
//! - **Configuration**: [`FillConfig`], read once per fill session
//!
//! # Value Cache Example
//!
//! ```
//! use pagefill_core::{Accumulator, Calculation, IncrementerCache, Value};
//!
//! let factory = IncrementerCache::global().get_named("number")?;
//! let sum = factory.incrementer(Calculation::Sum);
//!
//! let mut acc = Accumulator::new(sum.initial_value());
//! acc.apply(sum, &Value::Int(2));
//! acc.apply(sum, &Value::Float(0.5));
//! assert_eq!(acc.value(), &Value::Float(2.5));
//! # Ok::<(), pagefill_core::FillError>(())
//! ```

pub mod cancel;
pub mod config;
mod error;
pub mod incrementer;
pub mod value;
pub mod value_cache;

pub use cancel::{CancelHookId, CancellationToken};
pub use config::{FillConfig, RunnerStrategy, VirtualizationConfig, WorkerConfig};
pub use error::{ConfigError, FillError, FillResult, VirtualizationError};
pub use incrementer::{
    Accumulator, Calculation, ComparableIncrementerFactory, DefaultIncrementerFactory,
    FactoryKind, Incrementer, IncrementerFactory, NumberIncrementerFactory,
};
pub use value::{Value, ValueKey};
pub use value_cache::IncrementerCache;

static_assertions::assert_impl_all!(FillError: Send, Sync);
static_assertions::assert_impl_all!(IncrementerCache: Send, Sync);
