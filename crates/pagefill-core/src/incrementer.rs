//! Variable increment strategies.
//!
//! A report variable accumulates a value over the records of a fill, using the
//! [`Incrementer`] its [`Calculation`] selects. Incrementers are stateless
//! singletons; the per-variable state lives in an [`Accumulator`]. Factories
//! group the incrementers for one family of value types and are shared
//! process-wide through the [`IncrementerCache`](crate::IncrementerCache).

use std::collections::HashSet;

use crate::value::{Value, ValueKey};

/// The calculation a variable performs over its expression values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Calculation {
    /// The variable takes the expression value as-is.
    #[default]
    Nothing,
    /// Number of non-null values.
    Count,
    /// Number of distinct non-null values.
    DistinctCount,
    /// Sum of the values.
    Sum,
    /// Arithmetic mean of the values.
    Average,
    /// Smallest value.
    Lowest,
    /// Largest value.
    Highest,
    /// Population standard deviation.
    StandardDeviation,
    /// Population variance.
    Variance,
    /// The value is assigned externally and never incremented.
    System,
    /// The first value after a reset.
    First,
}

/// Per-variable accumulation state.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    value: Value,
    initialized: bool,
    count: u64,
    sum: f64,
    mean: f64,
    m2: f64,
    distinct: HashSet<ValueKey>,
}

impl Accumulator {
    /// Create an accumulator holding `initial`, ready for the first increment.
    pub fn new(initial: Value) -> Self {
        Self {
            value: initial,
            initialized: true,
            ..Self::default()
        }
    }

    /// The current accumulated value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Number of non-null values counted since the last reset.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Whether no value has been incremented since the last reset.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Reset to `initial`, clearing helper state.
    pub fn reset(&mut self, initial: Value) {
        *self = Self::new(initial);
    }

    /// Overwrite the value without touching helper state.
    pub fn set_value(&mut self, value: Value) {
        self.value = value;
    }

    /// Increment with `value` using `incrementer`, returning the new value.
    pub fn apply(&mut self, incrementer: &dyn Incrementer, value: &Value) -> &Value {
        let next = incrementer.increment(self, value);
        self.value = next;
        self.initialized = false;
        &self.value
    }
}

/// A variable increment strategy.
pub trait Incrementer: Send + Sync {
    /// Compute the next variable value from the accumulated state and a new
    /// expression value. Helper fields of `acc` may be updated; the caller
    /// stores the returned value.
    fn increment(&self, acc: &mut Accumulator, value: &Value) -> Value;

    /// The value a variable starts with when no initial expression is given.
    fn initial_value(&self) -> Value {
        Value::Null
    }
}

/// A family of incrementers, one per [`Calculation`].
pub trait IncrementerFactory: Send + Sync + 'static {
    /// Short identifier of the factory, used in logs.
    fn name(&self) -> &str;

    /// The incrementer implementing `calculation`.
    fn incrementer(&self, calculation: Calculation) -> &'static dyn Incrementer;
}

/// Value held when a null arrives: null right after a reset, else unchanged.
fn keep_on_null(acc: &Accumulator) -> Value {
    if acc.initialized {
        Value::Null
    } else {
        acc.value.clone()
    }
}

struct NothingIncrementer;

impl Incrementer for NothingIncrementer {
    fn increment(&self, _acc: &mut Accumulator, value: &Value) -> Value {
        value.clone()
    }
}

struct SystemIncrementer;

impl Incrementer for SystemIncrementer {
    fn increment(&self, acc: &mut Accumulator, _value: &Value) -> Value {
        acc.value.clone()
    }
}

struct FirstIncrementer;

impl Incrementer for FirstIncrementer {
    fn increment(&self, acc: &mut Accumulator, value: &Value) -> Value {
        if acc.initialized {
            value.clone()
        } else {
            acc.value.clone()
        }
    }
}

struct CountIncrementer;

impl Incrementer for CountIncrementer {
    fn increment(&self, acc: &mut Accumulator, value: &Value) -> Value {
        if !value.is_null() {
            acc.count += 1;
        }
        Value::Int(acc.count as i64)
    }

    fn initial_value(&self) -> Value {
        Value::Int(0)
    }
}

struct DistinctCountIncrementer;

impl Incrementer for DistinctCountIncrementer {
    fn increment(&self, acc: &mut Accumulator, value: &Value) -> Value {
        if !value.is_null() {
            acc.distinct.insert(value.key());
        }
        Value::Int(acc.distinct.len() as i64)
    }

    fn initial_value(&self) -> Value {
        Value::Int(0)
    }
}

struct SumIncrementer;

impl Incrementer for SumIncrementer {
    fn increment(&self, acc: &mut Accumulator, value: &Value) -> Value {
        let Some(number) = value.as_f64() else {
            return keep_on_null(acc);
        };
        acc.count += 1;
        acc.sum += number;
        Value::Float(acc.sum)
    }

    fn initial_value(&self) -> Value {
        Value::Float(0.0)
    }
}

struct AverageIncrementer;

impl Incrementer for AverageIncrementer {
    fn increment(&self, acc: &mut Accumulator, value: &Value) -> Value {
        let Some(number) = value.as_f64() else {
            return keep_on_null(acc);
        };
        acc.count += 1;
        acc.sum += number;
        Value::Float(acc.sum / acc.count as f64)
    }

    fn initial_value(&self) -> Value {
        Value::Float(0.0)
    }
}

/// Welford update shared by variance and standard deviation.
fn welford_variance(acc: &mut Accumulator, number: f64) -> f64 {
    acc.count += 1;
    acc.sum += number;
    let delta = number - acc.mean;
    acc.mean += delta / acc.count as f64;
    acc.m2 += delta * (number - acc.mean);
    acc.m2 / acc.count as f64
}

struct VarianceIncrementer;

impl Incrementer for VarianceIncrementer {
    fn increment(&self, acc: &mut Accumulator, value: &Value) -> Value {
        match value.as_f64() {
            Some(number) => Value::Float(welford_variance(acc, number)),
            None => keep_on_null(acc),
        }
    }

    fn initial_value(&self) -> Value {
        Value::Float(0.0)
    }
}

struct StandardDeviationIncrementer;

impl Incrementer for StandardDeviationIncrementer {
    fn increment(&self, acc: &mut Accumulator, value: &Value) -> Value {
        match value.as_f64() {
            Some(number) => Value::Float(welford_variance(acc, number).sqrt()),
            None => keep_on_null(acc),
        }
    }

    fn initial_value(&self) -> Value {
        Value::Float(0.0)
    }
}

struct ExtremeIncrementer {
    keep_highest: bool,
}

impl Incrementer for ExtremeIncrementer {
    fn increment(&self, acc: &mut Accumulator, value: &Value) -> Value {
        if value.is_null() {
            return keep_on_null(acc);
        }
        if acc.initialized || acc.value.is_null() {
            return value.clone();
        }
        let replace = match value.compare(&acc.value) {
            Some(order) if self.keep_highest => order.is_gt(),
            Some(order) => order.is_lt(),
            None => false,
        };
        if replace {
            value.clone()
        } else {
            acc.value.clone()
        }
    }
}

/// A factory type with a fixed kind name, constructible on demand.
pub trait FactoryKind: IncrementerFactory + Default {
    /// Name the factory is looked up by.
    const KIND: &'static str;
}

static NOTHING: NothingIncrementer = NothingIncrementer;
static SYSTEM: SystemIncrementer = SystemIncrementer;
static FIRST: FirstIncrementer = FirstIncrementer;
static COUNT: CountIncrementer = CountIncrementer;
static DISTINCT_COUNT: DistinctCountIncrementer = DistinctCountIncrementer;
static SUM: SumIncrementer = SumIncrementer;
static AVERAGE: AverageIncrementer = AverageIncrementer;
static VARIANCE: VarianceIncrementer = VarianceIncrementer;
static STANDARD_DEVIATION: StandardDeviationIncrementer = StandardDeviationIncrementer;
static HIGHEST: ExtremeIncrementer = ExtremeIncrementer { keep_highest: true };
static LOWEST: ExtremeIncrementer = ExtremeIncrementer { keep_highest: false };

/// Incrementers that work for any value type.
///
/// Arithmetic calculations fall back to [`Calculation::Nothing`].
#[derive(Debug, Default)]
pub struct DefaultIncrementerFactory;

impl FactoryKind for DefaultIncrementerFactory {
    const KIND: &'static str = "default";
}

impl IncrementerFactory for DefaultIncrementerFactory {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn incrementer(&self, calculation: Calculation) -> &'static dyn Incrementer {
        match calculation {
            Calculation::Count => &COUNT,
            Calculation::DistinctCount => &DISTINCT_COUNT,
            Calculation::System => &SYSTEM,
            Calculation::First => &FIRST,
            _ => &NOTHING,
        }
    }
}

/// Incrementers for values with an ordering: highest and lowest.
#[derive(Debug, Default)]
pub struct ComparableIncrementerFactory;

impl FactoryKind for ComparableIncrementerFactory {
    const KIND: &'static str = "comparable";
}

impl IncrementerFactory for ComparableIncrementerFactory {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn incrementer(&self, calculation: Calculation) -> &'static dyn Incrementer {
        match calculation {
            Calculation::Highest => &HIGHEST,
            Calculation::Lowest => &LOWEST,
            other => DefaultIncrementerFactory.incrementer(other),
        }
    }
}

/// Incrementers for numeric values, computed in `f64`.
#[derive(Debug, Default)]
pub struct NumberIncrementerFactory;

impl FactoryKind for NumberIncrementerFactory {
    const KIND: &'static str = "number";
}

impl IncrementerFactory for NumberIncrementerFactory {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn incrementer(&self, calculation: Calculation) -> &'static dyn Incrementer {
        match calculation {
            Calculation::Sum => &SUM,
            Calculation::Average => &AVERAGE,
            Calculation::Variance => &VARIANCE,
            Calculation::StandardDeviation => &STANDARD_DEVIATION,
            Calculation::Highest | Calculation::Lowest => {
                ComparableIncrementerFactory.incrementer(calculation)
            }
            other => DefaultIncrementerFactory.incrementer(other),
        }
    }
}
