use std::collections::BTreeMap;

use pagefill_core::Value;

use crate::expr::Evaluation;

/// Values an element computed at earlier evaluation times.
///
/// An element evaluated in several passes keeps one value per
/// [`Evaluation`], so a later pass can re-examine what was printed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedValues {
    values: BTreeMap<Evaluation, Value>,
}

impl RecordedValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the value computed for `evaluation`, replacing an earlier one.
    pub fn record(&mut self, evaluation: Evaluation, value: Value) {
        self.values.insert(evaluation, value);
    }

    /// The value recorded for `evaluation`.
    pub fn get(&self, evaluation: Evaluation) -> Option<&Value> {
        self.values.get(&evaluation)
    }

    /// Whether a value was recorded for `evaluation`.
    pub fn contains(&self, evaluation: Evaluation) -> bool {
        self.values.contains_key(&evaluation)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Recorded values in evaluation tag order.
    pub fn iter(&self) -> impl Iterator<Item = (Evaluation, &Value)> {
        self.values.iter().map(|(evaluation, value)| (*evaluation, value))
    }
}

impl FromIterator<(Evaluation, Value)> for RecordedValues {
    fn from_iter<I: IntoIterator<Item = (Evaluation, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
