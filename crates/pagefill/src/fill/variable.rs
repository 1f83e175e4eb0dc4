use std::sync::Arc;

use pagefill_core::{Accumulator, FillResult, Incrementer, IncrementerCache, IncrementerFactory, Value};

use crate::design::{ResetType, VariableDesign};
use crate::expr::{Evaluation, Evaluator, FillScope, evaluate_expression};

/// Fill state of one report variable.
pub(crate) struct VariableFill {
    design: VariableDesign,
    // Keeps the cached factory alive while the filler uses its incrementer.
    _factory: Arc<dyn IncrementerFactory>,
    incrementer: &'static dyn Incrementer,
    accumulator: Accumulator,
}

impl VariableFill {
    pub(crate) fn new(design: &VariableDesign) -> FillResult<Self> {
        let factory = IncrementerCache::global().get_named(&design.factory)?;
        let incrementer = factory.incrementer(design.calculation);
        Ok(Self {
            design: design.clone(),
            _factory: factory,
            incrementer,
            accumulator: Accumulator::new(incrementer.initial_value()),
        })
    }

    pub(crate) fn resets_on_page(&self) -> bool {
        self.design.reset == ResetType::Page
    }

    /// Whether any of `groups` starts a new group this variable resets on.
    pub(crate) fn resets_on_group(&self, groups: &[String]) -> bool {
        match &self.design.reset {
            ResetType::Group(group) => groups.contains(group),
            _ => false,
        }
    }

    /// Reset to the initial value.
    pub(crate) fn initialize(&mut self, evaluator: &dyn Evaluator, scope: &mut FillScope) -> FillResult<()> {
        let initial = match &self.design.initial {
            Some(expression) => evaluate_expression(evaluator, expression, scope, Evaluation::Current)?,
            None => self.incrementer.initial_value(),
        };
        self.accumulator.reset(initial.clone());
        scope.set_variable(&self.design.name, initial, Value::Null);
        Ok(())
    }

    /// Fold the current record's value in.
    pub(crate) fn increment(&mut self, evaluator: &dyn Evaluator, scope: &mut FillScope) -> FillResult<()> {
        let value = evaluate_expression(evaluator, &self.design.expression, scope, Evaluation::Current)?;
        let old = self.accumulator.value().clone();
        let current = self.accumulator.apply(self.incrementer, &value).clone();
        scope.set_variable(&self.design.name, current, old);
        Ok(())
    }
}
