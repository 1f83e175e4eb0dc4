//! Elements whose value is known only after they are printed.
//!
//! A delayed text field prints empty. Once its band is placed the filler
//! binds the print element to the time its value becomes known. At that
//! time the expression is evaluated for every [`Evaluation`] and the print
//! element is rewritten wherever it ended up.

use std::collections::HashMap;

use pagefill_core::FillResult;

use crate::design::{ElementDesign, ElementKind, EvaluationMode, ResetType, VariableDesign};
use crate::expr::{Evaluation, Evaluator, Expression, FillScope, PAGE_NUMBER, evaluate_expression};
use crate::print::{PrintElementId, RecordedValues, Resolution};

/// When a delayed element is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BoundTime {
    Page,
    Report,
    Group(String),
}

impl BoundTime {
    /// Resolution time of `design`, `None` if it evaluates while filling.
    pub(crate) fn of(design: &ElementDesign, variables: &[VariableDesign]) -> Option<Self> {
        let ElementKind::TextField(expression) = &design.kind else {
            return None;
        };
        match &design.evaluation_mode {
            EvaluationMode::Now => None,
            EvaluationMode::Page => Some(Self::Page),
            EvaluationMode::Report => Some(Self::Report),
            EvaluationMode::Group(group) => Some(Self::Group(group.clone())),
            EvaluationMode::Auto => Self::auto(expression, variables),
        }
    }

    /// The reset time of the single variable `expression` shows.
    fn auto(expression: &Expression, variables: &[VariableDesign]) -> Option<Self> {
        let Expression::Variable(name) = expression else {
            return None;
        };
        // The page count is final only once the report is.
        if name == PAGE_NUMBER {
            return Some(Self::Report);
        }
        let variable = variables.iter().find(|variable| &variable.name == name)?;
        Some(match &variable.reset {
            ResetType::Report => Self::Report,
            ResetType::Page => Self::Page,
            ResetType::Group(group) => Self::Group(group.clone()),
        })
    }

    pub(crate) fn is_group(&self, groups: &[String]) -> bool {
        matches!(self, Self::Group(group) if groups.contains(group))
    }
}

/// A printed element waiting for its value.
#[derive(Debug, Clone)]
pub(crate) struct BoundElement {
    pub id: PrintElementId,
    pub time: BoundTime,
    pub expression: Expression,
}

/// The delayed elements a filler has placed and not resolved yet.
#[derive(Debug, Default)]
pub(crate) struct DelayedElements {
    bound: Vec<BoundElement>,
}

impl DelayedElements {
    pub(crate) fn bind(&mut self, elements: Vec<BoundElement>) {
        self.bound.extend(elements);
    }

    pub(crate) fn len(&self) -> usize {
        self.bound.len()
    }

    pub(crate) fn clear(&mut self) {
        self.bound.clear();
    }

    /// Evaluate and remove the elements whose time satisfies `due`.
    pub(crate) fn resolve(
        &mut self,
        due: impl Fn(&BoundTime) -> bool,
        evaluator: &dyn Evaluator,
        scope: &FillScope,
    ) -> FillResult<HashMap<PrintElementId, Resolution>> {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.bound)
            .into_iter()
            .partition(|element| due(&element.time));
        self.bound = waiting;

        let mut resolved = HashMap::with_capacity(ready.len());
        for element in ready {
            let mut recorded = RecordedValues::new();
            for evaluation in Evaluation::ALL {
                recorded.record(
                    evaluation,
                    evaluate_expression(evaluator, &element.expression, scope, evaluation)?,
                );
            }
            resolved.insert(element.id, Resolution::new(recorded));
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use pagefill_core::{Calculation, Value};

    use super::*;
    use crate::data::Record;
    use crate::expr::ScopeEvaluator;

    fn field(mode: EvaluationMode, expression: Expression) -> ElementDesign {
        ElementDesign::text_field("f", 0, 0, 10, 10, expression).with_evaluation_mode(mode)
    }

    #[test]
    fn test_auto_follows_variable_reset() {
        let variables = vec![
            VariableDesign::new("total", Expression::field("n"), Calculation::Sum),
            VariableDesign::new("page_total", Expression::field("n"), Calculation::Sum)
                .with_reset(ResetType::Page),
            VariableDesign::new("region_total", Expression::field("n"), Calculation::Sum)
                .with_reset(ResetType::Group("region".into())),
        ];
        let auto = |expression| BoundTime::of(&field(EvaluationMode::Auto, expression), &variables);

        assert_eq!(auto(Expression::variable("total")), Some(BoundTime::Report));
        assert_eq!(auto(Expression::variable("page_total")), Some(BoundTime::Page));
        assert_eq!(
            auto(Expression::variable("region_total")),
            Some(BoundTime::Group("region".into()))
        );
        assert_eq!(auto(Expression::variable(PAGE_NUMBER)), Some(BoundTime::Report));
        assert_eq!(auto(Expression::field("n")), None);
    }

    #[test]
    fn test_only_text_fields_are_delayed() {
        let label = ElementDesign::static_text("l", 0, 0, 10, 10, "x").with_evaluation_mode(EvaluationMode::Report);
        assert_eq!(BoundTime::of(&label, &[]), None);
        assert_eq!(
            BoundTime::of(&field(EvaluationMode::Page, Expression::field("n")), &[]),
            Some(BoundTime::Page)
        );
        assert_eq!(BoundTime::of(&field(EvaluationMode::Now, Expression::field("n")), &[]), None);
    }

    #[test]
    fn test_resolve_takes_due_elements_only() {
        let mut delayed = DelayedElements::default();
        delayed.bind(vec![
            BoundElement {
                id: PrintElementId::new(1, 1),
                time: BoundTime::Page,
                expression: Expression::field("n"),
            },
            BoundElement {
                id: PrintElementId::new(2, 1),
                time: BoundTime::Report,
                expression: Expression::field("n"),
            },
        ]);
        let mut scope = FillScope::default();
        scope.advance(Record::new([("n", Value::Int(4))]));
        scope.advance(Record::new([("n", Value::Int(5))]));

        let resolved = delayed
            .resolve(|time| *time == BoundTime::Page, &ScopeEvaluator, &scope)
            .unwrap();
        assert_eq!(delayed.len(), 1);
        let resolution = &resolved[&PrintElementId::new(1, 1)];
        assert_eq!(resolution.text, "5");
        assert_eq!(resolution.recorded.get(Evaluation::PreviousPass), Some(&Value::Int(4)));
        assert_eq!(resolution.recorded.len(), 3);
    }

    #[test]
    fn test_group_time_matches_changed_groups() {
        let time = BoundTime::Group("region".into());
        assert!(time.is_group(&["region".to_string()]));
        assert!(!time.is_group(&[]));
        assert!(!BoundTime::Report.is_group(&["region".to_string()]));
    }
}
