//! Expressions and the evaluator seam.
//!
//! Expression languages are not part of the engine. An element holds
//! [`Expression`] values and the filler hands them, together with the current
//! [`FillScope`], to an [`Evaluator`]. Constants never reach the evaluator.

use std::collections::HashMap;
use std::fmt;

use pagefill_core::{FillError, FillResult, Value};

use crate::data::Record;

/// Name of the builtin page number variable.
pub const PAGE_NUMBER: &str = "PAGE_NUMBER";

/// The point in time an expression is evaluated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Evaluation {
    /// Values of the current record.
    Current,
    /// Values from before the current increment.
    PreviousPass,
    /// Estimated values, used before a later pass fixes them.
    Estimated,
}

impl Evaluation {
    /// All evaluation times, in tag order.
    pub const ALL: [Evaluation; 3] = [Self::Current, Self::PreviousPass, Self::Estimated];

    /// Stable numeric tag.
    pub fn tag(self) -> u8 {
        match self {
            Self::Current => 0,
            Self::PreviousPass => 1,
            Self::Estimated => 2,
        }
    }

    /// Inverse of [`tag`](Self::tag).
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|evaluation| evaluation.tag() == tag)
    }
}

/// An expression attached to a report element.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A builtin constant, resolved without the evaluator.
    Constant(Value),
    /// A field of the current record.
    Field(String),
    /// A report variable.
    Variable(String),
    /// A report parameter.
    Parameter(String),
    /// Expression text for an external evaluator.
    Custom { id: u32, text: String },
}

impl Expression {
    /// Shorthand for [`Expression::Constant`].
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant(value.into())
    }

    /// Shorthand for [`Expression::Field`].
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    /// Shorthand for [`Expression::Variable`].
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Shorthand for [`Expression::Parameter`].
    pub fn parameter(name: impl Into<String>) -> Self {
        Self::Parameter(name.into())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => write!(f, "{value:?}"),
            Self::Field(name) => write!(f, "$F{{{name}}}"),
            Self::Variable(name) => write!(f, "$V{{{name}}}"),
            Self::Parameter(name) => write!(f, "$P{{{name}}}"),
            Self::Custom { text, .. } => f.write_str(text),
        }
    }
}

/// Read-only locale and time zone context for style resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleContext {
    pub locale: String,
    pub time_zone: String,
}

impl Default for StyleContext {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            time_zone: "UTC".to_string(),
        }
    }
}

/// The values visible to expressions while a filler runs.
#[derive(Debug, Clone, Default)]
pub struct FillScope {
    fields: HashMap<String, Value>,
    previous_fields: HashMap<String, Value>,
    variables: HashMap<String, Value>,
    old_variables: HashMap<String, Value>,
    parameters: HashMap<String, Value>,
    changed_groups: Vec<String>,
    page_number: u32,
}

impl FillScope {
    /// Create a scope holding the given report parameters.
    pub fn with_parameters(parameters: HashMap<String, Value>) -> Self {
        Self {
            parameters,
            ..Self::default()
        }
    }

    /// Make `record` current. The former current fields become the
    /// previous-pass fields.
    pub fn advance(&mut self, record: Record) {
        self.previous_fields = std::mem::replace(&mut self.fields, record.fields);
        self.changed_groups = record.changed_groups;
    }

    /// Clear record state, keeping parameters.
    pub fn clear_records(&mut self) {
        self.fields.clear();
        self.previous_fields.clear();
        self.variables.clear();
        self.old_variables.clear();
        self.changed_groups.clear();
        self.page_number = 0;
    }

    /// Set a report parameter.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: Value) {
        self.parameters.insert(name.into(), value);
    }

    /// Set a variable's current and previous values.
    pub fn set_variable(&mut self, name: &str, current: Value, old: Value) {
        self.variables.insert(name.to_string(), current);
        self.old_variables.insert(name.to_string(), old);
    }

    /// Set the page number seen by expressions.
    pub fn set_page_number(&mut self, page_number: u32) {
        self.page_number = page_number;
    }

    /// Current page number.
    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    /// Groups that changed with the current record.
    pub fn changed_groups(&self) -> &[String] {
        &self.changed_groups
    }

    /// A field value at the given evaluation time.
    pub fn field(&self, name: &str, evaluation: Evaluation) -> Option<&Value> {
        match evaluation {
            Evaluation::PreviousPass => self.previous_fields.get(name),
            Evaluation::Current | Evaluation::Estimated => self.fields.get(name),
        }
    }

    /// A variable value at the given evaluation time.
    pub fn variable(&self, name: &str, evaluation: Evaluation) -> Option<Value> {
        if name == PAGE_NUMBER {
            return Some(Value::Int(self.page_number.into()));
        }
        match evaluation {
            Evaluation::PreviousPass => self.old_variables.get(name).cloned(),
            Evaluation::Current | Evaluation::Estimated => self.variables.get(name).cloned(),
        }
    }

    /// A parameter value.
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }
}

/// The expression evaluator collaborator.
pub trait Evaluator: Send + Sync {
    /// Evaluate `expression` against `scope` for the given evaluation time.
    fn evaluate(
        &self,
        expression: &Expression,
        scope: &FillScope,
        evaluation: Evaluation,
    ) -> FillResult<Value>;
}

/// Resolve `expression`, handling constants without calling `evaluator`.
pub fn evaluate_expression(
    evaluator: &dyn Evaluator,
    expression: &Expression,
    scope: &FillScope,
    evaluation: Evaluation,
) -> FillResult<Value> {
    match expression {
        Expression::Constant(value) => Ok(value.clone()),
        other => evaluator.evaluate(other, scope, evaluation),
    }
}

/// Evaluator resolving references from the fill scope.
///
/// Unknown names evaluate to null. Custom expressions are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeEvaluator;

impl Evaluator for ScopeEvaluator {
    fn evaluate(
        &self,
        expression: &Expression,
        scope: &FillScope,
        evaluation: Evaluation,
    ) -> FillResult<Value> {
        match expression {
            Expression::Constant(value) => Ok(value.clone()),
            Expression::Field(name) => Ok(scope.field(name, evaluation).cloned().unwrap_or_default()),
            Expression::Variable(name) => Ok(scope.variable(name, evaluation).unwrap_or_default()),
            Expression::Parameter(name) => Ok(scope.parameter(name).cloned().unwrap_or_default()),
            Expression::Custom { text, .. } => Err(FillError::evaluation(
                text.clone(),
                "custom expressions need an external evaluator",
            )),
        }
    }
}

type CustomFn = dyn Fn(u32, &str, &FillScope, Evaluation) -> FillResult<Value> + Send + Sync;

/// Evaluator delegating custom expressions to a closure and everything else
/// to [`ScopeEvaluator`].
pub struct FnEvaluator {
    custom: Box<CustomFn>,
}

impl FnEvaluator {
    /// Create an evaluator calling `custom` with the expression id and text.
    pub fn new<F>(custom: F) -> Self
    where
        F: Fn(u32, &str, &FillScope, Evaluation) -> FillResult<Value> + Send + Sync + 'static,
    {
        Self {
            custom: Box::new(custom),
        }
    }
}

impl Evaluator for FnEvaluator {
    fn evaluate(
        &self,
        expression: &Expression,
        scope: &FillScope,
        evaluation: Evaluation,
    ) -> FillResult<Value> {
        match expression {
            Expression::Custom { id, text } => (self.custom)(*id, text, scope, evaluation),
            other => ScopeEvaluator.evaluate(other, scope, evaluation),
        }
    }
}

impl fmt::Debug for FnEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEvaluator").finish_non_exhaustive()
    }
}
