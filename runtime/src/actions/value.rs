//! Value actions.

use super::{Action, ContextFn};
use crate::context::ProcessContext;
use crate::error::ProcessError;
use serde_json::{Number, Value};
use std::sync::Arc;

enum ValueSource {
    Literal(Value),
    Computed(ContextFn<Value>),
}

/// Writes a literal or computed value at a dotted key.
///
/// # Examples
///
/// ```
/// use fractal_runtime::actions::SetValueAction;
/// use fractal_runtime::Process;
/// use serde_json::json;
///
/// let process = Process::new()
///     .then(SetValueAction::new("order.total", 40))
///     .then(SetValueAction::computed("order.with_tax", |ctx| {
///         json!(ctx.get("order.total").and_then(|v| v.as_f64()).unwrap_or(0.0) * 1.25)
///     }));
///
/// let context = process.run(None).unwrap();
/// assert_eq!(context.get("order.with_tax"), Some(&json!(50.0)));
/// ```
pub struct SetValueAction {
    key: String,
    value: ValueSource,
}

impl SetValueAction {
    /// Write `value` at `key`.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: ValueSource::Literal(value.into()),
        }
    }

    /// Write the result of `compute`, evaluated when the action runs.
    #[must_use]
    pub fn computed<F>(key: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&ProcessContext) -> Value + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            value: ValueSource::Computed(Arc::new(compute)),
        }
    }
}

impl Action for SetValueAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let value = match &self.value {
            ValueSource::Literal(value) => value.clone(),
            ValueSource::Computed(compute) => compute(context),
        };
        context.set(&self.key, value)?;
        Ok(())
    }
}

/// Writes several literal values at once, in order.
pub struct SetVariablesAction {
    values: Vec<(String, Value)>,
}

impl SetVariablesAction {
    /// Write every `(key, value)` pair.
    #[must_use]
    pub fn new<K, V, I>(values: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            values: values.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl Action for SetVariablesAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        for (key, value) in &self.values {
            context.set(key, value.clone())?;
        }
        Ok(())
    }
}

/// Copies the value at one key to another.
///
/// A missing source fails with `MissingKeyError` unless a default is set.
pub struct CopyValueAction {
    from: String,
    to: String,
    default: Option<Value>,
}

impl CopyValueAction {
    /// Copy `from` to `to`.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            default: None,
        }
    }

    /// Write `default` when the source is missing.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

impl Action for CopyValueAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let value = match (context.get(&self.from), &self.default) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => default.clone(),
            (None, None) => context.require(&self.from)?.clone(),
        };
        context.set(&self.to, value)?;
        Ok(())
    }
}

/// Adds a number to the value at a key; a missing key counts as `0`.
pub struct IncreaseValueAction {
    key: String,
    amount: Value,
}

impl IncreaseValueAction {
    /// Add `amount` to `key`.
    #[must_use]
    pub fn new(key: impl Into<String>, amount: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            amount: amount.into(),
        }
    }
}

impl Action for IncreaseValueAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        shift(context, &self.key, &self.amount, false)
    }
}

/// Subtracts a number from the value at a key; a missing key counts as `0`.
pub struct DecreaseValueAction {
    key: String,
    amount: Value,
}

impl DecreaseValueAction {
    /// Subtract `amount` from `key`.
    #[must_use]
    pub fn new(key: impl Into<String>, amount: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            amount: amount.into(),
        }
    }
}

impl Action for DecreaseValueAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        shift(context, &self.key, &self.amount, true)
    }
}

fn shift(context: &mut ProcessContext, key: &str, amount: &Value, subtract: bool) -> Result<(), ProcessError> {
    let current = context.get(key).cloned().unwrap_or_else(|| Value::from(0));
    let mismatch = |key: &str| ProcessError::TypeMismatch {
        key: key.to_string(),
        expected: "a number",
    };

    // Integers stay integers until they overflow
    let integral = match (current.as_i64(), amount.as_i64()) {
        (Some(a), Some(b)) if subtract => a.checked_sub(b),
        (Some(a), Some(b)) => a.checked_add(b),
        _ => None,
    };
    let result = match integral {
        Some(sum) => Value::from(sum),
        None => {
            let a = current.as_f64().ok_or_else(|| mismatch(key))?;
            let b = amount.as_f64().ok_or_else(|| mismatch("amount"))?;
            let sum = if subtract { a - b } else { a + b };
            Number::from_f64(sum).map(Value::Number).ok_or_else(|| mismatch(key))?
        },
    };
    context.set(key, result)?;
    Ok(())
}
