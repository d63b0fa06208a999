//! Building specifications from runtime values.

use super::{Action, ContextFn};
use crate::context::ProcessContext;
use crate::error::ProcessError;
use fractal_core::specification::Specification;
use std::sync::Arc;

/// Builds a [`Specification`] from the context and stores it by name.
///
/// Later actions refer to it by that name instead of carrying their own.
///
/// # Examples
///
/// ```
/// use fractal_core::specification::Specification;
/// use fractal_runtime::actions::SpecificationFactoryAction;
/// use fractal_runtime::{Action, ProcessContext};
/// use serde_json::json;
///
/// let mut context = ProcessContext::from_pairs([("account", json!("acme"))]).unwrap();
/// SpecificationFactoryAction::new("specs.by_account", |ctx| {
///     Specification::account_id(ctx.get_or("account", json!(null)))
/// })
/// .execute(&mut context)
/// .unwrap();
///
/// let spec = context.specification("specs.by_account").unwrap();
/// assert_eq!(spec.to_string(), "account_id == \"acme\"");
/// ```
pub struct SpecificationFactoryAction {
    key: String,
    factory: ContextFn<Specification>,
}

impl SpecificationFactoryAction {
    /// Store the result of `factory` under `key`.
    #[must_use]
    pub fn new<F>(key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ProcessContext) -> Specification + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            factory: Arc::new(factory),
        }
    }
}

impl Action for SpecificationFactoryAction {
    fn execute(&self, context: &mut ProcessContext) -> Result<(), ProcessError> {
        let specification = (self.factory)(context);
        context.set_specification(&self.key, specification)?;
        Ok(())
    }
}
