//! Field resolvers and the two-phase fetch/complete contract.
//!
//! Resolving a field is split in two: the fetch phase returns either a value
//! that is already available or a pending future, and only after every fetch
//! of a level has started does the executor await the pending ones. Resolvers
//! backed by a [`BatchLoader`](crate::loader::BatchLoader) rely on this: they
//! enqueue their key and return [`ResolvedValue::Pending`] immediately, so
//! the whole level's keys are enqueued before any dispatch fires.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use query_path::QueryPath;
use serde_json::Value;

use crate::{
    error::Error,
    selection::MergedField,
};

/// Everything a resolver sees about the field being resolved.
pub struct ResolverContext<'a> {
    /// The value the parent selection set resolved to.
    pub parent_value: &'a Value,
    /// Coerced arguments, in declaration order.
    pub arguments: &'a [(String, Value)],
    /// The response path of the field being resolved.
    pub path: &'a QueryPath,
}

impl ResolverContext<'_> {
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments
            .iter()
            .find(|(arg, _)| arg == name)
            .map(|(_, value)| value)
    }
}

/// The outcome of the fetch phase of a field.
pub enum ResolvedValue {
    /// The value is available now.
    Ready(Value),
    /// The fetch has started; the value arrives when this future resolves.
    /// Typically a batch loader waiter.
    Pending(BoxFuture<'static, Result<Value, Error>>),
}

impl ResolvedValue {
    pub async fn into_value(self) -> Result<Value, Error> {
        match self {
            ResolvedValue::Ready(value) => Ok(value),
            ResolvedValue::Pending(future) => future.await,
        }
    }
}

impl From<Value> for ResolvedValue {
    fn from(value: Value) -> Self {
        ResolvedValue::Ready(value)
    }
}

/// Produces the raw value of one field.
#[async_trait]
pub trait FieldResolver: Send + Sync + 'static {
    async fn resolve(&self, ctx: ResolverContext<'_>) -> Result<ResolvedValue, Error>;
}

/// Wraps a plain async closure as a resolver.
pub struct ResolverFn<F>(pub F);

#[async_trait]
impl<F> FieldResolver for ResolverFn<F>
where
    F: for<'a> Fn(ResolverContext<'a>) -> BoxFuture<'a, Result<ResolvedValue, Error>>
        + Send
        + Sync
        + 'static,
{
    async fn resolve(&self, ctx: ResolverContext<'_>) -> Result<ResolvedValue, Error> {
        (self.0)(ctx).await
    }
}

/// Resolves to a fixed value, ignoring the parent and arguments.
pub struct ConstResolver(pub Value);

#[async_trait]
impl FieldResolver for ConstResolver {
    async fn resolve(&self, _ctx: ResolverContext<'_>) -> Result<ResolvedValue, Error> {
        Ok(ResolvedValue::Ready(self.0.clone()))
    }
}

/// What shape a field's raw value turned out to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValueKind {
    /// A scalar, an enum, or null.
    Value,
    /// A single object, implying one child selection-set execution.
    Object,
    /// A list; child executions depend on how many items are objects.
    List,
}

/// A per-field account of what a level's fetches produced, reported to the
/// dispatch coordinator so it can size its expectations for the next level.
#[derive(Debug, Clone)]
pub struct FieldValueSummary {
    pub response_key: String,
    pub kind: FieldValueKind,
    /// Child selection-set executions this value gives rise to.
    pub child_executions: usize,
    /// Total fields those child executions will fetch.
    pub child_field_count: usize,
}

impl FieldValueSummary {
    /// Accounts for `value` as the raw result of `field`. `recurses` says
    /// whether completion will execute the field's selection set against
    /// the object values inside; a field without a sub-selection, or whose
    /// declared type is not in the registry, yields its objects verbatim
    /// and spawns no child executions.
    pub fn of(field: &MergedField, value: &Value, recurses: bool) -> Self {
        let kind = match value {
            Value::Object(_) => FieldValueKind::Object,
            Value::Array(_) => FieldValueKind::List,
            _ => FieldValueKind::Value,
        };
        let child_executions = if recurses {
            count_object_values(value)
        } else {
            0
        };
        Self {
            response_key: field.response_key.clone(),
            kind,
            child_executions,
            child_field_count: child_executions * field.selection_set.len(),
        }
    }
}

/// Counts the object values inside `value`, descending through lists. Each
/// one will have the field's child selection set executed against it.
fn count_object_values(value: &Value) -> usize {
    match value {
        Value::Object(_) => 1,
        Value::Array(items) => items.iter().map(count_object_values).sum(),
        _ => 0,
    }
}
