//! Deferred execution calls.
//!
//! Each `@defer` group in a selection set becomes one [`DeferredCall`]: a
//! bundle of memoized field suppliers that, when driven, produces exactly one
//! [`IncrementalPayload`]. Suppliers are shared futures, so a field selected
//! by several groups is fetched once and its value reused by every call.

use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use query_path::QueryPath;
use serde_json::Value;

use crate::{
    error::{NonNullFieldWasNull, ServerError},
    memo::SharedFuture,
    response::IncrementalPayload,
};

/// The outcome of one deferred field supplier: the completed value, or the
/// non-null bubble that discarded it.
pub type SupplierOutcome = Result<Value, NonNullFieldWasNull>;

pub type SharedSupplier = SharedFuture<SupplierOutcome>;

/// Execution state shared by every field of one deferred group.
///
/// Errors raised while resolving a deferred field land here instead of in
/// the main response, so they travel with the group's payload.
#[derive(Debug)]
pub struct DeferredCallContext {
    /// The level at which the group's fields execute, one below the
    /// selection set carrying the `@defer`.
    pub start_level: usize,
    /// How many deferred fields the execution declared overall. Coordinator
    /// policies use this to size their expectations.
    pub declared_field_count: usize,
    errors: Mutex<Vec<ServerError>>,
}

impl DeferredCallContext {
    pub fn new(start_level: usize, declared_field_count: usize) -> Self {
        Self {
            start_level,
            declared_field_count,
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn add_error(&self, error: ServerError) {
        self.errors.lock().expect("deferred error list poisoned").push(error);
    }

    pub fn take_errors(&self) -> Vec<ServerError> {
        std::mem::take(&mut *self.errors.lock().expect("deferred error list poisoned"))
    }
}

/// One deferred group, ready to be driven to a payload.
pub struct DeferredCall {
    pub label: Option<String>,
    /// Where the payload's data merges into the response.
    pub path: QueryPath,
    /// Response key and supplier for each field of the group, in selection
    /// order.
    pub suppliers: Vec<(String, SharedSupplier)>,
    /// Suppliers first built for this call rather than shared from an
    /// earlier group. The stream driver announces this count to the
    /// dispatch coordinator before the call is driven.
    pub pending_field_count: usize,
    pub context: Arc<DeferredCallContext>,
}

impl DeferredCall {
    /// Drives every supplier and assembles the group's payload.
    ///
    /// A non-null bubble from any supplier nulls the whole group: `data`
    /// becomes `None` while the errors recorded up to that point are kept.
    /// `has_next` is a placeholder; the stream driver owns it.
    pub async fn execute(self) -> IncrementalPayload {
        let keys: Vec<String> = self.suppliers.iter().map(|(key, _)| key.clone()).collect();
        let outcomes = join_all(self.suppliers.into_iter().map(|(_, supplier)| supplier)).await;

        let mut data = serde_json::Map::new();
        let mut failed = false;
        for (key, outcome) in keys.into_iter().zip(outcomes) {
            match outcome {
                Ok(value) => {
                    data.insert(key, value);
                }
                Err(bubble) => {
                    tracing::debug!(path = %bubble.path, "deferred group nulled by non-null field");
                    failed = true;
                }
            }
        }

        IncrementalPayload {
            label: self.label,
            path: self.path,
            data: (!failed).then_some(Value::Object(data)),
            errors: self.context.take_errors(),
            has_next: true,
        }
    }
}
