//! Non-null enforcement and error bubbling.
//!
//! When a non-null field ends up null, the violation is recorded exactly
//! once, at the field where it originated, and a [`NonNullFieldWasNull`]
//! signal travels upward. Ancestors either absorb it (the first nullable
//! one becomes `null`) or pass it on; none of them records another error.

use std::sync::Mutex;

use query_path::QueryPath;
use serde_json::Value;

use crate::{
    deferred::DeferredCallContext,
    error::{NonNullFieldWasNull, ServerError},
    registry::FieldType,
};

/// The main response's error list.
///
/// Non-null violations are deduplicated by path: several selections can
/// complete the same position concurrently, and the response should carry
/// the violation once.
#[derive(Debug, Default)]
pub struct MainErrors {
    inner: Mutex<Vec<ServerError>>,
}

impl MainErrors {
    pub fn push(&self, error: ServerError) {
        self.inner.lock().expect("error list poisoned").push(error);
    }

    pub fn push_once_per_path(&self, error: ServerError) {
        let mut inner = self.inner.lock().expect("error list poisoned");
        if !inner.iter().any(|existing| existing.path == error.path) {
            inner.push(error);
        }
    }

    pub fn take(&self) -> Vec<ServerError> {
        std::mem::take(&mut *self.inner.lock().expect("error list poisoned"))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("error list poisoned").is_empty()
    }
}

/// Where a violation should be reported: the main response, or the deferred
/// group whose supplier hit it.
#[derive(Clone, Copy)]
pub enum ErrorScope<'a> {
    Main(&'a MainErrors),
    Deferred(&'a DeferredCallContext),
}

impl ErrorScope<'_> {
    pub fn record(&self, error: ServerError) {
        match self {
            ErrorScope::Main(errors) => errors.push(error),
            ErrorScope::Deferred(context) => context.add_error(error),
        }
    }

    fn record_violation(&self, error: ServerError) {
        match self {
            ErrorScope::Main(errors) => errors.push_once_per_path(error),
            // Deferred lists are per-group and short-lived; no dedup needed.
            ErrorScope::Deferred(context) => context.add_error(error),
        }
    }
}

/// Checks completed nulls against declared types.
#[derive(Debug, Clone, Copy)]
pub struct NonNullValidator {
    /// Whether violations raise a bubbling signal. When off, the violation
    /// is still recorded but the null stays in place.
    propagate: bool,
}

impl Default for NonNullValidator {
    fn default() -> Self {
        Self { propagate: true }
    }
}

impl NonNullValidator {
    pub fn new(propagate: bool) -> Self {
        Self { propagate }
    }

    /// Accepts or rejects a null completed at `path` for a field (or list
    /// position) declared as `ty`.
    pub fn complete_null(
        &self,
        scope: ErrorScope<'_>,
        ty: &FieldType,
        path: &QueryPath,
    ) -> Result<Value, NonNullFieldWasNull> {
        if !ty.is_non_null() {
            return Ok(Value::Null);
        }

        scope.record_violation(ServerError::new(
            format!("expected a non-null value of type `{ty}`, found null"),
            path.clone(),
        ));
        if self.propagate {
            Err(NonNullFieldWasNull {
                path: path.clone(),
                type_name: ty.to_string(),
            })
        } else {
            Ok(Value::Null)
        }
    }

    /// Handles a bubble arriving from below at a position declared as `ty`:
    /// a nullable position absorbs it, a non-null one passes it on. Either
    /// way no new error is recorded.
    pub fn absorb_or_propagate(
        &self,
        ty: &FieldType,
        bubble: NonNullFieldWasNull,
    ) -> Result<Value, NonNullFieldWasNull> {
        if ty.is_non_null() {
            Err(bubble)
        } else {
            Ok(Value::Null)
        }
    }
}
