//! Selection planning: immediate versus deferred.
//!
//! A merged field executes immediately unless every one of its occurrences
//! sits under a `@defer` fragment. Fully deferred fields are grouped by
//! defer application; a field shared by several groups appears in each, but
//! its value is produced by one memoized supplier.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    deferred::{SharedSupplier, SupplierOutcome},
    memo::ComputeOnceCache,
    selection::{DeferredGroupId, MergedField, MergedSelectionSet},
};

/// The fields of `selection_set` applicable to an object of `type_name`.
pub fn applicable_fields(
    selection_set: &MergedSelectionSet,
    type_name: &str,
) -> Vec<Arc<MergedField>> {
    selection_set
        .iter()
        .filter(|field| field.applies_to(type_name))
        .cloned()
        .collect()
}

/// One selection set partitioned for one concrete object type.
#[derive(Debug, Default)]
pub struct ClassifiedSelection {
    /// Fields with at least one non-deferred occurrence, in selection order.
    pub immediate: Vec<Arc<MergedField>>,
    /// Fully deferred fields, by group, in selection order within each.
    pub groups: IndexMap<DeferredGroupId, Vec<Arc<MergedField>>>,
    /// Distinct fully deferred fields. A field in two groups counts once,
    /// matching the one supplier that serves both.
    pub deferred_field_count: usize,
}

impl ClassifiedSelection {
    pub fn has_deferred_fields(&self) -> bool {
        self.deferred_field_count > 0
    }
}

/// Partitions `selection_set` as seen by an object of `type_name`.
pub fn classify(selection_set: &MergedSelectionSet, type_name: &str) -> ClassifiedSelection {
    let mut classified = ClassifiedSelection::default();
    for field in selection_set.iter() {
        if !field.applies_to(type_name) {
            continue;
        }
        if !field.is_fully_deferred() {
            classified.immediate.push(Arc::clone(field));
            continue;
        }
        classified.deferred_field_count += 1;
        let mut seen: Vec<&DeferredGroupId> = Vec::new();
        for group in field.deferred_groups() {
            if seen.contains(&group) {
                continue;
            }
            seen.push(group);
            classified
                .groups
                .entry(group.clone())
                .or_default()
                .push(Arc::clone(field));
        }
    }
    classified
}

/// Per-selection-set deferred machinery, threaded through the executor.
#[derive(Clone)]
pub enum DeferredExecutionSupport {
    /// `@defer` is ignored; every field executes immediately. Used by the
    /// non-streaming entry point.
    Disabled,
    Enabled {
        classified: Arc<ClassifiedSelection>,
        /// Memoized suppliers keyed by response key, so groups sharing a
        /// field share its fetch.
        suppliers: Arc<ComputeOnceCache<String, SupplierOutcome>>,
    },
}

impl DeferredExecutionSupport {
    pub fn enabled(classified: Arc<ClassifiedSelection>) -> Self {
        Self::Enabled {
            classified,
            suppliers: Arc::new(ComputeOnceCache::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    /// The fields the current execution resolves right away.
    pub fn immediate_fields(
        &self,
        selection_set: &MergedSelectionSet,
        type_name: &str,
    ) -> Vec<Arc<MergedField>> {
        match self {
            Self::Disabled => applicable_fields(selection_set, type_name),
            Self::Enabled { classified, .. } => classified.immediate.clone(),
        }
    }

    /// The memoized supplier for a deferred field, installing `build`'s
    /// future on first request.
    pub fn supplier<F>(&self, response_key: &str, build: F) -> SharedSupplier
    where
        F: FnOnce() -> futures_util::future::BoxFuture<'static, SupplierOutcome>,
    {
        match self {
            Self::Disabled => unreachable!("suppliers are only built when deferral is enabled"),
            Self::Enabled { suppliers, .. } => {
                suppliers.get_or_compute(response_key.to_owned(), build)
            }
        }
    }
}
