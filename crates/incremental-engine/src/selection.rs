//! Merged selection sets.
//!
//! The engine consumes selections after field merging: every occurrence of a
//! response key in the query has been folded into one [`MergedField`], which
//! remembers each occurrence and whether it sat under a `@defer` fragment.

use std::{collections::BTreeSet, sync::Arc};

use serde_json::Value;

/// Identifies one `@defer` application. Equality defines grouping: fields
/// sharing a group id end up in the same incremental payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DeferredGroupId {
    pub label: Option<String>,
}

impl DeferredGroupId {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }

    pub fn unlabeled() -> Self {
        Self::default()
    }
}

/// One lexical occurrence of a field in the query.
#[derive(Debug, Clone, Default)]
pub struct FieldOccurrence {
    /// The deferred group this occurrence sat under, if any.
    pub deferred_group: Option<DeferredGroupId>,
}

impl FieldOccurrence {
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn deferred(group: DeferredGroupId) -> Self {
        Self {
            deferred_group: Some(group),
        }
    }
}

/// The union of all selection occurrences sharing one response key.
#[derive(Debug)]
pub struct MergedField {
    /// The key this field's value is attached under in the response.
    pub response_key: String,
    /// The field name in the schema.
    pub name: String,
    /// Object type names this field applies to. Empty means unconditional.
    pub applicable_types: BTreeSet<String>,
    pub occurrences: Vec<FieldOccurrence>,
    pub arguments: Vec<(String, Value)>,
    pub selection_set: Arc<MergedSelectionSet>,
}

impl MergedField {
    /// A field selected once, outside any deferred fragment.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            response_key: name.clone(),
            name,
            applicable_types: BTreeSet::new(),
            occurrences: vec![FieldOccurrence::immediate()],
            arguments: Vec::new(),
            selection_set: Arc::new(MergedSelectionSet::empty()),
        }
    }

    /// A field selected once under the given deferred group.
    pub fn deferred(name: impl Into<String>, group: DeferredGroupId) -> Self {
        let mut field = Self::new(name);
        field.occurrences = vec![FieldOccurrence::deferred(group)];
        field
    }

    #[must_use]
    pub fn aliased(mut self, response_key: impl Into<String>) -> Self {
        self.response_key = response_key.into();
        self
    }

    /// Records an additional occurrence of this field.
    #[must_use]
    pub fn occurrence(mut self, occurrence: FieldOccurrence) -> Self {
        self.occurrences.push(occurrence);
        self
    }

    #[must_use]
    pub fn argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.push((name.into(), value));
        self
    }

    #[must_use]
    pub fn selection(mut self, selection_set: MergedSelectionSet) -> Self {
        self.selection_set = Arc::new(selection_set);
        self
    }

    #[must_use]
    pub fn applies_only_to(mut self, type_names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.applicable_types = type_names.into_iter().map(Into::into).collect();
        self
    }

    pub fn applies_to(&self, type_name: &str) -> bool {
        self.applicable_types.is_empty() || self.applicable_types.contains(type_name)
    }

    /// The deferred groups attached to this field's occurrences.
    pub fn deferred_groups(&self) -> impl Iterator<Item = &DeferredGroupId> {
        self.occurrences
            .iter()
            .filter_map(|occurrence| occurrence.deferred_group.as_ref())
    }

    /// Whether every occurrence of this field is deferred. Any non-deferred
    /// occurrence makes the whole merged field immediate.
    pub fn is_fully_deferred(&self) -> bool {
        let deferred = self.deferred_groups().count();
        !self.occurrences.is_empty() && self.occurrences.len() == deferred
    }
}

/// An ordered set of merged fields, keyed by response key.
#[derive(Debug, Default)]
pub struct MergedSelectionSet {
    pub fields: Vec<Arc<MergedField>>,
}

impl MergedSelectionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(fields: impl IntoIterator<Item = MergedField>) -> Self {
        Self {
            fields: fields.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<MergedField>> {
        self.fields.iter()
    }
}
