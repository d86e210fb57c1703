//! The minimal type registry the executor resolves against.
//!
//! Schema parsing and validation happen upstream; this module is only the
//! shape in which declared type information and resolvers reach the engine.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;

use crate::resolver::FieldResolver;

/// A declared output type, with non-null and list wrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Named {
        name: String,
        non_null: bool,
    },
    List {
        item: Box<FieldType>,
        non_null: bool,
    },
}

impl FieldType {
    /// A nullable named type.
    pub fn named(name: impl Into<String>) -> Self {
        FieldType::Named {
            name: name.into(),
            non_null: false,
        }
    }

    /// A nullable list of `item`.
    pub fn list(item: FieldType) -> Self {
        FieldType::List {
            item: Box::new(item),
            non_null: false,
        }
    }

    /// Marks the outermost wrapping of this type non-null.
    #[must_use]
    pub fn non_null(self) -> Self {
        match self {
            FieldType::Named { name, .. } => FieldType::Named { name, non_null: true },
            FieldType::List { item, .. } => FieldType::List { item, non_null: true },
        }
    }

    pub fn is_non_null(&self) -> bool {
        match self {
            FieldType::Named { non_null, .. } | FieldType::List { non_null, .. } => *non_null,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FieldType::List { .. })
    }

    /// The innermost named type.
    pub fn named_type(&self) -> &str {
        match self {
            FieldType::Named { name, .. } => name,
            FieldType::List { item, .. } => item.named_type(),
        }
    }

    /// The item type of a list, if this is one.
    pub fn item_type(&self) -> Option<&FieldType> {
        match self {
            FieldType::List { item, .. } => Some(item),
            FieldType::Named { .. } => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Named { name, non_null } => {
                write!(f, "{name}{}", if *non_null { "!" } else { "" })
            }
            FieldType::List { item, non_null } => {
                write!(f, "[{item}]{}", if *non_null { "!" } else { "" })
            }
        }
    }
}

/// One field of an object type.
pub struct MetaField {
    pub name: String,
    pub ty: FieldType,
    /// The resolver for this field. When absent, the field resolves by
    /// looking its name up on the parent value.
    pub resolver: Option<Arc<dyn FieldResolver>>,
}

impl MetaField {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            resolver: None,
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn FieldResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }
}

impl fmt::Debug for MetaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaField")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

/// An object type.
#[derive(Debug)]
pub struct MetaType {
    pub name: String,
    pub fields: IndexMap<String, MetaField>,
}

impl MetaType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, field: MetaField) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn field_by_name(&self, name: &str) -> Option<&MetaField> {
        self.fields.get(name)
    }
}

/// The set of types execution resolves against.
#[derive(Debug)]
pub struct Registry {
    pub types: IndexMap<String, MetaType>,
    pub query_type: String,
}

impl Registry {
    pub fn new(query_type: impl Into<String>) -> Self {
        Self {
            types: IndexMap::new(),
            query_type: query_type.into(),
        }
    }

    #[must_use]
    pub fn register(mut self, ty: MetaType) -> Self {
        self.types.insert(ty.name.clone(), ty);
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&MetaType> {
        self.types.get(name)
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&MetaField> {
        self.lookup(type_name)?.field_by_name(field_name)
    }
}
