//! A GraphQL execution core with incremental delivery and coordinated
//! batch fetching.
//!
//! The engine executes merged selection sets against a [`Registry`] of
//! resolvers. Fields under `@defer` fragments are carved out by the
//! planner, executed as [`DeferredCall`]s, and delivered as incremental
//! payloads after the initial response. Resolvers backed by a
//! [`BatchLoader`] enqueue keys instead of fetching eagerly; a pluggable
//! [`BatchDispatchCoordinator`] decides when the accumulated batches go
//! out.

pub mod deferred;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod loader;
pub mod memo;
pub mod planner;
pub mod registry;
pub mod resolver;
pub mod response;
pub mod selection;
pub mod validator;

pub use deferred::{DeferredCall, DeferredCallContext};
pub use dispatch::{
    BatchDispatchCoordinator, ChainedDispatchCoordinator, DispatchDecision,
    LevelDispatchCoordinator, NoopCoordinator,
};
pub use error::{CoordinatorError, Error, NonNullFieldWasNull, ServerError};
pub use executor::{Engine, EngineBuilder};
pub use loader::{BatchLoadFn, BatchLoader, DispatchRegistry, Dispatchable};
pub use query_path::{QueryPath, QueryPathSegment};
pub use registry::{FieldType, MetaField, MetaType, Registry};
pub use resolver::{ConstResolver, FieldResolver, ResolvedValue, ResolverContext};
pub use response::{IncrementalPayload, InitialResponse, Response, StreamingPayload};
pub use selection::{DeferredGroupId, FieldOccurrence, MergedField, MergedSelectionSet};
