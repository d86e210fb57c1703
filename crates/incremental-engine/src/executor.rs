//! The execution engine.
//!
//! Selection sets execute in three phases. Fetch starts every field's
//! resolver and reports each start to the dispatch coordinator; value
//! collection awaits the raw results, which for loader-backed resolvers
//! blocks until a coordinator decision flushes the batches; completion
//! checks values against declared types and recurses into child selection
//! sets. Splitting fetch from value collection is what lets a whole level's
//! keys reach the loaders before any batch goes out.

use std::sync::Arc;

use futures_channel::mpsc::{self, UnboundedSender};
use futures_util::{
    future::{join_all, BoxFuture},
    stream::{BoxStream, FuturesUnordered},
    FutureExt, StreamExt,
};
use query_path::QueryPath;
use serde_json::Value;

use crate::{
    deferred::{DeferredCall, DeferredCallContext, SupplierOutcome},
    dispatch::{BatchDispatchCoordinator, DispatchDecision, HookResult, NoopCoordinator},
    error::{NonNullFieldWasNull, ServerError},
    loader::{Dispatchable, DispatchRegistry},
    memo::BestEffortCache,
    planner::{classify, ClassifiedSelection, DeferredExecutionSupport},
    registry::{FieldType, Registry},
    resolver::{FieldValueSummary, ResolvedValue, ResolverContext},
    response::{Response, StreamingPayload},
    selection::{MergedField, MergedSelectionSet},
    validator::{ErrorScope, MainErrors, NonNullValidator},
};

/// Everything shared by one execution: error lists, the coordinator, the
/// loaders, and the per-execution plan cache.
pub(crate) struct ExecutionEnv {
    registry: Arc<Registry>,
    errors: MainErrors,
    coordinator: Arc<dyn BatchDispatchCoordinator>,
    dispatch_registry: DispatchRegistry,
    validator: NonNullValidator,
    /// Classification results keyed by selection-set identity and concrete
    /// type, so a selection set reached through many list items is
    /// partitioned once.
    plan_cache: BestEffortCache<(usize, String), Arc<ClassifiedSelection>>,
    deferred_sender: Option<UnboundedSender<DeferredCall>>,
}

impl ExecutionEnv {
    /// Applies a coordinator decision. Hook failures are logged and
    /// swallowed; they must never surface as field errors.
    async fn act(&self, result: HookResult) {
        match result {
            Ok(DispatchDecision::Continue) => {}
            Ok(DispatchDecision::FlushPending) => self.dispatch_registry.flush_all().await,
            Err(error) => tracing::warn!(%error, "dispatch coordinator hook failed"),
        }
    }
}

fn error_scope<'a>(
    env: &'a ExecutionEnv,
    deferred_ctx: Option<&'a Arc<DeferredCallContext>>,
) -> ErrorScope<'a> {
    match deferred_ctx {
        Some(context) => ErrorScope::Deferred(context),
        None => ErrorScope::Main(&env.errors),
    }
}

fn field_type_of(env: &ExecutionEnv, type_name: &str, field: &MergedField) -> FieldType {
    env.registry
        .field(type_name, &field.name)
        .map(|meta| meta.ty.clone())
        .unwrap_or_else(|| FieldType::named("Unknown"))
}

/// Starts the fetch of one field. Resolver failures become a recorded error
/// and a null value; they never abort execution.
async fn fetch_field(
    env: &ExecutionEnv,
    field: &MergedField,
    type_name: &str,
    parent_value: &Value,
    field_path: &QueryPath,
    deferred_ctx: Option<&Arc<DeferredCallContext>>,
) -> ResolvedValue {
    if field.name == "__typename" {
        return ResolvedValue::Ready(Value::String(type_name.to_owned()));
    }

    let Some(meta) = env.registry.field(type_name, &field.name) else {
        error_scope(env, deferred_ctx).record(ServerError::new(
            format!("unknown field `{}` on type `{type_name}`", field.name),
            field_path.clone(),
        ));
        return ResolvedValue::Ready(Value::Null);
    };

    match &meta.resolver {
        Some(resolver) => {
            let ctx = ResolverContext {
                parent_value,
                arguments: &field.arguments,
                path: field_path,
            };
            match resolver.resolve(ctx).await {
                Ok(resolved) => resolved,
                Err(error) => {
                    error_scope(env, deferred_ctx)
                        .record(error.into_server_error(field_path.clone()));
                    ResolvedValue::Ready(Value::Null)
                }
            }
        }
        // No resolver: the field is a property of the parent value.
        None => ResolvedValue::Ready(
            parent_value
                .get(&field.name)
                .cloned()
                .unwrap_or(Value::Null),
        ),
    }
}

/// Executes one selection set against one object value. `level` is the
/// 1-based depth at which this set's fields fetch. Returns the assembled
/// object, or the bubble of an unabsorbed non-null violation.
pub(crate) fn execute_selection_set<'a>(
    env: &'a Arc<ExecutionEnv>,
    selection_set: &'a Arc<MergedSelectionSet>,
    type_name: &'a str,
    parent_value: &'a Value,
    path: QueryPath,
    level: usize,
    deferred_ctx: Option<Arc<DeferredCallContext>>,
) -> BoxFuture<'a, Result<Value, NonNullFieldWasNull>> {
    async move {
        let support = match &env.deferred_sender {
            Some(_) => {
                let key = (Arc::as_ptr(selection_set) as usize, type_name.to_owned());
                let classified = env
                    .plan_cache
                    .get_or_insert_with(key, || Arc::new(classify(selection_set, type_name)));
                DeferredExecutionSupport::enabled(classified)
            }
            None => DeferredExecutionSupport::Disabled,
        };

        if let DeferredExecutionSupport::Enabled { classified, .. } = &support {
            if classified.has_deferred_fields() {
                let sender = env
                    .deferred_sender
                    .as_ref()
                    .expect("enabled support implies a sender");
                for call in
                    create_deferred_calls(env, &support, classified, type_name, parent_value, &path, level)
                {
                    if sender.unbounded_send(call).is_err() {
                        tracing::warn!("deferred call receiver dropped; discarding deferred work");
                    }
                }
            }
        }

        let fields = support.immediate_fields(selection_set, type_name);
        if deferred_ctx.is_none() {
            env.act(env.coordinator.execution_started(level, fields.len())).await;
        } else {
            // Deferred subtrees sit outside the level schedule; announce
            // their fetches so a policy can wait for all of them.
            env.act(env.coordinator.deferred_execution_started(fields.len())).await;
        }

        // Fetch phase: every field starts before any pending value is
        // awaited.
        let deferred_ctx_ref = deferred_ctx.as_ref();
        let fetches = fields.iter().map(|field| {
            let field_path = path.child(field.response_key.clone());
            async move {
                let in_deferred_subtree = deferred_ctx_ref.is_some();
                if in_deferred_subtree {
                    env.act(env.coordinator.deferred_field_started(&field.response_key)).await;
                }
                let resolved =
                    fetch_field(env, field, type_name, parent_value, &field_path, deferred_ctx_ref)
                        .await;
                if in_deferred_subtree {
                    env.act(env.coordinator.deferred_field_fetched(&field.response_key)).await;
                } else {
                    env.act(env.coordinator.field_fetched(level, &field.response_key)).await;
                }
                (field_path, resolved)
            }
        });
        let fetched = join_all(fetches).await;

        // Value collection phase.
        let values = join_all(fetched.into_iter().map(|(field_path, resolved)| async move {
            let value = match resolved.into_value().await {
                Ok(value) => value,
                Err(error) => {
                    error_scope(env, deferred_ctx_ref)
                        .record(error.into_server_error(field_path.clone()));
                    Value::Null
                }
            };
            (field_path, value)
        }))
        .await;

        if deferred_ctx.is_none() {
            let summaries: Vec<FieldValueSummary> = fields
                .iter()
                .zip(&values)
                .map(|(field, (_, value))| {
                    // Completion only recurses into registered types with a
                    // sub-selection; anything else is an opaque value and
                    // must not count toward the next level.
                    let ty = field_type_of(env, type_name, field);
                    let recurses = !field.selection_set.is_empty()
                        && env.registry.lookup(ty.named_type()).is_some();
                    FieldValueSummary::of(field, value, recurses)
                })
                .collect();
            env.act(env.coordinator.level_values_ready(level, &summaries)).await;
        }

        // Completion phase.
        let completions = fields.iter().zip(values).map(|(field, (field_path, value))| {
            let ty = field_type_of(env, type_name, field);
            let deferred_ctx = deferred_ctx.clone();
            async move {
                let result =
                    complete_value(env, Arc::clone(field), ty, field_path, level, value, deferred_ctx)
                        .await;
                (field.response_key.clone(), result)
            }
        });

        let mut data = serde_json::Map::new();
        let mut bubble = None;
        for (response_key, result) in join_all(completions).await {
            match result {
                Ok(value) => {
                    data.insert(response_key, value);
                }
                Err(violation) => {
                    bubble.get_or_insert(violation);
                }
            }
        }

        if let Some(violation) = bubble {
            if deferred_ctx.is_none() {
                env.act(env.coordinator.level_errored(level)).await;
            }
            return Err(violation);
        }
        Ok(Value::Object(data))
    }
    .boxed()
}

/// Checks a raw value against its declared type and descends into lists and
/// child selection sets.
fn complete_value<'a>(
    env: &'a Arc<ExecutionEnv>,
    field: Arc<MergedField>,
    ty: FieldType,
    path: QueryPath,
    level: usize,
    value: Value,
    deferred_ctx: Option<Arc<DeferredCallContext>>,
) -> BoxFuture<'a, Result<Value, NonNullFieldWasNull>> {
    async move {
        let deferred_ctx_ref = deferred_ctx.as_ref();
        if value.is_null() {
            return env
                .validator
                .complete_null(error_scope(env, deferred_ctx_ref), &ty, &path);
        }

        if let Some(item_ty) = ty.item_type() {
            let Value::Array(items) = value else {
                error_scope(env, deferred_ctx_ref).record(ServerError::new(
                    format!("expected a list value for type `{ty}`"),
                    path.clone(),
                ));
                return env
                    .validator
                    .complete_null(error_scope(env, deferred_ctx_ref), &ty, &path);
            };
            let completions = items.into_iter().enumerate().map(|(index, item)| {
                complete_value(
                    env,
                    Arc::clone(&field),
                    item_ty.clone(),
                    path.child(index),
                    level,
                    item,
                    deferred_ctx.clone(),
                )
            });
            let mut completed = Vec::new();
            for result in join_all(completions).await {
                match result {
                    Ok(item) => completed.push(item),
                    Err(violation) => {
                        // A nulled non-null item nulls the list itself.
                        return env.validator.absorb_or_propagate(&ty, violation);
                    }
                }
            }
            return Ok(Value::Array(completed));
        }

        let declared = ty.named_type();
        if env.registry.lookup(declared).is_some()
            && value.is_object()
            && !field.selection_set.is_empty()
        {
            let concrete = value
                .get("__typename")
                .and_then(Value::as_str)
                .unwrap_or(declared)
                .to_owned();
            let result = execute_selection_set(
                env,
                &field.selection_set,
                &concrete,
                &value,
                path.clone(),
                level + 1,
                deferred_ctx.clone(),
            )
            .await;
            return match result {
                Ok(object) => Ok(object),
                Err(violation) => env.validator.absorb_or_propagate(&ty, violation),
            };
        }

        Ok(value)
    }
    .boxed()
}

/// Turns each deferred group of one classified selection set into a call.
/// Suppliers are memoized by response key, so a field shared between groups
/// fetches once; its errors land in the context of the group that built the
/// supplier first, and only that group announces it to the coordinator.
fn create_deferred_calls(
    env: &Arc<ExecutionEnv>,
    support: &DeferredExecutionSupport,
    classified: &ClassifiedSelection,
    type_name: &str,
    parent_value: &Value,
    object_path: &QueryPath,
    level: usize,
) -> Vec<DeferredCall> {
    let mut calls = Vec::new();
    let mut built_keys: Vec<&str> = Vec::new();
    for (group, fields) in &classified.groups {
        let context = Arc::new(DeferredCallContext::new(
            level,
            classified.deferred_field_count,
        ));
        let mut suppliers = Vec::with_capacity(fields.len());
        let mut pending_field_count = 0;
        for field in fields {
            if !built_keys.contains(&field.response_key.as_str()) {
                built_keys.push(field.response_key.as_str());
                pending_field_count += 1;
            }
            let supplier = support.supplier(&field.response_key, || {
                deferred_supplier(
                    Arc::clone(env),
                    Arc::clone(field),
                    type_name.to_owned(),
                    parent_value.clone(),
                    object_path.clone(),
                    level,
                    Arc::clone(&context),
                )
            });
            suppliers.push((field.response_key.clone(), supplier));
        }
        calls.push(DeferredCall {
            label: group.label.clone(),
            path: object_path.clone(),
            suppliers,
            pending_field_count,
            context,
        });
    }
    calls
}

/// The body of one deferred field supplier: fetch, collect, complete, all
/// scoped to the group's context. Runs when the first call sharing it is
/// driven.
fn deferred_supplier(
    env: Arc<ExecutionEnv>,
    field: Arc<MergedField>,
    type_name: String,
    parent_value: Value,
    object_path: QueryPath,
    level: usize,
    context: Arc<DeferredCallContext>,
) -> BoxFuture<'static, SupplierOutcome> {
    async move {
        env.act(env.coordinator.deferred_field_started(&field.response_key)).await;
        let field_path = object_path.child(field.response_key.clone());
        let resolved =
            fetch_field(&env, &field, &type_name, &parent_value, &field_path, Some(&context)).await;
        env.act(env.coordinator.deferred_field_fetched(&field.response_key)).await;

        let value = match resolved.into_value().await {
            Ok(value) => value,
            Err(error) => {
                context.add_error(error.into_server_error(field_path.clone()));
                Value::Null
            }
        };

        let ty = field_type_of(&env, &type_name, &field);
        complete_value(
            &env,
            Arc::clone(&field),
            ty,
            field_path,
            level,
            value,
            Some(Arc::clone(&context)),
        )
        .await
    }
    .boxed()
}

/// An executable schema plus execution policy.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    coordinator_factory: Arc<dyn Fn() -> Arc<dyn BatchDispatchCoordinator> + Send + Sync>,
    dispatch_registry: DispatchRegistry,
    propagate_null_errors: bool,
}

impl Engine {
    pub fn builder(registry: Registry) -> EngineBuilder {
        EngineBuilder {
            registry,
            coordinator_factory: Arc::new(|| Arc::new(NoopCoordinator) as Arc<dyn BatchDispatchCoordinator>),
            dispatch_registry: DispatchRegistry::new(),
            propagate_null_errors: true,
        }
    }

    fn new_env(&self, deferred_sender: Option<UnboundedSender<DeferredCall>>) -> ExecutionEnv {
        ExecutionEnv {
            registry: Arc::clone(&self.registry),
            errors: MainErrors::default(),
            coordinator: (self.coordinator_factory)(),
            dispatch_registry: self.dispatch_registry.clone(),
            validator: NonNullValidator::new(self.propagate_null_errors),
            plan_cache: BestEffortCache::new(),
            deferred_sender,
        }
    }

    /// Executes a selection set to a single response. `@defer` is ignored:
    /// every field, deferred or not, lands in the response data.
    pub async fn execute(&self, selection_set: &Arc<MergedSelectionSet>) -> Response {
        let env = Arc::new(self.new_env(None));
        let query_type = env.registry.query_type.clone();
        tracing::debug!(root_type = %query_type, "executing");

        let result = execute_selection_set(
            &env,
            selection_set,
            &query_type,
            &Value::Null,
            QueryPath::empty(),
            1,
            None,
        )
        .await;

        Response::new(result.ok(), env.errors.take())
    }

    /// Executes a selection set incrementally: the initial response first,
    /// then one payload per deferred group as each finishes. Payloads are
    /// emitted in completion order; `hasNext` is `false` only on the last
    /// element of the stream.
    pub fn execute_stream(
        &self,
        selection_set: Arc<MergedSelectionSet>,
    ) -> BoxStream<'static, StreamingPayload> {
        let engine = self.clone();
        async_stream::stream! {
            let (sender, mut receiver) = mpsc::unbounded();
            let env = Arc::new(engine.new_env(Some(sender)));
            let query_type = env.registry.query_type.clone();
            tracing::debug!(root_type = %query_type, "executing incrementally");

            let result = execute_selection_set(
                &env,
                &selection_set,
                &query_type,
                &Value::Null,
                QueryPath::empty(),
                1,
                None,
            )
            .await;
            let response = Response::new(result.ok(), env.errors.take());

            // Every drained call announces its fetches before any is
            // driven, so one batching window spans the whole wave.
            let mut pending = FuturesUnordered::new();
            while let Ok(Some(call)) = receiver.try_next() {
                env.act(env.coordinator.deferred_execution_started(call.pending_field_count))
                    .await;
                pending.push(call.execute());
            }
            yield response.into_streaming_payload(!pending.is_empty());

            while let Some(mut payload) = pending.next().await {
                // Driving a payload can discover nested deferred groups.
                while let Ok(Some(call)) = receiver.try_next() {
                    env.act(env.coordinator.deferred_execution_started(call.pending_field_count))
                        .await;
                    pending.push(call.execute());
                }
                payload.has_next = !pending.is_empty();
                yield StreamingPayload::Incremental(payload);
            }
        }
        .boxed()
    }
}

pub struct EngineBuilder {
    registry: Registry,
    coordinator_factory: Arc<dyn Fn() -> Arc<dyn BatchDispatchCoordinator> + Send + Sync>,
    dispatch_registry: DispatchRegistry,
    propagate_null_errors: bool,
}

impl EngineBuilder {
    /// Installs a dispatch policy. The factory runs once per execution, so
    /// policies keep per-execution state without sharing it across requests.
    #[must_use]
    pub fn coordinator<C, F>(mut self, factory: F) -> Self
    where
        C: BatchDispatchCoordinator,
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.coordinator_factory =
            Arc::new(move || Arc::new(factory()) as Arc<dyn BatchDispatchCoordinator>);
        self
    }

    #[must_use]
    pub fn register_loader(mut self, loader: Arc<dyn Dispatchable>) -> Self {
        self.dispatch_registry.register(loader);
        self
    }

    /// Disables non-null error propagation: violations are still reported
    /// but the null stays in place instead of bubbling.
    #[must_use]
    pub fn keep_nulls_in_place(mut self) -> Self {
        self.propagate_null_errors = false;
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            registry: Arc::new(self.registry),
            coordinator_factory: self.coordinator_factory,
            dispatch_registry: self.dispatch_registry,
            propagate_null_errors: self.propagate_null_errors,
        }
    }
}
