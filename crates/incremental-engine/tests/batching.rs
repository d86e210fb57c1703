//! Batch loading under the dispatch policies.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use incremental_engine::{
    BatchLoader, ChainedDispatchCoordinator, ConstResolver, DeferredGroupId, Engine, Error,
    FieldResolver, FieldType, LevelDispatchCoordinator, MergedField, MergedSelectionSet,
    MetaField, MetaType, Registry, ResolvedValue, ResolverContext, StreamingPayload,
};
use serde_json::{json, Value};

fn users_loader() -> Arc<BatchLoader<u32, Value>> {
    Arc::new(BatchLoader::new("users", |keys: Vec<u32>| {
        async move {
            Ok(keys
                .into_iter()
                .map(|key| (key, json!({ "id": key })))
                .collect::<HashMap<_, _>>())
        }
        .boxed()
    }))
}

fn names_loader() -> Arc<BatchLoader<u32, Value>> {
    Arc::new(BatchLoader::new("names", |keys: Vec<u32>| {
        async move {
            Ok(keys
                .into_iter()
                .map(|key| (key, json!(format!("user-{key}"))))
                .collect::<HashMap<_, _>>())
        }
        .boxed()
    }))
}

/// Loads a fixed key from a loader.
struct LoadKey {
    loader: Arc<BatchLoader<u32, Value>>,
    key: u32,
}

#[async_trait]
impl FieldResolver for LoadKey {
    async fn resolve(&self, _ctx: ResolverContext<'_>) -> Result<ResolvedValue, Error> {
        Ok(ResolvedValue::Pending(self.loader.load(self.key)))
    }
}

/// Loads the parent object's `id` from a loader.
struct LoadParentId {
    loader: Arc<BatchLoader<u32, Value>>,
}

#[async_trait]
impl FieldResolver for LoadParentId {
    async fn resolve(&self, ctx: ResolverContext<'_>) -> Result<ResolvedValue, Error> {
        let id = ctx
            .parent_value
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::new("parent has no id"))? as u32;
        Ok(ResolvedValue::Pending(self.loader.load(id)))
    }
}

fn two_users_registry(
    users: &Arc<BatchLoader<u32, Value>>,
    names: &Arc<BatchLoader<u32, Value>>,
) -> Registry {
    Registry::new("Query")
        .register(
            MetaType::new("Query")
                .field(
                    MetaField::new("alice", FieldType::named("User")).with_resolver(Arc::new(
                        LoadKey {
                            loader: Arc::clone(users),
                            key: 1,
                        },
                    )),
                )
                .field(
                    MetaField::new("bob", FieldType::named("User")).with_resolver(Arc::new(
                        LoadKey {
                            loader: Arc::clone(users),
                            key: 2,
                        },
                    )),
                ),
        )
        .register(
            MetaType::new("User").field(
                MetaField::new("name", FieldType::named("String")).with_resolver(Arc::new(
                    LoadParentId {
                        loader: Arc::clone(names),
                    },
                )),
            ),
        )
}

fn two_users_selection() -> Arc<MergedSelectionSet> {
    let name = || MergedSelectionSet::new([MergedField::new("name")]);
    Arc::new(MergedSelectionSet::new([
        MergedField::new("alice").selection(name()),
        MergedField::new("bob").selection(name()),
    ]))
}

#[tokio::test]
async fn level_policy_dispatches_each_level_once() {
    let users = users_loader();
    let names = names_loader();
    let engine = Engine::builder(two_users_registry(&users, &names))
        .coordinator(LevelDispatchCoordinator::new)
        .register_loader(users.clone())
        .register_loader(names.clone())
        .build();

    let response = engine.execute(&two_users_selection()).await;

    assert_eq!(
        response.data,
        Some(json!({
            "alice": { "name": "user-1" },
            "bob": { "name": "user-2" },
        }))
    );
    assert!(response.is_ok());
    assert_eq!(users.dispatch_count(), 1);
    assert_eq!(names.dispatch_count(), 1);
}

#[tokio::test]
async fn chained_policy_batches_sibling_child_executions() {
    let users = users_loader();
    let names = names_loader();
    let engine = Engine::builder(two_users_registry(&users, &names))
        .coordinator(ChainedDispatchCoordinator::new)
        .register_loader(users.clone())
        .register_loader(names.clone())
        .build();

    let response = engine.execute(&two_users_selection()).await;

    assert_eq!(
        response.data,
        Some(json!({
            "alice": { "name": "user-1" },
            "bob": { "name": "user-2" },
        }))
    );
    // The root summaries promise both child executions, so even though each
    // one reaches an idle point on its own, the names form one batch.
    assert_eq!(users.dispatch_count(), 1);
    assert_eq!(names.dispatch_count(), 1);
}

#[tokio::test]
async fn opaque_object_value_does_not_stall_the_level_policy() {
    // A field may resolve to a plain JSON object it has no sub-selection
    // for; such a value spawns no child execution and must not inflate the
    // next level's expectations.
    let users = users_loader();
    let names = names_loader();
    let registry = Registry::new("Query")
        .register(
            MetaType::new("Query")
                .field(
                    MetaField::new("meta", FieldType::named("Json")).with_resolver(Arc::new(
                        ConstResolver(json!({ "build": "2024-05", "region": "eu" })),
                    )),
                )
                .field(
                    MetaField::new("user", FieldType::named("User")).with_resolver(Arc::new(
                        LoadKey {
                            loader: Arc::clone(&users),
                            key: 1,
                        },
                    )),
                ),
        )
        .register(
            MetaType::new("User").field(
                MetaField::new("name", FieldType::named("String")).with_resolver(Arc::new(
                    LoadParentId {
                        loader: Arc::clone(&names),
                    },
                )),
            ),
        );
    let engine = Engine::builder(registry)
        .coordinator(LevelDispatchCoordinator::new)
        .register_loader(users.clone())
        .register_loader(names.clone())
        .build();

    let selection = Arc::new(MergedSelectionSet::new([
        MergedField::new("meta"),
        MergedField::new("user")
            .selection(MergedSelectionSet::new([MergedField::new("name")])),
    ]));

    let response = tokio::time::timeout(Duration::from_secs(5), engine.execute(&selection))
        .await
        .expect("execution stalled waiting for a child level that never comes");

    assert_eq!(
        response.data,
        Some(json!({
            "meta": { "build": "2024-05", "region": "eu" },
            "user": { "name": "user-1" },
        }))
    );
    assert_eq!(names.dispatch_count(), 1);
}

#[tokio::test]
async fn missing_key_nulls_one_field_and_keeps_the_rest() {
    let users = Arc::new(BatchLoader::new("partial-users", |keys: Vec<u32>| {
        async move {
            Ok(keys
                .into_iter()
                .filter(|key| *key != 2)
                .map(|key| (key, json!({ "id": key })))
                .collect::<HashMap<_, _>>())
        }
        .boxed()
    }));
    let names = names_loader();
    let engine = Engine::builder(two_users_registry(&users, &names))
        .coordinator(LevelDispatchCoordinator::new)
        .register_loader(users.clone())
        .register_loader(names.clone())
        .build();

    let response = engine.execute(&two_users_selection()).await;

    assert_eq!(
        response.data,
        Some(json!({
            "alice": { "name": "user-1" },
            "bob": null,
        }))
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].path.to_string(), "bob");
}

struct YieldingLoad {
    loader: Arc<BatchLoader<u32, Value>>,
    key: u32,
}

#[async_trait]
impl FieldResolver for YieldingLoad {
    async fn resolve(&self, _ctx: ResolverContext<'_>) -> Result<ResolvedValue, Error> {
        tokio::task::yield_now().await;
        Ok(ResolvedValue::Pending(self.loader.load(self.key)))
    }
}

fn counter_loader(name: &str) -> Arc<BatchLoader<u32, Value>> {
    Arc::new(BatchLoader::new(name, |keys: Vec<u32>| {
        async move {
            Ok(keys
                .into_iter()
                .map(|key| (key, json!(key * 10)))
                .collect::<HashMap<_, _>>())
        }
        .boxed()
    }))
}

#[tokio::test]
async fn immediate_and_deferred_fields_flush_separately() {
    // `{ a b ... @defer(label: "d1") { c d } }`, all four backed by one
    // loader: `a, b` form the first batch, `c, d` a later one.
    let loader = counter_loader("fields");
    let field = |name: &str, key: u32| {
        MetaField::new(name, FieldType::named("Int")).with_resolver(Arc::new(YieldingLoad {
            loader: Arc::clone(&loader),
            key,
        }))
    };
    let registry = Registry::new("Query").register(
        MetaType::new("Query")
            .field(field("a", 1))
            .field(field("b", 2))
            .field(field("c", 3))
            .field(field("d", 4)),
    );
    let engine = Engine::builder(registry)
        .coordinator(LevelDispatchCoordinator::new)
        .register_loader(loader.clone())
        .build();

    let selection = Arc::new(MergedSelectionSet::new([
        MergedField::new("a"),
        MergedField::new("b"),
        MergedField::deferred("c", DeferredGroupId::labeled("d1")),
        MergedField::deferred("d", DeferredGroupId::labeled("d1")),
    ]));

    let mut stream = engine.execute_stream(selection);

    let Some(StreamingPayload::InitialResponse(initial)) = stream.next().await else {
        panic!("expected the initial response first");
    };
    assert_eq!(initial.data, Some(json!({ "a": 10, "b": 20 })));
    assert_eq!(loader.dispatch_count(), 1);

    let Some(StreamingPayload::Incremental(payload)) = stream.next().await else {
        panic!("expected an incremental payload");
    };
    assert_eq!(payload.data, Some(json!({ "c": 30, "d": 40 })));
    assert_eq!(loader.dispatch_count(), 2);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn deferred_fields_of_a_group_flush_together() {
    let stats = counter_loader("stats");

    let registry = Registry::new("Query").register(
        MetaType::new("Query")
            .field(
                MetaField::new("views", FieldType::named("Int")).with_resolver(Arc::new(
                    YieldingLoad {
                        loader: Arc::clone(&stats),
                        key: 1,
                    },
                )),
            )
            .field(
                MetaField::new("likes", FieldType::named("Int")).with_resolver(Arc::new(
                    YieldingLoad {
                        loader: Arc::clone(&stats),
                        key: 2,
                    },
                )),
            ),
    );
    let engine = Engine::builder(registry)
        .coordinator(LevelDispatchCoordinator::new)
        .register_loader(stats.clone())
        .build();

    let selection = Arc::new(MergedSelectionSet::new([
        MergedField::deferred("views", DeferredGroupId::labeled("stats")),
        MergedField::deferred("likes", DeferredGroupId::labeled("stats")),
    ]));

    let payloads: Vec<StreamingPayload> = engine.execute_stream(selection).collect().await;

    let StreamingPayload::Incremental(payload) = &payloads[1] else {
        panic!("expected an incremental payload");
    };
    assert_eq!(payload.data, Some(json!({ "views": 10, "likes": 20 })));
    assert_eq!(stats.dispatch_count(), 1);
}

#[tokio::test]
async fn deferred_group_batches_without_resolver_suspension() {
    // Loader-backed resolvers enqueue their key and return synchronously.
    // The group's fields are announced up front, so the first field
    // reaching its fetch must not flush a half-filled batch.
    let stats = counter_loader("stats");

    let registry = Registry::new("Query").register(
        MetaType::new("Query")
            .field(
                MetaField::new("views", FieldType::named("Int")).with_resolver(Arc::new(
                    LoadKey {
                        loader: Arc::clone(&stats),
                        key: 1,
                    },
                )),
            )
            .field(
                MetaField::new("likes", FieldType::named("Int")).with_resolver(Arc::new(
                    LoadKey {
                        loader: Arc::clone(&stats),
                        key: 2,
                    },
                )),
            ),
    );
    let engine = Engine::builder(registry)
        .coordinator(LevelDispatchCoordinator::new)
        .register_loader(stats.clone())
        .build();

    let selection = Arc::new(MergedSelectionSet::new([
        MergedField::deferred("views", DeferredGroupId::labeled("stats")),
        MergedField::deferred("likes", DeferredGroupId::labeled("stats")),
    ]));

    let payloads: Vec<StreamingPayload> = engine.execute_stream(selection).collect().await;

    let StreamingPayload::Incremental(payload) = &payloads[1] else {
        panic!("expected an incremental payload");
    };
    assert_eq!(payload.data, Some(json!({ "views": 10, "likes": 20 })));
    assert_eq!(stats.dispatch_count(), 1);
}
