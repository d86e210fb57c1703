//! Batch dispatch coordination.
//!
//! The executor reports lifecycle events through a
//! [`BatchDispatchCoordinator`]; the coordinator answers with a
//! [`DispatchDecision`]. Policies only do bookkeeping here — the executor
//! performs the actual flush, so a buggy policy can at worst batch poorly,
//! never corrupt results. Hook failures are likewise contained: the executor
//! logs a [`CoordinatorError`] and proceeds as if the hook said
//! [`DispatchDecision::Continue`].

use std::{
    collections::HashMap,
    sync::Mutex,
};

use crate::{error::CoordinatorError, resolver::FieldValueSummary};

/// What the executor should do after reporting an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDecision {
    /// Keep executing; the batching window is still open.
    Continue,
    /// Flush every loader with pending keys before awaiting anything.
    FlushPending,
}

pub type HookResult = Result<DispatchDecision, CoordinatorError>;

/// Lifecycle hooks reported during execution.
///
/// Levels are 1-based: the root selection set executes at level 1. Every
/// hook has a no-op default, so a policy only overrides what it tracks.
pub trait BatchDispatchCoordinator: Send + Sync + 'static {
    /// A selection set at `level` began executing and will fetch
    /// `field_count` fields.
    fn execution_started(&self, level: usize, field_count: usize) -> HookResult {
        let _ = (level, field_count);
        Ok(DispatchDecision::Continue)
    }

    /// The fetch of one non-deferred field at `level` has started (its key
    /// is enqueued or its value is already available).
    fn field_fetched(&self, level: usize, response_key: &str) -> HookResult {
        let _ = (level, response_key);
        Ok(DispatchDecision::Continue)
    }

    /// Every field of one selection-set execution at `level` has a raw
    /// value. The summaries size the executions the next level will see.
    fn level_values_ready(&self, level: usize, summaries: &[FieldValueSummary]) -> HookResult {
        let _ = (level, summaries);
        Ok(DispatchDecision::Continue)
    }

    /// A non-null violation aborted `level`; it will never fully complete.
    fn level_errored(&self, level: usize) -> HookResult {
        let _ = level;
        Ok(DispatchDecision::Continue)
    }

    /// A deferred call, or a selection set executing inside one, is about
    /// to start fetching `field_count` fields. Deferred subtrees do not
    /// follow the level-by-level schedule, so the upcoming fetches are
    /// announced explicitly; a policy can then hold its flush open until
    /// every announced fetch has begun.
    fn deferred_execution_started(&self, field_count: usize) -> HookResult {
        let _ = field_count;
        Ok(DispatchDecision::Continue)
    }

    /// The fetch of one deferred field has started executing.
    fn deferred_field_started(&self, response_key: &str) -> HookResult {
        let _ = response_key;
        Ok(DispatchDecision::Continue)
    }

    /// A deferred field's fetch has its key enqueued or value available.
    fn deferred_field_fetched(&self, response_key: &str) -> HookResult {
        let _ = response_key;
        Ok(DispatchDecision::Continue)
    }
}

/// Never asks for a flush. Suitable when no resolver enqueues loader keys;
/// batch-loader resolvers need a dispatching policy or their fetches never
/// resolve.
#[derive(Debug, Default)]
pub struct NoopCoordinator;

impl BatchDispatchCoordinator for NoopCoordinator {}

#[derive(Debug, Default, Clone)]
struct LevelState {
    expected_executions: usize,
    started_executions: usize,
    announced_fields: usize,
    fetched_fields: usize,
    valued_executions: usize,
    dispatched: bool,
}

impl LevelState {
    fn fully_started(&self) -> bool {
        self.expected_executions > 0 && self.started_executions >= self.expected_executions
    }

    fn fully_valued(&self) -> bool {
        self.expected_executions > 0 && self.valued_executions >= self.expected_executions
    }
}

#[derive(Debug, Default)]
struct LevelInner {
    levels: HashMap<usize, LevelState>,
    /// Announced deferred fetches that have not started yet.
    announced_deferred: usize,
    /// Deferred fetches started but not yet enqueued.
    pending_deferred: usize,
}

impl LevelInner {
    fn level(&mut self, level: usize) -> &mut LevelState {
        self.levels.entry(level).or_default()
    }

    /// A level dispatches once every expected execution has started, every
    /// announced field has fetched, and the previous level is fully valued.
    fn ready(&self, level: usize) -> bool {
        let Some(state) = self.levels.get(&level) else {
            return false;
        };
        if state.dispatched || !state.fully_started() {
            return false;
        }
        if state.announced_fields == 0 || state.fetched_fields < state.announced_fields {
            return false;
        }
        level == 1
            || self
                .levels
                .get(&(level - 1))
                .is_some_and(LevelState::fully_valued)
    }

    fn check(&mut self) -> DispatchDecision {
        let ready: Vec<usize> = self
            .levels
            .keys()
            .copied()
            .filter(|level| self.ready(*level))
            .collect();
        if ready.is_empty() {
            DispatchDecision::Continue
        } else {
            for level in ready {
                self.level(level).dispatched = true;
            }
            DispatchDecision::FlushPending
        }
    }
}

/// Dispatches once per depth level, when every field of that level across
/// every object has been fetched. Produces the widest batches a query
/// allows, at the cost of holding fetches back until siblings catch up.
#[derive(Debug)]
pub struct LevelDispatchCoordinator {
    inner: Mutex<LevelInner>,
}

impl Default for LevelDispatchCoordinator {
    fn default() -> Self {
        let mut inner = LevelInner::default();
        // The root selection set is the single expected execution of level 1.
        inner.level(1).expected_executions = 1;
        Self {
            inner: Mutex::new(inner),
        }
    }
}

impl LevelDispatchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchDispatchCoordinator for LevelDispatchCoordinator {
    fn execution_started(&self, level: usize, field_count: usize) -> HookResult {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        let state = inner.level(level);
        state.started_executions += 1;
        state.announced_fields += field_count;
        Ok(inner.check())
    }

    fn field_fetched(&self, level: usize, _response_key: &str) -> HookResult {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        inner.level(level).fetched_fields += 1;
        Ok(inner.check())
    }

    fn level_values_ready(&self, level: usize, summaries: &[FieldValueSummary]) -> HookResult {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        inner.level(level).valued_executions += 1;
        let child_executions: usize = summaries.iter().map(|s| s.child_executions).sum();
        inner.level(level + 1).expected_executions += child_executions;
        Ok(inner.check())
    }

    fn level_errored(&self, level: usize) -> HookResult {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        // The level will never finish; stop waiting on it.
        let state = inner.level(level);
        state.dispatched = true;
        state.valued_executions = state.expected_executions;
        Ok(inner.check())
    }

    fn deferred_execution_started(&self, field_count: usize) -> HookResult {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        inner.announced_deferred += field_count;
        Ok(DispatchDecision::Continue)
    }

    fn deferred_field_started(&self, _response_key: &str) -> HookResult {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        inner.announced_deferred = inner.announced_deferred.saturating_sub(1);
        inner.pending_deferred += 1;
        Ok(DispatchDecision::Continue)
    }

    fn deferred_field_fetched(&self, _response_key: &str) -> HookResult {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        inner.pending_deferred = inner.pending_deferred.saturating_sub(1);
        if inner.pending_deferred == 0 && inner.announced_deferred == 0 {
            Ok(DispatchDecision::FlushPending)
        } else {
            Ok(DispatchDecision::Continue)
        }
    }
}

#[derive(Debug, Default)]
struct ChainedInner {
    /// Fetches started but not yet enqueued.
    outstanding: usize,
    /// Child executions announced by summaries that have not started yet.
    promised_executions: usize,
    /// Announced deferred fetches that have not started yet.
    announced_deferred: usize,
}

impl ChainedInner {
    /// Idle means no started, promised, or announced fetch could still add
    /// a key to a pending batch.
    fn check(&self) -> DispatchDecision {
        if self.outstanding == 0 && self.promised_executions == 0 && self.announced_deferred == 0 {
            DispatchDecision::FlushPending
        } else {
            DispatchDecision::Continue
        }
    }

    fn fetch_done(&mut self) -> DispatchDecision {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.check()
    }
}

/// Dispatches as soon as no not-yet-executed field could still add a key.
/// Summaries promise the next level's executions and deferred calls
/// announce their fields up front, so siblings of one wave batch together;
/// unlike [`LevelDispatchCoordinator`] nothing waits for a whole level to
/// finish collecting values before deeper fetches go out.
#[derive(Debug)]
pub struct ChainedDispatchCoordinator {
    inner: Mutex<ChainedInner>,
}

impl Default for ChainedDispatchCoordinator {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ChainedInner {
                // The root selection set is the single promised execution.
                promised_executions: 1,
                ..ChainedInner::default()
            }),
        }
    }
}

impl ChainedDispatchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchDispatchCoordinator for ChainedDispatchCoordinator {
    fn execution_started(&self, _level: usize, field_count: usize) -> HookResult {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        inner.promised_executions = inner.promised_executions.saturating_sub(1);
        inner.outstanding += field_count;
        Ok(inner.check())
    }

    fn field_fetched(&self, _level: usize, _response_key: &str) -> HookResult {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        Ok(inner.fetch_done())
    }

    fn level_values_ready(&self, _level: usize, summaries: &[FieldValueSummary]) -> HookResult {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        inner.promised_executions += summaries
            .iter()
            .map(|summary| summary.child_executions)
            .sum::<usize>();
        Ok(inner.check())
    }

    fn deferred_execution_started(&self, field_count: usize) -> HookResult {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        inner.announced_deferred += field_count;
        Ok(DispatchDecision::Continue)
    }

    fn deferred_field_started(&self, _response_key: &str) -> HookResult {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        inner.announced_deferred = inner.announced_deferred.saturating_sub(1);
        inner.outstanding += 1;
        Ok(DispatchDecision::Continue)
    }

    fn deferred_field_fetched(&self, _response_key: &str) -> HookResult {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        Ok(inner.fetch_done())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> CoordinatorError {
    CoordinatorError::new("coordinator state poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        resolver::{FieldValueKind, FieldValueSummary},
        selection::{MergedField, MergedSelectionSet},
    };
    use serde_json::json;

    fn summary(key: &str, children: usize) -> FieldValueSummary {
        FieldValueSummary {
            response_key: key.to_owned(),
            kind: if children > 0 {
                FieldValueKind::Object
            } else {
                FieldValueKind::Value
            },
            child_executions: children,
            child_field_count: children * 2,
        }
    }

    #[test]
    fn level_policy_dispatches_root_when_all_fields_fetched() {
        let policy = LevelDispatchCoordinator::new();
        assert_eq!(
            policy.execution_started(1, 2).unwrap(),
            DispatchDecision::Continue
        );
        assert_eq!(
            policy.field_fetched(1, "a").unwrap(),
            DispatchDecision::Continue
        );
        assert_eq!(
            policy.field_fetched(1, "b").unwrap(),
            DispatchDecision::FlushPending
        );
    }

    #[test]
    fn level_policy_waits_for_sibling_executions() {
        let policy = LevelDispatchCoordinator::new();
        policy.execution_started(1, 1).unwrap();
        policy.field_fetched(1, "pets").unwrap();
        // Root value: a list of two objects, each selecting one field.
        let field = MergedField::new("pets")
            .selection(MergedSelectionSet::new([MergedField::new("name")]));
        let pets = FieldValueSummary::of(&field, &json!([{ "id": 1 }, { "id": 2 }]), true);
        policy.level_values_ready(1, &[pets]).unwrap();

        // First child execution alone must not trigger level 2.
        policy.execution_started(2, 1).unwrap();
        assert_eq!(
            policy.field_fetched(2, "name").unwrap(),
            DispatchDecision::Continue
        );
        // The second one completes the level.
        policy.execution_started(2, 1).unwrap();
        assert_eq!(
            policy.field_fetched(2, "name").unwrap(),
            DispatchDecision::FlushPending
        );
    }

    #[test]
    fn level_policy_holds_next_level_until_previous_is_valued() {
        let policy = LevelDispatchCoordinator::new();
        policy.execution_started(1, 1).unwrap();
        policy.field_fetched(1, "pet").unwrap();

        // Level 2 fields all fetched before level 1 reported its values:
        // the flush must wait for level_values_ready(1).
        policy.execution_started(2, 1).unwrap();
        assert_eq!(
            policy.field_fetched(2, "name").unwrap(),
            DispatchDecision::Continue
        );
        assert_eq!(
            policy.level_values_ready(1, &[summary("pet", 1)]).unwrap(),
            DispatchDecision::FlushPending
        );
    }

    #[test]
    fn level_policy_flushes_deferred_fields_when_none_outstanding() {
        let policy = LevelDispatchCoordinator::new();
        policy.deferred_field_started("c").unwrap();
        policy.deferred_field_started("d").unwrap();
        assert_eq!(
            policy.deferred_field_fetched("c").unwrap(),
            DispatchDecision::Continue
        );
        assert_eq!(
            policy.deferred_field_fetched("d").unwrap(),
            DispatchDecision::FlushPending
        );
    }

    #[test]
    fn errored_level_stops_blocking_deeper_levels() {
        let policy = LevelDispatchCoordinator::new();
        policy.execution_started(1, 1).unwrap();
        policy.field_fetched(1, "pets").unwrap();
        policy.level_values_ready(1, &[summary("pets", 2)]).unwrap();

        // Two child executions; only the first reports its values.
        policy.execution_started(2, 1).unwrap();
        policy.field_fetched(2, "owner").unwrap();
        policy.execution_started(2, 1).unwrap();
        policy.field_fetched(2, "owner").unwrap();
        policy.level_values_ready(2, &[summary("owner", 1)]).unwrap();

        // A level-3 fetch is done but held back by the unfinished level 2.
        policy.execution_started(3, 1).unwrap();
        assert_eq!(
            policy.field_fetched(3, "name").unwrap(),
            DispatchDecision::Continue
        );

        // The second level-2 execution aborts; level 3 must not wait on it.
        assert_eq!(
            policy.level_errored(2).unwrap(),
            DispatchDecision::FlushPending
        );
    }

    #[test]
    fn level_policy_holds_deferred_flush_until_announced_fields_start() {
        let policy = LevelDispatchCoordinator::new();
        policy.deferred_execution_started(2).unwrap();
        policy.deferred_field_started("c").unwrap();
        // `c` enqueued its key without suspending; `d` was announced and has
        // not started, so the batching window stays open.
        assert_eq!(
            policy.deferred_field_fetched("c").unwrap(),
            DispatchDecision::Continue
        );
        policy.deferred_field_started("d").unwrap();
        assert_eq!(
            policy.deferred_field_fetched("d").unwrap(),
            DispatchDecision::FlushPending
        );
    }

    #[test]
    fn chained_policy_flushes_whenever_idle() {
        let policy = ChainedDispatchCoordinator::new();
        policy.execution_started(1, 2).unwrap();
        assert_eq!(
            policy.field_fetched(1, "a").unwrap(),
            DispatchDecision::Continue
        );
        assert_eq!(
            policy.field_fetched(1, "b").unwrap(),
            DispatchDecision::FlushPending
        );

        // A deeper wave: the summary promised one child execution.
        policy.level_values_ready(1, &[summary("user", 1)]).unwrap();
        policy.execution_started(2, 1).unwrap();
        assert_eq!(
            policy.field_fetched(2, "name").unwrap(),
            DispatchDecision::FlushPending
        );
    }

    #[test]
    fn chained_policy_waits_for_promised_sibling_executions() {
        let policy = ChainedDispatchCoordinator::new();
        policy.execution_started(1, 1).unwrap();
        policy.field_fetched(1, "users").unwrap();
        policy.level_values_ready(1, &[summary("users", 2)]).unwrap();

        // The first child enqueues its key, but its promised sibling could
        // still add one.
        policy.execution_started(2, 1).unwrap();
        assert_eq!(
            policy.field_fetched(2, "name").unwrap(),
            DispatchDecision::Continue
        );
        policy.execution_started(2, 1).unwrap();
        assert_eq!(
            policy.field_fetched(2, "name").unwrap(),
            DispatchDecision::FlushPending
        );
    }

    #[test]
    fn chained_policy_counts_deferred_fetches() {
        let policy = ChainedDispatchCoordinator::new();
        policy.execution_started(1, 1).unwrap();
        policy.deferred_field_started("lazy").unwrap();
        assert_eq!(
            policy.field_fetched(1, "a").unwrap(),
            DispatchDecision::Continue
        );
        assert_eq!(
            policy.deferred_field_fetched("lazy").unwrap(),
            DispatchDecision::FlushPending
        );
    }

    #[test]
    fn chained_policy_holds_flush_for_announced_deferred_fields() {
        let policy = ChainedDispatchCoordinator::new();
        policy.execution_started(1, 0).unwrap();
        policy.deferred_execution_started(2).unwrap();
        policy.deferred_field_started("c").unwrap();
        assert_eq!(
            policy.deferred_field_fetched("c").unwrap(),
            DispatchDecision::Continue
        );
        policy.deferred_field_started("d").unwrap();
        assert_eq!(
            policy.deferred_field_fetched("d").unwrap(),
            DispatchDecision::FlushPending
        );
    }
}
