/// Flush retry tests
///
/// PARTIAL and NONE flush outcomes are not errors: the coordinator re-runs
/// flush passes with the residual dirty bits until the store completes or
/// stops making progress.
/// Run with: cargo test --test flush_retry_tests

use std::collections::VecDeque;

use rustpersist::metadata::{ClassMetadata, FieldMetadata, MetadataRegistry};
use rustpersist::store::InstanceView;
use rustpersist::{
    FlushOutcome, InstanceId, LifecycleState, MemoryStore, PersistError, PersistenceContext,
    StoreManager, Value,
};

/// Store wrapper that replays a scripted sequence of flush outcomes before
/// delegating to the in-memory store. An exhausted script means COMPLETE.
struct ScriptedStore {
    inner: MemoryStore,
    script: VecDeque<FlushOutcome>,
    calls: u64,
}

impl ScriptedStore {
    fn new(script: Vec<FlushOutcome>) -> Self {
        Self {
            inner: MemoryStore::new(),
            script: script.into(),
            calls: 0,
        }
    }

    fn next_outcome(&mut self) -> FlushOutcome {
        self.calls += 1;
        self.script.pop_front().unwrap_or(FlushOutcome::Complete)
    }
}

impl StoreManager for ScriptedStore {
    fn insert(&mut self, view: InstanceView<'_>) -> rustpersist::Result<FlushOutcome> {
        match self.next_outcome() {
            FlushOutcome::None => Ok(FlushOutcome::None),
            outcome => {
                self.inner.insert(view)?;
                Ok(outcome)
            }
        }
    }

    fn update(&mut self, view: InstanceView<'_>) -> rustpersist::Result<FlushOutcome> {
        match self.next_outcome() {
            FlushOutcome::None => Ok(FlushOutcome::None),
            outcome => {
                self.inner.update(view)?;
                Ok(outcome)
            }
        }
    }

    fn delete(&mut self, view: InstanceView<'_>) -> rustpersist::Result<FlushOutcome> {
        match self.next_outcome() {
            FlushOutcome::None => Ok(FlushOutcome::None),
            outcome => {
                self.inner.delete(view)?;
                Ok(outcome)
            }
        }
    }

    fn load_field(
        &mut self,
        instance: InstanceId,
        class: &str,
        index: usize,
    ) -> rustpersist::Result<Value> {
        self.inner.load_field(instance, class, index)
    }
}

fn context(script: Vec<FlushOutcome>) -> PersistenceContext<ScriptedStore> {
    let mut registry = MetadataRegistry::new();
    registry
        .register(ClassMetadata::new(
            "Person",
            vec![
                FieldMetadata::persistent("name"),
                FieldMetadata::persistent("partner"),
            ],
        ))
        .unwrap();
    PersistenceContext::new(registry, ScriptedStore::new(script))
}

#[test]
fn test_partial_flush_retains_residual_dirt_until_retried() {
    // First pass inserts PARTIAL (think circular foreign key), the retry
    // pass completes with the residual dirty bits.
    let mut ctx = context(vec![FlushOutcome::Partial]);
    ctx.begin().unwrap();

    let ada = ctx
        .new_instance("Person", vec![Value::Text("ada".into())])
        .unwrap();
    ctx.make_persistent(ada).unwrap();
    ctx.write_field(ada, 1, Value::Text("pending".into())).unwrap();

    ctx.flush().unwrap();

    // Two store calls: the partial insert, then the completing update.
    assert_eq!(ctx.store().calls, 2);
    assert_eq!(
        ctx.state_of(ada),
        Some(LifecycleState::PersistentNewFlushed)
    );
    assert!(ctx.manager(ada).unwrap().tracker().dirty().none());
}

#[test]
fn test_partial_state_is_observable_between_manual_passes() {
    let mut ctx = context(vec![FlushOutcome::Partial, FlushOutcome::None]);
    ctx.begin().unwrap();

    let ada = ctx
        .new_instance("Person", vec![Value::Text("ada".into())])
        .unwrap();
    ctx.make_persistent(ada).unwrap();
    ctx.write_field(ada, 1, Value::Text("pending".into())).unwrap();

    // PARTIAL then NONE then no progress: flush surfaces the stall.
    let result = ctx.flush();
    assert!(matches!(result, Err(PersistError::StoreFailure(_))));

    // The flushed-but-dirty variant holds the residual dirt for a retry.
    assert_eq!(
        ctx.state_of(ada),
        Some(LifecycleState::PersistentNewFlushedDirty)
    );
    assert!(ctx.manager(ada).unwrap().tracker().dirty().any());

    // A later flush (script exhausted -> COMPLETE) finishes the job.
    ctx.flush().unwrap();
    assert_eq!(
        ctx.state_of(ada),
        Some(LifecycleState::PersistentNewFlushed)
    );
    assert!(ctx.manager(ada).unwrap().tracker().dirty().none());
}

#[test]
fn test_none_outcome_leaves_state_unchanged_and_stalls() {
    let mut ctx = context(vec![FlushOutcome::None]);
    ctx.begin().unwrap();

    let ada = ctx
        .new_instance("Person", vec![Value::Text("ada".into())])
        .unwrap();
    ctx.make_persistent(ada).unwrap();

    let result = ctx.flush();
    assert!(matches!(result, Err(PersistError::StoreFailure(_))));
    assert_eq!(ctx.state_of(ada), Some(LifecycleState::PersistentNew));

    // The transaction is still open; the caller decides what happens next.
    assert!(ctx.transaction().is_active());
    ctx.rollback().unwrap();
}

#[test]
fn test_partial_during_commit_is_retried_to_completion() {
    let mut ctx = context(vec![FlushOutcome::Partial]);
    ctx.begin().unwrap();

    let ada = ctx
        .new_instance("Person", vec![Value::Text("ada".into())])
        .unwrap();
    ctx.make_persistent(ada).unwrap();
    ctx.commit().unwrap();

    assert_eq!(ctx.store().calls, 2);
    assert_eq!(ctx.state_of(ada), Some(LifecycleState::Hollow));
    assert!(ctx.store().inner.contains(ada));
}

#[test]
fn test_store_error_propagates_without_internal_retry() {
    // Deleting a row that was never stored: MemoryStore reports a store
    // failure, which must surface unchanged.
    let mut ctx = context(Vec::new());
    ctx.begin().unwrap();

    let ada = ctx
        .new_instance("Person", vec![Value::Text("ada".into())])
        .unwrap();
    ctx.make_persistent(ada).unwrap();
    ctx.commit().unwrap();

    // Remove the row behind the runtime's back; the deferred store delete
    // must then fail, and the failure surfaces after exactly one call.
    ctx.begin().unwrap();
    ctx.delete_persistent(ada).unwrap();
    ctx.store_mut().inner.clear();

    let calls_before = ctx.store().calls;
    let result = ctx.flush();
    assert!(matches!(result, Err(PersistError::StoreFailure(_))));
    assert_eq!(ctx.store().calls, calls_before + 1);
}
