/// Transition table property tests
///
/// The transition table must be total and deterministic over every
/// (state, event) pair, commit/rollback must never leave outstanding store
/// work, and no event sequence may ever break the dirty-implies-loaded
/// invariant.
/// Run with: cargo test --test transition_property_tests

use proptest::prelude::*;

use rustpersist::lifecycle::{transitions, LifecycleEvent, LifecycleState};
use rustpersist::metadata::{ClassMetadata, FieldMetadata, MetadataRegistry};
use rustpersist::{FlushOutcome, MemoryStore, PersistError, PersistenceContext, Value};

fn states() -> impl Strategy<Value = LifecycleState> {
    prop::sample::select(LifecycleState::ALL.to_vec())
}

fn events() -> impl Strategy<Value = LifecycleEvent> {
    prop::sample::select(LifecycleEvent::ALL.to_vec())
}

fn outcomes() -> impl Strategy<Value = FlushOutcome> {
    prop::sample::select(vec![
        FlushOutcome::Complete,
        FlushOutcome::Partial,
        FlushOutcome::None,
    ])
}

/// Render the full outcome of one event dispatch; identical inputs must
/// yield identical renderings.
fn dispatch(
    state: LifecycleState,
    event: LifecycleEvent,
    flag_a: bool,
    flag_b: bool,
    outcome: FlushOutcome,
) -> String {
    match event {
        LifecycleEvent::MakePersistent => format!("{:?}", transitions::make_persistent(state)),
        LifecycleEvent::MakeAutoPersistent => {
            format!("{:?}", transitions::make_auto_persistent(state))
        }
        LifecycleEvent::MakeTransactional => {
            format!("{:?}", transitions::make_transactional(state))
        }
        LifecycleEvent::MakeNontransactional => {
            format!("{:?}", transitions::make_nontransactional(state))
        }
        LifecycleEvent::MakeTransient => format!("{:?}", transitions::make_transient(state)),
        LifecycleEvent::Delete => format!("{:?}", transitions::delete(state)),
        LifecycleEvent::Flush => format!(
            "{:?} / {:?}",
            transitions::flush_action(state, flag_a),
            transitions::after_flush(state, outcome)
        ),
        LifecycleEvent::Commit => format!("{:?}", transitions::commit(state, flag_a)),
        LifecycleEvent::Rollback => format!("{:?}", transitions::rollback(state, flag_a)),
        LifecycleEvent::Evict => format!("{:?}", transitions::evict(state)),
        LifecycleEvent::Refresh => format!("{:?}", transitions::refresh(state)),
        LifecycleEvent::ReadField => {
            format!("{:?}", transitions::read_field(state, flag_a, flag_b))
        }
        LifecycleEvent::WriteField => format!("{:?}", transitions::write_field(state, flag_a)),
    }
}

proptest! {
    /// Every (state, event) pair is defined and repeated dispatch from the
    /// same inputs produces the same result.
    #[test]
    fn transition_is_total_and_deterministic(
        state in states(),
        event in events(),
        flag_a: bool,
        flag_b: bool,
        outcome in outcomes(),
    ) {
        let first = dispatch(state, event, flag_a, flag_b, outcome);
        let second = dispatch(state, event, flag_a, flag_b, outcome);
        prop_assert_eq!(first, second);
    }

    /// After the commit transition nothing is left for a flush pass.
    #[test]
    fn commit_leaves_no_outstanding_store_work(state in states(), retain: bool) {
        let next = transitions::commit(state, retain).next;
        prop_assert!(!next.needs_flush(), "{} -> {} still needs flush", state, next);
    }

    /// After the rollback transition nothing is left for a flush pass.
    #[test]
    fn rollback_leaves_no_outstanding_store_work(state in states(), restore: bool) {
        let next = transitions::rollback(state, restore).next;
        prop_assert!(!next.needs_flush(), "{} -> {} still needs flush", state, next);
    }

    /// A complete flush clears the dirty residue exactly when it reports a
    /// flushed variant.
    #[test]
    fn complete_flush_clears_dirt(state in states()) {
        let transition = transitions::after_flush(state, FlushOutcome::Complete);
        if transition.next != state {
            prop_assert!(transition.effects.clear_dirty);
        }
    }
}

// ---------------------------------------------------------------------------
// Invariant preservation under random event sequences
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    New,
    Persist(usize),
    Delete(usize),
    Write(usize, usize),
    Read(usize, usize),
    Link(usize, usize),
    Evict(usize),
    Refresh(usize),
    Flush,
    Commit,
    Rollback,
    Begin,
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    let boundary = prop::sample::select(vec![Op::Flush, Op::Commit, Op::Rollback, Op::Begin]);
    let op = prop_oneof![
        Just(Op::New),
        any::<usize>().prop_map(Op::Persist),
        any::<usize>().prop_map(Op::Delete),
        (any::<usize>(), 0usize..3).prop_map(|(i, f)| Op::Write(i, f)),
        (any::<usize>(), 0usize..3).prop_map(|(i, f)| Op::Read(i, f)),
        (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Link(a, b)),
        any::<usize>().prop_map(Op::Evict),
        any::<usize>().prop_map(Op::Refresh),
        boundary,
    ];
    prop::collection::vec(op, 1..60)
}

proptest! {
    /// Whatever the application does, in whatever order, the runtime never
    /// reports a dirty-without-loaded invariant violation.
    #[test]
    fn random_event_sequences_preserve_the_field_invariant(script in ops()) {
        let mut registry = MetadataRegistry::new();
        registry
            .register(ClassMetadata::new(
                "Node",
                vec![
                    FieldMetadata::persistent("label"),
                    FieldMetadata::persistent("weight").with_default(Value::Integer(0)),
                    FieldMetadata::persistent("next"),
                ],
            ))
            .unwrap();

        let mut ctx = PersistenceContext::new(registry, MemoryStore::new());
        ctx.begin().unwrap();

        let mut ids = Vec::new();
        for op in script {
            let result = match op {
                Op::New => ctx
                    .new_instance("Node", vec![Value::Text("n".into())])
                    .map(|id| ids.push(id)),
                Op::Persist(i) => pick(&ids, i).map_or(Ok(()), |id| ctx.make_persistent(id)),
                Op::Delete(i) => pick(&ids, i).map_or(Ok(()), |id| ctx.delete_persistent(id)),
                Op::Write(i, field) => pick(&ids, i)
                    .map_or(Ok(()), |id| ctx.write_field(id, field, Value::Integer(7))),
                Op::Read(i, field) => {
                    pick(&ids, i).map_or(Ok(()), |id| ctx.read_field(id, field).map(|_| ()))
                }
                Op::Link(a, b) => match (pick(&ids, a), pick(&ids, b)) {
                    (Some(from), Some(to)) => {
                        ctx.write_field(from, 2, Value::Reference(to))
                    }
                    _ => Ok(()),
                },
                Op::Evict(i) => pick(&ids, i).map_or(Ok(()), |id| ctx.evict(id)),
                Op::Refresh(i) => pick(&ids, i).map_or(Ok(()), |id| ctx.refresh(id)),
                Op::Flush => ctx.flush(),
                Op::Commit => ctx.commit(),
                Op::Rollback => ctx.rollback(),
                Op::Begin => ctx.begin(),
            };

            // Errors are part of the contract; internal-consistency faults
            // are not.
            if let Err(err) = result {
                prop_assert!(
                    !matches!(err, PersistError::InvariantViolation { .. }),
                    "invariant violation: {}",
                    err
                );
            }
        }
    }
}

fn pick(ids: &[rustpersist::InstanceId], index: usize) -> Option<rustpersist::InstanceId> {
    if ids.is_empty() {
        None
    } else {
        Some(ids[index % ids.len()])
    }
}
