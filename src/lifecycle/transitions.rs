//! The transition table: one total, pure function per event.
//!
//! Every (state, event) pair is defined. Events that are not meaningful in a
//! state return the same state with no effects; events that are forbidden
//! return a [`Denial`] the manager turns into a typed error. Side effects are
//! described as [`Effects`] flags and applied by the caller.

use super::state::LifecycleState;
use super::state::LifecycleState::*;

/// Why an event was refused. The StateManager maps this to the error
/// taxonomy, attaching instance identity, event, and state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    Invalid,
    AlreadyDeleted,
    NoActiveTransaction,
}

/// Effect flags accompanying a state change. The StateManager applies them
/// in declaration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Effects {
    /// Mark every declared field loaded (enrollment: defaults count as
    /// materialized).
    pub set_all_loaded: bool,
    /// Restore field values and loaded bits from the before image.
    pub restore_before_image: bool,
    /// Discard mutable-container field values to force a future reload.
    pub unset_container_fields: bool,
    pub clear_dirty: bool,
    pub clear_loaded: bool,
    pub drop_before_image: bool,
    /// Sever the instance from its manager; irreversible.
    pub disconnect: bool,
}

/// Result of a pure transition: the next state plus its effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: LifecycleState,
    pub effects: Effects,
}

impl Transition {
    /// No state change, no effects.
    pub fn stay(state: LifecycleState) -> Self {
        Self {
            next: state,
            effects: Effects::default(),
        }
    }

    pub fn to(next: LifecycleState) -> Self {
        Self {
            next,
            effects: Effects::default(),
        }
    }

    pub fn is_noop(&self, current: LifecycleState) -> bool {
        self.next == current && self.effects == Effects::default()
    }
}

/// Store operation a flush must perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Insert,
    Update,
    Delete,
}

/// What a flush does for a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushAction {
    /// Nothing to write.
    Noop,
    /// Unreachable auto-persistent instance, never stored: skip the store
    /// call entirely and move to the pending variant.
    SkipUnreachable,
    /// Unreachable auto-persistent instance with a store row: issue the
    /// deferred delete, then move to the pending variant.
    DeleteUnreachable,
    /// Ordinary store call.
    Store(StoreOp),
}

/// What a field read does when the field is not loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAction {
    /// Value already materialized; return it.
    Plain,
    /// Load the field from the store, then adopt `next`.
    Load { next: LifecycleState },
}

/// What a refresh does for a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshAction {
    Noop,
    /// Reload the currently loaded fields from the store, then apply the
    /// transition.
    Reload(Transition),
}

// ---------------------------------------------------------------------------
// Shared transition tails
// ---------------------------------------------------------------------------

/// Commit keeping values: loaded bits survive, dirt is gone.
fn commit_retained() -> Transition {
    Transition {
        next: PersistentNontransactional,
        effects: Effects {
            clear_dirty: true,
            drop_before_image: true,
            ..Effects::default()
        },
    }
}

/// Commit discarding values for lazy reload.
fn commit_hollowed() -> Transition {
    Transition {
        next: Hollow,
        effects: Effects {
            clear_dirty: true,
            clear_loaded: true,
            drop_before_image: true,
            ..Effects::default()
        },
    }
}

/// Disposal: the instance leaves management and becomes plain data.
fn dispose() -> Transition {
    Transition {
        next: Transient,
        effects: Effects {
            clear_dirty: true,
            clear_loaded: true,
            drop_before_image: true,
            disconnect: true,
            ..Effects::default()
        },
    }
}

/// Disposal with the rollback value treatment applied first.
fn dispose_restored(restore_values: bool) -> Transition {
    let mut transition = dispose();
    if restore_values {
        transition.effects.restore_before_image = true;
    } else {
        transition.effects.unset_container_fields = true;
    }
    transition
}

/// Rollback tail for pre-existing persistent instances.
fn rollback_retained(restore_values: bool) -> Transition {
    if restore_values {
        Transition {
            next: PersistentNontransactional,
            effects: Effects {
                restore_before_image: true,
                clear_dirty: true,
                drop_before_image: true,
                ..Effects::default()
            },
        }
    } else {
        Transition {
            next: Hollow,
            effects: Effects {
                unset_container_fields: true,
                clear_dirty: true,
                clear_loaded: true,
                drop_before_image: true,
                ..Effects::default()
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Explicit persist request. A no-op on anything already (permanently)
/// persistent; promotes the auto-persistent lineage.
pub fn make_persistent(state: LifecycleState) -> Transition {
    match state {
        Transient | TransientClean | TransientDirty => Transition {
            next: PersistentNew,
            effects: Effects {
                set_all_loaded: true,
                ..Effects::default()
            },
        },
        AutoPersistentNew => Transition::to(PersistentNew),
        AutoPersistentNewFlushed => Transition::to(PersistentNewFlushed),
        AutoPersistentNewFlushedDirty => Transition::to(PersistentNewFlushedDirty),
        // The row already exists in the store; re-promotion must not
        // re-insert.
        AutoPersistentPending => Transition::to(PersistentNewFlushed),
        other => Transition::stay(other),
    }
}

/// Enrollment through reachability from a persistent instance.
pub fn make_auto_persistent(state: LifecycleState) -> Transition {
    match state {
        Transient | TransientClean | TransientDirty => Transition {
            next: AutoPersistentNew,
            effects: Effects {
                set_all_loaded: true,
                ..Effects::default()
            },
        },
        other => Transition::stay(other),
    }
}

pub fn make_transactional(state: LifecycleState) -> Result<Transition, Denial> {
    Ok(match state {
        Transient => Transition {
            next: TransientClean,
            effects: Effects {
                set_all_loaded: true,
                ..Effects::default()
            },
        },
        Hollow | PersistentNontransactional => Transition::to(PersistentClean),
        other => Transition::stay(other),
    })
}

pub fn make_nontransactional(state: LifecycleState) -> Result<Transition, Denial> {
    match state {
        TransientClean => Ok(dispose()),
        PersistentClean => Ok(Transition::to(PersistentNontransactional)),
        Transient | Hollow | PersistentNontransactional => Ok(Transition::stay(state)),
        _ => Err(Denial::Invalid),
    }
}

/// Releasing an instance from management. Dirty, new, and deleted instances
/// cannot leave mid-transaction.
pub fn make_transient(state: LifecycleState) -> Result<Transition, Denial> {
    match state {
        PersistentClean | PersistentNontransactional | Hollow | TransientClean => Ok(dispose()),
        Transient => Ok(Transition::stay(state)),
        _ => Err(Denial::Invalid),
    }
}

pub fn delete(state: LifecycleState) -> Result<Transition, Denial> {
    match state {
        Transient | TransientClean | TransientDirty => Err(Denial::Invalid),

        PersistentDeleted
        | PersistentNewDeleted
        | PersistentNewFlushedDeleted
        | PersistentDeletedFlushed => Err(Denial::AlreadyDeleted),

        // Never flushed: degenerates to disposal at commit, no store call.
        PersistentNew | AutoPersistentNew => Ok(Transition::to(PersistentNewDeleted)),

        PersistentNewFlushed
        | PersistentNewFlushedDirty
        | AutoPersistentNewFlushed
        | AutoPersistentNewFlushedDirty => Ok(Transition::to(PersistentNewFlushedDeleted)),

        PersistentClean
        | PersistentDirty
        | Hollow
        | PersistentNontransactional
        | PersistentFlushed
        | PersistentFlushedDirty => Ok(Transition::to(PersistentDeleted)),

        // Mid-commit disposal bookkeeping; nothing may delete it now.
        AutoPersistentPending => Err(Denial::Invalid),
    }
}

/// What store work a flush performs from this state. `unreachable` is true
/// only for auto-persistent instances found unreachable by the commit-time
/// sweep.
pub fn flush_action(state: LifecycleState, unreachable: bool) -> FlushAction {
    match state {
        AutoPersistentNew if unreachable => FlushAction::SkipUnreachable,
        AutoPersistentNewFlushed | AutoPersistentNewFlushedDirty if unreachable => {
            FlushAction::DeleteUnreachable
        }

        PersistentNew | AutoPersistentNew => FlushAction::Store(StoreOp::Insert),

        PersistentDirty
        | PersistentNewFlushedDirty
        | PersistentFlushedDirty
        | AutoPersistentNewFlushedDirty => FlushAction::Store(StoreOp::Update),

        PersistentDeleted | PersistentNewFlushedDeleted => FlushAction::Store(StoreOp::Delete),

        _ => FlushAction::Noop,
    }
}

/// Next state after a store call, given the outcome reported by the store
/// manager. COMPLETE clears the dirt; PARTIAL moves to (or stays in) the
/// flushed-but-dirty variant with residual dirty bits retained; NONE leaves
/// the state untouched and the caller retries.
pub fn after_flush(state: LifecycleState, outcome: crate::store::FlushOutcome) -> Transition {
    use crate::store::FlushOutcome;

    let complete = |next| Transition {
        next,
        effects: Effects {
            clear_dirty: true,
            ..Effects::default()
        },
    };

    match outcome {
        FlushOutcome::Complete => match state {
            PersistentNew => complete(PersistentNewFlushed),
            AutoPersistentNew => complete(AutoPersistentNewFlushed),
            PersistentDirty => complete(PersistentFlushed),
            PersistentNewFlushedDirty => complete(PersistentNewFlushed),
            PersistentFlushedDirty => complete(PersistentFlushed),
            AutoPersistentNewFlushedDirty => complete(AutoPersistentNewFlushed),
            PersistentDeleted | PersistentNewFlushedDeleted => {
                complete(PersistentDeletedFlushed)
            }
            other => Transition::stay(other),
        },
        FlushOutcome::Partial => match state {
            PersistentNew => Transition::to(PersistentNewFlushedDirty),
            AutoPersistentNew => Transition::to(AutoPersistentNewFlushedDirty),
            PersistentDirty => Transition::to(PersistentFlushedDirty),
            other => Transition::stay(other),
        },
        FlushOutcome::None => Transition::stay(state),
    }
}

pub fn commit(state: LifecycleState, retain_values: bool) -> Transition {
    match state {
        // Unreachable auto-persistent instances dispose unconditionally,
        // irrespective of retain_values.
        AutoPersistentNew
        | AutoPersistentNewFlushed
        | AutoPersistentNewFlushedDirty
        | AutoPersistentPending => dispose(),

        PersistentDeleted
        | PersistentNewDeleted
        | PersistentNewFlushedDeleted
        | PersistentDeletedFlushed => dispose(),

        PersistentNew
        | PersistentNewFlushed
        | PersistentNewFlushedDirty
        | PersistentClean
        | PersistentDirty
        | PersistentFlushed
        | PersistentFlushedDirty => {
            if retain_values {
                commit_retained()
            } else {
                commit_hollowed()
            }
        }

        TransientDirty => Transition {
            next: TransientClean,
            effects: Effects {
                clear_dirty: true,
                drop_before_image: true,
                ..Effects::default()
            },
        },

        Transient | TransientClean | Hollow | PersistentNontransactional => {
            Transition::stay(state)
        }
    }
}

pub fn rollback(state: LifecycleState, restore_values: bool) -> Transition {
    match state {
        // Never persistent before this transaction: back to plain data.
        PersistentNew
        | PersistentNewDeleted
        | PersistentNewFlushed
        | PersistentNewFlushedDirty
        | PersistentNewFlushedDeleted
        | AutoPersistentNew
        | AutoPersistentNewFlushed
        | AutoPersistentNewFlushedDirty
        | AutoPersistentPending => dispose_restored(restore_values),

        PersistentClean
        | PersistentDirty
        | PersistentFlushed
        | PersistentFlushedDirty
        | PersistentDeleted
        | PersistentDeletedFlushed => rollback_retained(restore_values),

        TransientDirty => {
            let mut transition = Transition {
                next: TransientClean,
                effects: Effects {
                    clear_dirty: true,
                    drop_before_image: true,
                    ..Effects::default()
                },
            };
            if restore_values {
                transition.effects.restore_before_image = true;
            } else {
                transition.effects.unset_container_fields = true;
            }
            transition
        }

        Transient | TransientClean | Hollow | PersistentNontransactional => {
            Transition::stay(state)
        }
    }
}

/// Evict drops a clean instance's values for lazy reload. Ignored on dirty,
/// new, and deleted instances.
pub fn evict(state: LifecycleState) -> Transition {
    match state {
        PersistentClean | PersistentNontransactional => Transition {
            next: Hollow,
            effects: Effects {
                clear_dirty: true,
                clear_loaded: true,
                ..Effects::default()
            },
        },
        other => Transition::stay(other),
    }
}

/// Refresh re-reads field values from the store, discarding uncommitted
/// writes.
pub fn refresh(state: LifecycleState) -> RefreshAction {
    let reload_to = |next| {
        RefreshAction::Reload(Transition {
            next,
            effects: Effects {
                clear_dirty: true,
                drop_before_image: true,
                ..Effects::default()
            },
        })
    };

    match state {
        PersistentDirty => reload_to(PersistentClean),
        PersistentFlushedDirty => reload_to(PersistentFlushed),
        PersistentClean | PersistentFlushed | PersistentNontransactional => {
            RefreshAction::Reload(Transition::stay(state))
        }
        _ => RefreshAction::Noop,
    }
}

/// Field read. `loaded` is the field's loaded bit; `txn_active` decides the
/// landing state of a hollow instance's first load.
pub fn read_field(
    state: LifecycleState,
    loaded: bool,
    txn_active: bool,
) -> Result<ReadAction, Denial> {
    if state.is_deleted() {
        return Err(Denial::Invalid);
    }

    if loaded {
        return Ok(ReadAction::Plain);
    }

    if state.allows_lazy_load() {
        let next = match state {
            Hollow if txn_active => PersistentClean,
            Hollow => PersistentNontransactional,
            other => other,
        };
        return Ok(ReadAction::Load { next });
    }

    // Transient and new instances carry every field from construction.
    Ok(ReadAction::Plain)
}

/// Field write: the "became dirty" transitions.
pub fn write_field(state: LifecycleState, txn_active: bool) -> Result<Transition, Denial> {
    match state {
        _ if state.is_deleted() => Err(Denial::Invalid),
        AutoPersistentPending => Err(Denial::Invalid),

        Transient | TransientDirty | PersistentNew | PersistentDirty
        | PersistentNewFlushedDirty | PersistentFlushedDirty | AutoPersistentNew
        | AutoPersistentNewFlushedDirty => Ok(Transition::stay(state)),

        TransientClean => Ok(Transition::to(TransientDirty)),
        PersistentClean => Ok(Transition::to(PersistentDirty)),
        PersistentNewFlushed => Ok(Transition::to(PersistentNewFlushedDirty)),
        PersistentFlushed => Ok(Transition::to(PersistentFlushedDirty)),
        AutoPersistentNewFlushed => Ok(Transition::to(AutoPersistentNewFlushedDirty)),

        Hollow | PersistentNontransactional => {
            if txn_active {
                Ok(Transition::to(PersistentDirty))
            } else {
                Err(Denial::NoActiveTransaction)
            }
        }

        _ => Ok(Transition::stay(state)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FlushOutcome;

    #[test]
    fn test_make_persistent_promotes_auto_persistent_lineage() {
        assert_eq!(make_persistent(AutoPersistentNew).next, PersistentNew);
        assert_eq!(
            make_persistent(AutoPersistentNewFlushed).next,
            PersistentNewFlushed
        );
        assert_eq!(
            make_persistent(AutoPersistentPending).next,
            PersistentNewFlushed
        );
    }

    #[test]
    fn test_make_persistent_is_noop_when_already_persistent() {
        for state in [PersistentClean, PersistentDirty, Hollow, PersistentNew] {
            assert!(make_persistent(state).is_noop(state));
        }
    }

    #[test]
    fn test_delete_on_transient_is_invalid() {
        assert_eq!(delete(Transient), Err(Denial::Invalid));
        assert_eq!(delete(TransientDirty), Err(Denial::Invalid));
    }

    #[test]
    fn test_second_delete_is_already_deleted() {
        for state in [
            PersistentDeleted,
            PersistentNewDeleted,
            PersistentNewFlushedDeleted,
            PersistentDeletedFlushed,
        ] {
            assert_eq!(delete(state), Err(Denial::AlreadyDeleted));
        }
    }

    #[test]
    fn test_never_flushed_delete_needs_no_store_call() {
        assert_eq!(delete(PersistentNew).unwrap().next, PersistentNewDeleted);
        assert_eq!(
            flush_action(PersistentNewDeleted, false),
            FlushAction::Noop
        );
    }

    #[test]
    fn test_flushed_delete_defers_a_store_delete() {
        let next = delete(PersistentNewFlushed).unwrap().next;
        assert_eq!(next, PersistentNewFlushedDeleted);
        assert_eq!(
            flush_action(next, false),
            FlushAction::Store(StoreOp::Delete)
        );
    }

    #[test]
    fn test_flush_outcomes_for_new_instances() {
        let complete = after_flush(PersistentNew, FlushOutcome::Complete);
        assert_eq!(complete.next, PersistentNewFlushed);
        assert!(complete.effects.clear_dirty);

        let partial = after_flush(PersistentNew, FlushOutcome::Partial);
        assert_eq!(partial.next, PersistentNewFlushedDirty);
        assert!(!partial.effects.clear_dirty);

        let none = after_flush(PersistentNew, FlushOutcome::None);
        assert!(none.is_noop(PersistentNew));
    }

    #[test]
    fn test_unreachable_auto_persistent_skips_the_store() {
        assert_eq!(
            flush_action(AutoPersistentNew, true),
            FlushAction::SkipUnreachable
        );
        assert_eq!(
            flush_action(AutoPersistentNewFlushed, true),
            FlushAction::DeleteUnreachable
        );
    }

    #[test]
    fn test_reachable_auto_persistent_inserts_normally() {
        assert_eq!(
            flush_action(AutoPersistentNew, false),
            FlushAction::Store(StoreOp::Insert)
        );
    }

    #[test]
    fn test_commit_retain_values() {
        let transition = commit(PersistentDirty, true);
        assert_eq!(transition.next, PersistentNontransactional);
        assert!(transition.effects.clear_dirty);
        assert!(!transition.effects.clear_loaded);
    }

    #[test]
    fn test_commit_without_retain_hollows() {
        let transition = commit(PersistentFlushed, false);
        assert_eq!(transition.next, Hollow);
        assert!(transition.effects.clear_loaded);
        assert!(transition.effects.clear_dirty);
    }

    #[test]
    fn test_auto_persistent_commit_disposes_regardless_of_retain() {
        for retain in [true, false] {
            for state in [
                AutoPersistentNew,
                AutoPersistentNewFlushed,
                AutoPersistentPending,
            ] {
                let transition = commit(state, retain);
                assert_eq!(transition.next, Transient);
                assert!(transition.effects.disconnect);
            }
        }
    }

    #[test]
    fn test_rollback_restore_values() {
        let transition = rollback(PersistentDirty, true);
        assert_eq!(transition.next, PersistentNontransactional);
        assert!(transition.effects.restore_before_image);
        assert!(transition.effects.clear_dirty);
    }

    #[test]
    fn test_rollback_without_restore_unsets_containers() {
        let transition = rollback(PersistentDirty, false);
        assert_eq!(transition.next, Hollow);
        assert!(transition.effects.unset_container_fields);
    }

    #[test]
    fn test_rollback_new_lineage_disposes() {
        for state in [PersistentNew, PersistentNewFlushed, AutoPersistentNew] {
            let transition = rollback(state, false);
            assert_eq!(transition.next, Transient);
            assert!(transition.effects.disconnect);
        }
    }

    #[test]
    fn test_write_on_clean_becomes_dirty() {
        assert_eq!(write_field(PersistentClean, true).unwrap().next, PersistentDirty);
        assert_eq!(
            write_field(PersistentNewFlushed, true).unwrap().next,
            PersistentNewFlushedDirty
        );
    }

    #[test]
    fn test_write_on_deleted_is_invalid() {
        assert_eq!(write_field(PersistentDeleted, true), Err(Denial::Invalid));
    }

    #[test]
    fn test_write_outside_transaction_needs_one() {
        assert_eq!(
            write_field(PersistentNontransactional, false),
            Err(Denial::NoActiveTransaction)
        );
        assert_eq!(
            write_field(PersistentNontransactional, true).unwrap().next,
            PersistentDirty
        );
    }

    #[test]
    fn test_hollow_read_lands_by_transaction_state() {
        match read_field(Hollow, false, true).unwrap() {
            ReadAction::Load { next } => assert_eq!(next, PersistentClean),
            other => panic!("expected load, got {:?}", other),
        }
        match read_field(Hollow, false, false).unwrap() {
            ReadAction::Load { next } => assert_eq!(next, PersistentNontransactional),
            other => panic!("expected load, got {:?}", other),
        }
    }

    #[test]
    fn test_read_on_deleted_is_invalid() {
        assert_eq!(read_field(PersistentDeleted, true, true), Err(Denial::Invalid));
    }

    #[test]
    fn test_evict_only_touches_clean_instances() {
        assert_eq!(evict(PersistentClean).next, Hollow);
        assert_eq!(evict(PersistentNontransactional).next, Hollow);
        assert!(evict(PersistentDirty).is_noop(PersistentDirty));
        assert!(evict(PersistentNew).is_noop(PersistentNew));
    }

    #[test]
    fn test_refresh_returns_dirty_to_clean() {
        match refresh(PersistentDirty) {
            RefreshAction::Reload(transition) => {
                assert_eq!(transition.next, PersistentClean);
                assert!(transition.effects.clear_dirty);
            }
            other => panic!("expected reload, got {:?}", other),
        }
        assert_eq!(refresh(PersistentNew), RefreshAction::Noop);
    }
}
