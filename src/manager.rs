// ============================================================================
// State Manager
// ============================================================================
//
// The per-instance controller: owns the tracked instance, its current
// lifecycle state, the loaded/dirty field tracker, and the auto-persistent
// flag. Every application-triggered event is dispatched to the pure
// transition table and the returned effects are applied here, together with
// the at-most-one store call a transition may carry. The dirty-implies-
// loaded invariant is verified after every transition.
//
// ============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::core::{InstanceId, PersistError, Result, Value};
use crate::instance::{BeforeImage, TrackedInstance};
use crate::lifecycle::transitions::{self, Denial, FlushAction, ReadAction, RefreshAction, StoreOp, Transition};
use crate::lifecycle::{LifecycleEvent, LifecycleState};
use crate::metadata::{ClassMetadata, FieldModifier};
use crate::store::{FlushOutcome, InstanceView, StoreManager};
use crate::tracker::{FieldBitSet, FieldTracker};
use crate::transaction::Transaction;

/// Per-instance bookkeeping: enrollment time, last successful store write,
/// and an opportunistic-locking version bumped at commit of a change.
#[derive(Debug, Clone)]
pub struct InstanceMeta {
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl InstanceMeta {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            enrolled_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

/// The per-instance lifecycle controller.
///
/// # Thread Safety
/// A StateManager belongs to exactly one transaction context and must only
/// be driven by that context's thread.
#[derive(Debug)]
pub struct StateManager {
    id: InstanceId,
    class: Arc<ClassMetadata>,
    instance: TrackedInstance,
    state: LifecycleState,
    tracker: FieldTracker,
    auto_persistent: bool,
    reachability_root: bool,
    connected: bool,
    before_image: Option<BeforeImage>,
    meta: InstanceMeta,
}

impl StateManager {
    /// Enroll a new instance, explicitly persisted or pulled in by
    /// reachability. Construction with defaults counts as materialized, so
    /// every field starts loaded.
    pub fn enroll_new(
        id: InstanceId,
        class: Arc<ClassMetadata>,
        instance: TrackedInstance,
        auto: bool,
    ) -> Self {
        let mut tracker = FieldTracker::new(class.field_count());
        tracker.set_all_loaded();

        let state = if auto {
            LifecycleState::AutoPersistentNew
        } else {
            LifecycleState::PersistentNew
        };
        debug!(instance = %id, class = class.name(), state = %state, "enroll");

        Self {
            id,
            class,
            instance,
            state,
            tracker,
            auto_persistent: auto,
            reachability_root: !auto,
            connected: true,
            before_image: None,
            meta: InstanceMeta::new(Utc::now()),
        }
    }

    /// Enroll a transient instance for transactional field tracking only.
    pub fn enroll_transactional(
        id: InstanceId,
        class: Arc<ClassMetadata>,
        instance: TrackedInstance,
    ) -> Self {
        let mut tracker = FieldTracker::new(class.field_count());
        tracker.set_all_loaded();
        debug!(instance = %id, class = class.name(), "enroll transactional");

        Self {
            id,
            class,
            instance,
            state: LifecycleState::TransientClean,
            tracker,
            auto_persistent: false,
            reachability_root: false,
            connected: true,
            before_image: None,
            meta: InstanceMeta::new(Utc::now()),
        }
    }

    /// Enroll a known stored instance without materializing any field;
    /// values reload lazily on access.
    pub fn enroll_hollow(id: InstanceId, class: Arc<ClassMetadata>) -> Self {
        let tracker = FieldTracker::new(class.field_count());
        let instance = TrackedInstance::new(class.name(), class.default_row());
        debug!(instance = %id, class = class.name(), "enroll hollow");

        Self {
            id,
            class,
            instance,
            state: LifecycleState::Hollow,
            tracker,
            auto_persistent: false,
            reachability_root: true,
            connected: true,
            before_image: None,
            meta: InstanceMeta::new(Utc::now()),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn class(&self) -> &ClassMetadata {
        &self.class
    }

    pub fn instance(&self) -> &TrackedInstance {
        &self.instance
    }

    pub fn tracker(&self) -> &FieldTracker {
        &self.tracker
    }

    pub fn meta(&self) -> &InstanceMeta {
        &self.meta
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_auto_persistent(&self) -> bool {
        self.auto_persistent
    }

    pub fn is_reachability_root(&self) -> bool {
        self.reachability_root
    }

    pub fn mark_reachability_root(&mut self) {
        self.reachability_root = true;
    }

    /// Instances referenced from this one's fields.
    pub fn references(&self) -> Vec<InstanceId> {
        self.instance.references()
    }

    /// Hand the plain data object back once the manager is done with it.
    pub fn into_instance(self) -> TrackedInstance {
        self.instance
    }

    fn view(&self) -> InstanceView<'_> {
        InstanceView {
            instance: self.id,
            class: self.instance.class_name(),
            loaded: self.tracker.loaded(),
            dirty: self.tracker.dirty(),
            values: self.instance.values(),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle requests
    // -----------------------------------------------------------------------

    /// Explicit persist request or commit-time promotion; promotes
    /// auto-persistent instances and is a no-op on anything already
    /// persistent. Root marking is the coordinator's call.
    pub fn make_persistent(&mut self) -> Result<()> {
        self.guard(LifecycleEvent::MakePersistent)?;
        let transition = transitions::make_persistent(self.state);
        self.apply(LifecycleEvent::MakePersistent, transition)
    }

    pub fn make_transactional(&mut self) -> Result<()> {
        self.guard(LifecycleEvent::MakeTransactional)?;
        let transition = transitions::make_transactional(self.state)
            .map_err(|denial| self.deny(LifecycleEvent::MakeTransactional, denial))?;
        self.apply(LifecycleEvent::MakeTransactional, transition)
    }

    pub fn make_nontransactional(&mut self) -> Result<()> {
        self.guard(LifecycleEvent::MakeNontransactional)?;
        let transition = transitions::make_nontransactional(self.state)
            .map_err(|denial| self.deny(LifecycleEvent::MakeNontransactional, denial))?;
        self.apply(LifecycleEvent::MakeNontransactional, transition)
    }

    /// Release the instance from management. A hollow instance fetches its
    /// remaining fields first so the application keeps a complete object.
    pub fn make_transient(&mut self, store: &mut dyn StoreManager) -> Result<()> {
        self.guard(LifecycleEvent::MakeTransient)?;
        let transition = transitions::make_transient(self.state)
            .map_err(|denial| self.deny(LifecycleEvent::MakeTransient, denial))?;

        if self.state.allows_lazy_load() {
            self.load_missing_fields(store)?;
        }
        self.apply(LifecycleEvent::MakeTransient, transition)
    }

    pub fn delete(&mut self) -> Result<()> {
        self.guard(LifecycleEvent::Delete)?;
        let transition = transitions::delete(self.state)
            .map_err(|denial| self.deny(LifecycleEvent::Delete, denial))?;
        self.apply(LifecycleEvent::Delete, transition)
    }

    pub fn evict(&mut self) -> Result<()> {
        self.guard(LifecycleEvent::Evict)?;
        let transition = transitions::evict(self.state);
        self.apply(LifecycleEvent::Evict, transition)
    }

    /// Re-read this instance's loaded fields from the store, discarding
    /// uncommitted writes.
    pub fn refresh(&mut self, store: &mut dyn StoreManager) -> Result<()> {
        self.guard(LifecycleEvent::Refresh)?;
        match transitions::refresh(self.state) {
            RefreshAction::Noop => Ok(()),
            RefreshAction::Reload(transition) => {
                let fields = self.persistent_loaded_fields();
                let loaded = store.load_fields(self.id, self.instance.class_name(), &fields)?;
                for (index, value) in loaded {
                    self.instance.set_value(index, value);
                }
                self.apply(LifecycleEvent::Refresh, transition)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Field accessor hooks
    // -----------------------------------------------------------------------

    /// Accessor hook for field reads. May issue a single synchronous store
    /// load when the field is not yet materialized.
    pub fn read_field(
        &mut self,
        index: usize,
        txn: &Transaction,
        store: &mut dyn StoreManager,
    ) -> Result<Value> {
        self.guard(LifecycleEvent::ReadField)?;
        let field = self.class.field(index)?;

        // Unmanaged fields bypass tracking entirely.
        if !field.is_managed() {
            return Ok(self.instance.value(index).cloned().unwrap_or(Value::Null));
        }

        let action = transitions::read_field(self.state, self.tracker.is_loaded(index), txn.is_active())
            .map_err(|denial| self.deny(LifecycleEvent::ReadField, denial))?;

        match action {
            ReadAction::Plain => {}
            ReadAction::Load { next } => {
                let value = if field.modifier == FieldModifier::Transactional {
                    // Transactional fields never hit the store; they
                    // materialize to their declared default.
                    field.default_value.clone()
                } else {
                    store.load_field(self.id, self.instance.class_name(), index)?
                };
                self.instance.set_value(index, value);
                self.tracker.mark_loaded(index);
                self.apply(LifecycleEvent::ReadField, Transition::to(next))?;
            }
        }

        Ok(self.instance.value(index).cloned().unwrap_or(Value::Null))
    }

    /// Accessor hook for field writes: marks the field dirty (and loaded),
    /// captures the before image on the first write of a transaction, and
    /// requests the state's "became dirty" transition.
    pub fn write_field(&mut self, index: usize, value: Value, txn: &Transaction) -> Result<()> {
        self.guard(LifecycleEvent::WriteField)?;
        let field = self.class.field(index)?;

        if !field.is_managed() {
            self.instance.set_value(index, value);
            return Ok(());
        }

        let transition = transitions::write_field(self.state, txn.is_active())
            .map_err(|denial| self.deny(LifecycleEvent::WriteField, denial))?;

        if self.before_image.is_none() && self.state != LifecycleState::Transient {
            self.before_image = Some(BeforeImage::capture(&self.instance, self.tracker.loaded()));
        }

        self.instance.set_value(index, value);
        self.tracker.mark_dirty(index);
        self.apply(LifecycleEvent::WriteField, transition)
    }

    // -----------------------------------------------------------------------
    // Transaction boundary
    // -----------------------------------------------------------------------

    /// Propagate this instance's pending work to the store. `unreachable` is
    /// set by the coordinator for auto-persistent instances its commit-time
    /// sweep could not reach.
    pub fn flush(
        &mut self,
        txn: &Transaction,
        store: &mut dyn StoreManager,
        unreachable: bool,
    ) -> Result<FlushOutcome> {
        self.guard(LifecycleEvent::Flush)?;
        if !txn.is_active() {
            return Err(PersistError::NoActiveTransaction {
                event: LifecycleEvent::Flush.name(),
            });
        }

        let action = transitions::flush_action(self.state, unreachable && txn.inside_commit());
        match action {
            FlushAction::Noop => Ok(FlushOutcome::Complete),

            FlushAction::SkipUnreachable => {
                // Unreachable and never stored: no wasted write for an
                // instance about to vanish.
                trace!(instance = %self.id, "flush skipped for unreachable instance");
                self.apply(
                    LifecycleEvent::Flush,
                    Transition {
                        next: LifecycleState::AutoPersistentPending,
                        effects: transitions::Effects {
                            clear_dirty: true,
                            ..Default::default()
                        },
                    },
                )?;
                Ok(FlushOutcome::Complete)
            }

            FlushAction::DeleteUnreachable => {
                let outcome = store.delete(self.view())?;
                if outcome == FlushOutcome::Complete {
                    self.apply(
                        LifecycleEvent::Flush,
                        Transition {
                            next: LifecycleState::AutoPersistentPending,
                            effects: transitions::Effects {
                                clear_dirty: true,
                                ..Default::default()
                            },
                        },
                    )?;
                }
                Ok(outcome)
            }

            FlushAction::Store(op) => {
                let outcome = match op {
                    StoreOp::Insert => store.insert(self.view())?,
                    StoreOp::Update => store.update(self.view())?,
                    StoreOp::Delete => store.delete(self.view())?,
                };
                trace!(instance = %self.id, state = %self.state, op = ?op, outcome = %outcome, "flush");

                if outcome == FlushOutcome::Complete {
                    self.meta.updated_at = Utc::now();
                }
                let transition = transitions::after_flush(self.state, outcome);
                self.apply(LifecycleEvent::Flush, transition)?;
                Ok(outcome)
            }
        }
    }

    /// Commit boundary. Idempotent: the post-commit states all map commit to
    /// a no-op, so a second call within the boundary changes nothing.
    pub fn commit(&mut self, retain_values: bool) -> Result<()> {
        self.guard(LifecycleEvent::Commit)?;
        let changed = self.state.is_new()
            || self.state.is_dirty()
            || self.state == LifecycleState::PersistentFlushed;
        let transition = transitions::commit(self.state, retain_values);
        self.apply(LifecycleEvent::Commit, transition)?;

        if changed && self.state != LifecycleState::Transient {
            self.meta.version += 1;
            self.meta.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Rollback boundary; same idempotence argument as commit.
    pub fn rollback(&mut self, restore_values: bool) -> Result<()> {
        self.guard(LifecycleEvent::Rollback)?;
        let transition = transitions::rollback(self.state, restore_values);
        self.apply(LifecycleEvent::Rollback, transition)
    }

    /// Sever the instance from this manager. Irreversible: regaining managed
    /// status requires a fresh enrollment.
    pub fn disconnect(&mut self) {
        debug!(instance = %self.id, state = %self.state, "disconnect");
        self.connected = false;
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn guard(&self, event: LifecycleEvent) -> Result<()> {
        if !self.connected {
            return Err(PersistError::IllegalState {
                instance: self.id,
                event: event.name(),
            });
        }
        Ok(())
    }

    fn deny(&self, event: LifecycleEvent, denial: Denial) -> PersistError {
        match denial {
            Denial::Invalid => PersistError::InvalidTransition {
                instance: self.id,
                event: event.name(),
                state: self.state.name(),
            },
            Denial::AlreadyDeleted => PersistError::AlreadyDeleted {
                instance: self.id,
                state: self.state.name(),
            },
            Denial::NoActiveTransaction => PersistError::NoActiveTransaction {
                event: event.name(),
            },
        }
    }

    /// Apply a transition's effects, switch the state, and verify the
    /// loaded/dirty invariant.
    fn apply(&mut self, event: LifecycleEvent, transition: Transition) -> Result<()> {
        let effects = transition.effects;

        if effects.set_all_loaded {
            self.tracker.set_all_loaded();
        }
        if effects.restore_before_image {
            if let Some(image) = self.before_image.take() {
                let loaded = image.restore_into(&mut self.instance);
                self.tracker.restore_loaded(loaded);
            }
        }
        if effects.unset_container_fields {
            for index in self.instance.unset_container_fields() {
                self.tracker.unset(index);
            }
        }
        if effects.clear_loaded {
            self.tracker.clear_all();
        } else if effects.clear_dirty {
            self.tracker.clear_dirty();
        }
        if effects.drop_before_image {
            self.before_image = None;
        }

        if transition.next != self.state {
            trace!(
                instance = %self.id,
                event = %event,
                from = %self.state,
                to = %transition.next,
                "transition"
            );
            self.state = transition.next;
        }

        if effects.disconnect {
            self.connected = false;
            if self.state == LifecycleState::Transient {
                self.auto_persistent = false;
            }
        }

        self.tracker.verify(self.id)
    }

    /// Loaded, store-backed fields (transactional fields never come from the
    /// store).
    fn persistent_loaded_fields(&self) -> FieldBitSet {
        let mut fields = self.tracker.loaded().clone();
        for (index, field) in self.class.fields().iter().enumerate() {
            if field.modifier != FieldModifier::Persistent {
                fields.clear(index);
            }
        }
        fields
    }

    fn load_missing_fields(&mut self, store: &mut dyn StoreManager) -> Result<()> {
        let mut missing = FieldBitSet::new(self.class.field_count());
        for (index, field) in self.class.fields().iter().enumerate() {
            if field.modifier == FieldModifier::Persistent && !self.tracker.is_loaded(index) {
                missing.set(index);
            }
        }
        if missing.none() {
            return Ok(());
        }

        let loaded = store.load_fields(self.id, self.instance.class_name(), &missing)?;
        for (index, value) in loaded {
            self.instance.set_value(index, value);
            self.tracker.mark_loaded(index);
        }
        Ok(())
    }
}
