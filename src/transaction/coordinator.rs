// ============================================================================
// Persistence Context (transaction coordinator)
// ============================================================================
//
// Owns every enrolled StateManager, the unenrolled-instance workspace, the
// store manager, and the transaction. Serializes all lifecycle events,
// drives the flush passes (re-invoking flush while partial outcomes make
// progress), and runs the commit-time reachability sweep that promotes
// reachable auto-persistent instances and discards unreachable ones.
//
// ============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::core::{InstanceId, PersistError, Result, Value};
use crate::instance::TrackedInstance;
use crate::lifecycle::{LifecycleEvent, LifecycleState};
use crate::manager::StateManager;
use crate::metadata::{ClassMetadata, MetadataRegistry};
use crate::store::{FlushOutcome, StoreManager};
use crate::transaction::{Transaction, TransactionOptions};

/// The single entry point applications and the enhancer-inserted accessor
/// hooks talk to.
///
/// # Examples
///
/// ```
/// use rustpersist::metadata::{ClassMetadata, FieldMetadata, MetadataRegistry};
/// use rustpersist::store::MemoryStore;
/// use rustpersist::transaction::PersistenceContext;
/// use rustpersist::Value;
///
/// # fn main() -> rustpersist::Result<()> {
/// let mut registry = MetadataRegistry::new();
/// registry.register(ClassMetadata::new(
///     "Person",
///     vec![
///         FieldMetadata::persistent("name"),
///         FieldMetadata::persistent("age"),
///     ],
/// ))?;
///
/// let mut ctx = PersistenceContext::new(registry, MemoryStore::new());
/// ctx.begin()?;
///
/// let id = ctx.new_instance("Person", vec![Value::Text("ada".into()), Value::Integer(36)])?;
/// ctx.make_persistent(id)?;
/// ctx.commit()?;
///
/// assert!(ctx.store().contains(id));
/// # Ok(())
/// # }
/// ```
pub struct PersistenceContext<S: StoreManager> {
    registry: MetadataRegistry,
    store: S,
    txn: Transaction,
    workspace: HashMap<InstanceId, TrackedInstance>,
    managers: HashMap<InstanceId, StateManager>,
    enroll_order: Vec<InstanceId>,
}

impl<S: StoreManager> PersistenceContext<S> {
    pub fn new(registry: MetadataRegistry, store: S) -> Self {
        Self::with_options(registry, store, TransactionOptions::default())
    }

    pub fn with_options(registry: MetadataRegistry, store: S, options: TransactionOptions) -> Self {
        Self {
            registry,
            store,
            txn: Transaction::new(options),
            workspace: HashMap::new(),
            managers: HashMap::new(),
            enroll_order: Vec::new(),
        }
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn register_class(&mut self, metadata: ClassMetadata) -> Result<Arc<ClassMetadata>> {
        self.registry.register(metadata)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn transaction(&self) -> &Transaction {
        &self.txn
    }

    pub fn set_retain_values(&mut self, retain: bool) {
        self.txn.set_retain_values(retain);
    }

    pub fn set_restore_values(&mut self, restore: bool) {
        self.txn.set_restore_values(restore);
    }

    // -----------------------------------------------------------------------
    // Instance workspace
    // -----------------------------------------------------------------------

    /// Create a plain (transient) instance of a registered class. Missing
    /// trailing values fall back to the declared defaults.
    pub fn new_instance(&mut self, class: &str, values: Vec<Value>) -> Result<InstanceId> {
        let metadata = self.registry.lookup(class)?;
        let mut row = metadata.default_row();
        if values.len() > row.len() {
            return Err(PersistError::FieldOutOfRange {
                class: metadata.name().to_string(),
                index: values.len() - 1,
                count: row.len(),
            });
        }
        for (index, value) in values.into_iter().enumerate() {
            row[index] = value;
        }

        let id = InstanceId::new();
        self.workspace
            .insert(id, TrackedInstance::new(metadata.name(), row));
        Ok(id)
    }

    /// Enroll a known stored instance hollow, for lazy materialization.
    pub fn retrieve(&mut self, class: &str, id: InstanceId) -> Result<()> {
        if self.managers.contains_key(&id) {
            return Ok(());
        }
        if self.workspace.contains_key(&id) {
            return Err(PersistError::InvalidTransition {
                instance: id,
                event: "retrieve",
                state: LifecycleState::Transient.name(),
            });
        }

        let metadata = self.registry.lookup(class)?;
        let manager = StateManager::enroll_hollow(id, metadata);
        self.managers.insert(id, manager);
        self.enroll_order.push(id);
        Ok(())
    }

    /// Reclaim a plain data object once it has left management.
    pub fn release(&mut self, id: InstanceId) -> Result<TrackedInstance> {
        if let Some(manager) = self.managers.get(&id) {
            return Err(PersistError::InvalidTransition {
                instance: id,
                event: "release",
                state: manager.state().name(),
            });
        }
        self.workspace
            .remove(&id)
            .ok_or(PersistError::UnknownInstance(id))
    }

    /// Lifecycle state of an instance known to this context. Unenrolled
    /// workspace instances report `TRANSIENT`.
    pub fn state_of(&self, id: InstanceId) -> Option<LifecycleState> {
        if let Some(manager) = self.managers.get(&id) {
            Some(manager.state())
        } else if self.workspace.contains_key(&id) {
            Some(LifecycleState::Transient)
        } else {
            None
        }
    }

    pub fn is_managed(&self, id: InstanceId) -> bool {
        self.managers.contains_key(&id)
    }

    /// Read-only view of the manager owning an enrolled instance.
    pub fn manager(&self, id: InstanceId) -> Option<&StateManager> {
        self.managers.get(&id)
    }

    pub fn managed_count(&self) -> usize {
        self.managers.len()
    }

    /// The persistent version counter of a managed instance.
    pub fn version_of(&self, id: InstanceId) -> Option<i64> {
        self.managers.get(&id).map(|manager| manager.meta().version)
    }

    // -----------------------------------------------------------------------
    // Lifecycle requests
    // -----------------------------------------------------------------------

    /// Explicitly persist an instance, recording it as a reachability root
    /// and pulling every transient instance it references into the
    /// auto-persistent lineage.
    pub fn make_persistent(&mut self, id: InstanceId) -> Result<()> {
        self.require_active(LifecycleEvent::MakePersistent)?;

        if let Some(manager) = self.managers.get_mut(&id) {
            manager.mark_reachability_root();
            manager.make_persistent()?;
        } else if self.workspace.contains_key(&id) {
            self.enroll(id, false)?;
        } else {
            return Err(PersistError::UnknownInstance(id));
        }

        self.auto_enroll_from(id)
    }

    pub fn delete_persistent(&mut self, id: InstanceId) -> Result<()> {
        self.require_active(LifecycleEvent::Delete)?;

        if let Some(manager) = self.managers.get_mut(&id) {
            manager.delete()
        } else if self.workspace.contains_key(&id) {
            Err(PersistError::InvalidTransition {
                instance: id,
                event: LifecycleEvent::Delete.name(),
                state: LifecycleState::Transient.name(),
            })
        } else {
            Err(PersistError::UnknownInstance(id))
        }
    }

    /// Track transactional fields of a transient instance.
    pub fn make_transactional(&mut self, id: InstanceId) -> Result<()> {
        if let Some(manager) = self.managers.get_mut(&id) {
            return manager.make_transactional();
        }

        let instance = self
            .workspace
            .remove(&id)
            .ok_or(PersistError::UnknownInstance(id))?;
        let metadata = self.registry.lookup(instance.class_name())?;
        self.managers
            .insert(id, StateManager::enroll_transactional(id, metadata, instance));
        self.enroll_order.push(id);
        Ok(())
    }

    pub fn make_nontransactional(&mut self, id: InstanceId) -> Result<()> {
        match self.managers.get_mut(&id) {
            Some(manager) => {
                manager.make_nontransactional()?;
                self.reclaim_if_disconnected(id);
                Ok(())
            }
            None if self.workspace.contains_key(&id) => Ok(()),
            None => Err(PersistError::UnknownInstance(id)),
        }
    }

    /// Release an instance from management, handing it back as plain data.
    pub fn make_transient(&mut self, id: InstanceId) -> Result<()> {
        match self.managers.get_mut(&id) {
            Some(manager) => {
                manager.make_transient(&mut self.store)?;
                self.reclaim_if_disconnected(id);
                Ok(())
            }
            None if self.workspace.contains_key(&id) => Ok(()),
            None => Err(PersistError::UnknownInstance(id)),
        }
    }

    pub fn evict(&mut self, id: InstanceId) -> Result<()> {
        match self.managers.get_mut(&id) {
            Some(manager) => manager.evict(),
            None if self.workspace.contains_key(&id) => Ok(()),
            None => Err(PersistError::UnknownInstance(id)),
        }
    }

    pub fn refresh(&mut self, id: InstanceId) -> Result<()> {
        match self.managers.get_mut(&id) {
            Some(manager) => manager.refresh(&mut self.store),
            None if self.workspace.contains_key(&id) => Ok(()),
            None => Err(PersistError::UnknownInstance(id)),
        }
    }

    // -----------------------------------------------------------------------
    // Field accessor hooks
    // -----------------------------------------------------------------------

    pub fn read_field(&mut self, id: InstanceId, index: usize) -> Result<Value> {
        if let Some(manager) = self.managers.get_mut(&id) {
            return manager.read_field(index, &self.txn, &mut self.store);
        }

        let instance = self
            .workspace
            .get(&id)
            .ok_or(PersistError::UnknownInstance(id))?;
        let metadata = self.registry.lookup(instance.class_name())?;
        metadata.field(index)?;
        Ok(instance.value(index).cloned().unwrap_or(Value::Null))
    }

    pub fn write_field(&mut self, id: InstanceId, index: usize, value: Value) -> Result<()> {
        if let Some(manager) = self.managers.get_mut(&id) {
            manager.write_field(index, value, &self.txn)?;
            // A freshly written reference may pull a transient instance into
            // the auto-persistent lineage.
            if self
                .managers
                .get(&id)
                .map(|m| m.state().is_persistent())
                .unwrap_or(false)
            {
                self.auto_enroll_from(id)?;
            }
            return Ok(());
        }

        let instance = self
            .workspace
            .get_mut(&id)
            .ok_or(PersistError::UnknownInstance(id))?;
        let metadata = self.registry.lookup(instance.class_name())?;
        metadata.field(index)?;
        instance.set_value(index, value);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transaction boundary
    // -----------------------------------------------------------------------

    pub fn begin(&mut self) -> Result<()> {
        self.txn.begin()?;
        debug!(txn = %self.txn.id(), "begin");
        Ok(())
    }

    /// Propagate pending work to the store without committing. Partial
    /// outcomes are retried in later passes; a stalled pass surfaces a store
    /// failure.
    pub fn flush(&mut self) -> Result<()> {
        self.require_active(LifecycleEvent::Flush)?;
        self.auto_enroll_all()?;
        self.run_flush_passes(&HashSet::new())
    }

    /// Commit boundary: reachability sweep, promotion, flush passes, then
    /// the per-instance commit transition in enrollment order.
    ///
    /// On a flush error the transaction is left open (inside the commit
    /// boundary); the caller decides whether to roll back.
    pub fn commit(&mut self) -> Result<()> {
        self.require_active(LifecycleEvent::Commit)?;
        self.auto_enroll_all()?;

        let unreachable = self.unreachable_auto_persistent();
        for id in &unreachable {
            trace!(instance = %id, "unreachable at commit");
        }

        // Reachable auto-persistent instances become permanently persistent;
        // the rest dispose after the flush passes.
        for id in self.enroll_order.clone() {
            if unreachable.contains(&id) {
                continue;
            }
            if let Some(manager) = self.managers.get_mut(&id) {
                if manager.state().is_auto_persistent() {
                    manager.make_persistent()?;
                }
            }
        }

        self.txn.mark_committing()?;
        self.run_flush_passes(&unreachable)?;

        let retain = self.txn.retain_values();
        for id in self.enroll_order.clone() {
            if let Some(manager) = self.managers.get_mut(&id) {
                manager.commit(retain)?;
            }
            self.reclaim_if_disconnected(id);
        }

        debug!(txn = %self.txn.id(), "committed");
        self.txn.complete();
        Ok(())
    }

    /// Rollback boundary: every enrolled instance takes its rollback
    /// transition with the context's restore_values option.
    pub fn rollback(&mut self) -> Result<()> {
        self.require_active(LifecycleEvent::Rollback)?;

        let restore = self.txn.restore_values();
        for id in self.enroll_order.clone() {
            if let Some(manager) = self.managers.get_mut(&id) {
                manager.rollback(restore)?;
            }
            self.reclaim_if_disconnected(id);
        }

        debug!(txn = %self.txn.id(), "rolled back");
        self.txn.complete();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn require_active(&self, event: LifecycleEvent) -> Result<()> {
        if self.txn.is_active() {
            Ok(())
        } else {
            Err(PersistError::NoActiveTransaction { event: event.name() })
        }
    }

    fn enroll(&mut self, id: InstanceId, auto: bool) -> Result<()> {
        let instance = self
            .workspace
            .remove(&id)
            .ok_or(PersistError::UnknownInstance(id))?;
        let metadata = self.registry.lookup(instance.class_name())?;
        let manager = StateManager::enroll_new(id, metadata, instance, auto);
        self.managers.insert(id, manager);
        self.enroll_order.push(id);
        Ok(())
    }

    /// Pull transient instances referenced from `id` (transitively) into the
    /// auto-persistent lineage.
    fn auto_enroll_from(&mut self, id: InstanceId) -> Result<()> {
        let mut queue = vec![id];
        while let Some(current) = queue.pop() {
            let refs = match self.managers.get(&current) {
                Some(manager) if manager.state().is_persistent() => manager.references(),
                _ => continue,
            };
            for target in refs {
                if self.workspace.contains_key(&target) {
                    self.enroll(target, true)?;
                    queue.push(target);
                }
            }
        }
        Ok(())
    }

    fn auto_enroll_all(&mut self) -> Result<()> {
        for id in self.enroll_order.clone() {
            self.auto_enroll_from(id)?;
        }
        Ok(())
    }

    /// Auto-persistent instances no longer referenced, directly or
    /// transitively, from any permanently persistent instance.
    fn unreachable_auto_persistent(&self) -> HashSet<InstanceId> {
        let mut visited: HashSet<InstanceId> = HashSet::new();
        let mut queue: Vec<InstanceId> = Vec::new();

        for manager in self.managers.values() {
            let state = manager.state();
            if state.is_persistent() && !state.is_auto_persistent() && !state.is_deleted() {
                if visited.insert(manager.id()) {
                    queue.push(manager.id());
                }
            }
        }

        while let Some(current) = queue.pop() {
            let Some(manager) = self.managers.get(&current) else {
                continue;
            };
            for target in manager.references() {
                if self.managers.contains_key(&target) && visited.insert(target) {
                    queue.push(target);
                }
            }
        }

        self.managers
            .values()
            .filter(|manager| manager.state().is_auto_persistent())
            .map(|manager| manager.id())
            .filter(|id| !visited.contains(id))
            .collect()
    }

    /// Re-run flush passes while partial outcomes keep making progress.
    /// A pass that changes nothing while work remains is a store failure the
    /// caller must resolve.
    fn run_flush_passes(&mut self, unreachable: &HashSet<InstanceId>) -> Result<()> {
        let mut pass = 0u32;
        loop {
            let pending: Vec<InstanceId> = self
                .enroll_order
                .iter()
                .copied()
                .filter(|id| {
                    self.managers
                        .get(id)
                        .map(|manager| {
                            let state = manager.state();
                            state.needs_flush()
                                || (self.txn.inside_commit()
                                    && unreachable.contains(id)
                                    && state.is_auto_persistent()
                                    && state != LifecycleState::AutoPersistentPending)
                        })
                        .unwrap_or(false)
                })
                .collect();

            if pending.is_empty() {
                return Ok(());
            }

            pass += 1;
            trace!(pass, pending = pending.len(), "flush pass");

            let mut progress = false;
            for id in pending {
                let is_unreachable = unreachable.contains(&id);
                let Some(manager) = self.managers.get_mut(&id) else {
                    continue;
                };
                let before = manager.state();
                let outcome = manager.flush(&self.txn, &mut self.store, is_unreachable)?;
                if outcome == FlushOutcome::Complete || manager.state() != before {
                    progress = true;
                }
            }

            if !progress {
                return Err(PersistError::StoreFailure(format!(
                    "flush made no progress after pass {}; store kept deferring",
                    pass
                )));
            }
        }
    }

    fn reclaim_if_disconnected(&mut self, id: InstanceId) {
        let disconnected = self
            .managers
            .get(&id)
            .map(|manager| !manager.is_connected())
            .unwrap_or(false);

        if disconnected {
            if let Some(manager) = self.managers.remove(&id) {
                self.enroll_order.retain(|existing| *existing != id);
                self.workspace.insert(id, manager.into_instance());
            }
        }
    }
}
