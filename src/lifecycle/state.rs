use serde::{Deserialize, Serialize};

/// The lifecycle state of a tracked instance.
///
/// Exactly one state is active per instance at any instant. The transient
/// lineage covers unmanaged and transactional-transient instances; the
/// auto-persistent lineage covers instances made persistent by reachability
/// only, which may still be discarded at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Not managed; plain application data.
    Transient,
    /// Transient with transactional field tracking, no uncommitted writes.
    TransientClean,
    /// Transient with transactional field tracking and uncommitted writes.
    TransientDirty,
    /// Newly persistent in this transaction, not yet flushed.
    PersistentNew,
    /// Persistent, no uncommitted writes.
    PersistentClean,
    /// Persistent with uncommitted writes, not yet flushed.
    PersistentDirty,
    /// Persistent with no field values materialized; fields reload lazily.
    Hollow,
    /// Pre-existing persistent instance deleted in this transaction.
    PersistentDeleted,
    /// New instance deleted before ever being flushed; disposed at commit
    /// with no store call.
    PersistentNewDeleted,
    /// New instance fully flushed, no residual dirt.
    PersistentNewFlushed,
    /// New instance flushed with residual dirty fields awaiting another pass.
    PersistentNewFlushedDirty,
    /// Flushed new instance subsequently deleted; the store row must go.
    PersistentNewFlushedDeleted,
    /// Dirty instance fully flushed, no residual dirt.
    PersistentFlushed,
    /// Dirty instance flushed with residual dirty fields awaiting another
    /// pass.
    PersistentFlushedDirty,
    /// Deleted instance whose store delete has been flushed.
    PersistentDeletedFlushed,
    /// Persistent outside any transaction; values retained.
    PersistentNontransactional,
    /// Persistent through reachability only, not yet flushed.
    AutoPersistentNew,
    /// Auto-persistent, fully flushed.
    AutoPersistentNewFlushed,
    /// Auto-persistent, flushed with residual dirty fields.
    AutoPersistentNewFlushedDirty,
    /// Auto-persistent found unreachable during the commit sweep; pending
    /// disposal.
    AutoPersistentPending,
}

impl LifecycleState {
    /// Every state, for exhaustive table tests.
    pub const ALL: [LifecycleState; 20] = [
        Self::Transient,
        Self::TransientClean,
        Self::TransientDirty,
        Self::PersistentNew,
        Self::PersistentClean,
        Self::PersistentDirty,
        Self::Hollow,
        Self::PersistentDeleted,
        Self::PersistentNewDeleted,
        Self::PersistentNewFlushed,
        Self::PersistentNewFlushedDirty,
        Self::PersistentNewFlushedDeleted,
        Self::PersistentFlushed,
        Self::PersistentFlushedDirty,
        Self::PersistentDeletedFlushed,
        Self::PersistentNontransactional,
        Self::AutoPersistentNew,
        Self::AutoPersistentNewFlushed,
        Self::AutoPersistentNewFlushedDirty,
        Self::AutoPersistentPending,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Transient => "TRANSIENT",
            Self::TransientClean => "TRANSIENT_CLEAN",
            Self::TransientDirty => "TRANSIENT_DIRTY",
            Self::PersistentNew => "PERSISTENT_NEW",
            Self::PersistentClean => "PERSISTENT_CLEAN",
            Self::PersistentDirty => "PERSISTENT_DIRTY",
            Self::Hollow => "HOLLOW",
            Self::PersistentDeleted => "PERSISTENT_DELETED",
            Self::PersistentNewDeleted => "PERSISTENT_NEW_DELETED",
            Self::PersistentNewFlushed => "PERSISTENT_NEW_FLUSHED",
            Self::PersistentNewFlushedDirty => "PERSISTENT_NEW_FLUSHED_DIRTY",
            Self::PersistentNewFlushedDeleted => "PERSISTENT_NEW_FLUSHED_DELETED",
            Self::PersistentFlushed => "PERSISTENT_FLUSHED",
            Self::PersistentFlushedDirty => "PERSISTENT_FLUSHED_DIRTY",
            Self::PersistentDeletedFlushed => "PERSISTENT_DELETED_FLUSHED",
            Self::PersistentNontransactional => "PERSISTENT_NONTRANSACTIONAL",
            Self::AutoPersistentNew => "AUTO_PERSISTENT_NEW",
            Self::AutoPersistentNewFlushed => "AUTO_PERSISTENT_NEW_FLUSHED",
            Self::AutoPersistentNewFlushedDirty => "AUTO_PERSISTENT_NEW_FLUSHED_DIRTY",
            Self::AutoPersistentPending => "AUTO_PERSISTENT_PENDING",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient | Self::TransientClean | Self::TransientDirty
        )
    }

    pub fn is_persistent(&self) -> bool {
        !self.is_transient()
    }

    /// Persistent purely through reachability; may still be discarded.
    pub fn is_auto_persistent(&self) -> bool {
        matches!(
            self,
            Self::AutoPersistentNew
                | Self::AutoPersistentNewFlushed
                | Self::AutoPersistentNewFlushedDirty
                | Self::AutoPersistentPending
        )
    }

    pub fn is_deleted(&self) -> bool {
        matches!(
            self,
            Self::PersistentDeleted
                | Self::PersistentNewDeleted
                | Self::PersistentNewFlushedDeleted
                | Self::PersistentDeletedFlushed
        )
    }

    /// Newly persistent in the current transaction (explicit or by
    /// reachability).
    pub fn is_new(&self) -> bool {
        matches!(
            self,
            Self::PersistentNew
                | Self::PersistentNewDeleted
                | Self::PersistentNewFlushed
                | Self::PersistentNewFlushedDirty
                | Self::PersistentNewFlushedDeleted
                | Self::AutoPersistentNew
                | Self::AutoPersistentNewFlushed
                | Self::AutoPersistentNewFlushedDirty
                | Self::AutoPersistentPending
        )
    }

    /// Uncommitted changes exist (writes, creation, or deletion).
    pub fn is_dirty(&self) -> bool {
        matches!(
            self,
            Self::TransientDirty
                | Self::PersistentNew
                | Self::PersistentDirty
                | Self::PersistentNewFlushedDirty
                | Self::PersistentFlushedDirty
                | Self::AutoPersistentNew
                | Self::AutoPersistentNewFlushedDirty
        ) || self.is_deleted()
    }

    /// A row for this instance exists in the backing store.
    pub fn is_stored(&self) -> bool {
        matches!(
            self,
            Self::PersistentClean
                | Self::PersistentDirty
                | Self::Hollow
                | Self::PersistentDeleted
                | Self::PersistentNewFlushed
                | Self::PersistentNewFlushedDirty
                | Self::PersistentNewFlushedDeleted
                | Self::PersistentFlushed
                | Self::PersistentFlushedDirty
                | Self::PersistentNontransactional
                | Self::AutoPersistentNewFlushed
                | Self::AutoPersistentNewFlushedDirty
        )
    }

    /// Whether a flush pass has outstanding store work for this state.
    pub fn needs_flush(&self) -> bool {
        matches!(
            self,
            Self::PersistentNew
                | Self::PersistentDirty
                | Self::PersistentNewFlushedDirty
                | Self::PersistentFlushedDirty
                | Self::PersistentDeleted
                | Self::PersistentNewFlushedDeleted
                | Self::AutoPersistentNew
                | Self::AutoPersistentNewFlushedDirty
        )
    }

    /// States in which an unloaded field may be materialized from the store
    /// on read.
    pub fn allows_lazy_load(&self) -> bool {
        matches!(
            self,
            Self::Hollow
                | Self::PersistentClean
                | Self::PersistentDirty
                | Self::PersistentFlushed
                | Self::PersistentFlushedDirty
                | Self::PersistentNontransactional
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The events a tracked instance can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    MakePersistent,
    MakeAutoPersistent,
    MakeTransactional,
    MakeNontransactional,
    MakeTransient,
    Delete,
    Flush,
    Commit,
    Rollback,
    Evict,
    Refresh,
    ReadField,
    WriteField,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 13] = [
        Self::MakePersistent,
        Self::MakeAutoPersistent,
        Self::MakeTransactional,
        Self::MakeNontransactional,
        Self::MakeTransient,
        Self::Delete,
        Self::Flush,
        Self::Commit,
        Self::Rollback,
        Self::Evict,
        Self::Refresh,
        Self::ReadField,
        Self::WriteField,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::MakePersistent => "makePersistent",
            Self::MakeAutoPersistent => "makeAutoPersistent",
            Self::MakeTransactional => "makeTransactional",
            Self::MakeNontransactional => "makeNontransactional",
            Self::MakeTransient => "makeTransient",
            Self::Delete => "delete",
            Self::Flush => "flush",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Evict => "evict",
            Self::Refresh => "refresh",
            Self::ReadField => "readField",
            Self::WriteField => "writeField",
        }
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_size() {
        assert_eq!(LifecycleState::ALL.len(), 20);
    }

    #[test]
    fn test_auto_persistent_states_are_new_and_persistent() {
        for state in LifecycleState::ALL {
            if state.is_auto_persistent() {
                assert!(state.is_new(), "{} should be new", state);
                assert!(state.is_persistent(), "{} should be persistent", state);
            }
        }
    }

    #[test]
    fn test_deleted_states_are_dirty() {
        for state in LifecycleState::ALL {
            if state.is_deleted() {
                assert!(state.is_dirty(), "{} should count as dirty", state);
            }
        }
    }

    #[test]
    fn test_display_uses_screaming_names() {
        assert_eq!(LifecycleState::Hollow.to_string(), "HOLLOW");
        assert_eq!(
            LifecycleState::AutoPersistentNew.to_string(),
            "AUTO_PERSISTENT_NEW"
        );
    }
}
