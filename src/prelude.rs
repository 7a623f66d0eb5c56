//! Recommended API entrypoints grouped by abstraction level.
//!
//! `dx` is the stable default for applications driving whole transactions.
//! `advanced` is an explicit escape hatch for per-instance lifecycle
//! internals.

pub mod dx {
    //! Stable high-level surface: register metadata, enroll instances, drive
    //! transaction boundaries through a `PersistenceContext`.
    pub use crate::metadata::{ClassMetadata, FieldMetadata, FieldModifier, MetadataRegistry};
    pub use crate::{
        FlushOutcome, InstanceId, MemoryStore, PersistenceContext, PersistError, Result,
        StoreManager, TransactionOptions, Value,
    };
}

pub mod advanced {
    //! Escape hatch for lifecycle internals.
    //!
    //! App-level code should normally stay on `prelude::dx`.
    pub use crate::instance::{BeforeImage, TrackedInstance};
    pub use crate::lifecycle::{transitions, LifecycleEvent, LifecycleState};
    pub use crate::manager::{InstanceMeta, StateManager};
    pub use crate::store::InstanceView;
    pub use crate::tracker::{FieldBitSet, FieldTracker};
    pub use crate::transaction::{Transaction, TransactionId, TransactionStatus};
}
