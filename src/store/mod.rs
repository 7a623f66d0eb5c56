// ============================================================================
// Store Manager Interface
// ============================================================================
//
// The seam between the lifecycle core and backing storage. The core never
// owns an on-disk or wire format; it hands the store a view of the instance
// (identity, class, loaded/dirty bit-vectors, field values) and consumes the
// reported outcome. Calls are synchronous and block the calling thread.
//
// ============================================================================

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::core::{InstanceId, Result, Value};
use crate::tracker::FieldBitSet;

pub use memory::MemoryStore;

/// Outcome of a store call during flush.
///
/// `Partial` and `None` are not errors: they signal that dependency ordering
/// (for example a circular foreign key) deferred some or all of the work to
/// a later pass, and the transaction coordinator must re-invoke flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlushOutcome {
    Complete,
    Partial,
    None,
}

impl std::fmt::Display for FlushOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "COMPLETE"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::None => write!(f, "NONE"),
        }
    }
}

/// Read-only view of a tracked instance handed to the store manager.
#[derive(Debug, Clone, Copy)]
pub struct InstanceView<'a> {
    pub instance: InstanceId,
    pub class: &'a str,
    pub loaded: &'a FieldBitSet,
    pub dirty: &'a FieldBitSet,
    pub values: &'a [Value],
}

/// Backing-store operations the lifecycle core consumes.
///
/// A store failure is raised as an error the core wraps and propagates; the
/// core never retries on its own.
pub trait StoreManager {
    fn insert(&mut self, view: InstanceView<'_>) -> Result<FlushOutcome>;

    fn update(&mut self, view: InstanceView<'_>) -> Result<FlushOutcome>;

    fn delete(&mut self, view: InstanceView<'_>) -> Result<FlushOutcome>;

    /// Synchronously materialize a single field for a lazy read.
    fn load_field(&mut self, instance: InstanceId, class: &str, index: usize) -> Result<Value>;

    /// Materialize several fields at once (refresh, release of a hollow
    /// instance). Stores with a cheaper bulk path should override this.
    fn load_fields(
        &mut self,
        instance: InstanceId,
        class: &str,
        fields: &FieldBitSet,
    ) -> Result<Vec<(usize, Value)>> {
        let mut out = Vec::with_capacity(fields.count());
        for index in fields.indexes() {
            out.push((index, self.load_field(instance, class, index)?));
        }
        Ok(out)
    }
}
