use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a tracked application object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generate a new unique instance ID.
    pub fn new() -> Self {
        InstanceId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obj_{}", self.0)
    }
}
