// ============================================================================
// Tracked Instance
// ============================================================================
//
// The application data object enrolled in the lifecycle machine: a class
// name plus one value slot per declared field. Owned exclusively by its
// StateManager for the duration of enrollment. The before image captures
// the pre-transaction values for rollback with value restoration.
//
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::core::{InstanceId, Value};
use crate::tracker::FieldBitSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedInstance {
    class: String,
    values: Vec<Value>,
}

impl TrackedInstance {
    pub fn new(class: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            class: class.into(),
            values,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    pub fn field_count(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn set_value(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    /// Every instance referenced from this one, directly or inside container
    /// values.
    pub fn references(&self) -> Vec<InstanceId> {
        let mut refs = Vec::new();
        for value in &self.values {
            value.collect_references(&mut refs);
        }
        refs
    }

    /// Discard mutable-container (second-class-object) field values so they
    /// reload on next access. Returns the indexes that were unset.
    pub fn unset_container_fields(&mut self) -> Vec<usize> {
        let mut unset = Vec::new();
        for (index, value) in self.values.iter_mut().enumerate() {
            if value.is_container() {
                *value = Value::Null;
                unset.push(index);
            }
        }
        unset
    }
}

/// Snapshot of field values and loaded bits taken before the first write of
/// a transaction.
#[derive(Debug, Clone)]
pub struct BeforeImage {
    values: Vec<Value>,
    loaded: FieldBitSet,
}

impl BeforeImage {
    pub fn capture(instance: &TrackedInstance, loaded: &FieldBitSet) -> Self {
        Self {
            values: instance.values.clone(),
            loaded: loaded.clone(),
        }
    }

    /// Restore the captured values into the instance, handing back the
    /// captured loaded set.
    pub fn restore_into(self, instance: &mut TrackedInstance) -> FieldBitSet {
        instance.values = self.values;
        self.loaded
    }
}
