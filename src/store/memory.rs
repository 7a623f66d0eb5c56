// ============================================================================
// In-Memory Store
// ============================================================================
//
// Reference StoreManager keeping rows in a process-local map. Every call
// completes immediately; partial flush outcomes never arise here.
//
// ============================================================================

use std::collections::HashMap;

use crate::core::{InstanceId, PersistError, Result, Value};
use crate::store::{FlushOutcome, InstanceView, StoreManager};

#[derive(Debug, Clone)]
struct StoredRow {
    class: String,
    values: Vec<Value>,
}

/// Store-call counters, mostly interesting to tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub loads: u64,
}

/// An in-memory row store keyed by instance ID.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: HashMap<InstanceId, StoredRow>,
    stats: StoreStats,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
            stats: StoreStats::default(),
        }
    }

    pub fn contains(&self, instance: InstanceId) -> bool {
        self.rows.contains_key(&instance)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Peek at a stored field without counting as a load.
    pub fn stored_value(&self, instance: InstanceId, index: usize) -> Option<&Value> {
        self.rows.get(&instance).and_then(|row| row.values.get(index))
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    fn missing(instance: InstanceId) -> PersistError {
        PersistError::StoreFailure(format!("no stored row for instance {}", instance))
    }
}

impl StoreManager for MemoryStore {
    fn insert(&mut self, view: InstanceView<'_>) -> Result<FlushOutcome> {
        self.stats.inserts += 1;

        let mut values = vec![Value::Null; view.values.len()];
        for index in view.loaded.indexes() {
            values[index] = view.values[index].clone();
        }

        self.rows.insert(
            view.instance,
            StoredRow {
                class: view.class.to_string(),
                values,
            },
        );
        Ok(FlushOutcome::Complete)
    }

    fn update(&mut self, view: InstanceView<'_>) -> Result<FlushOutcome> {
        self.stats.updates += 1;

        let row = self
            .rows
            .get_mut(&view.instance)
            .ok_or_else(|| Self::missing(view.instance))?;

        for index in view.dirty.indexes() {
            row.values[index] = view.values[index].clone();
        }
        Ok(FlushOutcome::Complete)
    }

    fn delete(&mut self, view: InstanceView<'_>) -> Result<FlushOutcome> {
        self.stats.deletes += 1;

        self.rows
            .remove(&view.instance)
            .ok_or_else(|| Self::missing(view.instance))?;
        Ok(FlushOutcome::Complete)
    }

    fn load_field(&mut self, instance: InstanceId, class: &str, index: usize) -> Result<Value> {
        self.stats.loads += 1;

        let row = self.rows.get(&instance).ok_or_else(|| Self::missing(instance))?;
        if row.class != class {
            return Err(PersistError::StoreFailure(format!(
                "instance {} is stored as class '{}', not '{}'",
                instance, row.class, class
            )));
        }

        row.values
            .get(index)
            .cloned()
            .ok_or_else(|| {
                PersistError::StoreFailure(format!(
                    "stored row for {} has no field {}",
                    instance, index
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::FieldTracker;

    fn view<'a>(
        instance: InstanceId,
        tracker: &'a FieldTracker,
        values: &'a [Value],
    ) -> InstanceView<'a> {
        InstanceView {
            instance,
            class: "Person",
            loaded: tracker.loaded(),
            dirty: tracker.dirty(),
            values,
        }
    }

    #[test]
    fn test_insert_then_load() {
        let mut store = MemoryStore::new();
        let id = InstanceId::new();
        let values = vec![Value::Text("ada".into()), Value::Integer(36)];
        let mut tracker = FieldTracker::new(2);
        tracker.set_all_loaded();

        store.insert(view(id, &tracker, &values)).unwrap();
        assert!(store.contains(id));
        assert_eq!(store.load_field(id, "Person", 1).unwrap(), Value::Integer(36));
    }

    #[test]
    fn test_update_writes_only_dirty_fields() {
        let mut store = MemoryStore::new();
        let id = InstanceId::new();
        let mut tracker = FieldTracker::new(2);
        tracker.set_all_loaded();
        store
            .insert(view(id, &tracker, &[Value::Text("ada".into()), Value::Integer(36)]))
            .unwrap();

        let mut tracker = FieldTracker::new(2);
        tracker.mark_dirty(1);
        store
            .update(view(id, &tracker, &[Value::Text("ignored".into()), Value::Integer(37)]))
            .unwrap();

        assert_eq!(store.stored_value(id, 0), Some(&Value::Text("ada".into())));
        assert_eq!(store.stored_value(id, 1), Some(&Value::Integer(37)));
    }

    #[test]
    fn test_delete_missing_row_is_a_store_failure() {
        let mut store = MemoryStore::new();
        let id = InstanceId::new();
        let tracker = FieldTracker::new(1);
        let values = [Value::Null];

        let result = store.delete(view(id, &tracker, &values));
        assert!(matches!(result, Err(PersistError::StoreFailure(_))));
    }

    #[test]
    fn test_load_checks_the_class() {
        let mut store = MemoryStore::new();
        let id = InstanceId::new();
        let mut tracker = FieldTracker::new(1);
        tracker.set_all_loaded();
        store.insert(view(id, &tracker, &[Value::Integer(1)])).unwrap();

        assert!(store.load_field(id, "Order", 0).is_err());
    }

    #[test]
    fn test_stats_count_calls() {
        let mut store = MemoryStore::new();
        let id = InstanceId::new();
        let mut tracker = FieldTracker::new(1);
        tracker.set_all_loaded();

        store.insert(view(id, &tracker, &[Value::Integer(1)])).unwrap();
        store.load_field(id, "Person", 0).unwrap();

        assert_eq!(store.stats().inserts, 1);
        assert_eq!(store.stats().loads, 1);
    }
}
