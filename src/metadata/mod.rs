// ============================================================================
// Class & Field Metadata
// ============================================================================
//
// Describes which fields a tracked class declares, their persistence
// modifiers, and their default values. Consulted once at enrollment to size
// the field tracker and to decide which accessor hooks participate in
// tracking. Registration failures propagate to the caller as results.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{PersistError, Result, Value};

/// Persistence modifier of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldModifier {
    /// Stored in the backing store and tracked.
    Persistent,
    /// Tracked inside a transaction but never written to the store.
    Transactional,
    /// Not managed at all; accessor hooks pass through.
    Unmanaged,
}

impl std::fmt::Display for FieldModifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persistent => write!(f, "persistent"),
            Self::Transactional => write!(f, "transactional"),
            Self::Unmanaged => write!(f, "none"),
        }
    }
}

/// A single declared field of a tracked class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub name: String,
    pub modifier: FieldModifier,
    pub default_value: Value,
}

impl FieldMetadata {
    pub fn persistent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modifier: FieldModifier::Persistent,
            default_value: Value::Null,
        }
    }

    pub fn transactional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modifier: FieldModifier::Transactional,
            default_value: Value::Null,
        }
    }

    pub fn unmanaged(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modifier: FieldModifier::Unmanaged,
            default_value: Value::Null,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = value;
        self
    }

    pub fn is_managed(&self) -> bool {
        !matches!(self.modifier, FieldModifier::Unmanaged)
    }
}

/// The declared field roster of a tracked class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassMetadata {
    name: String,
    fields: Vec<FieldMetadata>,
}

impl ClassMetadata {
    pub fn new(name: impl Into<String>, fields: Vec<FieldMetadata>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[FieldMetadata] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Result<&FieldMetadata> {
        self.fields
            .get(index)
            .ok_or_else(|| PersistError::FieldOutOfRange {
                class: self.name.clone(),
                index,
                count: self.fields.len(),
            })
    }

    pub fn field_by_name(&self, name: &str) -> Option<(usize, &FieldMetadata)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, field)| field.name == name)
    }

    /// Indexes of fields that participate in tracking (persistent or
    /// transactional).
    pub fn managed_indexes(&self) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.is_managed())
            .map(|(index, _)| index)
            .collect()
    }

    /// A fresh field row populated with the declared defaults.
    pub fn default_row(&self) -> Vec<Value> {
        self.fields
            .iter()
            .map(|field| field.default_value.clone())
            .collect()
    }
}

/// Registry of tracked classes, consulted at enrollment.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    classes: HashMap<String, Arc<ClassMetadata>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self {
            classes: HashMap::new(),
        }
    }

    /// Register a class. A duplicate registration is an error the caller
    /// decides how to handle.
    pub fn register(&mut self, metadata: ClassMetadata) -> Result<Arc<ClassMetadata>> {
        if self.classes.contains_key(metadata.name()) {
            return Err(PersistError::Metadata(format!(
                "Class '{}' is already registered",
                metadata.name()
            )));
        }

        let shared = Arc::new(metadata);
        self.classes.insert(shared.name().to_string(), shared.clone());
        Ok(shared)
    }

    pub fn lookup(&self, class: &str) -> Result<Arc<ClassMetadata>> {
        self.classes
            .get(class)
            .cloned()
            .ok_or_else(|| PersistError::UnknownClass(class.to_string()))
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Build class metadata from a JSON document of the shape:
///
/// ```json
/// {
///   "class": "Person",
///   "fields": [
///     {"name": "name", "modifier": "persistent", "default": "unknown"},
///     {"name": "age", "modifier": "persistent", "default": 0},
///     {"name": "scratch", "modifier": "none"}
///   ]
/// }
/// ```
pub fn class_metadata_from_json(document: &str) -> Result<ClassMetadata> {
    let root: serde_json::Value = serde_json::from_str(document)
        .map_err(|err| PersistError::Metadata(format!("Invalid metadata JSON: {}", err)))?;

    let obj = root
        .as_object()
        .ok_or_else(|| PersistError::Metadata("Metadata root must be an object".to_string()))?;

    let class_name = obj
        .get("class")
        .and_then(|value| value.as_str())
        .ok_or_else(|| PersistError::Metadata("Metadata must name a 'class'".to_string()))?;

    let raw_fields = obj
        .get("fields")
        .and_then(|value| value.as_array())
        .ok_or_else(|| PersistError::Metadata("Metadata must contain a 'fields' array".to_string()))?;

    let mut fields = Vec::with_capacity(raw_fields.len());
    for raw_field in raw_fields {
        let field_obj = raw_field.as_object().ok_or_else(|| {
            PersistError::Metadata("Each metadata field must be an object".to_string())
        })?;

        let name = field_obj
            .get("name")
            .and_then(|value| value.as_str())
            .ok_or_else(|| PersistError::Metadata("Metadata field missing 'name'".to_string()))?;

        let modifier = match field_obj.get("modifier").and_then(|value| value.as_str()) {
            Some("persistent") | None => FieldModifier::Persistent,
            Some("transactional") => FieldModifier::Transactional,
            Some("none") => FieldModifier::Unmanaged,
            Some(other) => {
                return Err(PersistError::Metadata(format!(
                    "Unknown field modifier '{}' on field '{}'",
                    other, name
                )));
            }
        };

        let default_value = match field_obj.get("default") {
            None | Some(serde_json::Value::Null) => Value::Null,
            Some(raw) => json_to_value(raw, name)?,
        };

        fields.push(FieldMetadata {
            name: name.to_string(),
            modifier,
            default_value,
        });
    }

    Ok(ClassMetadata::new(class_name, fields))
}

fn json_to_value(raw: &serde_json::Value, field: &str) -> Result<Value> {
    match raw {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(PersistError::Metadata(format!(
                    "Unsupported numeric default on field '{}'",
                    field
                )))
            }
        }
        serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
        serde_json::Value::Array(items) => {
            let mut converted = Vec::with_capacity(items.len());
            for item in items {
                converted.push(json_to_value(item, field)?);
            }
            Ok(Value::Array(converted))
        }
        serde_json::Value::Object(_) => Err(PersistError::Metadata(format!(
            "Object defaults are not supported (field '{}')",
            field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> ClassMetadata {
        ClassMetadata::new(
            "Person",
            vec![
                FieldMetadata::persistent("name").with_default(Value::Text("unknown".into())),
                FieldMetadata::persistent("age").with_default(Value::Integer(0)),
                FieldMetadata::transactional("draft_note"),
                FieldMetadata::unmanaged("scratch"),
            ],
        )
    }

    #[test]
    fn test_managed_indexes_skip_unmanaged_fields() {
        let meta = person();
        assert_eq!(meta.managed_indexes(), vec![0, 1, 2]);
    }

    #[test]
    fn test_default_row_uses_declared_defaults() {
        let row = person().default_row();
        assert_eq!(row[0], Value::Text("unknown".into()));
        assert_eq!(row[1], Value::Integer(0));
        assert_eq!(row[2], Value::Null);
    }

    #[test]
    fn test_field_out_of_range() {
        let meta = person();
        assert!(meta.field(3).is_ok());
        assert!(matches!(
            meta.field(4),
            Err(PersistError::FieldOutOfRange { index: 4, .. })
        ));
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let mut registry = MetadataRegistry::new();
        registry.register(person()).unwrap();
        assert!(registry.register(person()).is_err());
    }

    #[test]
    fn test_lookup_unknown_class() {
        let registry = MetadataRegistry::new();
        assert!(matches!(
            registry.lookup("Ghost"),
            Err(PersistError::UnknownClass(_))
        ));
    }

    #[test]
    fn test_metadata_from_json() {
        let meta = class_metadata_from_json(
            r#"{
                "class": "Person",
                "fields": [
                    {"name": "name", "modifier": "persistent", "default": "unknown"},
                    {"name": "age", "default": 7},
                    {"name": "scratch", "modifier": "none"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(meta.name(), "Person");
        assert_eq!(meta.field_count(), 3);
        assert_eq!(meta.fields()[1].default_value, Value::Integer(7));
        assert_eq!(meta.fields()[2].modifier, FieldModifier::Unmanaged);
    }

    #[test]
    fn test_metadata_from_json_rejects_unknown_modifier() {
        let result = class_metadata_from_json(
            r#"{"class": "X", "fields": [{"name": "a", "modifier": "weird"}]}"#,
        );
        assert!(matches!(result, Err(PersistError::Metadata(_))));
    }
}
