use thiserror::Error;

use crate::core::types::InstanceId;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Event {event} is not permitted in state {state} for instance {instance}")]
    InvalidTransition {
        instance: InstanceId,
        event: &'static str,
        state: &'static str,
    },

    #[error("Instance {instance} is already deleted (state {state})")]
    AlreadyDeleted {
        instance: InstanceId,
        state: &'static str,
    },

    #[error("No active transaction for event {event}")]
    NoActiveTransaction { event: &'static str },

    #[error("Instance {instance} is disconnected; event {event} rejected")]
    IllegalState {
        instance: InstanceId,
        event: &'static str,
    },

    #[error("Store failure: {0}")]
    StoreFailure(String),

    #[error("Invariant violation on instance {instance}: field {field} is dirty but not loaded")]
    InvariantViolation { instance: InstanceId, field: usize },

    #[error("Class '{0}' is not registered")]
    UnknownClass(String),

    #[error("Instance {0} is not known to this context")]
    UnknownInstance(InstanceId),

    #[error("Field index {index} out of range for class '{class}' ({count} fields)")]
    FieldOutOfRange {
        class: String,
        index: usize,
        count: usize,
    },

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Transaction error: {0}")]
    Transaction(String),
}

pub type Result<T> = std::result::Result<T, PersistError>;
