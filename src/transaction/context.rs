use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::core::{PersistError, Result};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Boundary status of the transaction context.
///
/// ```text
/// Idle ──begin──> Active ──commit──> Committing ──done──> Idle
///                   │
///                   └──rollback──> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// No transaction in progress.
    Idle,
    /// Transaction open; lifecycle events are accepted.
    Active,
    /// Inside commit: flush passes and the reachability sweep run here.
    Committing,
}

impl TransactionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionStatus::Active | TransactionStatus::Committing)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Idle => write!(f, "IDLE"),
            TransactionStatus::Active => write!(f, "ACTIVE"),
            TransactionStatus::Committing => write!(f, "COMMITTING"),
        }
    }
}

/// Per-transaction options consulted at the commit/rollback boundary.
#[derive(Debug, Clone, Copy)]
pub struct TransactionOptions {
    /// Keep field values and loaded bits across commit.
    pub retain_values: bool,
    /// Restore pre-transaction field values on rollback.
    pub restore_values: bool,
    /// Optimistic vs. datastore transaction mode.
    pub optimistic: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            retain_values: false,
            restore_values: false,
            optimistic: true,
        }
    }
}

/// The transaction context every enrolled StateManager answers to.
///
/// # Thread Safety
/// Designed for exclusive ownership by a single thread; the coordinator
/// serializes all lifecycle events for its instances.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    options: TransactionOptions,
    status: TransactionStatus,
    started_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(options: TransactionOptions) -> Self {
        Self {
            id: TransactionId::new(),
            options,
            status: TransactionStatus::Idle,
            started_at: None,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// True while the commit-time flush passes and reachability sweep run.
    pub fn inside_commit(&self) -> bool {
        self.status == TransactionStatus::Committing
    }

    pub fn options(&self) -> TransactionOptions {
        self.options
    }

    pub fn retain_values(&self) -> bool {
        self.options.retain_values
    }

    pub fn restore_values(&self) -> bool {
        self.options.restore_values
    }

    pub fn set_retain_values(&mut self, retain: bool) {
        self.options.retain_values = retain;
    }

    pub fn set_restore_values(&mut self, restore: bool) {
        self.options.restore_values = restore;
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Open a new transaction.
    ///
    /// # Errors
    /// Returns an error if a transaction is already in progress.
    pub fn begin(&mut self) -> Result<()> {
        if self.status.is_active() {
            return Err(PersistError::Transaction(format!(
                "Cannot begin: transaction {} is already {}",
                self.id, self.status
            )));
        }

        self.id = TransactionId::new();
        self.status = TransactionStatus::Active;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Enter the commit boundary.
    pub fn mark_committing(&mut self) -> Result<()> {
        if self.status != TransactionStatus::Active {
            return Err(PersistError::Transaction(format!(
                "Cannot commit: transaction {} is {}",
                self.id, self.status
            )));
        }

        self.status = TransactionStatus::Committing;
        Ok(())
    }

    /// Close the boundary, returning to idle.
    pub fn complete(&mut self) {
        self.status = TransactionStatus::Idle;
        self.started_at = None;
    }
}
