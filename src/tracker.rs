// ============================================================================
// Field Tracker
// ============================================================================
//
// Per-instance fixed-size bit-vectors over the declared fields of a class:
// `loaded` records which field values are currently materialized, `dirty`
// records which have uncommitted writes. Sized once from metadata at
// enrollment. Invariant: a dirty field is always loaded.
//
// ============================================================================

use crate::core::{InstanceId, PersistError, Result};

const WORD_BITS: usize = 64;

/// Fixed-size bit-vector, one bit per declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBitSet {
    words: Vec<u64>,
    len: usize,
}

impl FieldBitSet {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.len, "bit index {} out of range {}", index, self.len);
        if index < self.len {
            self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
        }
    }

    pub fn clear(&mut self, index: usize) {
        if index < self.len {
            self.words[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
        }
    }

    pub fn set_all(&mut self) {
        for word in &mut self.words {
            *word = u64::MAX;
        }
        self.mask_tail();
    }

    pub fn clear_all(&mut self) {
        for word in &mut self.words {
            *word = 0;
        }
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn any(&self) -> bool {
        self.words.iter().any(|word| *word != 0)
    }

    pub fn none(&self) -> bool {
        !self.any()
    }

    /// Indexes of all set bits, ascending.
    pub fn indexes(&self) -> Vec<usize> {
        (0..self.len).filter(|index| self.get(*index)).collect()
    }

    /// True when every bit set in `other` is also set in `self`.
    pub fn contains_all(&self, other: &FieldBitSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(mine, theirs)| theirs & !mine == 0)
    }

    /// First bit set in `self` but clear in `other`, if any.
    pub fn first_not_in(&self, other: &FieldBitSet) -> Option<usize> {
        (0..self.len).find(|index| self.get(*index) && !other.get(*index))
    }

    fn mask_tail(&mut self) {
        let tail = self.len % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }
}

/// The loaded/dirty bit-vector pair of one tracked instance.
#[derive(Debug, Clone)]
pub struct FieldTracker {
    loaded: FieldBitSet,
    dirty: FieldBitSet,
}

impl FieldTracker {
    /// Sized once, from the declared field count of the instance's class.
    pub fn new(field_count: usize) -> Self {
        Self {
            loaded: FieldBitSet::new(field_count),
            dirty: FieldBitSet::new(field_count),
        }
    }

    pub fn loaded(&self) -> &FieldBitSet {
        &self.loaded
    }

    pub fn dirty(&self) -> &FieldBitSet {
        &self.dirty
    }

    pub fn is_loaded(&self, index: usize) -> bool {
        self.loaded.get(index)
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.dirty.get(index)
    }

    pub fn mark_loaded(&mut self, index: usize) {
        self.loaded.set(index);
    }

    /// Marking a field dirty also marks it loaded: a write materializes the
    /// value.
    pub fn mark_dirty(&mut self, index: usize) {
        self.loaded.set(index);
        self.dirty.set(index);
    }

    /// Unset a field entirely (not loaded, not dirty); used when a mutable
    /// container value is discarded to force a reload.
    pub fn unset(&mut self, index: usize) {
        self.dirty.clear(index);
        self.loaded.clear(index);
    }

    pub fn set_all_loaded(&mut self) {
        self.loaded.set_all();
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear_all();
    }

    pub fn clear_all(&mut self) {
        self.dirty.clear_all();
        self.loaded.clear_all();
    }

    /// Replace the loaded set wholesale (before-image restore).
    pub fn restore_loaded(&mut self, loaded: FieldBitSet) {
        self.loaded = loaded;
    }

    /// Defensive check of the `dirty ⟹ loaded` invariant. A violation is an
    /// unrecoverable internal-consistency fault, surfaced rather than
    /// silently corrected.
    pub fn verify(&self, instance: InstanceId) -> Result<()> {
        match self.dirty.first_not_in(&self.loaded) {
            Option::None => Ok(()),
            Some(field) => Err(PersistError::InvariantViolation { instance, field }),
        }
    }
}
