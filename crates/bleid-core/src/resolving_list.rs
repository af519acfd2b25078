//! Host mirror of the controller resolving list

use serde::{Deserialize, Serialize};

use crate::errors::{IdentityError, Result};
use crate::types::{IdentityIndex, Irk, LeAddress};

/// A peer whose resolvable addresses the controller resolves for a local identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvingEntry {
    pub identity: IdentityIndex,
    pub peer: LeAddress,
    pub peer_irk: Irk,
}

#[derive(Debug)]
pub struct ResolvingList {
    entries: Vec<ResolvingEntry>,
    capacity: usize,
}

impl ResolvingList {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Check that an entry for `peer` could be inserted, without inserting it
    ///
    /// The controller keys its list by peer identity address, so a peer can
    /// only be resolved for one local identity at a time.
    pub fn check_insert(&self, peer: &LeAddress) -> Result<()> {
        if self.entries.iter().any(|e| e.peer == *peer) {
            return Err(IdentityError::DuplicateAddress { address: *peer });
        }
        if self.entries.len() >= self.capacity {
            return Err(IdentityError::CapacityExceeded {
                max: self.capacity,
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, entry: ResolvingEntry) -> Result<()> {
        self.check_insert(&entry.peer)?;
        self.entries.push(entry);
        Ok(())
    }

    pub fn remove(&mut self, identity: IdentityIndex, peer: &LeAddress) -> Option<ResolvingEntry> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.identity == identity && e.peer == *peer)?;
        Some(self.entries.remove(pos))
    }

    pub fn contains(&self, identity: IdentityIndex, peer: &LeAddress) -> bool {
        self.entries
            .iter()
            .any(|e| e.identity == identity && e.peer == *peer)
    }

    pub fn entries_for(&self, identity: IdentityIndex) -> Vec<ResolvingEntry> {
        self.entries
            .iter()
            .filter(|e| e.identity == identity)
            .cloned()
            .collect()
    }

    pub fn remove_all_for(&mut self, identity: IdentityIndex) -> Vec<ResolvingEntry> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|e| e.identity == identity);
        self.entries = kept;
        removed
    }

    pub fn entries(&self) -> &[ResolvingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
