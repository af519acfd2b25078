//! Identity store
//!
//! Authoritative table of local identities. Index 0 is the default identity
//! and always exists. Removed indices are retired until the caller releases
//! them, so an index is never handed out again while something may still
//! refer to the removed identity.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{Identity, IdentityState};
use crate::errors::{IdentityError, Result};
use crate::types::{BdAddr, IdentityIndex, Irk, LeAddress, Timestamp};

/// What to do when removing an identity that advertising or scanning still uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RemovePolicy {
    /// Fail with [`IdentityError::IdentityInUse`]
    #[default]
    Reject,
    /// Detach advertising sets and rebind the scanner, then remove
    ForceDetach,
}

#[derive(Debug)]
pub struct IdentityStore {
    identities: BTreeMap<IdentityIndex, Identity>,
    retired: BTreeSet<IdentityIndex>,
    max_identities: usize,
}

impl IdentityStore {
    /// Create a store holding only the default identity
    pub fn new(default_address: LeAddress, default_key: Option<Irk>, max_identities: usize) -> Self {
        let mut identities = BTreeMap::new();
        identities.insert(
            IdentityIndex::DEFAULT,
            Identity::new(IdentityIndex::DEFAULT, default_address, default_key),
        );
        Self {
            identities,
            retired: BTreeSet::new(),
            max_identities: max_identities.max(1),
        }
    }

    // ----------------------------------------------------------------------------
    // Lifecycle
    // ----------------------------------------------------------------------------

    /// Add an identity at the lowest free index
    pub fn add(&mut self, address: LeAddress, resolving_key: Option<Irk>) -> Result<IdentityIndex> {
        if self.identities.values().any(|id| id.address == address) {
            return Err(IdentityError::DuplicateAddress { address });
        }

        let index = (0..self.max_identities)
            .filter_map(|i| u8::try_from(i).ok())
            .map(IdentityIndex::new)
            .find(|i| !self.identities.contains_key(i) && !self.retired.contains(i))
            .ok_or(IdentityError::CapacityExceeded {
                max: self.max_identities,
            })?;

        self.identities
            .insert(index, Identity::new(index, address, resolving_key));
        debug!("Added identity {} with address {}", index, address);
        Ok(index)
    }

    /// Validate a removal without performing it
    pub fn check_removable(
        &self,
        index: IdentityIndex,
        in_use: bool,
        policy: RemovePolicy,
    ) -> Result<()> {
        if index.is_default() {
            return Err(IdentityError::InvalidIdentity { index });
        }
        let identity = self.lookup(index)?;
        if matches!(identity.state, IdentityState::Pausing | IdentityState::Resuming) {
            return Err(IdentityError::IdentityBusy { index });
        }
        if in_use && policy == RemovePolicy::Reject {
            return Err(IdentityError::IdentityInUse { index });
        }
        Ok(())
    }

    /// Remove an identity and retire its index
    ///
    /// `in_use` tells whether an advertising set or the scanner still refers
    /// to the identity.
    pub fn remove(
        &mut self,
        index: IdentityIndex,
        in_use: bool,
        policy: RemovePolicy,
    ) -> Result<Identity> {
        self.check_removable(index, in_use, policy)?;
        let identity = self
            .identities
            .remove(&index)
            .ok_or(IdentityError::InvalidIdentity { index })?;
        self.retired.insert(index);
        debug!("Removed identity {}, index retired", index);
        Ok(identity)
    }

    /// Make a retired index available again
    pub fn release(&mut self, index: IdentityIndex) -> bool {
        self.retired.remove(&index)
    }

    pub fn is_retired(&self, index: IdentityIndex) -> bool {
        self.retired.contains(&index)
    }

    /// Clear the resolving key and cached private address; returns the old key
    pub fn unpair(&mut self, index: IdentityIndex) -> Result<Option<Irk>> {
        let identity = self.get_mut(index)?;
        identity.current_private_address = None;
        Ok(identity.resolving_key.take())
    }

    // ----------------------------------------------------------------------------
    // Lookup and Update
    // ----------------------------------------------------------------------------

    pub fn lookup(&self, index: IdentityIndex) -> Result<&Identity> {
        self.identities
            .get(&index)
            .ok_or(IdentityError::InvalidIdentity { index })
    }

    pub fn get_mut(&mut self, index: IdentityIndex) -> Result<&mut Identity> {
        self.identities
            .get_mut(&index)
            .ok_or(IdentityError::InvalidIdentity { index })
    }

    pub fn contains(&self, index: IdentityIndex) -> bool {
        self.identities.contains_key(&index)
    }

    pub fn set_state(&mut self, index: IdentityIndex, state: IdentityState) -> Result<()> {
        self.get_mut(index)?.state = state;
        Ok(())
    }

    pub fn set_private_address(&mut self, index: IdentityIndex, address: BdAddr) -> Result<()> {
        self.get_mut(index)?.current_private_address = Some(address);
        Ok(())
    }

    /// Identities whose rotation deadline is at or before `now`
    pub fn due_for_rotation(&self, now: Timestamp) -> Vec<IdentityIndex> {
        self.identities
            .values()
            .filter(|id| id.rotation_deadline.is_some_and(|deadline| deadline <= now))
            .map(|id| id.index)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn max_identities(&self) -> usize {
        self.max_identities
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
