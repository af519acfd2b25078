//! Advertising and scanning state owned by the identity coordinator
//!
//! Advertising sets are created and destroyed by the advertising module; this
//! crate only tracks which identity owns each set and the `enabled` /
//! `was_enabled_before_pause` pair used by the pause/resume protocol.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::types::{AdvHandle, IdentityIndex};

// ----------------------------------------------------------------------------
// Radio Capabilities
// ----------------------------------------------------------------------------

/// Advertising module entry point used to pause and resume sets
#[async_trait::async_trait]
pub trait Advertiser: Send + Sync {
    async fn set_enable(&self, handle: AdvHandle, enable: bool) -> Result<(), GatewayError>;
}

/// Scanning module entry point used to pause and resume the scanner
#[async_trait::async_trait]
pub trait Scanner: Send + Sync {
    async fn set_enable(&self, enable: bool) -> Result<(), GatewayError>;
}

// ----------------------------------------------------------------------------
// Advertising Sets
// ----------------------------------------------------------------------------

/// One advertising instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisingSet {
    pub handle: AdvHandle,
    /// Owning identity; `None` once detached by identity removal
    pub identity_index: Option<IdentityIndex>,
    pub enabled: bool,
    pub was_enabled_before_pause: bool,
}

impl AdvertisingSet {
    pub fn new(handle: AdvHandle, identity_index: IdentityIndex, enabled: bool) -> Self {
        Self {
            handle,
            identity_index: Some(identity_index),
            enabled,
            was_enabled_before_pause: false,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.identity_index.is_none()
    }
}

/// All known advertising sets, ordered by handle
#[derive(Debug, Default)]
pub struct AdvertisingRegistry {
    sets: BTreeMap<AdvHandle, AdvertisingSet>,
}

impl AdvertisingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a set; replaces any previous set with the same handle
    pub fn register(&mut self, set: AdvertisingSet) -> Option<AdvertisingSet> {
        self.sets.insert(set.handle, set)
    }

    pub fn unregister(&mut self, handle: AdvHandle) -> Option<AdvertisingSet> {
        self.sets.remove(&handle)
    }

    pub fn get(&self, handle: AdvHandle) -> Option<&AdvertisingSet> {
        self.sets.get(&handle)
    }

    pub fn get_mut(&mut self, handle: AdvHandle) -> Option<&mut AdvertisingSet> {
        self.sets.get_mut(&handle)
    }

    /// Record an enable/disable performed by the application
    pub fn note_enabled(&mut self, handle: AdvHandle, enabled: bool) -> bool {
        match self.sets.get_mut(&handle) {
            Some(set) => {
                set.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Handles of sets owned by `index`, ascending
    pub fn bound_to(&self, index: IdentityIndex) -> Vec<AdvHandle> {
        self.sets
            .values()
            .filter(|set| set.identity_index == Some(index))
            .map(|set| set.handle)
            .collect()
    }

    /// Detach every set owned by `index` so it is never resumed again
    pub fn detach_all(&mut self, index: IdentityIndex) -> Vec<AdvHandle> {
        let mut detached = Vec::new();
        for set in self.sets.values_mut() {
            if set.identity_index == Some(index) {
                set.identity_index = None;
                set.was_enabled_before_pause = false;
                detached.push(set.handle);
            }
        }
        detached
    }

    pub fn iter(&self) -> impl Iterator<Item = &AdvertisingSet> {
        self.sets.values()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Scan Instance
// ----------------------------------------------------------------------------

/// The single scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanInstance {
    /// Identity whose address the scanner uses
    pub bound_identity: IdentityIndex,
    pub enabled: bool,
    pub was_enabled_before_pause: bool,
}

impl Default for ScanInstance {
    fn default() -> Self {
        Self {
            bound_identity: IdentityIndex::DEFAULT,
            enabled: false,
            was_enabled_before_pause: false,
        }
    }
}

impl ScanInstance {
    pub fn is_bound_to(&self, index: IdentityIndex) -> bool {
        self.bound_identity == index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(n: u8) -> AdvHandle {
        AdvHandle::new(n)
    }

    #[test]
    fn test_bound_to_is_ascending() {
        let id = IdentityIndex::new(1);
        let mut registry = AdvertisingRegistry::new();
        registry.register(AdvertisingSet::new(handle(5), id, true));
        registry.register(AdvertisingSet::new(handle(2), id, false));
        registry.register(AdvertisingSet::new(handle(3), IdentityIndex::DEFAULT, true));

        assert_eq!(registry.bound_to(id), vec![handle(2), handle(5)]);
        assert_eq!(registry.bound_to(IdentityIndex::DEFAULT), vec![handle(3)]);
    }

    #[test]
    fn test_detach_clears_resume_marker() {
        let id = IdentityIndex::new(1);
        let mut registry = AdvertisingRegistry::new();
        let mut set = AdvertisingSet::new(handle(1), id, false);
        set.was_enabled_before_pause = true;
        registry.register(set);

        assert_eq!(registry.detach_all(id), vec![handle(1)]);
        let set = registry.get(handle(1)).unwrap();
        assert!(set.is_detached());
        assert!(!set.was_enabled_before_pause);
        assert!(registry.bound_to(id).is_empty());
    }

    #[test]
    fn test_note_enabled_unknown_handle() {
        let mut registry = AdvertisingRegistry::new();
        assert!(!registry.note_enabled(handle(9), true));
        assert!(registry.is_empty());
    }
}
