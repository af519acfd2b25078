//! Privacy address generator
//!
//! Chooses the private address format for an identity and keeps its rotation
//! deadline. Generation is a single attempt; retrying transient random source
//! failures is left to the caller.

use core::time::Duration;

use tracing::trace;

use crate::crypto;
use crate::errors::Result;
use crate::identity::Identity;
use crate::random::RandomSource;
use crate::types::{BdAddr, Timestamp};

#[derive(Debug, Clone)]
pub struct PrivacyAddressGenerator {
    rpa_timeout: Duration,
}

impl PrivacyAddressGenerator {
    pub fn new(rpa_timeout: Duration) -> Self {
        Self { rpa_timeout }
    }

    pub fn rpa_timeout(&self) -> Duration {
        self.rpa_timeout
    }

    /// Produce a new private address for `identity`
    ///
    /// Resolvable when the identity has a resolving key, non-resolvable otherwise.
    pub fn rotate(&self, identity: &Identity, random: &dyn RandomSource) -> Result<BdAddr> {
        let address = match &identity.resolving_key {
            Some(irk) => crypto::create_rpa(irk, random)?,
            None => crypto::create_nrpa(random)?,
        };
        trace!("Generated private address {} for identity {}", address, identity.index);
        Ok(address)
    }

    /// Non-resolvable address regardless of the identity's key
    pub fn non_resolvable(&self, random: &dyn RandomSource) -> Result<BdAddr> {
        crypto::create_nrpa(random)
    }

    /// Set the rotation deadline `interval` after `now`
    pub fn schedule_next_rotation(&self, identity: &mut Identity, now: Timestamp, interval: Duration) {
        identity.rotation_deadline = Some(now.saturating_add(interval));
    }

    /// Set the rotation deadline one RPA timeout after `now`
    pub fn schedule_default_rotation(&self, identity: &mut Identity, now: Timestamp) {
        self.schedule_next_rotation(identity, now, self.rpa_timeout);
    }

    /// Whether `address` is a resolvable address of `identity`
    pub fn resolves_to(&self, identity: &Identity, address: &BdAddr) -> bool {
        identity
            .resolving_key
            .as_ref()
            .is_some_and(|irk| crypto::rpa_matches(irk, address))
    }
}
