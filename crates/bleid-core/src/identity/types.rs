//! Local identity record and its operation state

use serde::{Deserialize, Serialize};

use crate::types::{BdAddr, IdentityIndex, Irk, LeAddress, Timestamp};

// ----------------------------------------------------------------------------
// Identity State
// ----------------------------------------------------------------------------

/// Phase of the identity operation currently running for an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdentityState {
    /// No operation running
    #[default]
    Idle,
    /// Disabling advertising and scanning that use the identity
    Pausing,
    /// Mutating identity state and programming the controller
    Updating,
    /// Re-enabling what was paused
    Resuming,
}

impl IdentityState {
    pub fn is_idle(&self) -> bool {
        matches!(self, IdentityState::Idle)
    }
}

// ----------------------------------------------------------------------------
// Identity
// ----------------------------------------------------------------------------

/// One local device persona
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub index: IdentityIndex,
    /// Identity address (public or static random), immutable
    pub address: LeAddress,
    /// Present iff the identity supports privacy
    pub resolving_key: Option<Irk>,
    /// Private address currently in use, if one was generated
    pub current_private_address: Option<BdAddr>,
    /// When the private address must be refreshed
    pub rotation_deadline: Option<Timestamp>,
    pub state: IdentityState,
}

impl Identity {
    pub fn new(index: IdentityIndex, address: LeAddress, resolving_key: Option<Irk>) -> Self {
        Self {
            index,
            address,
            resolving_key,
            current_private_address: None,
            rotation_deadline: None,
            state: IdentityState::Idle,
        }
    }

    pub fn supports_privacy(&self) -> bool {
        self.resolving_key.is_some()
    }

    /// Address seen over the air: the private address if one is in use
    pub fn active_address(&self) -> LeAddress {
        match self.current_private_address {
            Some(private) => LeAddress::random(private),
            None => self.address,
        }
    }
}
