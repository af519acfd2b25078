//! Pairing layer capability
//!
//! The security manager owns bonds. When a local identity is removed, every
//! bond made with it is deleted through this trait.

use crate::types::{IdentityIndex, LeAddress};

#[async_trait::async_trait]
pub trait PairingLayer: Send + Sync {
    /// Delete the bond with `peer`, or every bond of the identity when `None`
    async fn unpair(&self, index: IdentityIndex, peer: Option<LeAddress>) -> Result<(), String>;
}

/// Pairing layer for hosts that do not store bonds
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBonds;

#[async_trait::async_trait]
impl PairingLayer for NoBonds {
    async fn unpair(&self, _index: IdentityIndex, _peer: Option<LeAddress>) -> Result<(), String> {
        Ok(())
    }
}
