//! Random byte source capability

use rand_core::{OsRng, RngCore};
use tracing::warn;

use crate::errors::{IdentityError, Result};

/// Supplies random bytes for address and key generation
pub trait RandomSource: Send + Sync {
    /// Fill `buf` entirely, or fail with [`IdentityError::RandomUnavailable`]
    fn fill_random(&self, buf: &mut [u8]) -> Result<()>;
}

/// Operating system entropy
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandomSource;

impl RandomSource for OsRandomSource {
    fn fill_random(&self, buf: &mut [u8]) -> Result<()> {
        OsRng.try_fill_bytes(buf).map_err(|err| {
            warn!("OS random source failed: {}", err);
            IdentityError::RandomUnavailable
        })
    }
}
