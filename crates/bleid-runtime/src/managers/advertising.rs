//! Advertising resume controller
//!
//! Disables the advertising sets of an identity before its address changes
//! and re-enables exactly those that were enabled beforehand. A set that was
//! already disabled is never touched in either direction.

use std::sync::Arc;
use std::time::Duration;

use bleid_core::{
    AdvHandle, Advertiser, AdvertisingRegistry, IdentityError, RadioTarget, Result, ResumeFailure,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::commands::bounded;

pub struct AdvertisingResumeController {
    registry: Arc<Mutex<AdvertisingRegistry>>,
    advertiser: Arc<dyn Advertiser>,
    timeout: Duration,
}

impl AdvertisingResumeController {
    pub fn new(
        registry: Arc<Mutex<AdvertisingRegistry>>,
        advertiser: Arc<dyn Advertiser>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            advertiser,
            timeout,
        }
    }

    /// Disable `handle` if it is enabled and remember whether it was
    ///
    /// Unknown handles are ignored. On failure the set keeps its `enabled`
    /// flag and nothing is recorded as paused.
    pub async fn pause(&self, handle: AdvHandle) -> Result<bool> {
        {
            let mut registry = self.registry.lock().await;
            let Some(set) = registry.get_mut(handle) else {
                return Ok(false);
            };
            if !set.enabled {
                set.was_enabled_before_pause = false;
                return Ok(false);
            }
        }

        if let Err(source) = bounded(self.timeout, self.advertiser.set_enable(handle, false)).await
        {
            warn!("Failed to pause advertising set {}: {}", handle, source);
            return Err(IdentityError::PauseFailed {
                target: RadioTarget::Advertising(handle),
                source,
            });
        }

        let mut registry = self.registry.lock().await;
        if let Some(set) = registry.get_mut(handle) {
            set.was_enabled_before_pause = true;
            set.enabled = false;
        }
        debug!("Paused advertising set {}", handle);
        Ok(true)
    }

    /// Re-enable `handle` if its pause recorded it as enabled
    ///
    /// Detached and unknown sets are skipped. Returns whether an enable was
    /// issued.
    pub async fn resume(&self, handle: AdvHandle) -> core::result::Result<bool, ResumeFailure> {
        {
            let mut registry = self.registry.lock().await;
            let Some(set) = registry.get_mut(handle) else {
                return Ok(false);
            };
            let should_resume = set.was_enabled_before_pause && !set.is_detached();
            set.was_enabled_before_pause = false;
            if !should_resume {
                return Ok(false);
            }
        }

        if let Err(error) = bounded(self.timeout, self.advertiser.set_enable(handle, true)).await {
            warn!("Failed to resume advertising set {}: {}", handle, error);
            return Err(ResumeFailure {
                target: RadioTarget::Advertising(handle),
                error,
            });
        }

        let mut registry = self.registry.lock().await;
        if let Some(set) = registry.get_mut(handle) {
            set.enabled = true;
        }
        debug!("Resumed advertising set {}", handle);
        Ok(true)
    }

    /// Pause `handles` in ascending order, stopping at the first failure
    ///
    /// Every handle whose pause completed is appended to `paused`, so the
    /// caller can roll back a partial batch.
    pub async fn pause_all(&self, handles: &[AdvHandle], paused: &mut Vec<AdvHandle>) -> Result<()> {
        let mut ordered = handles.to_vec();
        ordered.sort();
        for handle in ordered {
            self.pause(handle).await?;
            paused.push(handle);
        }
        Ok(())
    }

    /// Resume `handles` in ascending order, collecting every failure
    pub async fn resume_all(&self, handles: &[AdvHandle]) -> Vec<ResumeFailure> {
        let mut ordered = handles.to_vec();
        ordered.sort();
        let mut failures = Vec::new();
        for handle in ordered {
            if let Err(failure) = self.resume(handle).await {
                failures.push(failure);
            }
        }
        failures
    }
}
