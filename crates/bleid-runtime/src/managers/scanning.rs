//! Scan resume controller

use std::sync::Arc;
use std::time::Duration;

use bleid_core::{IdentityError, RadioTarget, Result, ResumeFailure, ScanInstance, Scanner};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::commands::bounded;

pub struct ScanResumeController {
    scan: Arc<Mutex<ScanInstance>>,
    scanner: Arc<dyn Scanner>,
    timeout: Duration,
}

impl ScanResumeController {
    pub fn new(scan: Arc<Mutex<ScanInstance>>, scanner: Arc<dyn Scanner>, timeout: Duration) -> Self {
        Self {
            scan,
            scanner,
            timeout,
        }
    }

    /// Disable the scanner if it is running and remember whether it was
    pub async fn pause(&self) -> Result<bool> {
        {
            let mut scan = self.scan.lock().await;
            if !scan.enabled {
                scan.was_enabled_before_pause = false;
                return Ok(false);
            }
        }

        if let Err(source) = bounded(self.timeout, self.scanner.set_enable(false)).await {
            warn!("Failed to pause scanner: {}", source);
            return Err(IdentityError::PauseFailed {
                target: RadioTarget::Scanner,
                source,
            });
        }

        let mut scan = self.scan.lock().await;
        scan.was_enabled_before_pause = true;
        scan.enabled = false;
        debug!("Paused scanner");
        Ok(true)
    }

    /// Re-enable the scanner if its pause recorded it as running
    pub async fn resume(&self) -> core::result::Result<bool, ResumeFailure> {
        {
            let mut scan = self.scan.lock().await;
            if !scan.was_enabled_before_pause {
                return Ok(false);
            }
            scan.was_enabled_before_pause = false;
        }

        if let Err(error) = bounded(self.timeout, self.scanner.set_enable(true)).await {
            warn!("Failed to resume scanner: {}", error);
            return Err(ResumeFailure {
                target: RadioTarget::Scanner,
                error,
            });
        }

        self.scan.lock().await.enabled = true;
        debug!("Resumed scanner");
        Ok(true)
    }
}
