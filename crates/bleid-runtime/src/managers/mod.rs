//! Pause/resume controllers for the radio operations an identity owns

pub mod advertising;
pub mod scanning;

pub use advertising::AdvertisingResumeController;
pub use scanning::ScanResumeController;

use bleid_core::AdvHandle;

/// Radio operations disabled by one identity operation's pause phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PausedRadio {
    /// Handles whose pause was recorded, ascending
    pub advertising: Vec<AdvHandle>,
    pub scanner: bool,
}

impl PausedRadio {
    pub fn is_empty(&self) -> bool {
        self.advertising.is_empty() && !self.scanner
    }
}
