//! BLE Identity Runtime
//!
//! Async sequencing for local identity operations:
//! - `IdentityCoordinator`: per-identity operation queues running the
//!   pause, update, resume protocol against advertising and scanning
//! - Resume controllers for advertising sets and the scanner
//! - The rotation timer that refreshes expired private addresses
//!
//! Types, capability traits and the identity store live in `bleid-core` and
//! are re-exported here for convenience.

pub mod builder;
pub mod commands;
pub mod coordinator;
pub mod hci_radio;
pub mod managers;
pub mod operation;
mod retry;
pub mod rotation;
pub mod stats;

pub use builder::CoordinatorBuilder;
pub use commands::CommandSender;
pub use coordinator::IdentityCoordinator;
pub use hci_radio::{HciAdvertiser, HciScanner};
pub use managers::{AdvertisingResumeController, PausedRadio, ScanResumeController};
pub use operation::{OperationHandle, OperationId, OperationKind, OperationOutcome, RotationReason};
pub use rotation::RotationTimer;
pub use stats::CoordinatorStats;

pub use bleid_core::{
    AdvHandle, BdAddr, CoordinatorConfig, Identity, IdentityError, IdentityIndex, IdentityState,
    Irk, LeAddress, PrivacyConfig, RemovePolicy, Result, RetryPolicy,
};
