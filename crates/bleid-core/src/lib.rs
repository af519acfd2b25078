//! BLE Identity Core
//!
//! Foundational types for the local identity and privacy layer of a BLE host:
//! device addresses and resolving keys, the identity store, private address
//! generation, the advertising/scanning state that identity operations pause
//! and resume, and the capability traits through which the host reaches the
//! controller.
//!
//! Sequencing of identity operations lives in `bleid-runtime`; nothing here
//! talks to a controller on its own.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod crypto;
pub mod errors;
pub mod hci;
pub mod identity;
pub mod pairing;
pub mod privacy;
pub mod radio;
pub mod random;
pub mod resolving_list;
pub mod types;

#[cfg(feature = "testing")]
pub mod testing;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{CoordinatorConfig, PrivacyConfig, RetryPolicy};
pub use errors::{GatewayError, IdentityError, RadioTarget, Result, ResumeFailure};
pub use hci::{CommandBuffer, CommandGateway, ResponseBuffer};
pub use identity::{Identity, IdentityState, IdentityStore, RemovePolicy};
pub use pairing::{NoBonds, PairingLayer};
pub use privacy::PrivacyAddressGenerator;
pub use radio::{AdvertisingRegistry, AdvertisingSet, Advertiser, ScanInstance, Scanner};
pub use random::{OsRandomSource, RandomSource};
pub use resolving_list::{ResolvingEntry, ResolvingList};
pub use types::{
    AddressType, AdvHandle, BdAddr, IdentityIndex, Irk, LeAddress, MonotonicTimeSource,
    RandomAddressKind, TimeSource, Timestamp,
};
