//! Core types for local BLE identities
//!
//! Newtypes for device addresses, identity resolving keys and the small
//! integer handles used by the controller, plus the time abstraction used for
//! rotation deadlines.

use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::errors::IdentityError;

// ----------------------------------------------------------------------------
// Device Address
// ----------------------------------------------------------------------------

/// 48-bit Bluetooth device address, stored in HCI (little-endian) byte order
///
/// `bytes[5]` holds the most significant octet, whose top two bits carry the
/// random address sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BdAddr([u8; 6]);

impl BdAddr {
    /// The all-zero address
    pub const ANY: Self = Self([0; 6]);

    /// Create an address from bytes in HCI order
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Create an address from bytes in the order it is written (most significant first)
    pub fn from_msb(mut bytes: [u8; 6]) -> Self {
        bytes.reverse();
        Self(bytes)
    }

    /// Get the raw bytes in HCI order
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Sub-type of this address when used as a random address
    pub fn random_kind(&self) -> RandomAddressKind {
        match self.0[5] >> 6 {
            0b00 => RandomAddressKind::NonResolvable,
            0b01 => RandomAddressKind::Resolvable,
            0b11 => RandomAddressKind::Static,
            _ => RandomAddressKind::Reserved,
        }
    }

    /// The prand half of a resolvable private address, in HCI order
    pub fn prand(&self) -> [u8; 3] {
        [self.0[3], self.0[4], self.0[5]]
    }

    /// The hash half of a resolvable private address, in HCI order
    pub fn hash(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// Build a resolvable private address from its hash and prand halves
    pub fn from_parts(hash: [u8; 3], prand: [u8; 3]) -> Self {
        Self([hash[0], hash[1], hash[2], prand[0], prand[1], prand[2]])
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

impl FromStr for BdAddr {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(&clean).map_err(|_| IdentityError::invalid_format("address"))?;
        let msb: [u8; 6] = bytes
            .try_into()
            .map_err(|_| IdentityError::invalid_format("address"))?;
        Ok(Self::from_msb(msb))
    }
}

/// Random address sub-types (Core spec Vol 6, Part B, 1.3.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomAddressKind {
    /// Top bits `00`
    NonResolvable,
    /// Top bits `01`
    Resolvable,
    /// Top bits `11`
    Static,
    /// Top bits `10`
    Reserved,
}

/// Type of an LE address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AddressType {
    Public = 0x00,
    Random = 0x01,
}

impl AddressType {
    /// Value used for address type fields in HCI commands
    pub fn as_hci(self) -> u8 {
        self as u8
    }
}

/// An LE address together with its type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeAddress {
    pub kind: AddressType,
    pub addr: BdAddr,
}

impl LeAddress {
    pub fn public(addr: BdAddr) -> Self {
        Self {
            kind: AddressType::Public,
            addr,
        }
    }

    pub fn random(addr: BdAddr) -> Self {
        Self {
            kind: AddressType::Random,
            addr,
        }
    }

    /// Whether this is a random static address
    pub fn is_static_random(&self) -> bool {
        self.kind == AddressType::Random && self.addr.random_kind() == RandomAddressKind::Static
    }
}

impl fmt::Display for LeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AddressType::Public => write!(f, "{} (public)", self.addr),
            AddressType::Random => write!(f, "{} (random)", self.addr),
        }
    }
}

// ----------------------------------------------------------------------------
// Identity Resolving Key
// ----------------------------------------------------------------------------

/// 128-bit identity resolving key
///
/// Bytes are held most significant first, the order used by the Core
/// specification's sample data. HCI commands carry the key reversed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Irk([u8; 16]);

impl Irk {
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Key bytes in HCI (little-endian) order
    pub fn to_hci_bytes(&self) -> [u8; 16] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }
}

// Keys never appear in logs
impl fmt::Debug for Irk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Irk(..)")
    }
}

impl FromStr for Irk {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(clean).map_err(|_| IdentityError::invalid_format("IRK"))?;
        let key: [u8; 16] = bytes
            .try_into()
            .map_err(|_| IdentityError::invalid_format("IRK"))?;
        Ok(Self(key))
    }
}

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

/// Index of a local identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityIndex(u8);

impl IdentityIndex {
    /// The default identity, which always exists
    pub const DEFAULT: Self = Self(0);

    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }
}

impl fmt::Display for IdentityIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Controller handle of an advertising set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AdvHandle(u8);

impl AdvHandle {
    pub const fn new(handle: u8) -> Self {
        Self(handle)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for AdvHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time
// ----------------------------------------------------------------------------

/// Monotonic timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

/// Source of monotonic time, injectable for deterministic tests
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Time source measuring from its own creation
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTimeSource {
    origin: Instant,
}

impl MonotonicTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTimeSource {
    fn now(&self) -> Timestamp {
        let millis = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        Timestamp::new(millis)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
