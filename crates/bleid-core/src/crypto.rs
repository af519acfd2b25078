//! Private address construction
//!
//! Implements the random address hash function `ah` and the address formats
//! of Core spec Vol 6, Part B, 1.3.2:
//!
//! - static random: 46 random bits, top bits `11`
//! - non-resolvable private: 46 random bits, top bits `00`
//! - resolvable private: `prand` (22 random bits, top bits `01`) followed by
//!   `hash = ah(IRK, prand)`
//!
//! In each case the random part must not be all zeros or all ones.

use aes_gcm::aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes_gcm::aes::Aes128;

use crate::errors::Result;
use crate::random::RandomSource;
use crate::types::{BdAddr, Irk, RandomAddressKind};

const MARKER_MASK: u8 = 0xC0;
const RPA_MARKER: u8 = 0x40;
const STATIC_MARKER: u8 = 0xC0;

/// Random address hash function: `ah(k, r) = e(k, r') mod 2^24`
///
/// `prand` and the returned hash are in HCI (little-endian) order.
pub fn ah(irk: &Irk, prand: [u8; 3]) -> [u8; 3] {
    // r' = 104 zero bits || prand, most significant byte first
    let mut block = [0u8; 16];
    block[13] = prand[2];
    block[14] = prand[1];
    block[15] = prand[0];

    let cipher = Aes128::new(GenericArray::from_slice(irk.as_bytes()));
    let mut block = GenericArray::clone_from_slice(&block);
    cipher.encrypt_block(&mut block);

    [block[15], block[14], block[13]]
}

/// Whether `addr` was generated from `irk`
pub fn rpa_matches(irk: &Irk, addr: &BdAddr) -> bool {
    addr.random_kind() == RandomAddressKind::Resolvable && ah(irk, addr.prand()) == addr.hash()
}

/// Create a resolvable private address for `irk`
pub fn create_rpa(irk: &Irk, random: &dyn RandomSource) -> Result<BdAddr> {
    let mut prand = [0u8; 3];
    random.fill_random(&mut prand)?;
    prand[2] = (prand[2] & !MARKER_MASK) | RPA_MARKER;
    avoid_uniform_bits(&mut prand);

    Ok(BdAddr::from_parts(ah(irk, prand), prand))
}

/// Create a non-resolvable private address
pub fn create_nrpa(random: &dyn RandomSource) -> Result<BdAddr> {
    let mut bytes = [0u8; 6];
    random.fill_random(&mut bytes)?;
    bytes[5] &= !MARKER_MASK;
    avoid_uniform_bits(&mut bytes);
    Ok(BdAddr::new(bytes))
}

/// Create a static random address
pub fn create_static(random: &dyn RandomSource) -> Result<BdAddr> {
    let mut bytes = [0u8; 6];
    random.fill_random(&mut bytes)?;
    bytes[5] |= STATIC_MARKER;
    avoid_uniform_bits(&mut bytes);
    Ok(BdAddr::new(bytes))
}

/// Generate a fresh identity resolving key
pub fn generate_irk(random: &dyn RandomSource) -> Result<Irk> {
    let mut key = [0u8; 16];
    random.fill_random(&mut key)?;
    Ok(Irk::new(key))
}

/// Flip the lowest bit when the random part (all bits below the two marker
/// bits of the last byte) is uniformly zero or one.
fn avoid_uniform_bits(bytes: &mut [u8]) {
    let last = bytes.len() - 1;
    let low = &bytes[..last];
    let top = bytes[last] & !MARKER_MASK;

    let all_zero = low.iter().all(|b| *b == 0) && top == 0;
    let all_one = low.iter().all(|b| *b == 0xFF) && top == !MARKER_MASK;
    if all_zero || all_one {
        bytes[0] ^= 0x01;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
