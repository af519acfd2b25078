//! In-process controller simulation
//!
//! [`SimulatedController`] answers HCI commands the way a controller would,
//! including rejecting address and resolving list changes while the radio
//! state they depend on is active. Running the coordinator against it shows
//! whether pausing and resuming happen around every update.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use bleid_core::hci::{opcode, CommandBuffer, CommandGateway, ResponseBuffer, STATUS_SUCCESS};
use bleid_core::{BdAddr, GatewayError, IdentityIndex, LeAddress, PairingLayer};

/// HCI status codes returned by the simulation
pub mod status {
    pub const UNKNOWN_COMMAND: u8 = 0x01;
    pub const UNKNOWN_DEVICE: u8 = 0x02;
    pub const MEMORY_CAPACITY_EXCEEDED: u8 = 0x07;
    pub const COMMAND_DISALLOWED: u8 = 0x0C;
    pub const INVALID_PARAMETERS: u8 = 0x12;
}

// ----------------------------------------------------------------------------
// Controller State
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulatedAdvSet {
    pub random_address: Option<BdAddr>,
    pub enabled: bool,
}

/// Observable controller state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerSnapshot {
    pub random_address: Option<BdAddr>,
    pub advertising_sets: BTreeMap<u8, SimulatedAdvSet>,
    pub scanning: bool,
    pub address_resolution: bool,
    /// Peer identity addresses (type, address) in the resolving list
    pub resolving_list: Vec<(u8, BdAddr)>,
    pub commands_accepted: u64,
    pub commands_rejected: u64,
    pub bonds_cleared: u64,
}

impl ControllerSnapshot {
    fn radio_active(&self) -> bool {
        self.scanning || self.advertising_sets.values().any(|set| set.enabled)
    }
}

// ----------------------------------------------------------------------------
// Simulated Controller
// ----------------------------------------------------------------------------

/// Controller and pairing layer living inside the process
#[derive(Debug, Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<ControllerSnapshot>>,
    latency: Duration,
    resolving_list_size: usize,
}

impl SimulatedController {
    pub fn new(latency: Duration, resolving_list_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ControllerSnapshot::default())),
            latency,
            resolving_list_size,
        }
    }

    pub async fn snapshot(&self) -> ControllerSnapshot {
        self.state.lock().await.clone()
    }

    fn apply(&self, state: &mut ControllerSnapshot, op: u16, params: &[u8]) -> u8 {
        match op {
            opcode::LE_SET_RANDOM_ADDRESS => {
                let Some(addr) = read_addr(params) else {
                    return status::INVALID_PARAMETERS;
                };
                if state.scanning {
                    return status::COMMAND_DISALLOWED;
                }
                state.random_address = Some(addr);
            }
            opcode::LE_SET_ADV_SET_RANDOM_ADDRESS => {
                let (Some(&handle), Some(addr)) = (params.first(), params.get(1..).and_then(read_addr))
                else {
                    return status::INVALID_PARAMETERS;
                };
                let set = state.advertising_sets.entry(handle).or_default();
                if set.enabled {
                    return status::COMMAND_DISALLOWED;
                }
                set.random_address = Some(addr);
            }
            opcode::LE_SET_EXT_ADV_ENABLE => {
                let (Some(&enable), Some(&count)) = (params.first(), params.get(1)) else {
                    return status::INVALID_PARAMETERS;
                };
                let entries = &params[2..];
                if entries.len() != usize::from(count) * 4 {
                    return status::INVALID_PARAMETERS;
                }
                for entry in entries.chunks_exact(4) {
                    state.advertising_sets.entry(entry[0]).or_default().enabled = enable != 0;
                }
            }
            opcode::LE_SET_SCAN_ENABLE => {
                let Some(&enable) = params.first() else {
                    return status::INVALID_PARAMETERS;
                };
                state.scanning = enable != 0;
            }
            opcode::LE_SET_ADDRESS_RESOLUTION_ENABLE => {
                let Some(&enable) = params.first() else {
                    return status::INVALID_PARAMETERS;
                };
                state.address_resolution = enable != 0;
            }
            opcode::LE_ADD_DEVICE_TO_RESOLVING_LIST => {
                if params.len() != 39 {
                    return status::INVALID_PARAMETERS;
                }
                let Some(peer) = read_peer(params) else {
                    return status::INVALID_PARAMETERS;
                };
                if state.address_resolution && state.radio_active() {
                    return status::COMMAND_DISALLOWED;
                }
                if state.resolving_list.contains(&peer) {
                    return status::INVALID_PARAMETERS;
                }
                if state.resolving_list.len() >= self.resolving_list_size {
                    return status::MEMORY_CAPACITY_EXCEEDED;
                }
                state.resolving_list.push(peer);
            }
            opcode::LE_REMOVE_DEVICE_FROM_RESOLVING_LIST => {
                let Some(peer) = read_peer(params) else {
                    return status::INVALID_PARAMETERS;
                };
                if state.address_resolution && state.radio_active() {
                    return status::COMMAND_DISALLOWED;
                }
                let Some(pos) = state.resolving_list.iter().position(|p| *p == peer) else {
                    return status::UNKNOWN_DEVICE;
                };
                state.resolving_list.remove(pos);
            }
            _ => return status::UNKNOWN_COMMAND,
        }
        STATUS_SUCCESS
    }
}

fn read_addr(bytes: &[u8]) -> Option<BdAddr> {
    let addr: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
    Some(BdAddr::new(addr))
}

fn read_peer(params: &[u8]) -> Option<(u8, BdAddr)> {
    let kind = *params.first()?;
    Some((kind, read_addr(&params[1..])?))
}

#[async_trait::async_trait]
impl CommandGateway for SimulatedController {
    async fn send_sync(
        &self,
        op: u16,
        command: CommandBuffer,
    ) -> Result<ResponseBuffer, GatewayError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock().await;
        let status = self.apply(&mut state, op, command.params());
        if status == STATUS_SUCCESS {
            state.commands_accepted += 1;
            debug!(
                "controller: {} [{}]",
                opcode::name(op),
                hex::encode(command.params())
            );
        } else {
            state.commands_rejected += 1;
            warn!(
                "controller: {} rejected with status 0x{:02x}",
                opcode::name(op),
                status
            );
        }
        Ok(ResponseBuffer::new(status, &[]))
    }
}

#[async_trait::async_trait]
impl PairingLayer for SimulatedController {
    async fn unpair(&self, index: IdentityIndex, peer: Option<LeAddress>) -> Result<(), String> {
        self.state.lock().await.bonds_cleared += 1;
        match peer {
            Some(peer) => info!("pairing: bond with {} of identity {} deleted", peer, index),
            None => info!("pairing: bonds of identity {} deleted", index),
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
