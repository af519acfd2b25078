//! HCI command gateway capability and command encoding
//!
//! The gateway is the synchronous command/response channel to the controller.
//! This module defines the trait, the buffers exchanged with it, and builders
//! for the LE commands the identity coordinator issues.

use smallvec::SmallVec;

use crate::errors::GatewayError;
use crate::types::{AdvHandle, BdAddr, Irk, LeAddress};

// ----------------------------------------------------------------------------
// Opcodes
// ----------------------------------------------------------------------------

/// LE controller command opcodes (OGF 0x08)
pub mod opcode {
    pub const LE_SET_RANDOM_ADDRESS: u16 = 0x2005;
    pub const LE_SET_SCAN_ENABLE: u16 = 0x200C;
    pub const LE_ADD_DEVICE_TO_RESOLVING_LIST: u16 = 0x2027;
    pub const LE_REMOVE_DEVICE_FROM_RESOLVING_LIST: u16 = 0x2028;
    pub const LE_SET_ADDRESS_RESOLUTION_ENABLE: u16 = 0x202D;
    pub const LE_SET_ADV_SET_RANDOM_ADDRESS: u16 = 0x2035;
    pub const LE_SET_EXT_ADV_ENABLE: u16 = 0x2039;

    /// Human-readable command name for logs
    pub fn name(opcode: u16) -> &'static str {
        match opcode {
            LE_SET_RANDOM_ADDRESS => "LE Set Random Address",
            LE_SET_SCAN_ENABLE => "LE Set Scan Enable",
            LE_ADD_DEVICE_TO_RESOLVING_LIST => "LE Add Device To Resolving List",
            LE_REMOVE_DEVICE_FROM_RESOLVING_LIST => "LE Remove Device From Resolving List",
            LE_SET_ADDRESS_RESOLUTION_ENABLE => "LE Set Address Resolution Enable",
            LE_SET_ADV_SET_RANDOM_ADDRESS => "LE Set Advertising Set Random Address",
            LE_SET_EXT_ADV_ENABLE => "LE Set Extended Advertising Enable",
            _ => "Unknown",
        }
    }
}

/// HCI status code for success
pub const STATUS_SUCCESS: u8 = 0x00;

// ----------------------------------------------------------------------------
// Buffers
// ----------------------------------------------------------------------------

/// Parameters of a command being built for the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuffer {
    opcode: u16,
    param_len: u8,
    params: SmallVec<[u8; 64]>,
}

impl CommandBuffer {
    pub fn new(opcode: u16, param_len: u8) -> Self {
        Self {
            opcode,
            param_len,
            params: SmallVec::with_capacity(param_len as usize),
        }
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    /// Declared parameter length
    pub fn param_len(&self) -> u8 {
        self.param_len
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// Whether exactly the declared number of parameter bytes was written
    pub fn is_complete(&self) -> bool {
        self.params.len() == self.param_len as usize
    }

    pub fn push_u8(&mut self, value: u8) -> &mut Self {
        self.params.push(value);
        self
    }

    pub fn push_u16(&mut self, value: u16) -> &mut Self {
        self.params.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.params.extend_from_slice(bytes);
        self
    }
}

/// Command complete parameters returned by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBuffer {
    status: u8,
    params: SmallVec<[u8; 16]>,
}

impl ResponseBuffer {
    pub fn new(status: u8, params: &[u8]) -> Self {
        Self {
            status,
            params: SmallVec::from_slice(params),
        }
    }

    pub fn success() -> Self {
        Self::new(STATUS_SUCCESS, &[])
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// Turn a non-zero status into [`GatewayError::Rejected`]
    pub fn into_result(self) -> Result<Self, GatewayError> {
        if self.status == STATUS_SUCCESS {
            Ok(self)
        } else {
            Err(GatewayError::Rejected {
                status: self.status,
            })
        }
    }
}

// ----------------------------------------------------------------------------
// Gateway Trait
// ----------------------------------------------------------------------------

/// Synchronous command channel to the controller
#[async_trait::async_trait]
pub trait CommandGateway: Send + Sync {
    /// Allocate a command buffer
    fn create_command(&self, opcode: u16, param_len: u8) -> CommandBuffer {
        CommandBuffer::new(opcode, param_len)
    }

    /// Send a command and wait for its completion
    ///
    /// Fails on transport error or timeout. Controller rejection may be
    /// reported either as an error or as a non-zero response status.
    async fn send_sync(
        &self,
        opcode: u16,
        command: CommandBuffer,
    ) -> Result<ResponseBuffer, GatewayError>;
}

// ----------------------------------------------------------------------------
// Command Builders
// ----------------------------------------------------------------------------

pub fn set_random_address(gateway: &dyn CommandGateway, addr: &BdAddr) -> CommandBuffer {
    let mut cmd = gateway.create_command(opcode::LE_SET_RANDOM_ADDRESS, 6);
    cmd.push_bytes(addr.as_bytes());
    cmd
}

pub fn set_adv_set_random_address(
    gateway: &dyn CommandGateway,
    handle: AdvHandle,
    addr: &BdAddr,
) -> CommandBuffer {
    let mut cmd = gateway.create_command(opcode::LE_SET_ADV_SET_RANDOM_ADDRESS, 7);
    cmd.push_u8(handle.value()).push_bytes(addr.as_bytes());
    cmd
}

/// Enable or disable a single advertising set with no duration or event limit
pub fn set_ext_adv_enable(
    gateway: &dyn CommandGateway,
    handle: AdvHandle,
    enable: bool,
) -> CommandBuffer {
    let mut cmd = gateway.create_command(opcode::LE_SET_EXT_ADV_ENABLE, 6);
    cmd.push_u8(enable as u8)
        .push_u8(1)
        .push_u8(handle.value())
        .push_u16(0)
        .push_u8(0);
    cmd
}

pub fn set_scan_enable(
    gateway: &dyn CommandGateway,
    enable: bool,
    filter_duplicates: bool,
) -> CommandBuffer {
    let mut cmd = gateway.create_command(opcode::LE_SET_SCAN_ENABLE, 2);
    cmd.push_u8(enable as u8).push_u8(filter_duplicates as u8);
    cmd
}

pub fn set_address_resolution_enable(gateway: &dyn CommandGateway, enable: bool) -> CommandBuffer {
    let mut cmd = gateway.create_command(opcode::LE_SET_ADDRESS_RESOLUTION_ENABLE, 1);
    cmd.push_u8(enable as u8);
    cmd
}

/// Local IRK of all zeros when the identity has no key
pub fn add_device_to_resolving_list(
    gateway: &dyn CommandGateway,
    peer: &LeAddress,
    peer_irk: &Irk,
    local_irk: Option<&Irk>,
) -> CommandBuffer {
    let mut cmd = gateway.create_command(opcode::LE_ADD_DEVICE_TO_RESOLVING_LIST, 39);
    cmd.push_u8(peer.kind.as_hci())
        .push_bytes(peer.addr.as_bytes())
        .push_bytes(&peer_irk.to_hci_bytes())
        .push_bytes(&local_irk.map(Irk::to_hci_bytes).unwrap_or([0u8; 16]));
    cmd
}

pub fn remove_device_from_resolving_list(
    gateway: &dyn CommandGateway,
    peer: &LeAddress,
) -> CommandBuffer {
    let mut cmd = gateway.create_command(opcode::LE_REMOVE_DEVICE_FROM_RESOLVING_LIST, 7);
    cmd.push_u8(peer.kind.as_hci()).push_bytes(peer.addr.as_bytes());
    cmd
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct NullGateway;

    #[async_trait::async_trait]
    impl CommandGateway for NullGateway {
        async fn send_sync(
            &self,
            _opcode: u16,
            _command: CommandBuffer,
        ) -> Result<ResponseBuffer, GatewayError> {
            Ok(ResponseBuffer::success())
        }
    }

    #[test]
    fn test_builders_fill_declared_length() {
        let gw = NullGateway;
        let addr = BdAddr::new([1, 2, 3, 4, 5, 6]);
        let peer = LeAddress::public(addr);
        let irk = Irk::new([9u8; 16]);

        let commands = [
            set_random_address(&gw, &addr),
            set_adv_set_random_address(&gw, AdvHandle::new(2), &addr),
            set_ext_adv_enable(&gw, AdvHandle::new(2), true),
            set_scan_enable(&gw, true, false),
            set_address_resolution_enable(&gw, false),
            add_device_to_resolving_list(&gw, &peer, &irk, None),
            remove_device_from_resolving_list(&gw, &peer),
        ];
        for cmd in &commands {
            assert!(cmd.is_complete(), "{} incomplete", opcode::name(cmd.opcode()));
        }
    }

    #[test]
    fn test_longest_command_stays_inline() {
        let peer = LeAddress::public(BdAddr::new([1, 2, 3, 4, 5, 6]));
        let irk = Irk::new([9u8; 16]);
        let cmd = add_device_to_resolving_list(&NullGateway, &peer, &irk, Some(&irk));
        assert_eq!(cmd.params().len(), 39);
        assert!(!cmd.params.spilled());
    }

    #[test]
    fn test_ext_adv_enable_layout() {
        let cmd = set_ext_adv_enable(&NullGateway, AdvHandle::new(3), false);
        assert_eq!(cmd.params(), &[0x00, 0x01, 0x03, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_response_status() {
        assert!(ResponseBuffer::success().into_result().is_ok());
        assert_eq!(
            ResponseBuffer::new(0x0c, &[]).into_result(),
            Err(GatewayError::Rejected { status: 0x0c })
        );
    }
}
