//! Advertiser and scanner backed directly by controller commands
//!
//! Used when the host has no separate advertising or scanning module to
//! delegate to: each enable/disable becomes one HCI command.

use bleid_core::hci;
use bleid_core::{AdvHandle, Advertiser, GatewayError, Scanner};

use crate::commands::CommandSender;

pub struct HciAdvertiser {
    sender: CommandSender,
}

impl HciAdvertiser {
    pub fn new(sender: CommandSender) -> Self {
        Self { sender }
    }
}

#[async_trait::async_trait]
impl Advertiser for HciAdvertiser {
    async fn set_enable(&self, handle: AdvHandle, enable: bool) -> Result<(), GatewayError> {
        let cmd = hci::set_ext_adv_enable(self.sender.gateway(), handle, enable);
        self.sender.send(cmd).await.map(|_| ())
    }
}

pub struct HciScanner {
    sender: CommandSender,
    filter_duplicates: bool,
}

impl HciScanner {
    pub fn new(sender: CommandSender) -> Self {
        Self {
            sender,
            filter_duplicates: true,
        }
    }

    pub fn with_filter_duplicates(mut self, filter: bool) -> Self {
        self.filter_duplicates = filter;
        self
    }
}

#[async_trait::async_trait]
impl Scanner for HciScanner {
    async fn set_enable(&self, enable: bool) -> Result<(), GatewayError> {
        let cmd = hci::set_scan_enable(self.sender.gateway(), enable, self.filter_duplicates);
        self.sender.send(cmd).await.map(|_| ())
    }
}
