//! Coordinator builder
//!
//! Collects the capabilities the coordinator needs. Only the command gateway
//! and the default identity address are required; everything else falls back
//! to a production default (OS randomness, monotonic clock, HCI-backed
//! advertiser and scanner, no bond storage).

use std::sync::Arc;

use bleid_core::{
    Advertiser, CommandGateway, CoordinatorConfig, Irk, LeAddress, MonotonicTimeSource, NoBonds,
    OsRandomSource, PairingLayer, RandomSource, Scanner, TimeSource,
};
use tracing::debug;

use crate::commands::CommandSender;
use crate::coordinator::IdentityCoordinator;
use crate::hci_radio::{HciAdvertiser, HciScanner};

/// Capabilities handed to the coordinator
pub(crate) struct Capabilities {
    pub gateway: Arc<dyn CommandGateway>,
    pub advertiser: Arc<dyn Advertiser>,
    pub scanner: Arc<dyn Scanner>,
    pub pairing: Arc<dyn PairingLayer>,
    pub random: Arc<dyn RandomSource>,
    pub time: Arc<dyn TimeSource>,
}

pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    gateway: Arc<dyn CommandGateway>,
    default_address: LeAddress,
    default_key: Option<Irk>,
    advertiser: Option<Arc<dyn Advertiser>>,
    scanner: Option<Arc<dyn Scanner>>,
    pairing: Arc<dyn PairingLayer>,
    random: Arc<dyn RandomSource>,
    time: Arc<dyn TimeSource>,
}

impl CoordinatorBuilder {
    pub fn new(gateway: Arc<dyn CommandGateway>, default_address: LeAddress) -> Self {
        Self {
            config: CoordinatorConfig::default(),
            gateway,
            default_address,
            default_key: None,
            advertiser: None,
            scanner: None,
            pairing: Arc::new(NoBonds),
            random: Arc::new(OsRandomSource),
            time: Arc::new(MonotonicTimeSource::new()),
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolving key of the default identity
    pub fn with_default_key(mut self, key: Irk) -> Self {
        self.default_key = Some(key);
        self
    }

    pub fn with_advertiser(mut self, advertiser: Arc<dyn Advertiser>) -> Self {
        self.advertiser = Some(advertiser);
        self
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn Scanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn with_pairing(mut self, pairing: Arc<dyn PairingLayer>) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn build(self) -> IdentityCoordinator {
        let sender = CommandSender::new(self.gateway.clone(), self.config.command_timeout);
        let advertiser = self.advertiser.unwrap_or_else(|| {
            debug!("Using HCI advertiser");
            Arc::new(HciAdvertiser::new(sender.clone()))
        });
        let scanner = self.scanner.unwrap_or_else(|| {
            debug!("Using HCI scanner");
            Arc::new(HciScanner::new(sender))
        });

        IdentityCoordinator::new(
            self.config,
            self.default_address,
            self.default_key,
            Capabilities {
                gateway: self.gateway,
                advertiser,
                scanner,
                pairing: self.pairing,
                random: self.random,
                time: self.time,
            },
        )
    }
}
