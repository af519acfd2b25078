//! Command handlers for the bleid CLI

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use bleid_core::hci::{self, CommandGateway};
use bleid_core::{crypto, AddressType, OsRandomSource, RandomAddressKind};
use bleid_runtime::{
    AdvHandle, BdAddr, CoordinatorStats, IdentityCoordinator, IdentityIndex, Irk, LeAddress,
    RemovePolicy,
};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::sim::{ControllerSnapshot, SimulatedController};

/// Summary of a simulated identity lifecycle
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub identities_created: usize,
    pub identities_remaining: usize,
    pub stats: CoordinatorStats,
    pub controller: ControllerSnapshot,
}

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Demo { identities, force } => {
                let report = Self::handle_demo_command(&config, identities, force).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(())
            }
            Commands::Watch {
                seconds,
                rpa_timeout_ms,
            } => {
                Self::handle_watch_command(
                    config,
                    Duration::from_secs(seconds),
                    rpa_timeout_ms.map(Duration::from_millis),
                )
                .await
            }
            Commands::Rpa { irk, count } => {
                for address in Self::handle_rpa_command(&irk, count)? {
                    println!("{}", address);
                }
                Ok(())
            }
            Commands::Resolve { irk, address } => {
                let (kind, resolves) = Self::handle_resolve_command(&irk, &address)?;
                println!(
                    "{} is {}; {}",
                    address,
                    describe_kind(kind),
                    if resolves {
                        "resolves with this key"
                    } else {
                        "does not resolve with this key"
                    }
                );
                Ok(())
            }
            Commands::Ah { irk, prand } => {
                println!("{}", Self::handle_ah_command(&irk, &prand)?);
                Ok(())
            }
            Commands::Config => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
        }
    }

    /// Run add, rotate, resolve, unpair and remove against a simulated controller
    pub async fn handle_demo_command(
        config: &AppConfig,
        identities: u8,
        force: bool,
    ) -> Result<DemoReport> {
        let (controller, coordinator) = Self::start(config)?;
        let gateway: &dyn CommandGateway = &controller;

        // The application advertises and scans with the default identity
        Self::advertise(&coordinator, gateway, AdvHandle::new(0), IdentityIndex::DEFAULT).await?;
        send_checked(gateway, hci::set_scan_enable(gateway, true, true)).await?;
        coordinator.note_scan_enabled(true).await?;

        if config.coordinator.privacy.privacy_enabled {
            let outcome = coordinator.rotate_address_now(IdentityIndex::DEFAULT).await?;
            report_resume(&outcome.resume_failures);
        }

        let mut created = Vec::new();
        for n in 1..=identities {
            let key = crypto::generate_irk(&OsRandomSource)?;
            let index = coordinator.create_identity(None, Some(key)).await?;
            Self::advertise(&coordinator, gateway, AdvHandle::new(n), index).await?;
            if config.coordinator.privacy.privacy_enabled {
                coordinator.rotate_address_now(index).await?;
            }
            let identity = coordinator.identity(index).await?;
            info!(
                "Identity {} ({}) advertising as {}",
                index,
                identity.address,
                identity.active_address()
            );
            created.push((index, AdvHandle::new(n)));
        }

        if let Some(&(first, _)) = created.first() {
            let peer = LeAddress::public(BdAddr::from_msb([0x00, 0x1B, 0xDC, 0x0F, 0x00, 0x01]));
            let peer_irk = crypto::generate_irk(&OsRandomSource)?;
            coordinator.add_resolving_entry(first, peer, peer_irk).await?;
            info!("Peer {} resolvable for identity {}", peer, first);

            let outcome = coordinator.unpair(first).await?;
            report_resume(&outcome.resume_failures);
            info!(
                "Identity {} unpaired, now using {}",
                first,
                coordinator.current_address(first).await?
            );
        }

        for &(index, handle) in &created {
            if force {
                coordinator
                    .remove_identity(index, RemovePolicy::ForceDetach)
                    .await?;
            } else {
                // Stop the set the way an application would before removal
                send_checked(gateway, hci::set_ext_adv_enable(gateway, handle, false)).await?;
                coordinator.note_advertising_enabled(handle, false).await?;
                coordinator.unregister_advertising_set(handle).await;
                coordinator.remove_identity(index, RemovePolicy::Reject).await?;
            }
            info!("Identity {} removed", index);
        }

        Ok(DemoReport {
            identities_created: created.len(),
            identities_remaining: coordinator.identities().await.len(),
            stats: coordinator.stats(),
            controller: controller.snapshot().await,
        })
    }

    /// Run the rotation timer and print every address change
    async fn handle_watch_command(
        mut config: AppConfig,
        duration: Duration,
        rpa_timeout: Option<Duration>,
    ) -> Result<()> {
        if let Some(timeout) = rpa_timeout {
            let privacy = &mut config.coordinator.privacy;
            privacy.rpa_timeout = timeout;
            config.coordinator.rotation_check_interval =
                config.coordinator.rotation_check_interval.min(timeout / 2);
            config.validate()?;
        }
        if !config.coordinator.privacy.privacy_enabled {
            warn!("Privacy is disabled; addresses will not rotate");
        }

        let (controller, coordinator) = Self::start(&config)?;
        let gateway: &dyn CommandGateway = &controller;
        Self::advertise(&coordinator, gateway, AdvHandle::new(0), IdentityIndex::DEFAULT).await?;

        let timer = coordinator.spawn_rotation_timer();
        let mut ticker = tokio::time::interval(Duration::from_millis(50));
        let deadline = tokio::time::Instant::now() + duration;
        let mut last = None;

        while tokio::time::Instant::now() < deadline {
            ticker.tick().await;
            let address = coordinator.current_address(IdentityIndex::DEFAULT).await?;
            if last != Some(address) {
                println!("{}", address);
                last = Some(address);
            }
        }
        timer.shutdown().await;

        let stats = coordinator.stats();
        info!(
            "{} rotations, {} resume failures",
            stats.rotations, stats.resume_failures
        );
        Ok(())
    }

    pub fn handle_rpa_command(irk: &str, count: u32) -> Result<Vec<BdAddr>> {
        let irk: Irk = irk.parse()?;
        (0..count)
            .map(|_| crypto::create_rpa(&irk, &OsRandomSource).map_err(CliError::from))
            .collect()
    }

    pub fn handle_resolve_command(irk: &str, address: &str) -> Result<(RandomAddressKind, bool)> {
        let irk: Irk = irk.parse()?;
        let address: BdAddr = address.parse()?;
        Ok((address.random_kind(), crypto::rpa_matches(&irk, &address)))
    }

    /// Hash of `prand`, both written most significant byte first
    pub fn handle_ah_command(irk: &str, prand: &str) -> Result<String> {
        let irk: Irk = irk.parse()?;
        let bytes = hex::decode(prand.trim_start_matches("0x"))?;
        let mut prand: [u8; 3] = bytes.try_into().map_err(|_| {
            CliError::InvalidArgument("prand must be exactly 3 bytes".to_string())
        })?;
        prand.reverse();

        let mut hash = crypto::ah(&irk, prand);
        hash.reverse();
        Ok(hex::encode(hash))
    }

    // ----------------------------------------------------------------------------
    // Helpers
    // ----------------------------------------------------------------------------

    fn start(config: &AppConfig) -> Result<(SimulatedController, IdentityCoordinator)> {
        let controller = SimulatedController::new(
            Duration::from_millis(config.controller.latency_ms),
            config.coordinator.privacy.resolving_list_size,
        );
        let default_key = match config.identity_key()? {
            Some(key) => key,
            None => crypto::generate_irk(&OsRandomSource)?,
        };

        let coordinator = IdentityCoordinator::builder(
            Arc::new(controller.clone()),
            LeAddress::public(config.public_address()?),
        )
        .with_config(config.coordinator.clone())
        .with_default_key(default_key)
        .with_pairing(Arc::new(controller.clone()))
        .build();

        Ok((controller, coordinator))
    }

    /// Create and enable an advertising set, then hand it to the coordinator
    async fn advertise(
        coordinator: &IdentityCoordinator,
        gateway: &dyn CommandGateway,
        handle: AdvHandle,
        index: IdentityIndex,
    ) -> Result<()> {
        let address = coordinator.current_address(index).await?;
        if address.kind == AddressType::Random {
            send_checked(
                gateway,
                hci::set_adv_set_random_address(gateway, handle, &address.addr),
            )
            .await?;
        }
        send_checked(gateway, hci::set_ext_adv_enable(gateway, handle, true)).await?;
        coordinator
            .register_advertising_set(handle, index, true)
            .await?;
        Ok(())
    }
}

/// Issue a command on behalf of the application; any failure ends the command
async fn send_checked(gateway: &dyn CommandGateway, command: hci::CommandBuffer) -> Result<()> {
    let op = command.opcode();
    gateway
        .send_sync(op, command)
        .await
        .and_then(hci::ResponseBuffer::into_result)
        .map_err(|err| {
            CliError::InvalidArgument(format!("{} failed: {}", hci::opcode::name(op), err))
        })?;
    Ok(())
}

fn describe_kind(kind: RandomAddressKind) -> &'static str {
    match kind {
        RandomAddressKind::Resolvable => "a resolvable private address",
        RandomAddressKind::NonResolvable => "a non-resolvable private address",
        RandomAddressKind::Static => "a static random address",
        RandomAddressKind::Reserved => "a reserved random address",
    }
}

fn report_resume(failures: &[bleid_core::ResumeFailure]) {
    for failure in failures {
        warn!("Could not resume {}", failure);
    }
}
