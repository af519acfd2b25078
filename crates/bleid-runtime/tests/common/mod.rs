//! Shared fixtures for coordinator integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bleid_core::testing::{FakeController, ManualTimeSource, ScriptedRandom};
use bleid_runtime::{
    AdvHandle, BdAddr, CoordinatorConfig, IdentityCoordinator, IdentityIndex, Irk, LeAddress,
};

use tracing_subscriber::filter::LevelFilter;

pub const DEFAULT: IdentityIndex = IdentityIndex::DEFAULT;

pub struct Harness {
    pub fake: FakeController,
    pub random: Arc<ScriptedRandom>,
    pub time: ManualTimeSource,
    pub coordinator: IdentityCoordinator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::testing())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        init_tracing();
        let fake = FakeController::new();
        let random = Arc::new(ScriptedRandom::seeded(7));
        let time = ManualTimeSource::new();
        let coordinator = IdentityCoordinator::builder(Arc::new(fake.clone()), public_addr(0))
            .with_config(config)
            .with_default_key(default_irk())
            .with_advertiser(Arc::new(fake.clone()))
            .with_scanner(Arc::new(fake.clone()))
            .with_pairing(Arc::new(fake.clone()))
            .with_random(random.clone())
            .with_time_source(Arc::new(time.clone()))
            .build();
        Self {
            fake,
            random,
            time,
            coordinator,
        }
    }

    /// Register an advertising set owned by `index`
    pub async fn advertise(&self, handle: u8, index: IdentityIndex, enabled: bool) {
        self.coordinator
            .register_advertising_set(AdvHandle::new(handle), index, enabled)
            .await
            .unwrap();
    }

    pub async fn set_enabled(&self, handle: u8) -> bool {
        self.coordinator
            .advertising_set(AdvHandle::new(handle))
            .await
            .unwrap()
            .enabled
    }
}

/// Route coordinator logs through the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .with_test_writer()
        .with_target(false)
        .try_init();
}

pub fn public_addr(last: u8) -> LeAddress {
    LeAddress::public(BdAddr::new([last, 0x10, 0x20, 0x30, 0x40, 0x50]))
}

pub fn default_irk() -> Irk {
    Irk::new([0x5a; 16])
}

pub fn peer(last: u8) -> LeAddress {
    LeAddress::public(BdAddr::new([last, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]))
}

/// Poll `check` until it holds or a second passes
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
