//! Identity lifecycle coordinator
//!
//! Owns the identity store, the advertising and scanning state, and the
//! resolving list mirror. Every operation that changes what an identity looks
//! like over the air runs through the same phases:
//!
//! 1. Pausing: disable the identity's advertising sets (ascending handle),
//!    then the scanner if it uses the identity or the identity is the default.
//! 2. Updating: generate addresses, issue controller commands, then commit
//!    the result to the store.
//! 3. Resuming: re-enable the scanner, then the advertising sets, best effort.
//!
//! A failure in Pausing or Updating resumes whatever was paused and returns
//! the error with the store untouched. Operations on one index are run by a
//! single driver task in submission order; different indices run
//! concurrently.
//!
//! Locks are taken in the order queue, store, advertising, scan, resolving
//! list and are never held across a controller call. Operations still queued
//! when a removal completes are cancelled before the index is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bleid_core::hci;
use bleid_core::{
    crypto, AdvHandle, AdvertisingRegistry, AdvertisingSet, BdAddr, CoordinatorConfig, Identity,
    IdentityError, IdentityIndex, IdentityState, IdentityStore, Irk, LeAddress, PairingLayer,
    PrivacyAddressGenerator, RandomSource, RemovePolicy, ResolvingEntry, ResolvingList, Result,
    ResumeFailure, ScanInstance, TimeSource,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::builder::{Capabilities, CoordinatorBuilder};
use crate::commands::CommandSender;
use crate::managers::{AdvertisingResumeController, PausedRadio, ScanResumeController};
use crate::operation::{
    OperationHandle, OperationId, OperationKind, OperationOutcome, OperationQueue,
    PendingOperation, RotationReason,
};
use crate::retry::retry_transient;
use crate::rotation::RotationTimer;
use crate::stats::{CoordinatorStats, StatsCounters};

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

struct SharedState {
    store: Mutex<IdentityStore>,
    advertising: Arc<Mutex<AdvertisingRegistry>>,
    scan: Arc<Mutex<ScanInstance>>,
    resolving: Mutex<ResolvingList>,
}

/// Effect of a successful update phase
struct Applied {
    address: Option<BdAddr>,
    removed: bool,
}

impl Applied {
    fn none() -> Self {
        Self {
            address: None,
            removed: false,
        }
    }

    fn address(address: Option<BdAddr>) -> Self {
        Self {
            address,
            removed: false,
        }
    }
}

struct Inner {
    config: CoordinatorConfig,
    state: SharedState,
    queue: Mutex<OperationQueue>,
    commands: CommandSender,
    advertising: AdvertisingResumeController,
    scanning: ScanResumeController,
    pairing: Arc<dyn PairingLayer>,
    random: Arc<dyn RandomSource>,
    time: Arc<dyn TimeSource>,
    generator: PrivacyAddressGenerator,
    next_id: AtomicU64,
    stats: StatsCounters,
}

// ----------------------------------------------------------------------------
// Coordinator
// ----------------------------------------------------------------------------

/// Serializes identity operations against advertising and scanning
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct IdentityCoordinator {
    inner: Arc<Inner>,
}

impl IdentityCoordinator {
    pub fn builder(
        gateway: Arc<dyn bleid_core::CommandGateway>,
        default_address: LeAddress,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder::new(gateway, default_address)
    }

    pub(crate) fn new(
        config: CoordinatorConfig,
        default_address: LeAddress,
        default_key: Option<Irk>,
        caps: Capabilities,
    ) -> Self {
        let generator = PrivacyAddressGenerator::new(config.privacy.rpa_timeout);

        let mut store = IdentityStore::new(
            default_address,
            default_key,
            config.privacy.max_identities,
        );
        if config.privacy.privacy_enabled {
            if let Ok(default) = store.get_mut(IdentityIndex::DEFAULT) {
                generator.schedule_next_rotation(default, caps.time.now(), Duration::ZERO);
            }
        }

        let advertising = Arc::new(Mutex::new(AdvertisingRegistry::new()));
        let scan = Arc::new(Mutex::new(ScanInstance::default()));
        let commands = CommandSender::new(caps.gateway, config.command_timeout);

        let inner = Inner {
            advertising: AdvertisingResumeController::new(
                advertising.clone(),
                caps.advertiser,
                config.command_timeout,
            ),
            scanning: ScanResumeController::new(scan.clone(), caps.scanner, config.command_timeout),
            state: SharedState {
                store: Mutex::new(store),
                advertising,
                scan,
                resolving: Mutex::new(ResolvingList::new(config.privacy.resolving_list_size)),
            },
            queue: Mutex::new(OperationQueue::new()),
            commands,
            pairing: caps.pairing,
            random: caps.random,
            time: caps.time,
            generator,
            next_id: AtomicU64::new(1),
            stats: StatsCounters::default(),
            config,
        };

        info!(
            "Identity coordinator ready (privacy {}, max {} identities)",
            if inner.config.privacy.privacy_enabled {
                "enabled"
            } else {
                "disabled"
            },
            inner.config.privacy.max_identities
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    // ----------------------------------------------------------------------------
    // Identity Lifecycle
    // ----------------------------------------------------------------------------

    /// Add an identity at the lowest free index
    ///
    /// No radio state refers to a new identity, so this is applied directly.
    /// With privacy enabled the first rotation is due immediately.
    pub async fn add_identity(
        &self,
        address: LeAddress,
        resolving_key: Option<Irk>,
    ) -> Result<IdentityIndex> {
        let now = self.inner.time.now();
        let mut store = self.inner.state.store.lock().await;
        let index = store.add(address, resolving_key)?;
        if self.inner.config.privacy.privacy_enabled {
            let identity = store.get_mut(index)?;
            self.inner
                .generator
                .schedule_next_rotation(identity, now, Duration::ZERO);
        }
        info!("Identity {} added with address {}", index, address);
        Ok(index)
    }

    /// Add an identity, generating a static random address when none is given
    pub async fn create_identity(
        &self,
        address: Option<LeAddress>,
        resolving_key: Option<Irk>,
    ) -> Result<IdentityIndex> {
        let address = match address {
            Some(address) => address,
            None => {
                let random = self.inner.random.as_ref();
                let addr = retry_transient(&self.inner.config.random_retry, || {
                    crypto::create_static(random)
                })
                .await?;
                LeAddress::random(addr)
            }
        };
        self.add_identity(address, resolving_key).await
    }

    pub async fn remove_identity(
        &self,
        index: IdentityIndex,
        policy: RemovePolicy,
    ) -> Result<OperationOutcome> {
        self.submit(index, OperationKind::Remove { policy })
            .await?
            .wait()
            .await
    }

    pub async fn unpair(&self, index: IdentityIndex) -> Result<OperationOutcome> {
        self.submit(index, OperationKind::Unpair).await?.wait().await
    }

    pub async fn rotate_address_now(&self, index: IdentityIndex) -> Result<OperationOutcome> {
        self.submit(
            index,
            OperationKind::Rotate {
                reason: RotationReason::Requested,
            },
        )
        .await?
        .wait()
        .await
    }

    // ----------------------------------------------------------------------------
    // Resolving List
    // ----------------------------------------------------------------------------

    pub async fn add_resolving_entry(
        &self,
        index: IdentityIndex,
        peer: LeAddress,
        peer_irk: Irk,
    ) -> Result<OperationOutcome> {
        self.submit(index, OperationKind::AddResolvingEntry { peer, peer_irk })
            .await?
            .wait()
            .await
    }

    pub async fn remove_resolving_entry(
        &self,
        index: IdentityIndex,
        peer: LeAddress,
    ) -> Result<OperationOutcome> {
        self.submit(index, OperationKind::RemoveResolvingEntry { peer })
            .await?
            .wait()
            .await
    }

    // ----------------------------------------------------------------------------
    // Operation Queue
    // ----------------------------------------------------------------------------

    /// Queue an operation behind any earlier ones for the same index
    ///
    /// Removal cancels every operation still waiting for the index.
    pub async fn submit(&self, index: IdentityIndex, kind: OperationKind) -> Result<OperationHandle> {
        self.inner
            .clone()
            .enqueue(index, kind, false)
            .await?
            .ok_or(IdentityError::OperationCancelled { index })
    }

    // ----------------------------------------------------------------------------
    // Advertising and Scanning Registry
    // ----------------------------------------------------------------------------

    /// Track an advertising set created by the advertising module
    pub async fn register_advertising_set(
        &self,
        handle: AdvHandle,
        index: IdentityIndex,
        enabled: bool,
    ) -> Result<()> {
        let store = self.inner.state.store.lock().await;
        Self::check_idle(&store, index)?;
        self.inner
            .state
            .advertising
            .lock()
            .await
            .register(AdvertisingSet::new(handle, index, enabled));
        debug!("Advertising set {} registered for identity {}", handle, index);
        Ok(())
    }

    pub async fn unregister_advertising_set(&self, handle: AdvHandle) -> Option<AdvertisingSet> {
        self.inner.state.advertising.lock().await.unregister(handle)
    }

    /// Record an enable or disable performed by the application
    ///
    /// Returns `false` for unknown handles. Fails with `IdentityBusy` while an
    /// operation on the owning identity is in flight.
    pub async fn note_advertising_enabled(&self, handle: AdvHandle, enabled: bool) -> Result<bool> {
        let store = self.inner.state.store.lock().await;
        let mut registry = self.inner.state.advertising.lock().await;
        let owner = match registry.get(handle) {
            Some(set) => set.identity_index,
            None => return Ok(false),
        };
        if let Some(index) = owner {
            Self::check_idle(&store, index)?;
        }
        Ok(registry.note_enabled(handle, enabled))
    }

    pub async fn note_scan_enabled(&self, enabled: bool) -> Result<()> {
        let store = self.inner.state.store.lock().await;
        let mut scan = self.inner.state.scan.lock().await;
        Self::check_idle(&store, scan.bound_identity)?;
        scan.enabled = enabled;
        Ok(())
    }

    /// Make the scanner use the address of `index`
    pub async fn bind_scanner(&self, index: IdentityIndex) -> Result<()> {
        let store = self.inner.state.store.lock().await;
        Self::check_idle(&store, index)?;
        let mut scan = self.inner.state.scan.lock().await;
        Self::check_idle(&store, scan.bound_identity)?;
        scan.bound_identity = index;
        Ok(())
    }

    fn check_idle(store: &IdentityStore, index: IdentityIndex) -> Result<()> {
        if store.lookup(index)?.state.is_idle() {
            Ok(())
        } else {
            Err(IdentityError::IdentityBusy { index })
        }
    }

    // ----------------------------------------------------------------------------
    // Queries
    // ----------------------------------------------------------------------------

    pub async fn identity(&self, index: IdentityIndex) -> Result<Identity> {
        self.inner.state.store.lock().await.lookup(index).cloned()
    }

    pub async fn identities(&self) -> Vec<Identity> {
        self.inner.state.store.lock().await.iter().cloned().collect()
    }

    /// Address the identity currently presents over the air
    pub async fn current_address(&self, index: IdentityIndex) -> Result<LeAddress> {
        Ok(self.identity(index).await?.active_address())
    }

    pub async fn advertising_set(&self, handle: AdvHandle) -> Option<AdvertisingSet> {
        self.inner.state.advertising.lock().await.get(handle).cloned()
    }

    pub async fn scan_instance(&self) -> ScanInstance {
        self.inner.state.scan.lock().await.clone()
    }

    pub async fn resolving_entries(&self) -> Vec<ResolvingEntry> {
        self.inner.state.resolving.lock().await.entries().to_vec()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.inner.stats.snapshot()
    }

    /// Operation currently running for `index`, if any
    pub async fn active_operation(&self, index: IdentityIndex) -> Option<OperationId> {
        self.inner.queue.lock().await.active(index)
    }

    /// Operations waiting behind the active one for `index`
    pub async fn pending_operations(&self, index: IdentityIndex) -> usize {
        self.inner.queue.lock().await.pending_len(index)
    }

    /// Whether no operation is running or queued for any identity
    pub async fn is_quiescent(&self) -> bool {
        self.inner.queue.lock().await.is_idle()
    }

    // ----------------------------------------------------------------------------
    // Rotation
    // ----------------------------------------------------------------------------

    /// Queue a rotation for every identity whose deadline has passed
    ///
    /// Identities that already have a rotation active or queued are skipped.
    pub async fn process_due_rotations(&self) -> Vec<OperationHandle> {
        let now = self.inner.time.now();
        let due = self.inner.state.store.lock().await.due_for_rotation(now);

        let mut handles = Vec::new();
        for index in due {
            let kind = OperationKind::Rotate {
                reason: RotationReason::Timer,
            };
            match self.inner.clone().enqueue(index, kind, true).await {
                Ok(Some(handle)) => handles.push(handle),
                Ok(None) => trace!("Rotation already queued on identity {}", index),
                Err(err) => warn!("Could not queue rotation for identity {}: {}", index, err),
            }
        }
        if !handles.is_empty() {
            debug!("Queued {} timed rotation(s)", handles.len());
        }
        handles
    }

    /// Periodically queue due rotations until the returned timer is shut down
    pub fn spawn_rotation_timer(&self) -> RotationTimer {
        RotationTimer::spawn(self.clone())
    }
}

// ----------------------------------------------------------------------------
// Operation Driver
// ----------------------------------------------------------------------------

impl Inner {
    /// Check `index` and queue `kind` on its lane, starting a driver if idle
    ///
    /// The queue lock is held across the store check so a removal cannot
    /// release the index between the check and the enqueue. With
    /// `skip_if_rotating`, returns `None` when a rotation is already active
    /// or waiting.
    async fn enqueue(
        self: Arc<Self>,
        index: IdentityIndex,
        kind: OperationKind,
        skip_if_rotating: bool,
    ) -> Result<Option<OperationHandle>> {
        if kind.cancels_queued() && index.is_default() {
            return Err(IdentityError::InvalidIdentity { index });
        }

        let (handle, start) = {
            let mut queue = self.queue.lock().await;
            if !self.state.store.lock().await.contains(index) {
                return Err(IdentityError::InvalidIdentity { index });
            }
            if skip_if_rotating && queue.has_rotation(index) {
                return Ok(None);
            }

            let id = OperationId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            let (op, handle) = PendingOperation::new(id, index, kind);
            if op.kind.cancels_queued() {
                let superseded = queue.drain_pending(index);
                if !superseded.is_empty() {
                    debug!(
                        "{} supersedes {} queued operation(s) on identity {}",
                        id,
                        superseded.len(),
                        index
                    );
                }
                self.cancel_all(index, superseded);
            }
            trace!("Queued {} {} on identity {}", id, op.kind, index);
            (handle, queue.enqueue(op))
        };

        if start {
            tokio::spawn(self.run_lane(index));
        }
        Ok(Some(handle))
    }

    fn cancel_all(&self, index: IdentityIndex, ops: Vec<PendingOperation>) {
        StatsCounters::add(&self.stats.cancelled, ops.len());
        for pending in ops {
            pending.cancel_with(index);
        }
    }

    /// Work through the lane of `index` until it is empty
    async fn run_lane(self: Arc<Self>, index: IdentityIndex) {
        trace!("Driver for identity {} started", index);
        loop {
            let (next, skipped) = self.queue.lock().await.start_next(index);
            StatsCounters::add(&self.stats.cancelled, skipped);
            let Some(op) = next else {
                break;
            };

            debug!("Starting {} {} on identity {}", op.id, op.kind, index);
            let result = self.execute(&op).await;
            match &result {
                Ok(outcome) => {
                    StatsCounters::add(&self.stats.completed, 1);
                    match outcome.address {
                        Some(address) => info!(
                            "{} {} on identity {} completed, address {}",
                            op.id, op.kind, index, address
                        ),
                        None => info!("{} {} on identity {} completed", op.id, op.kind, index),
                    }
                }
                Err(err) => {
                    StatsCounters::add(&self.stats.failed, 1);
                    warn!("{} {} on identity {} failed: {}", op.id, op.kind, index, err);
                }
            }
            op.complete(result);
        }
        trace!("Driver for identity {} finished", index);
    }

    async fn execute(&self, op: &PendingOperation) -> Result<OperationOutcome> {
        let index = op.index;
        self.validate(index, &op.kind).await?;

        self.set_state(index, IdentityState::Pausing).await;
        let mut paused = PausedRadio::default();
        if let Err(err) = self.pause_radio(index, &mut paused).await {
            self.roll_back(index, &paused).await;
            return Err(err);
        }

        self.set_state(index, IdentityState::Updating).await;
        let applied = match self.apply(index, &op.kind).await {
            Ok(applied) => applied,
            Err(err) => {
                self.roll_back(index, &paused).await;
                return Err(err);
            }
        };

        self.set_state(index, IdentityState::Resuming).await;
        let resume_failures = self.resume_radio(&paused).await;
        for failure in &resume_failures {
            warn!("{} left disabled after {} on identity {}", failure, op.kind, index);
        }
        StatsCounters::add(&self.stats.resume_failures, resume_failures.len());
        self.set_state(index, IdentityState::Idle).await;

        if applied.removed {
            // Nothing queued before the removal may run on a reused index
            let mut queue = self.queue.lock().await;
            let stale = queue.drain_pending(index);
            if !stale.is_empty() {
                debug!(
                    "Cancelled {} operation(s) queued behind removal of identity {}",
                    stale.len(),
                    index
                );
            }
            self.cancel_all(index, stale);
            self.state.store.lock().await.release(index);
            debug!("Index {} released", index);
        }

        Ok(OperationOutcome {
            id: op.id,
            index,
            kind: op.kind.clone(),
            address: applied.address,
            resume_failures,
        })
    }

    /// Reject operations that would fail before touching the radio
    async fn validate(&self, index: IdentityIndex, kind: &OperationKind) -> Result<()> {
        let store = self.state.store.lock().await;
        store.lookup(index)?;
        match kind {
            OperationKind::Remove { policy } => {
                let in_use = self.in_use(index).await;
                store.check_removable(index, in_use, *policy)
            }
            OperationKind::AddResolvingEntry { peer, .. } => {
                self.state.resolving.lock().await.check_insert(peer)
            }
            OperationKind::RemoveResolvingEntry { peer } => {
                if self.state.resolving.lock().await.contains(index, peer) {
                    Ok(())
                } else {
                    Err(IdentityError::PeerNotFound { index, peer: *peer })
                }
            }
            OperationKind::Unpair | OperationKind::Rotate { .. } => Ok(()),
        }
    }

    async fn set_state(&self, index: IdentityIndex, state: IdentityState) {
        // A removed identity has no state left to track
        if self.state.store.lock().await.set_state(index, state).is_ok() {
            trace!("Identity {} -> {:?}", index, state);
        }
    }

    async fn in_use(&self, index: IdentityIndex) -> bool {
        let advertising = !self.state.advertising.lock().await.bound_to(index).is_empty();
        advertising || self.state.scan.lock().await.is_bound_to(index)
    }

    // ----------------------------------------------------------------------------
    // Pausing and Resuming
    // ----------------------------------------------------------------------------

    async fn pause_radio(&self, index: IdentityIndex, paused: &mut PausedRadio) -> Result<()> {
        let handles = self.state.advertising.lock().await.bound_to(index);
        self.advertising
            .pause_all(&handles, &mut paused.advertising)
            .await?;

        // The default identity owns the device random address the scanner
        // may be using, whichever identity it is bound to
        let scan_affected =
            index.is_default() || self.state.scan.lock().await.is_bound_to(index);
        if scan_affected {
            self.scanning.pause().await?;
            paused.scanner = true;
        }
        Ok(())
    }

    async fn resume_radio(&self, paused: &PausedRadio) -> Vec<ResumeFailure> {
        let mut failures = Vec::new();
        if paused.scanner {
            if let Err(failure) = self.scanning.resume().await {
                failures.push(failure);
            }
        }
        failures.extend(self.advertising.resume_all(&paused.advertising).await);
        failures
    }

    async fn roll_back(&self, index: IdentityIndex, paused: &PausedRadio) {
        self.set_state(index, IdentityState::Resuming).await;
        let failures = self.resume_radio(paused).await;
        for failure in &failures {
            error!(
                "Rollback for identity {} could not resume {}",
                index, failure
            );
        }
        StatsCounters::add(&self.stats.rollback_failures, failures.len());
        self.set_state(index, IdentityState::Idle).await;
    }

    // ----------------------------------------------------------------------------
    // Updating
    // ----------------------------------------------------------------------------

    async fn apply(&self, index: IdentityIndex, kind: &OperationKind) -> Result<Applied> {
        match kind {
            OperationKind::Unpair => self.apply_unpair(index).await,
            OperationKind::Rotate { reason } => self.apply_rotate(index, *reason).await,
            OperationKind::Remove { policy } => self.apply_remove(index, *policy).await,
            OperationKind::AddResolvingEntry { peer, peer_irk } => {
                self.apply_add_resolving(index, *peer, *peer_irk).await
            }
            OperationKind::RemoveResolvingEntry { peer } => {
                self.apply_remove_resolving(index, *peer).await
            }
        }
    }

    async fn apply_unpair(&self, index: IdentityIndex) -> Result<Applied> {
        let address = if self.config.privacy.privacy_enabled {
            let random = self.random.as_ref();
            let generator = &self.generator;
            Some(retry_transient(&self.config.random_retry, || generator.non_resolvable(random)).await?)
        } else {
            None
        };

        let (local_irk, entries) = self.resolving_of(index).await?;
        self.purge_resolving(&entries, local_irk.as_ref()).await?;
        if let Some(address) = &address {
            if let Err(err) = self.program_address(index, address).await {
                self.restore_entries(&entries, local_irk.as_ref()).await;
                return Err(err);
            }
        }

        let now = self.time.now();
        {
            let mut store = self.state.store.lock().await;
            store.unpair(index)?;
            let identity = store.get_mut(index)?;
            identity.current_private_address = address;
            match address {
                Some(_) => self.generator.schedule_default_rotation(identity, now),
                None => identity.rotation_deadline = None,
            }
        }
        self.commit_purge(&entries).await;
        Ok(Applied::address(address))
    }

    async fn apply_rotate(&self, index: IdentityIndex, reason: RotationReason) -> Result<Applied> {
        let identity = self.state.store.lock().await.lookup(index)?.clone();
        let random = self.random.as_ref();
        let generator = &self.generator;
        let address =
            retry_transient(&self.config.random_retry, || generator.rotate(&identity, random))
                .await?;

        self.program_address(index, &address).await?;

        let now = self.time.now();
        {
            let mut store = self.state.store.lock().await;
            let identity = store.get_mut(index)?;
            identity.current_private_address = Some(address);
            if self.config.privacy.privacy_enabled {
                self.generator.schedule_default_rotation(identity, now);
            } else {
                identity.rotation_deadline = None;
            }
        }
        StatsCounters::add(&self.stats.rotations, 1);
        debug!("Identity {} rotated to {} ({:?})", index, address, reason);
        Ok(Applied::address(Some(address)))
    }

    async fn apply_remove(&self, index: IdentityIndex, policy: RemovePolicy) -> Result<Applied> {
        let in_use = self.in_use(index).await;
        self.state
            .store
            .lock()
            .await
            .check_removable(index, in_use, policy)?;

        // Resolving entries can be put back; deleted bonds cannot
        let (local_irk, entries) = self.resolving_of(index).await?;
        self.purge_resolving(&entries, local_irk.as_ref()).await?;

        let unpaired =
            match tokio::time::timeout(self.commands.timeout(), self.pairing.unpair(index, None)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(IdentityError::PairingFailed { index, reason }),
                Err(_) => Err(IdentityError::PairingFailed {
                    index,
                    reason: "timed out".to_string(),
                }),
            };
        if let Err(err) = unpaired {
            self.restore_entries(&entries, local_irk.as_ref()).await;
            return Err(err);
        }

        {
            let mut store = self.state.store.lock().await;
            store.remove(index, in_use, policy)?;
            let detached = self.state.advertising.lock().await.detach_all(index);
            if !detached.is_empty() {
                debug!("Detached advertising sets {:?} from identity {}", detached, index);
            }
            let mut scan = self.state.scan.lock().await;
            if scan.is_bound_to(index) {
                scan.bound_identity = IdentityIndex::DEFAULT;
                debug!("Scanner rebound from identity {} to the default identity", index);
            }
        }
        self.commit_purge(&entries).await;
        Ok(Applied {
            address: None,
            removed: true,
        })
    }

    async fn apply_add_resolving(
        &self,
        index: IdentityIndex,
        peer: LeAddress,
        peer_irk: Irk,
    ) -> Result<Applied> {
        let local_irk = self.state.store.lock().await.lookup(index)?.resolving_key;
        self.state.resolving.lock().await.check_insert(&peer)?;

        let gateway = self.commands.gateway();
        self.commands
            .execute(hci::set_address_resolution_enable(gateway, false))
            .await?;
        let add = hci::add_device_to_resolving_list(gateway, &peer, &peer_irk, local_irk.as_ref());
        if let Err(err) = self.commands.execute(add).await {
            self.restore_resolution().await;
            return Err(err);
        }
        let enable = hci::set_address_resolution_enable(gateway, true);
        if let Err(err) = self.commands.execute(enable).await {
            let undo = hci::remove_device_from_resolving_list(gateway, &peer);
            if let Err(undo_err) = self.commands.execute(undo).await {
                error!("Peer {} left in the controller resolving list: {}", peer, undo_err);
            }
            self.restore_resolution().await;
            return Err(err);
        }

        self.state.resolving.lock().await.insert(ResolvingEntry {
            identity: index,
            peer,
            peer_irk,
        })?;
        Ok(Applied::none())
    }

    async fn apply_remove_resolving(&self, index: IdentityIndex, peer: LeAddress) -> Result<Applied> {
        let (local_irk, entries) = self.resolving_of(index).await?;
        let entry = entries
            .into_iter()
            .find(|entry| entry.peer == peer)
            .ok_or(IdentityError::PeerNotFound { index, peer })?;
        let entries = std::slice::from_ref(&entry);
        self.purge_resolving(entries, local_irk.as_ref()).await?;
        self.commit_purge(entries).await;
        Ok(Applied::none())
    }

    // ----------------------------------------------------------------------------
    // Controller Programming
    // ----------------------------------------------------------------------------

    /// Program `address` wherever the identity's address is used
    async fn program_address(&self, index: IdentityIndex, address: &BdAddr) -> Result<()> {
        let handles = self.state.advertising.lock().await.bound_to(index);
        let uses_device_address =
            index.is_default() || self.state.scan.lock().await.is_bound_to(index);

        let gateway = self.commands.gateway();
        if uses_device_address {
            self.commands
                .execute(hci::set_random_address(gateway, address))
                .await?;
        }
        for handle in handles {
            self.commands
                .execute(hci::set_adv_set_random_address(gateway, handle, address))
                .await?;
        }
        Ok(())
    }

    /// Local key and resolving entries of `index`
    async fn resolving_of(&self, index: IdentityIndex) -> Result<(Option<Irk>, Vec<ResolvingEntry>)> {
        let local_irk = self.state.store.lock().await.lookup(index)?.resolving_key;
        let entries = self.state.resolving.lock().await.entries_for(index);
        Ok((local_irk, entries))
    }

    /// Remove `entries` from the controller resolving list
    ///
    /// Leaves address resolution disabled and the mirror untouched until
    /// [`Inner::commit_purge`]. On failure the entries already removed are
    /// put back, so the controller matches the mirror again.
    async fn purge_resolving(&self, entries: &[ResolvingEntry], local_irk: Option<&Irk>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let gateway = self.commands.gateway();
        self.commands
            .execute(hci::set_address_resolution_enable(gateway, false))
            .await?;

        for (done, entry) in entries.iter().enumerate() {
            let cmd = hci::remove_device_from_resolving_list(gateway, &entry.peer);
            if let Err(err) = self.commands.execute(cmd).await {
                self.restore_entries(&entries[..done], local_irk).await;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Drop purged entries from the mirror and re-enable resolution if any remain
    async fn commit_purge(&self, entries: &[ResolvingEntry]) {
        if entries.is_empty() {
            return;
        }
        {
            let mut resolving = self.state.resolving.lock().await;
            for entry in entries {
                resolving.remove(entry.identity, &entry.peer);
            }
        }
        self.restore_resolution().await;
    }

    /// Best-effort re-add of purged entries after a later step failed
    async fn restore_entries(&self, entries: &[ResolvingEntry], local_irk: Option<&Irk>) {
        let gateway = self.commands.gateway();
        for entry in entries {
            let cmd = hci::add_device_to_resolving_list(gateway, &entry.peer, &entry.peer_irk, local_irk);
            if let Err(err) = self.commands.execute(cmd).await {
                error!(
                    "Peer {} of identity {} lost from the controller resolving list: {}",
                    entry.peer, entry.identity, err
                );
            }
        }
        if !entries.is_empty() {
            self.restore_resolution().await;
        }
    }

    /// Best-effort re-enable of address resolution after a list update
    async fn restore_resolution(&self) {
        if self.state.resolving.lock().await.is_empty() {
            return;
        }
        let cmd = hci::set_address_resolution_enable(self.commands.gateway(), true);
        if let Err(err) = self.commands.execute(cmd).await {
            error!("Address resolution left disabled: {}", err);
        }
    }
}
