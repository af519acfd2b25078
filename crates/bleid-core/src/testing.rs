//! Deterministic capability fakes
//!
//! [`FakeController`] implements every radio-facing capability (command
//! gateway, advertiser, scanner, pairing layer) and records each call into one
//! shared journal, so tests can assert the exact order in which the
//! coordinator talks to the controller. Calls can be scripted to fail or to
//! block until a test releases them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use core::time::Duration;

use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use tokio::sync::Notify;

use crate::errors::{GatewayError, IdentityError, Result};
use crate::hci::{CommandBuffer, CommandGateway, ResponseBuffer};
use crate::pairing::PairingLayer;
use crate::radio::{Advertiser, Scanner};
use crate::random::RandomSource;
use crate::types::{AdvHandle, IdentityIndex, LeAddress, TimeSource, Timestamp};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Journal
// ----------------------------------------------------------------------------

/// A call made through one of the fake capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Command { opcode: u16, params: Vec<u8> },
    AdvEnable { handle: AdvHandle, enable: bool },
    ScanEnable { enable: bool },
    Unpair { index: IdentityIndex, peer: Option<LeAddress> },
}

impl RadioEvent {
    pub fn adv(handle: u8, enable: bool) -> Self {
        RadioEvent::AdvEnable {
            handle: AdvHandle::new(handle),
            enable,
        }
    }

    pub fn scan(enable: bool) -> Self {
        RadioEvent::ScanEnable { enable }
    }

    pub fn opcode(&self) -> Option<u16> {
        match self {
            RadioEvent::Command { opcode, .. } => Some(*opcode),
            _ => None,
        }
    }
}

/// Selects which calls a scripted failure or gate applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMatcher {
    Any,
    Opcode(u16),
    AdvEnable { handle: AdvHandle, enable: bool },
    ScanEnable { enable: bool },
    Unpair,
}

impl CallMatcher {
    pub fn adv(handle: u8, enable: bool) -> Self {
        CallMatcher::AdvEnable {
            handle: AdvHandle::new(handle),
            enable,
        }
    }

    pub fn scan(enable: bool) -> Self {
        CallMatcher::ScanEnable { enable }
    }

    fn matches(&self, event: &RadioEvent) -> bool {
        match (self, event) {
            (CallMatcher::Any, _) => true,
            (CallMatcher::Opcode(want), RadioEvent::Command { opcode, .. }) => want == opcode,
            (
                CallMatcher::AdvEnable { handle, enable },
                RadioEvent::AdvEnable {
                    handle: h,
                    enable: e,
                },
            ) => handle == h && enable == e,
            (CallMatcher::ScanEnable { enable }, RadioEvent::ScanEnable { enable: e }) => {
                enable == e
            }
            (CallMatcher::Unpair, RadioEvent::Unpair { .. }) => true,
            _ => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Gates
// ----------------------------------------------------------------------------

/// Holds the first matching call until released
#[derive(Debug, Clone)]
pub struct Gate {
    arrived: Arc<Notify>,
    released: Arc<Notify>,
}

impl Gate {
    fn new() -> Self {
        Self {
            arrived: Arc::new(Notify::new()),
            released: Arc::new(Notify::new()),
        }
    }

    /// Wait until the held call has been made
    pub async fn arrived(&self) {
        self.arrived.notified().await;
    }

    /// Let the held call complete
    pub fn release(&self) {
        self.released.notify_one();
    }
}

struct ScriptedFailure {
    matcher: CallMatcher,
    error: GatewayError,
    remaining: usize,
}

// ----------------------------------------------------------------------------
// Fake Controller
// ----------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    journal: Mutex<Vec<RadioEvent>>,
    failures: Mutex<Vec<ScriptedFailure>>,
    gates: Mutex<Vec<(CallMatcher, Gate)>>,
}

/// Recording fake for the gateway, advertiser, scanner and pairing layer
#[derive(Clone, Default)]
pub struct FakeController {
    state: Arc<FakeState>,
}

impl FakeController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next matching call with `error`
    pub fn fail(&self, matcher: CallMatcher, error: GatewayError) {
        self.fail_times(matcher, error, 1);
    }

    /// Fail the next `times` matching calls with `error`
    pub fn fail_times(&self, matcher: CallMatcher, error: GatewayError, times: usize) {
        lock(&self.state.failures).push(ScriptedFailure {
            matcher,
            error,
            remaining: times,
        });
    }

    /// Block the next matching call until the returned gate is released
    pub fn hold(&self, matcher: CallMatcher) -> Gate {
        let gate = Gate::new();
        lock(&self.state.gates).push((matcher, gate.clone()));
        gate
    }

    /// Every call made so far, in order
    pub fn journal(&self) -> Vec<RadioEvent> {
        lock(&self.state.journal).clone()
    }

    /// Opcodes of the gateway commands made so far, in order
    pub fn opcodes(&self) -> Vec<u16> {
        self.journal().iter().filter_map(RadioEvent::opcode).collect()
    }

    pub fn clear_journal(&self) {
        lock(&self.state.journal).clear();
    }

    async fn record(&self, event: RadioEvent) -> core::result::Result<(), GatewayError> {
        lock(&self.state.journal).push(event.clone());

        let gate = {
            let mut gates = lock(&self.state.gates);
            gates
                .iter()
                .position(|(matcher, _)| matcher.matches(&event))
                .map(|pos| gates.remove(pos).1)
        };
        if let Some(gate) = gate {
            gate.arrived.notify_one();
            gate.released.notified().await;
        }

        let mut failures = lock(&self.state.failures);
        if let Some(failure) = failures
            .iter_mut()
            .find(|f| f.remaining > 0 && f.matcher.matches(&event))
        {
            failure.remaining -= 1;
            return Err(failure.error.clone());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CommandGateway for FakeController {
    async fn send_sync(
        &self,
        opcode: u16,
        command: CommandBuffer,
    ) -> core::result::Result<ResponseBuffer, GatewayError> {
        self.record(RadioEvent::Command {
            opcode,
            params: command.params().to_vec(),
        })
        .await?;
        Ok(ResponseBuffer::success())
    }
}

#[async_trait::async_trait]
impl Advertiser for FakeController {
    async fn set_enable(&self, handle: AdvHandle, enable: bool) -> core::result::Result<(), GatewayError> {
        self.record(RadioEvent::AdvEnable { handle, enable }).await
    }
}

#[async_trait::async_trait]
impl Scanner for FakeController {
    async fn set_enable(&self, enable: bool) -> core::result::Result<(), GatewayError> {
        self.record(RadioEvent::ScanEnable { enable }).await
    }
}

#[async_trait::async_trait]
impl PairingLayer for FakeController {
    async fn unpair(
        &self,
        index: IdentityIndex,
        peer: Option<LeAddress>,
    ) -> core::result::Result<(), String> {
        self.record(RadioEvent::Unpair { index, peer })
            .await
            .map_err(|err| err.to_string())
    }
}

// ----------------------------------------------------------------------------
// Scripted Random Source
// ----------------------------------------------------------------------------

enum RandomStep {
    Bytes(Vec<u8>),
    Fail,
}

/// Random source that replays scripted bytes and failures, then falls back
/// to a seeded generator
pub struct ScriptedRandom {
    script: Mutex<VecDeque<RandomStep>>,
    rng: Mutex<ChaCha8Rng>,
    calls: AtomicU64,
}

impl ScriptedRandom {
    pub fn seeded(seed: u64) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            calls: AtomicU64::new(0),
        }
    }

    /// The next call receives `bytes` (extra bytes are ignored, missing ones
    /// come from the seeded generator)
    pub fn push_bytes(&self, bytes: &[u8]) {
        lock(&self.script).push_back(RandomStep::Bytes(bytes.to_vec()));
    }

    /// The next `count` calls fail
    pub fn push_failures(&self, count: usize) {
        let mut script = lock(&self.script);
        for _ in 0..count {
            script.push_back(RandomStep::Fail);
        }
    }

    /// Number of fill requests served or failed
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedRandom {
    fn default() -> Self {
        Self::seeded(42)
    }
}

impl RandomSource for ScriptedRandom {
    fn fill_random(&self, buf: &mut [u8]) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = lock(&self.script).pop_front();
        match step {
            Some(RandomStep::Fail) => Err(IdentityError::RandomUnavailable),
            Some(RandomStep::Bytes(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                lock(&self.rng).fill_bytes(&mut buf[n..]);
                Ok(())
            }
            None => {
                lock(&self.rng).fill_bytes(buf);
                Ok(())
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Manual Time Source
// ----------------------------------------------------------------------------

/// Time source advanced explicitly by tests
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    millis: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.millis.load(Ordering::SeqCst))
    }
}
