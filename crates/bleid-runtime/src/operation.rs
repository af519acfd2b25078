//! Identity operations and their per-index queue
//!
//! Operations on the same identity index run strictly one after another in
//! submission order. Each index has its own lane: an optional active
//! operation plus a FIFO of pending ones. A lane exists exactly while a
//! driver task is working through it.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bleid_core::{
    BdAddr, IdentityError, IdentityIndex, Irk, LeAddress, RemovePolicy, Result, ResumeFailure,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

// ----------------------------------------------------------------------------
// Operation Kinds
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationReason {
    /// The rotation deadline passed
    Timer,
    /// Requested by the application
    Requested,
}

/// Work performed on one identity between pausing and resuming its radio use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// Clear bonds and the resolving key, move to a non-resolvable address
    Unpair,
    Remove { policy: RemovePolicy },
    Rotate { reason: RotationReason },
    AddResolvingEntry { peer: LeAddress, peer_irk: Irk },
    RemoveResolvingEntry { peer: LeAddress },
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Unpair => "unpair",
            OperationKind::Remove { .. } => "remove",
            OperationKind::Rotate { .. } => "rotate",
            OperationKind::AddResolvingEntry { .. } => "add-resolving-entry",
            OperationKind::RemoveResolvingEntry { .. } => "remove-resolving-entry",
        }
    }

    /// Removal cancels everything still queued behind the active operation
    pub fn cancels_queued(&self) -> bool {
        matches!(self, OperationKind::Remove { .. })
    }

    pub fn is_rotation(&self) -> bool {
        matches!(self, OperationKind::Rotate { .. })
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(u64);

impl OperationId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Outcomes and Handles
// ----------------------------------------------------------------------------

/// Result of an operation that reached its update phase successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub id: OperationId,
    pub index: IdentityIndex,
    pub kind: OperationKind,
    /// Private address programmed by the operation, if any
    pub address: Option<BdAddr>,
    /// Radio operations that could not be re-enabled afterwards
    pub resume_failures: Vec<ResumeFailure>,
}

impl OperationOutcome {
    pub fn is_fully_resumed(&self) -> bool {
        self.resume_failures.is_empty()
    }

    /// Treat resume failures as an error
    pub fn into_result(self) -> Result<Self> {
        if self.resume_failures.is_empty() {
            Ok(self)
        } else {
            Err(IdentityError::ResumeFailed {
                failures: self.resume_failures,
            })
        }
    }
}

/// Caller's end of a submitted operation
#[derive(Debug)]
pub struct OperationHandle {
    id: OperationId,
    index: IdentityIndex,
    cancelled: Arc<AtomicBool>,
    reply: oneshot::Receiver<Result<OperationOutcome>>,
}

impl OperationHandle {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn index(&self) -> IdentityIndex {
        self.index
    }

    /// Withdraw the operation if it has not started yet
    ///
    /// Has no effect once the operation is active; it then runs to completion.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub async fn wait(self) -> Result<OperationOutcome> {
        self.reply
            .await
            .map_err(|_| IdentityError::CoordinatorShutdown)?
    }
}

/// Coordinator's end of a submitted operation
pub(crate) struct PendingOperation {
    pub id: OperationId,
    pub index: IdentityIndex,
    pub kind: OperationKind,
    cancelled: Arc<AtomicBool>,
    reply: oneshot::Sender<Result<OperationOutcome>>,
}

impl PendingOperation {
    pub fn new(id: OperationId, index: IdentityIndex, kind: OperationKind) -> (Self, OperationHandle) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();
        let handle = OperationHandle {
            id,
            index,
            cancelled: cancelled.clone(),
            reply: rx,
        };
        let pending = Self {
            id,
            index,
            kind,
            cancelled,
            reply: tx,
        };
        (pending, handle)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Deliver the result; a dropped handle just discards it
    pub fn complete(self, result: Result<OperationOutcome>) {
        let _ = self.reply.send(result);
    }

    pub fn cancel_with(self, index: IdentityIndex) {
        self.complete(Err(IdentityError::OperationCancelled { index }));
    }
}

// ----------------------------------------------------------------------------
// Queue
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Lane {
    active: Option<(OperationId, OperationKind)>,
    pending: VecDeque<PendingOperation>,
}

#[derive(Default)]
pub(crate) struct OperationQueue {
    lanes: BTreeMap<IdentityIndex, Lane>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `op` to its lane; returns true when the lane needs a new driver
    pub fn enqueue(&mut self, op: PendingOperation) -> bool {
        let start = !self.lanes.contains_key(&op.index);
        self.lanes.entry(op.index).or_default().pending.push_back(op);
        start
    }

    /// Activate the next operation of `index`
    ///
    /// Cancelled operations are completed with `OperationCancelled` on the
    /// way and counted in the second element. When the lane is empty it is
    /// closed and `None` is returned; the driver must then exit.
    pub fn start_next(&mut self, index: IdentityIndex) -> (Option<PendingOperation>, usize) {
        let mut skipped = 0;
        let Some(lane) = self.lanes.get_mut(&index) else {
            return (None, skipped);
        };
        lane.active = None;

        while let Some(op) = lane.pending.pop_front() {
            if op.is_cancelled() {
                op.cancel_with(index);
                skipped += 1;
                continue;
            }
            lane.active = Some((op.id, op.kind.clone()));
            return (Some(op), skipped);
        }

        self.lanes.remove(&index);
        (None, skipped)
    }

    /// Remove every not-yet-started operation of `index`
    pub fn drain_pending(&mut self, index: IdentityIndex) -> Vec<PendingOperation> {
        self.lanes
            .get_mut(&index)
            .map(|lane| lane.pending.drain(..).collect())
            .unwrap_or_default()
    }

    /// Whether a rotation is active or waiting for `index`
    pub fn has_rotation(&self, index: IdentityIndex) -> bool {
        self.lanes.get(&index).is_some_and(|lane| {
            lane.active.as_ref().is_some_and(|(_, kind)| kind.is_rotation())
                || lane.pending.iter().any(|op| op.kind.is_rotation())
        })
    }

    pub fn active(&self, index: IdentityIndex) -> Option<OperationId> {
        self.lanes
            .get(&index)
            .and_then(|lane| lane.active.as_ref().map(|(id, _)| *id))
    }

    pub fn pending_len(&self, index: IdentityIndex) -> usize {
        self.lanes.get(&index).map_or(0, |lane| lane.pending.len())
    }

    pub fn is_idle(&self) -> bool {
        self.lanes.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
