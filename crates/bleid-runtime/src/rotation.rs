//! Background rotation timer
//!
//! Wakes every `rotation_check_interval` and queues a rotation for each
//! identity whose private address has expired. Rotations go through the
//! normal operation queue, so they never overlap user operations on the same
//! identity.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::coordinator::IdentityCoordinator;

const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);

pub struct RotationTimer {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RotationTimer {
    pub(crate) fn spawn(coordinator: IdentityCoordinator) -> Self {
        let period = coordinator
            .config()
            .rotation_check_interval
            .max(MIN_CHECK_INTERVAL);
        let (shutdown, mut stop) = oneshot::channel();

        let task = tokio::spawn(async move {
            info!("Rotation timer started (every {:?})", period);
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        let queued = coordinator.process_due_rotations().await;
                        if !queued.is_empty() {
                            debug!("Rotation timer queued {} rotation(s)", queued.len());
                        }
                    }
                }
            }
            info!("Rotation timer stopped");
        });

        Self {
            shutdown: Some(shutdown),
            task,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the timer and wait for it to exit
    ///
    /// Rotations already queued still run.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for RotationTimer {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}
