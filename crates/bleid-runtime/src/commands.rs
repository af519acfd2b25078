//! Timed command dispatch
//!
//! Every controller command issued by the coordinator goes through a
//! [`CommandSender`], which bounds the wait for the controller and folds the
//! response status into the result.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bleid_core::hci::{opcode, CommandBuffer, CommandGateway, ResponseBuffer};
use bleid_core::{GatewayError, IdentityError, Result};
use tracing::{debug, warn};

/// Run `fut`, mapping an elapsed `timeout` to [`GatewayError::Timeout`]
pub(crate) async fn bounded<T, F>(timeout: Duration, fut: F) -> core::result::Result<T, GatewayError>
where
    F: Future<Output = core::result::Result<T, GatewayError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

#[derive(Clone)]
pub struct CommandSender {
    gateway: Arc<dyn CommandGateway>,
    timeout: Duration,
}

impl CommandSender {
    pub fn new(gateway: Arc<dyn CommandGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    pub fn gateway(&self) -> &dyn CommandGateway {
        self.gateway.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a command and wait for its completion
    pub async fn send(
        &self,
        command: CommandBuffer,
    ) -> core::result::Result<ResponseBuffer, GatewayError> {
        let code = command.opcode();
        debug!("Sending {} (0x{:04x})", opcode::name(code), code);

        let result = bounded(self.timeout, self.gateway.send_sync(code, command))
            .await
            .and_then(ResponseBuffer::into_result);
        if let Err(err) = &result {
            warn!("{} (0x{:04x}) failed: {}", opcode::name(code), code, err);
        }
        result
    }

    /// Send a command issued while updating identity state
    pub async fn execute(&self, command: CommandBuffer) -> Result<ResponseBuffer> {
        let code = command.opcode();
        self.send(command)
            .await
            .map_err(|err| IdentityError::from_command(code, err))
    }
}
