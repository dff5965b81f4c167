use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use modbus_client::{encode, ClientError, EncodeError, RegisterKind, RegisterTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial write attempt.
    pub max_retries: usize,
    /// Fixed delay before reconnecting and retrying.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The transport was down; it was re-dialled instead of writing.
    Skipped,
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("write to register {address} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        address: u16,
        attempts: usize,
        #[source]
        source: ClientError,
    },
}

/// Writes 32-bit values to holding registers with reconnect-and-retry.
#[derive(Debug)]
pub struct RegisterWriter<T> {
    transport: T,
    unit_id: u8,
    policy: RetryPolicy,
}

impl<T: RegisterTransport> RegisterWriter<T> {
    pub fn new(transport: T, unit_id: u8, policy: RetryPolicy) -> Self {
        Self {
            transport,
            unit_id,
            policy,
        }
    }

    pub async fn write(
        &self,
        address: u16,
        value: i64,
        kind: RegisterKind,
    ) -> Result<WriteOutcome, WriteError> {
        let registers = encode(value, kind)?;

        if !self.transport.is_connected() {
            warn!(address, "modbus connection lost, trying to reconnect");
            self.reconnect().await;
            info!(
                address,
                connected = self.transport.is_connected(),
                "write skipped this cycle"
            );
            return Ok(WriteOutcome::Skipped);
        }

        let mut attempts = 0usize;
        loop {
            attempts += 1;
            match self
                .transport
                .write_registers(self.unit_id, address, &registers)
                .await
            {
                Ok(()) => {
                    counter!("battery_register_writes_total").increment(1);
                    debug!(address, value, ?kind, attempts, "register written");
                    return Ok(WriteOutcome::Written);
                }
                Err(err) => {
                    counter!("battery_register_write_failures_total").increment(1);
                    if attempts > self.policy.max_retries {
                        return Err(WriteError::RetriesExhausted {
                            address,
                            attempts,
                            source: err,
                        });
                    }
                    warn!(
                        address,
                        attempts,
                        error = %err,
                        backoff_ms = self.policy.backoff.as_millis(),
                        "sending failed, reconnecting and resending"
                    );
                    sleep(self.policy.backoff).await;
                    self.reconnect().await;
                }
            }
        }
    }

    async fn reconnect(&self) {
        counter!("battery_reconnects_total").increment(1);
        if let Err(err) = self.transport.reconnect().await {
            warn!(error = %err, "modbus reconnect failed");
        }
    }
}
