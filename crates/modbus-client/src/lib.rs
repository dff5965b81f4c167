use std::cmp::min;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_modbus::client::tcp;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::{Reader, Slave, SlaveContext, Writer};
use tracing::{debug, info, warn};

mod codec;

pub use codec::{encode, encode_i32, encode_u32, EncodeError, RegisterKind};

/// Configuration options for connecting to and talking with a Modbus TCP device.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Maximum number of registers to read in a single request; devices with quirks may require lower batch sizes.
    pub max_batch_size: Option<u16>,
    /// Connect and per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Number of read retries per request after the initial attempt. Reads fail on the first error by default.
    pub retry_count: usize,
    /// Base delay between read retries in milliseconds (exponential backoff).
    pub retry_backoff_ms: u64,
    /// Upper bound for retry backoff delay in milliseconds.
    pub retry_max_backoff_ms: u64,
    /// Optional delay between split reads to placate slower devices.
    pub inter_read_delay_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "192.168.105.20".to_string(),
            port: 502,
            max_batch_size: Some(125),
            timeout_ms: 2_000,
            retry_count: 0,
            retry_backoff_ms: 100,
            retry_max_backoff_ms: 2_000,
            inter_read_delay_ms: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid socket address {0}:{1}")]
    InvalidAddress(String, u16),
    #[error("modbus transport error: {0}")]
    Modbus(std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("register address overflow")]
    AddressOverflow,
    #[error("not connected")]
    NotConnected,
}

/// Holding-register writes with an observable connection state.
#[async_trait]
pub trait RegisterTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Drops any existing connection and dials the device again.
    async fn reconnect(&self) -> Result<(), ClientError>;

    async fn write_registers(&self, unit_id: u8, start: u16, values: &[u16]) -> Result<(), ClientError>;
}

#[async_trait]
pub trait RegisterReader: Send + Sync {
    async fn read_registers(&self, unit_id: u8, start: u16, count: u16) -> Result<Vec<u16>, ClientError>;
}

#[derive(Debug)]
pub struct ModbusClient {
    config: ClientConfig,
    addr: SocketAddr,
    context: Mutex<Option<Context>>,
    connected: AtomicBool,
}

impl ModbusClient {
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse::<SocketAddr>()
            .map_err(|_| ClientError::InvalidAddress(config.host.clone(), config.port))?;
        let context = dial(addr, config.timeout_ms).await?;
        info!(%addr, "modbus connected");
        Ok(Self {
            config,
            addr,
            context: Mutex::new(Some(context)),
            connected: AtomicBool::new(true),
        })
    }

    pub async fn read_range(&self, unit_id: u8, start: u16, count: u16) -> Result<Vec<u16>, ClientError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut ctx = self.context.lock().await;
        let batch_size = self
            .config
            .max_batch_size
            .unwrap_or(count)
            .max(1u16);
        let mut remaining = count;
        let mut offset = 0u16;
        let mut out = Vec::with_capacity(count as usize);

        while remaining > 0 {
            let chunk = min(remaining, batch_size);
            let chunk_start = u16::try_from(u32::from(start) + u32::from(offset))
                .map_err(|_| ClientError::AddressOverflow)?;
            let values = self
                .read_chunk(&mut ctx, unit_id, chunk_start, chunk)
                .await?;
            out.extend(values);
            remaining -= chunk;
            offset += chunk;

            if remaining > 0 {
                if let Some(delay_ms) = self.config.inter_read_delay_ms {
                    sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }

        Ok(out)
    }

    pub async fn write_range(&self, unit_id: u8, start: u16, values: &[u16]) -> Result<(), ClientError> {
        let mut guard = self.context.lock().await;
        let ctx = guard.as_mut().ok_or(ClientError::NotConnected)?;
        ctx.set_slave(Slave(unit_id));

        let request = ctx.write_multiple_registers(start, values);
        let result = match timeout(Duration::from_millis(self.config.timeout_ms), request).await {
            Ok(Ok(())) => {
                debug!(unit_id, start, count = values.len(), "modbus write ok");
                return Ok(());
            }
            Ok(Err(err)) => ClientError::Modbus(err),
            Err(_) => ClientError::Timeout {
                timeout_ms: self.config.timeout_ms,
            },
        };

        warn!(unit_id, start, error = %result, "modbus write failed, dropping connection");
        *guard = None;
        self.connected.store(false, Ordering::Release);
        Err(result)
    }

    async fn read_chunk(
        &self,
        ctx: &mut Option<Context>,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        if ctx.is_none() {
            // dropped by an earlier failure
            *ctx = Some(dial(self.addr, self.config.timeout_ms).await?);
            self.connected.store(true, Ordering::Release);
            info!(addr = %self.addr, "modbus reconnected");
        }

        let mut attempts = 0usize;

        loop {
            let last_error = match ctx.as_mut() {
                Some(context) => {
                    context.set_slave(Slave(unit_id));
                    let request = context.read_holding_registers(start, count);
                    match timeout(Duration::from_millis(self.config.timeout_ms), request).await {
                        Ok(Ok(values)) => {
                            debug!(unit_id, start, count, "modbus read ok");
                            return Ok(values);
                        }
                        Ok(Err(err)) => {
                            warn!(unit_id, start, count, error = %err, "modbus read error");
                            ClientError::Modbus(err)
                        }
                        Err(_) => {
                            warn!(unit_id, start, count, "modbus read timeout");
                            ClientError::Timeout {
                                timeout_ms: self.config.timeout_ms,
                            }
                        }
                    }
                }
                None => ClientError::NotConnected,
            };

            if attempts >= self.config.retry_count {
                *ctx = None;
                self.connected.store(false, Ordering::Release);
                return Err(last_error);
            }

            let delay_ms = self.retry_delay_ms(attempts);
            attempts += 1;
            sleep(Duration::from_millis(delay_ms)).await;

            // A timed out or failed transaction leaves the stream in an unknown state.
            match dial(self.addr, self.config.timeout_ms).await {
                Ok(context) => {
                    *ctx = Some(context);
                    self.connected.store(true, Ordering::Release);
                }
                Err(err) => {
                    warn!(addr = %self.addr, error = %err, "modbus redial failed");
                    *ctx = None;
                }
            }
        }
    }

    fn retry_delay_ms(&self, attempt: usize) -> u64 {
        let base = self.config.retry_backoff_ms.max(1);
        let shift = u32::try_from(attempt).unwrap_or(u32::MAX);
        let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let delay = base.saturating_mul(factor);
        let max = self.config.retry_max_backoff_ms.max(base);
        min(delay, max)
    }
}

#[async_trait]
impl RegisterTransport for ModbusClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn reconnect(&self) -> Result<(), ClientError> {
        let mut guard = self.context.lock().await;
        *guard = None;
        self.connected.store(false, Ordering::Release);

        let context = dial(self.addr, self.config.timeout_ms).await?;
        *guard = Some(context);
        self.connected.store(true, Ordering::Release);
        info!(addr = %self.addr, "modbus reconnected");
        Ok(())
    }

    async fn write_registers(&self, unit_id: u8, start: u16, values: &[u16]) -> Result<(), ClientError> {
        self.write_range(unit_id, start, values).await
    }
}

#[async_trait]
impl RegisterReader for ModbusClient {
    async fn read_registers(&self, unit_id: u8, start: u16, count: u16) -> Result<Vec<u16>, ClientError> {
        self.read_range(unit_id, start, count).await
    }
}

async fn dial(addr: SocketAddr, timeout_ms: u64) -> Result<Context, ClientError> {
    match timeout(Duration::from_millis(timeout_ms), tcp::connect(addr)).await {
        Ok(Ok(context)) => Ok(context),
        Ok(Err(err)) => Err(ClientError::Io(err)),
        Err(_) => Err(ClientError::Timeout { timeout_ms }),
    }
}
