#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use modbus_client::{ClientError, RegisterTransport};
use sunspec_client::{ModelSource, SunSpecError};
use types::SnapshotValue;

#[derive(Debug, Default)]
struct TransportState {
    connected: bool,
    reconnect_succeeds: bool,
    fail_next: usize,
    fail_always: bool,
    attempts: usize,
    reconnects: usize,
    writes: Vec<(u8, u16, Vec<u16>)>,
}

/// Records writes; failure modes are switched on per test. Clones share state.
#[derive(Debug, Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    pub fn connected() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                connected: true,
                reconnect_succeeds: true,
                ..TransportState::default()
            })),
        }
    }

    pub fn disconnected() -> Self {
        let transport = Self::connected();
        transport.state().connected = false;
        transport
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state.lock().expect("transport state")
    }

    pub fn fail_next(&self, count: usize) {
        self.state().fail_next = count;
    }

    pub fn fail_always(&self) {
        self.state().fail_always = true;
    }

    pub fn refuse_reconnect(&self) {
        self.state().reconnect_succeeds = false;
    }

    pub fn writes(&self) -> Vec<(u8, u16, Vec<u16>)> {
        self.state().writes.clone()
    }

    pub fn attempts(&self) -> usize {
        self.state().attempts
    }

    pub fn reconnects(&self) -> usize {
        self.state().reconnects
    }
}

#[async_trait]
impl RegisterTransport for FakeTransport {
    fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn reconnect(&self) -> Result<(), ClientError> {
        let mut state = self.state();
        state.reconnects += 1;
        state.connected = state.reconnect_succeeds;
        if state.connected {
            Ok(())
        } else {
            Err(ClientError::Timeout { timeout_ms: 2_000 })
        }
    }

    async fn write_registers(&self, unit_id: u8, start: u16, values: &[u16]) -> Result<(), ClientError> {
        let mut state = self.state();
        state.attempts += 1;
        if state.fail_always || state.fail_next > 0 {
            state.fail_next = state.fail_next.saturating_sub(1);
            return Err(ClientError::NotConnected);
        }
        state.writes.push((unit_id, start, values.to_vec()));
        Ok(())
    }
}

type Points = Vec<(String, Option<SnapshotValue>)>;

/// Model source with canned device values, handed out on refresh.
#[derive(Debug, Default)]
pub struct FakeModels {
    order: Vec<String>,
    device: HashMap<String, Points>,
    cache: HashMap<String, Points>,
    failing: Option<String>,
    pub refreshed: Vec<String>,
}

impl FakeModels {
    /// Adds a model whose device values appear in the cache only after a refresh.
    pub fn with_device_model(mut self, name: &str, points: &[(&str, Option<SnapshotValue>)]) -> Self {
        self.order.push(name.to_string());
        self.device.insert(name.to_string(), to_points(points));
        self
    }

    /// Adds a model whose cache is already populated.
    pub fn with_cached_model(mut self, name: &str, points: &[(&str, Option<SnapshotValue>)]) -> Self {
        self.order.push(name.to_string());
        self.cache.insert(name.to_string(), to_points(points));
        self
    }

    pub fn failing_on(mut self, name: &str) -> Self {
        self.failing = Some(name.to_string());
        self
    }
}

fn to_points(points: &[(&str, Option<SnapshotValue>)]) -> Points {
    points
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

#[async_trait]
impl ModelSource for FakeModels {
    fn models(&self) -> Vec<String> {
        self.order.clone()
    }

    async fn refresh(&mut self, model: &str) -> Result<(), SunSpecError> {
        self.refreshed.push(model.to_string());
        if self.failing.as_deref() == Some(model) {
            return Err(SunSpecError::Transport(ClientError::Timeout { timeout_ms: 2_000 }));
        }
        let points = self
            .device
            .get(model)
            .cloned()
            .ok_or_else(|| SunSpecError::UnknownModel(model.to_string()))?;
        self.cache.insert(model.to_string(), points);
        Ok(())
    }

    fn points(&self, model: &str) -> Points {
        self.cache.get(model).cloned().unwrap_or_default()
    }
}
