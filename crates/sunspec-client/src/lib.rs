use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use modbus_client::{ClientError, RegisterReader};
use sunspec_parser::{decode_block, is_sunspec_marker, ModelCatalog, SUNSPEC_END_ID};
use types::SnapshotValue;

/// Candidate base addresses probed for the `SunS` marker, in order.
pub const BASE_ADDRESSES: [u16; 3] = [40_000, 0, 50_000];

#[derive(Debug, Clone)]
pub struct SunSpecConfig {
    pub unit_id: u8,
    /// Fixed base address; probes [`BASE_ADDRESSES`] when unset.
    pub base_address: Option<u16>,
    /// Upper bound on the model chain length, guards against devices that never send the end marker.
    pub max_models: usize,
    /// Treat a failed header read after the first model as the end of the model list.
    pub lenient: bool,
}

impl Default for SunSpecConfig {
    fn default() -> Self {
        Self {
            unit_id: 126,
            base_address: None,
            max_models: 64,
            lenient: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum SunSpecError {
    #[error("no SunSpec marker found for unit {unit_id}")]
    NotFound { unit_id: u8 },
    #[error("modbus transport error: {0}")]
    Transport(#[from] ClientError),
    #[error("unknown model {0}")]
    UnknownModel(String),
    #[error("model list exceeds {0} entries")]
    TooManyModels(usize),
    #[error("short header read at {address}")]
    Truncated { address: u16 },
    #[error("register address overflow")]
    AddressOverflow,
}

/// A model found while walking the device's model chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModel {
    pub id: u16,
    /// Unique name; repeated models get a `_2`, `_3`, ... suffix.
    pub name: String,
    /// Register address of the model header.
    pub start: u16,
    /// Register count after the header, as reported by the device.
    pub length: u16,
}

/// Named models whose points can be refreshed from the device and read back from a cache.
#[async_trait]
pub trait ModelSource: Send {
    fn models(&self) -> Vec<String>;

    async fn refresh(&mut self, model: &str) -> Result<(), SunSpecError>;

    /// Cached points of a model, empty until the model has been refreshed.
    fn points(&self, model: &str) -> Vec<(String, Option<SnapshotValue>)>;
}

#[derive(Debug)]
struct ModelState {
    info: DiscoveredModel,
    points: Vec<(String, Option<SnapshotValue>)>,
}

pub struct SunSpecClient<R> {
    reader: R,
    unit_id: u8,
    base_address: u16,
    catalog: ModelCatalog,
    models: Vec<ModelState>,
}

impl<R: RegisterReader> SunSpecClient<R> {
    /// Locates the SunSpec map and walks the model chain. Point values are not read yet.
    pub async fn connect(
        reader: R,
        config: &SunSpecConfig,
        catalog: ModelCatalog,
    ) -> Result<Self, SunSpecError> {
        let base_address = find_base_address(&reader, config).await?;
        let models = walk_models(&reader, config, &catalog, base_address).await?;
        info!(
            unit_id = config.unit_id,
            base_address,
            models = models.len(),
            "sunspec models discovered"
        );

        Ok(Self {
            reader,
            unit_id: config.unit_id,
            base_address,
            catalog,
            models: models
                .into_iter()
                .map(|info| ModelState {
                    info,
                    points: Vec::new(),
                })
                .collect(),
        })
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn base_address(&self) -> u16 {
        self.base_address
    }

    pub fn discovered(&self) -> impl Iterator<Item = &DiscoveredModel> {
        self.models.iter().map(|model| &model.info)
    }
}

#[async_trait]
impl<R: RegisterReader> ModelSource for SunSpecClient<R> {
    fn models(&self) -> Vec<String> {
        self.models.iter().map(|model| model.info.name.clone()).collect()
    }

    async fn refresh(&mut self, model: &str) -> Result<(), SunSpecError> {
        let state = self
            .models
            .iter_mut()
            .find(|state| state.info.name == model)
            .ok_or_else(|| SunSpecError::UnknownModel(model.to_string()))?;

        let Some(definition) = self.catalog.get(state.info.id) else {
            debug!(model, model_id = state.info.id, "no definition, skipping refresh");
            return Ok(());
        };

        let start = state
            .info
            .start
            .checked_add(2)
            .ok_or(SunSpecError::AddressOverflow)?;
        let count = state.info.length.min(definition.length);
        let block = self.reader.read_registers(self.unit_id, start, count).await?;
        state.points = decode_block(definition, &block);
        debug!(model, start, count, points = state.points.len(), "model refreshed");
        Ok(())
    }

    fn points(&self, model: &str) -> Vec<(String, Option<SnapshotValue>)> {
        self.models
            .iter()
            .find(|state| state.info.name == model)
            .map(|state| state.points.clone())
            .unwrap_or_default()
    }
}

async fn find_base_address<R: RegisterReader>(
    reader: &R,
    config: &SunSpecConfig,
) -> Result<u16, SunSpecError> {
    let candidates: Vec<u16> = match config.base_address {
        Some(address) => vec![address],
        None => BASE_ADDRESSES.to_vec(),
    };

    for address in candidates {
        match reader.read_registers(config.unit_id, address, 2).await {
            Ok(registers) if is_sunspec_marker(&registers) => return Ok(address),
            Ok(_) => debug!(address, "no sunspec marker"),
            Err(err) => debug!(address, error = %err, "sunspec marker probe failed"),
        }
    }

    Err(SunSpecError::NotFound {
        unit_id: config.unit_id,
    })
}

async fn walk_models<R: RegisterReader>(
    reader: &R,
    config: &SunSpecConfig,
    catalog: &ModelCatalog,
    base_address: u16,
) -> Result<Vec<DiscoveredModel>, SunSpecError> {
    let mut models = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut address = base_address
        .checked_add(2)
        .ok_or(SunSpecError::AddressOverflow)?;

    loop {
        if models.len() >= config.max_models {
            return Err(SunSpecError::TooManyModels(config.max_models));
        }

        let header = match reader.read_registers(config.unit_id, address, 2).await {
            Ok(header) => header,
            Err(err) if config.lenient && !models.is_empty() => {
                warn!(address, error = %err, "model list ended without end marker (lenient mode)");
                break;
            }
            Err(err) => return Err(err.into()),
        };
        let (model_id, model_len) = match header.as_slice() {
            [id, len, ..] => (*id, *len),
            _ => return Err(SunSpecError::Truncated { address }),
        };
        if model_id == SUNSPEC_END_ID {
            break;
        }

        let base_name = catalog.name_for(model_id);
        let count = seen.entry(base_name.clone()).or_insert(0);
        *count += 1;
        let name = if *count == 1 {
            base_name
        } else {
            format!("{base_name}_{count}")
        };

        models.push(DiscoveredModel {
            id: model_id,
            name,
            start: address,
            length: model_len,
        });

        address = u16::try_from(u32::from(address) + 2 + u32::from(model_len))
            .map_err(|_| SunSpecError::AddressOverflow)?;
    }

    Ok(models)
}
