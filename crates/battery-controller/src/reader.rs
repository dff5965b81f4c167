use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use sunspec_client::{ModelSource, SunSpecError};
use types::DeviceSnapshot;

pub const DEFAULT_READ_MODELS: [&str; 6] =
    ["common", "inverter", "nameplate", "status", "controls", "storage"];

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read model {model}: {source}")]
    Refresh {
        model: String,
        #[source]
        source: SunSpecError,
    },
}

/// Flattens SunSpec models into a [`DeviceSnapshot`].
#[derive(Debug, Clone)]
pub struct DeviceReader {
    read_models: Vec<String>,
}

impl Default for DeviceReader {
    fn default() -> Self {
        Self::new(DEFAULT_READ_MODELS.iter().map(|name| name.to_string()).collect())
    }
}

impl DeviceReader {
    pub fn new(read_models: Vec<String>) -> Self {
        Self { read_models }
    }

    pub fn read_models(&self) -> &[String] {
        &self.read_models
    }

    /// Refreshes allow-listed models, then collects every non-null cached point of every model.
    pub async fn read_snapshot<S: ModelSource>(&self, source: &mut S) -> Result<DeviceSnapshot, ReadError> {
        let mut snapshot = DeviceSnapshot::new();

        for model in source.models() {
            if self.read_models.contains(&model) {
                source
                    .refresh(&model)
                    .await
                    .map_err(|source| ReadError::Refresh {
                        model: model.clone(),
                        source,
                    })?;
            }

            let points: BTreeMap<_, _> = source
                .points(&model)
                .into_iter()
                .filter_map(|(point, value)| value.map(|value| (point, value)))
                .collect();
            if points.is_empty() {
                continue;
            }
            debug!(model = %model, points = points.len(), "model read");
            snapshot.insert(model, points);
        }

        Ok(snapshot)
    }
}
