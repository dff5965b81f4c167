use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use types::{PointValue, SnapshotValue};

mod builtin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    Int16,
    Uint16,
    Count,
    Acc16,
    Enum16,
    Bitfield16,
    Sunssf,
    Int32,
    Uint32,
    Acc32,
    Enum32,
    Bitfield32,
    Ipaddr,
    Int64,
    Uint64,
    Acc64,
    Float32,
    String,
    Pad,
}

impl PointType {
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "int16" => Self::Int16,
            "uint16" => Self::Uint16,
            "count" => Self::Count,
            "acc16" => Self::Acc16,
            "enum16" => Self::Enum16,
            "bitfield16" => Self::Bitfield16,
            "sunssf" => Self::Sunssf,
            "int32" => Self::Int32,
            "uint32" => Self::Uint32,
            "acc32" => Self::Acc32,
            "enum32" => Self::Enum32,
            "bitfield32" => Self::Bitfield32,
            "ipaddr" => Self::Ipaddr,
            "int64" => Self::Int64,
            "uint64" => Self::Uint64,
            "acc64" => Self::Acc64,
            "float32" => Self::Float32,
            "string" => Self::String,
            "pad" => Self::Pad,
            _ => return None,
        };
        Some(kind)
    }

    /// Register count for fixed-width types. Strings carry their own length.
    pub fn default_size(self) -> u16 {
        match self {
            Self::Int32
            | Self::Uint32
            | Self::Acc32
            | Self::Enum32
            | Self::Bitfield32
            | Self::Ipaddr
            | Self::Float32 => 2,
            Self::Int64 | Self::Uint64 | Self::Acc64 => 4,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleFactor {
    Fixed(i16),
    /// Name of a `sunssf` point in the same block.
    Point(String),
}

impl ScaleFactor {
    fn parse(value: &str) -> Self {
        match value.parse::<i16>() {
            Ok(fixed) => Self::Fixed(fixed),
            Err(_) => Self::Point(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointDefinition {
    pub name: String,
    /// Offset in registers from the first register after the model header.
    pub offset: u16,
    pub kind: PointType,
    pub size: u16,
    pub scale_factor: Option<ScaleFactor>,
}

/// Layout of one SunSpec model's fixed block.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    pub id: u16,
    pub name: String,
    /// Register count of the fixed block, excluding the model header (ID + length).
    pub length: u16,
    pub points: Vec<PointDefinition>,
}

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("invalid attribute value for {0}")]
    InvalidAttribute(String),
    #[error("missing attribute {0}")]
    MissingAttribute(String),
    #[error("unknown point type {0}")]
    UnknownPointType(String),
}

pub const SUNSPEC_ID0: u16 = 0x5375;
pub const SUNSPEC_ID1: u16 = 0x6e53;
pub const SUNSPEC_END_ID: u16 = 0xFFFF;

/// True when the registers start with the `SunS` marker.
pub fn is_sunspec_marker(registers: &[u16]) -> bool {
    registers.len() >= 2 && registers[0] == SUNSPEC_ID0 && registers[1] == SUNSPEC_ID1
}

/// Model definitions known to the client, keyed by model id.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: HashMap<u16, ModelDefinition>,
}

impl ModelCatalog {
    /// Catalog preloaded with the models a battery inverter typically exposes.
    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        for model in builtin::definitions() {
            catalog.insert(model);
        }
        catalog
    }

    /// Adds or replaces a definition.
    pub fn insert(&mut self, model: ModelDefinition) {
        self.models.insert(model.id, model);
    }

    pub fn get(&self, id: u16) -> Option<&ModelDefinition> {
        self.models.get(&id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn name_for(&self, id: u16) -> String {
        match self.models.get(&id) {
            Some(model) => model.name.clone(),
            None => model_name(id),
        }
    }

    pub fn parse_json(&mut self, data: &str) -> Result<Vec<u16>, ParserError> {
        let models = parse_models_from_json(data)?;
        Ok(self.extend(models))
    }

    pub fn parse_xml(&mut self, data: &str) -> Result<Vec<u16>, ParserError> {
        let models = parse_models_from_xml(data)?;
        Ok(self.extend(models))
    }

    fn extend(&mut self, models: Vec<ModelDefinition>) -> Vec<u16> {
        models
            .into_iter()
            .map(|model| {
                let id = model.id;
                self.insert(model);
                id
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct JsonModel {
    id: u16,
    group: JsonGroup,
}

#[derive(Debug, Deserialize)]
struct JsonGroup {
    name: String,
    #[serde(default)]
    points: Vec<JsonPoint>,
}

#[derive(Debug, Deserialize)]
struct JsonPoint {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    size: Option<u16>,
    sf: Option<JsonScale>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonScale {
    Fixed(i16),
    Point(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonRoot {
    List(Vec<JsonModel>),
    Wrapped { models: Vec<JsonModel> },
    Single(JsonModel),
}

/// Parses SunSpec JSON model files. The leading `ID` and `L` points form the header and are dropped.
pub fn parse_models_from_json(data: &str) -> Result<Vec<ModelDefinition>, ParserError> {
    let models = match serde_json::from_str::<JsonRoot>(data)? {
        JsonRoot::List(models) | JsonRoot::Wrapped { models } => models,
        JsonRoot::Single(model) => vec![model],
    };

    models.into_iter().map(json_model).collect()
}

fn json_model(model: JsonModel) -> Result<ModelDefinition, ParserError> {
    let mut offset = 0u16;
    let mut points = Vec::with_capacity(model.group.points.len());

    for (index, point) in model.group.points.into_iter().enumerate() {
        if (index == 0 && point.name == "ID") || (index == 1 && point.name == "L") {
            continue;
        }
        let kind = PointType::from_name(&point.kind)
            .ok_or_else(|| ParserError::UnknownPointType(point.kind.clone()))?;
        let size = point.size.unwrap_or_else(|| kind.default_size());
        let scale_factor = point.sf.map(|sf| match sf {
            JsonScale::Fixed(value) => ScaleFactor::Fixed(value),
            JsonScale::Point(name) => ScaleFactor::parse(&name),
        });
        points.push(PointDefinition {
            name: point.name,
            offset,
            kind,
            size,
            scale_factor,
        });
        offset = offset.saturating_add(size);
    }

    Ok(ModelDefinition {
        id: model.id,
        name: model.group.name,
        length: offset,
        points,
    })
}

/// Parses SMDX model files. Points in repeating blocks and the `strings` section are ignored.
pub fn parse_models_from_xml(data: &str) -> Result<Vec<ModelDefinition>, ParserError> {
    let mut reader = Reader::from_str(data);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut models = Vec::new();
    let mut current: Option<ModelDefinition> = None;
    let mut in_repeating = false;
    let mut in_strings = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(ref event)) if event.name().as_ref() == b"strings" => {
                in_strings = true;
            }
            Ok(Event::End(ref event)) if event.name().as_ref() == b"strings" => {
                in_strings = false;
            }
            Ok(_) if in_strings => {}
            Ok(Event::Start(ref event)) if event.name().as_ref() == b"model" => {
                let attrs = attributes(event)?;
                let id = required_u16(&attrs, "id")?;
                let length = required_u16(&attrs, "len")?;
                let name = attrs
                    .get("name")
                    .cloned()
                    .unwrap_or_else(|| model_name(id));
                current = Some(ModelDefinition {
                    id,
                    name,
                    length,
                    points: Vec::new(),
                });
            }
            Ok(Event::End(ref event)) if event.name().as_ref() == b"model" => {
                if let Some(model) = current.take() {
                    models.push(model);
                }
            }
            Ok(Event::Start(ref event)) if event.name().as_ref() == b"block" => {
                let attrs = attributes(event)?;
                in_repeating = attrs.get("type").map(String::as_str) == Some("repeating");
            }
            Ok(Event::End(ref event)) if event.name().as_ref() == b"block" => {
                in_repeating = false;
            }
            Ok(Event::Start(ref event)) | Ok(Event::Empty(ref event))
                if event.name().as_ref() == b"point" =>
            {
                if !in_repeating {
                    match current.as_mut() {
                        Some(model) => model.points.push(xml_point(&attributes(event)?)?),
                        None => warn!("skipping point outside of a model"),
                    }
                }
            }
            Ok(_) => {}
            Err(err) => return Err(ParserError::Xml(err)),
        }

        buf.clear();
    }

    Ok(models)
}

fn xml_point(attrs: &HashMap<String, String>) -> Result<PointDefinition, ParserError> {
    let name = attrs
        .get("id")
        .cloned()
        .ok_or_else(|| ParserError::MissingAttribute("id".to_string()))?;
    let type_name = attrs
        .get("type")
        .ok_or_else(|| ParserError::MissingAttribute("type".to_string()))?;
    let kind = PointType::from_name(type_name)
        .ok_or_else(|| ParserError::UnknownPointType(type_name.clone()))?;
    let offset = required_u16(attrs, "offset")?;
    let size = match attrs.get("len") {
        Some(value) => value
            .parse::<u16>()
            .map_err(|_| ParserError::InvalidAttribute("len".to_string()))?,
        None => kind.default_size(),
    };

    Ok(PointDefinition {
        name,
        offset,
        kind,
        size,
        scale_factor: attrs.get("sf").map(|value| ScaleFactor::parse(value)),
    })
}

fn attributes(event: &BytesStart<'_>) -> Result<HashMap<String, String>, ParserError> {
    let mut out = HashMap::new();
    for attr in event.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        out.insert(key, value);
    }
    Ok(out)
}

fn required_u16(attrs: &HashMap<String, String>, key: &str) -> Result<u16, ParserError> {
    attrs
        .get(key)
        .ok_or_else(|| ParserError::MissingAttribute(key.to_string()))?
        .parse::<u16>()
        .map_err(|_| ParserError::InvalidAttribute(key.to_string()))
}

/// Decodes one point from the model block registers (header excluded).
/// SunSpec marks absent values with sentinel patterns; those decode to `None`.
pub fn decode_point(point: &PointDefinition, block: &[u16]) -> Option<PointValue> {
    let start = usize::from(point.offset);
    let end = start.checked_add(usize::from(point.size))?;
    let regs = block.get(start..end).filter(|regs| !regs.is_empty())?;

    match point.kind {
        PointType::Pad => None,
        PointType::Int16 | PointType::Sunssf => {
            let value = regs[0] as i16;
            (value != i16::MIN).then_some(PointValue::I16(value))
        }
        PointType::Uint16 | PointType::Enum16 | PointType::Bitfield16 => {
            (regs[0] != u16::MAX).then_some(PointValue::U16(regs[0]))
        }
        PointType::Count | PointType::Acc16 => (regs[0] != 0).then_some(PointValue::U16(regs[0])),
        PointType::Int32 => {
            let value = join_u32(regs)? as i32;
            (value != i32::MIN).then_some(PointValue::I32(value))
        }
        PointType::Uint32 | PointType::Enum32 | PointType::Bitfield32 => {
            let value = join_u32(regs)?;
            (value != u32::MAX).then_some(PointValue::U32(value))
        }
        PointType::Acc32 => {
            let value = join_u32(regs)?;
            (value != 0).then_some(PointValue::U32(value))
        }
        PointType::Ipaddr => {
            let value = join_u32(regs)?;
            (value != 0).then(|| PointValue::Text(std::net::Ipv4Addr::from(value).to_string()))
        }
        PointType::Float32 => {
            let value = f32::from_bits(join_u32(regs)?);
            (!value.is_nan()).then_some(PointValue::F32(value))
        }
        PointType::Int64 => {
            let value = join_u64(regs)? as i64;
            (value != i64::MIN).then_some(PointValue::I64(value))
        }
        PointType::Uint64 => {
            let value = join_u64(regs)?;
            (value != u64::MAX).then_some(PointValue::U64(value))
        }
        PointType::Acc64 => {
            let value = join_u64(regs)?;
            (value != 0).then_some(PointValue::U64(value))
        }
        PointType::String => {
            let bytes: Vec<u8> = regs.iter().flat_map(|reg| reg.to_be_bytes()).collect();
            let text = String::from_utf8_lossy(&bytes);
            let text = text.trim_end_matches('\0').trim_end();
            (!text.is_empty()).then(|| PointValue::Text(text.to_string()))
        }
    }
}

/// Applies `value * 10^sf`. A missing or zero scale factor keeps the raw integer.
pub fn apply_scale(raw: PointValue, scale_factor: Option<i16>) -> SnapshotValue {
    let sf = match scale_factor {
        Some(sf) if sf != 0 => sf,
        _ => {
            return match raw {
                PointValue::I16(v) => SnapshotValue::Integer(i64::from(v)),
                PointValue::U16(v) => SnapshotValue::Integer(i64::from(v)),
                PointValue::I32(v) => SnapshotValue::Integer(i64::from(v)),
                PointValue::U32(v) => SnapshotValue::Integer(i64::from(v)),
                PointValue::I64(v) => SnapshotValue::Integer(v),
                PointValue::U64(v) => SnapshotValue::Unsigned(v),
                PointValue::F32(v) => SnapshotValue::Float(f64::from(v)),
                PointValue::Text(v) => SnapshotValue::Text(v),
            };
        }
    };

    // Dividing for negative exponents keeps decimal values such as 85.3 exact.
    let scale = |value: f64| {
        if sf < 0 {
            value / 10f64.powi(-i32::from(sf))
        } else {
            value * 10f64.powi(i32::from(sf))
        }
    };
    match raw {
        PointValue::I16(v) => SnapshotValue::Float(scale(f64::from(v))),
        PointValue::U16(v) => SnapshotValue::Float(scale(f64::from(v))),
        PointValue::I32(v) => SnapshotValue::Float(scale(f64::from(v))),
        PointValue::U32(v) => SnapshotValue::Float(scale(f64::from(v))),
        PointValue::I64(v) => SnapshotValue::Float(scale(v as f64)),
        PointValue::U64(v) => SnapshotValue::Float(scale(v as f64)),
        PointValue::F32(v) => SnapshotValue::Float(scale(f64::from(v))),
        PointValue::Text(v) => SnapshotValue::Text(v),
    }
}

/// Decodes every point of a model's fixed block, in definition order. Pad points are omitted.
pub fn decode_block(model: &ModelDefinition, block: &[u16]) -> Vec<(String, Option<SnapshotValue>)> {
    let raw: Vec<(&PointDefinition, Option<PointValue>)> = model
        .points
        .iter()
        .filter(|point| point.kind != PointType::Pad)
        .map(|point| (point, decode_point(point, block)))
        .collect();

    let scale_factors: HashMap<&str, i16> = raw
        .iter()
        .filter_map(|(point, value)| match (point.kind, value) {
            (PointType::Sunssf, Some(PointValue::I16(sf))) => Some((point.name.as_str(), *sf)),
            _ => None,
        })
        .collect();

    raw.into_iter()
        .map(|(point, value)| {
            let sf = match &point.scale_factor {
                Some(ScaleFactor::Fixed(sf)) => Some(*sf),
                Some(ScaleFactor::Point(name)) => scale_factors.get(name.as_str()).copied(),
                None => None,
            };
            (point.name.clone(), value.map(|value| apply_scale(value, sf)))
        })
        .collect()
}

fn join_u32(regs: &[u16]) -> Option<u32> {
    match regs {
        [hi, lo, ..] => Some((u32::from(*hi) << 16) | u32::from(*lo)),
        _ => None,
    }
}

fn join_u64(regs: &[u16]) -> Option<u64> {
    match regs {
        [a, b, c, d, ..] => Some(
            (u64::from(*a) << 48) | (u64::from(*b) << 32) | (u64::from(*c) << 16) | u64::from(*d),
        ),
        _ => None,
    }
}

fn model_name(model_id: u16) -> String {
    match model_id {
        1 => "common".to_string(),
        101..=103 | 111..=113 => "inverter".to_string(),
        120 => "nameplate".to_string(),
        121 => "settings".to_string(),
        122 => "status".to_string(),
        123 => "controls".to_string(),
        124 => "storage".to_string(),
        126 => "volt_var".to_string(),
        127 => "freq_watt_param".to_string(),
        128 => "dyn_react_current".to_string(),
        131 => "watt_pf".to_string(),
        132 => "volt_watt".to_string(),
        160 => "mppt".to_string(),
        201..=204 => "ac_meter".to_string(),
        _ => format!("model_{model_id}"),
    }
}
