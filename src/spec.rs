// Visualization spec model: data reference + channel encodings

use crate::error::{BridgeError, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Visual channel a field can be bound to.
///
/// Declaration order is the channel priority: it fixes the SELECT column
/// order of translated queries and the iteration order of [`Encoding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    X,
    Y,
    Row,
    Size,
    Color,
    Column,
    Shape,
    Opacity,
    Detail,
}

impl Channel {
    pub const ALL: [Channel; 9] = [
        Channel::X,
        Channel::Y,
        Channel::Row,
        Channel::Size,
        Channel::Color,
        Channel::Column,
        Channel::Shape,
        Channel::Opacity,
        Channel::Detail,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::X => "x",
            Channel::Y => "y",
            Channel::Row => "row",
            Channel::Size => "size",
            Channel::Color => "color",
            Channel::Column => "column",
            Channel::Shape => "shape",
            Channel::Opacity => "opacity",
            Channel::Detail => "detail",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Channel::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| BridgeError::UnknownChannel(s.to_string()))
    }
}

/// Measurement type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpandedType {
    Quantitative,
    Ordinal,
    Nominal,
    Temporal,
    Key,
}

/// Field bound to a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(default)]
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<ExpandedType>,
    /// Keys the bridge does not interpret (scale, axis, bin, ...), kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FieldDef {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            aggregate: None,
            field_type: None,
            extra: Map::new(),
        }
    }

    pub fn with_aggregate(mut self, aggregate: impl Into<String>) -> Self {
        self.aggregate = Some(aggregate.into());
        self
    }

    pub fn with_type(mut self, field_type: ExpandedType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    /// An empty aggregate string counts as "no aggregate".
    pub fn is_aggregate(&self) -> bool {
        self.aggregate.as_deref().is_some_and(|a| !a.is_empty())
    }

    /// Aggregate name, or `""` once cleared.
    pub fn aggregate_str(&self) -> &str {
        self.aggregate.as_deref().unwrap_or("")
    }
}

/// Channel → field mapping, at most one field per channel, iterated in
/// channel priority order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct Encoding {
    channels: BTreeMap<Channel, FieldDef>,
}

impl Encoding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, channel: Channel, def: FieldDef) -> Self {
        self.insert(channel, def);
        self
    }

    /// Binds `def` to `channel`, returning the field it replaced.
    pub fn insert(&mut self, channel: Channel, def: FieldDef) -> Option<FieldDef> {
        self.channels.insert(channel, def)
    }

    pub fn get(&self, channel: Channel) -> Option<&FieldDef> {
        self.channels.get(&channel)
    }

    pub fn get_mut(&mut self, channel: Channel) -> Option<&mut FieldDef> {
        self.channels.get_mut(&channel)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &FieldDef)> {
        self.channels.iter().map(|(c, d)| (*c, d))
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.channels.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn has_aggregate(&self) -> bool {
        self.channels.values().any(FieldDef::is_aggregate)
    }
}

impl TryFrom<Map<String, Value>> for Encoding {
    type Error = BridgeError;

    fn try_from(raw: Map<String, Value>) -> Result<Self> {
        let mut channels = BTreeMap::new();
        for (key, value) in raw {
            let channel: Channel = key.parse()?;
            let def: FieldDef = serde_json::from_value(value).map_err(|e| {
                BridgeError::MalformedSpec(format!("encoding.{}: {}", key, e))
            })?;
            channels.insert(channel, def);
        }
        Ok(Self { channels })
    }
}

impl Serialize for Encoding {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.channels.len()))?;
        for (channel, def) in &self.channels {
            map.serialize_entry(channel.as_str(), def)?;
        }
        map.end()
    }
}

/// Where a spec's rows come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataRef {
    Inline {
        values: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Url {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Named {
        name: String,
    },
}

impl DataRef {
    pub fn named(name: impl Into<String>) -> Self {
        DataRef::Named { name: name.into() }
    }

    /// Name of the remote table backing this data.
    pub fn table_name(&self) -> Result<String> {
        match self {
            DataRef::Named { name } => Ok(name.clone()),
            DataRef::Url { name: Some(name), .. } => Ok(name.clone()),
            DataRef::Url { url, name: None } => table_name_from_url(url),
            DataRef::Inline { name: Some(name), .. } => Ok(name.clone()),
            DataRef::Inline { name: None, .. } => Err(BridgeError::MalformedSpec(
                "inline data needs a name to be queried as a table".to_string(),
            )),
        }
    }
}

/// Derives a table name from the last path segment of a URL:
/// `data/cars.json` becomes `cars_json`.
pub fn table_name_from_url(url: &str) -> Result<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    if file.is_empty() {
        return Err(BridgeError::MalformedSpec(format!(
            "cannot derive a table name from url '{}'",
            url
        )));
    }
    Ok(file
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect())
}

/// Top-level visualization spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationSpec {
    pub data: DataRef,
    #[serde(default)]
    pub encoding: Encoding,
    /// mark, config, description, ... passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VisualizationSpec {
    pub fn new(data: DataRef, encoding: Encoding) -> Self {
        Self {
            data,
            encoding,
            extra: Map::new(),
        }
    }

    pub fn from_json(value: Value) -> Result<Self> {
        Self::from_json_str(&value.to_string())
    }

    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| BridgeError::MalformedSpec(e.to_string()))
    }
}
