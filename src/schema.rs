// Column-type schema: local inference from rows, or validation of a
// schema built by the remote store.

use crate::error::{BridgeError, Result};
use crate::spec::ExpandedType;
use crate::Row;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Integer fields with fewer distinct values than this (and a low distinct
/// proportion) are treated as nominal.
const NUMBER_NOMINAL_LIMIT: usize = 40;
const NUMBER_NOMINAL_PROPORTION: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Number,
    Integer,
    Boolean,
    String,
    #[serde(alias = "date")]
    Datetime,
    /// Any tag this crate does not know; treated as nominal.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vl_type: Option<ExpandedType>,
    #[serde(rename = "type")]
    pub primitive_type: PrimitiveType,
    #[serde(default)]
    pub cardinality: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordinal_domain: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FieldSchema {
    /// Declared expanded type, or the default for the primitive type.
    pub fn expanded_type(&self) -> ExpandedType {
        self.vl_type.unwrap_or(match self.primitive_type {
            PrimitiveType::Number | PrimitiveType::Integer => ExpandedType::Quantitative,
            PrimitiveType::Datetime => ExpandedType::Temporal,
            PrimitiveType::Boolean | PrimitiveType::String | PrimitiveType::Other => {
                ExpandedType::Nominal
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSchema")]
pub struct Schema {
    fields: Vec<FieldSchema>,
}

#[derive(Deserialize)]
struct RawSchema {
    fields: Vec<FieldSchema>,
}

impl TryFrom<RawSchema> for Schema {
    type Error = BridgeError;

    fn try_from(raw: RawSchema) -> Result<Self> {
        Schema::new(raw.fields)
    }
}

impl Schema {
    pub fn new(fields: Vec<FieldSchema>) -> Result<Self> {
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(BridgeError::Schema(format!(
                    "duplicate field '{}'",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Schema returned by the remote `build` endpoint: `{fields: [...]}`.
    pub fn from_remote(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| BridgeError::Schema(e.to_string()))
    }

    /// Infer a schema from rows. Field order is first-appearance order.
    pub fn infer(rows: &[Row]) -> Self {
        let mut order: Vec<&str> = Vec::new();
        let mut columns: HashMap<&str, Vec<&Value>> = HashMap::new();

        for row in rows {
            for (key, value) in row {
                let column = columns.entry(key.as_str()).or_insert_with(|| {
                    order.push(key.as_str());
                    Vec::new()
                });
                if !value.is_null() {
                    column.push(value);
                }
            }
        }

        let fields = order
            .into_iter()
            .map(|name| infer_field(name, &columns[name]))
            .collect();

        // Names come from object keys, so they are unique already.
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn set_field_type(&mut self, name: &str, field_type: ExpandedType) -> Result<()> {
        self.field_mut(name)?.vl_type = Some(field_type);
        Ok(())
    }

    pub fn set_ordinal_domain(&mut self, name: &str, domain: Vec<String>) -> Result<()> {
        self.field_mut(name)?.ordinal_domain = Some(domain);
        Ok(())
    }

    fn field_mut(&mut self, name: &str) -> Result<&mut FieldSchema> {
        self.fields
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| BridgeError::Schema(format!("no field named '{}'", name)))
    }
}

fn infer_field(name: &str, values: &[&Value]) -> FieldSchema {
    let primitive_type = infer_primitive(values);
    let distinct: HashSet<String> = values.iter().map(|v| v.to_string()).collect();
    let cardinality = distinct.len();

    let vl_type = match primitive_type {
        PrimitiveType::Integer
            if cardinality < NUMBER_NOMINAL_LIMIT
                && (cardinality as f64) < NUMBER_NOMINAL_PROPORTION * values.len() as f64 =>
        {
            ExpandedType::Nominal
        }
        PrimitiveType::Integer | PrimitiveType::Number => ExpandedType::Quantitative,
        PrimitiveType::Datetime => ExpandedType::Temporal,
        PrimitiveType::Boolean | PrimitiveType::String | PrimitiveType::Other => ExpandedType::Nominal,
    };

    FieldSchema {
        name: name.to_string(),
        vl_type: Some(vl_type),
        primitive_type,
        cardinality,
        ordinal_domain: None,
        extra: Map::new(),
    }
}

fn infer_primitive(values: &[&Value]) -> PrimitiveType {
    if values.is_empty() {
        return PrimitiveType::String;
    }
    if values.iter().all(|v| v.is_boolean()) {
        return PrimitiveType::Boolean;
    }
    if values.iter().all(|v| as_integer(v).is_some()) {
        return PrimitiveType::Integer;
    }
    if values.iter().all(|v| as_number(v).is_some()) {
        return PrimitiveType::Number;
    }
    if values.iter().all(|v| v.as_str().is_some_and(is_date)) {
        return PrimitiveType::Datetime;
    }
    PrimitiveType::String
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_date(s: &str) -> bool {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || NaiveDate::parse_from_str(s, "%Y/%m/%d").is_ok()
}
