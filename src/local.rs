//! In-process execution: a table registry plus a small evaluator for
//! [`QueryPlan`]s. Result columns are named the way the remote store names
//! them, so a deaggregated spec binds to either backend's rows.

use crate::backend::{BackendMode, ExecutionBackend, ProgressFn};
use crate::error::{BridgeError, Result};
use crate::ingest::IngestReport;
use crate::schema::Schema;
use crate::translate::{QueryPlan, SelectExpr, TranslatedQuery};
use crate::Row;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct LocalBackend {
    tables: RwLock<HashMap<String, Arc<Vec<Row>>>>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, name: &str) -> Result<Arc<Vec<Row>>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownTable(name.to_string()))
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Local
    }

    async fn check_exists(&self, table: &str) -> Result<bool> {
        Ok(self.tables.read().contains_key(table))
    }

    async fn ingest(&self, table: &str, rows: &[Row], _progress: ProgressFn<'_>) -> Result<IngestReport> {
        if rows.is_empty() {
            return Err(BridgeError::EmptyDataset(table.to_string()));
        }
        self.tables
            .write()
            .insert(table.to_string(), Arc::new(rows.to_vec()));
        debug!(table, rows = rows.len(), "registered local table");
        Ok(IngestReport {
            rows: rows.len(),
            chunks: 1,
            rows_per_chunk: rows.len(),
        })
    }

    async fn build_schema(&self, table: &str, rows: &[Row]) -> Result<Schema> {
        if rows.is_empty() {
            Ok(Schema::infer(&self.table(table)?))
        } else {
            Ok(Schema::infer(rows))
        }
    }

    async fn run_query(&self, query: &TranslatedQuery) -> Result<Vec<Row>> {
        let rows = self.table(&query.plan.table)?;
        execute(&query.plan, &rows)
    }
}

/// Evaluate `plan` over `rows`. Groups come out in first-appearance order.
pub fn execute(plan: &QueryPlan, rows: &[Row]) -> Result<Vec<Row>> {
    if !plan.is_aggregate() {
        return Ok(rows
            .iter()
            .map(|row| {
                let mut out = Row::new();
                for item in &plan.select {
                    if let SelectExpr::Column(field) = &item.expr {
                        out.insert(item.output.clone(), lookup(row, field).clone());
                    }
                }
                out
            })
            .collect());
    }

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in rows {
        let key_parts: Vec<&Value> = plan.group_by.iter().map(|f| lookup(row, f)).collect();
        let key = serde_json::to_string(&key_parts)?;
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(row);
    }

    // Aggregating an empty, ungrouped table still yields one row.
    if order.is_empty() && plan.group_by.is_empty() {
        order.push(String::new());
        groups.insert(String::new(), Vec::new());
    }

    let mut out = Vec::with_capacity(order.len());
    for key in &order {
        let members = &groups[key];
        let mut result = Row::new();
        for item in &plan.select {
            let value = match &item.expr {
                SelectExpr::Column(field) => members
                    .first()
                    .map(|row| lookup(row, field).clone())
                    .unwrap_or(Value::Null),
                SelectExpr::Aggregate { op, field } => aggregate(op, field.as_deref(), members)?,
            };
            result.insert(item.output.clone(), value);
        }
        out.push(result);
    }
    Ok(out)
}

static NULL: Value = Value::Null;

/// Exact match first, then case-insensitive, like an unquoted SQL column.
fn lookup<'a>(row: &'a Row, field: &str) -> &'a Value {
    row.get(field)
        .or_else(|| {
            row.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(field))
                .map(|(_, v)| v)
        })
        .unwrap_or(&NULL)
}

fn aggregate(op: &str, field: Option<&str>, rows: &[&Row]) -> Result<Value> {
    let Some(field) = field else {
        return match op {
            "count" => Ok(Value::from(rows.len())),
            _ => Err(BridgeError::UnsupportedAggregate(format!("{}(*)", op))),
        };
    };

    let values: Vec<&Value> = rows
        .iter()
        .map(|row| lookup(row, field))
        .filter(|v| !v.is_null())
        .collect();

    let value = match op {
        "count" => Value::from(values.len()),
        "distinct" => {
            let distinct: HashSet<String> = values.iter().map(|v| v.to_string()).collect();
            Value::from(distinct.len())
        }
        "min" => extreme(&values, Ordering::Less),
        "max" => extreme(&values, Ordering::Greater),
        "sum" => {
            if values.is_empty() {
                Value::Null
            } else if values.iter().all(|v| v.is_i64()) {
                Value::from(values.iter().filter_map(|v| v.as_i64()).sum::<i64>())
            } else {
                float(numeric(&values).iter().sum::<f64>())
            }
        }
        "avg" => {
            let nums = numeric(&values);
            if nums.is_empty() {
                Value::Null
            } else {
                float(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        "median" => median(numeric(&values)).map(float).unwrap_or(Value::Null),
        "variance" => sample_variance(&numeric(&values)).map(float).unwrap_or(Value::Null),
        "stdev" | "stddev" => sample_variance(&numeric(&values))
            .map(|v| float(v.sqrt()))
            .unwrap_or(Value::Null),
        _ => return Err(BridgeError::UnsupportedAggregate(op.to_string())),
    };
    Ok(value)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn numeric(values: &[&Value]) -> Vec<f64> {
    values.iter().filter_map(|v| as_f64(v)).collect()
}

fn float(x: f64) -> Value {
    Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
}

/// Numbers compare numerically, everything else by its text.
fn extreme(values: &[&Value], want: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for &value in values {
        let replace = match best {
            None => true,
            Some(current) => compare(value, current) == want,
        };
        if replace {
            best = Some(value);
        }
    }
    best.cloned().unwrap_or(Value::Null)
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Middle value, or the mean of the two middle values for an even count.
fn median(mut nums: Vec<f64>) -> Option<f64> {
    if nums.is_empty() {
        return None;
    }
    nums.sort_by(f64::total_cmp);
    let mid = nums.len() / 2;
    if nums.len() % 2 == 0 {
        Some((nums[mid - 1] + nums[mid]) / 2.0)
    } else {
        Some(nums[mid])
    }
}

fn sample_variance(nums: &[f64]) -> Option<f64> {
    if nums.len() < 2 {
        return None;
    }
    let mean = nums.iter().sum::<f64>() / nums.len() as f64;
    let squares: f64 = nums.iter().map(|x| (x - mean).powi(2)).sum();
    Some(squares / (nums.len() - 1) as f64)
}
