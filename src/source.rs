use crate::error::{BridgeError, Result};
use crate::Row;
use serde_json::{Number, Value};
use std::path::Path;
use tracing::debug;

/// Validates that `value` is a JSON array of objects and returns the rows.
pub fn records_from_json(value: Value) -> Result<Vec<Row>> {
    let Value::Array(items) = value else {
        return Err(BridgeError::MalformedSpec(
            "inline data values must be an array of records".to_string(),
        ));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::Object(row) => Ok(row),
            other => Err(BridgeError::MalformedSpec(format!(
                "data value at index {} is not a record: {}",
                idx, other
            ))),
        })
        .collect()
}

/// Parse CSV text into rows. Cells that look like numbers or booleans are
/// typed; empty cells become null.
pub fn records_from_csv(text: &str) -> Result<Vec<Row>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Row::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            row.insert(header.clone(), typed_cell(cell));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn typed_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = cell.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match cell {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(cell.to_string()),
    }
}

/// Load rows from an http(s) URL or a local file. `.csv` files are parsed as
/// CSV, anything else as a JSON array of records.
pub async fn load_rows(client: &reqwest::Client, location: &str) -> Result<Vec<Row>> {
    let is_csv = location
        .split(['?', '#'])
        .next()
        .is_some_and(|p| p.to_ascii_lowercase().ends_with(".csv"));

    let text = if location.starts_with("http://") || location.starts_with("https://") {
        debug!(url = location, "fetching dataset");
        let response = client
            .get(location)
            .send()
            .await
            .map_err(|e| BridgeError::transport(location, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Source(format!(
                "GET {} returned status {}",
                location, status
            )));
        }
        response
            .text()
            .await
            .map_err(|e| BridgeError::transport(location, e))?
    } else {
        let path = Path::new(location);
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BridgeError::Source(format!("{}: {}", path.display(), e)))?
    };

    if is_csv {
        records_from_csv(&text)
    } else {
        records_from_json(serde_json::from_str(&text)?)
    }
}
