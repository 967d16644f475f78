//! Spec → SQL translation.
//!
//! [`translate`] turns an aggregate-bearing spec into a single SELECT that
//! performs the aggregation in the store, plus a deaggregated spec whose
//! fields point at the query's output columns so the renderer aggregates
//! nothing itself.
//!
//! Limitations: no WHERE clause is generated (filters are not translated),
//! and two channels using the same aggregate function produce two output
//! columns with the same name.

use crate::error::{BridgeError, Result};
use crate::spec::{Channel, VisualizationSpec};
use std::borrow::Cow;
use std::ops::Deref;

/// The only aggregate synonym the SQL dialect needs.
const AGGREGATE_SYNONYMS: &[(&str, &str)] = &[("mean", "avg")];

#[derive(Debug, Clone, PartialEq)]
pub enum SelectExpr {
    Column(String),
    /// `field` is `None` only for `count(*)`.
    Aggregate { op: String, field: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub channel: Channel,
    pub expr: SelectExpr,
    /// Name of the result column the store produces for this item.
    pub output: String,
}

/// Structured form of the translated query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub table: String,
    pub select: Vec<SelectItem>,
    pub group_by: Vec<String>,
}

impl QueryPlan {
    pub fn is_aggregate(&self) -> bool {
        self.select
            .iter()
            .any(|item| matches!(item.expr, SelectExpr::Aggregate { .. }))
    }

    pub fn to_sql(&self) -> String {
        let columns: Vec<String> = self
            .select
            .iter()
            .map(|item| match &item.expr {
                SelectExpr::Column(field) => sql_ident(field).into_owned(),
                SelectExpr::Aggregate { op, field: Some(field) } => {
                    format!("{}({})", op, sql_ident(field))
                }
                SelectExpr::Aggregate { op, field: None } => format!("{}(*)", op),
            })
            .collect();

        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), sql_ident(&self.table));
        if !self.group_by.is_empty() {
            let groups: Vec<Cow<'_, str>> = self.group_by.iter().map(|f| sql_ident(f)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&groups.join(", "));
        }
        sql.push(';');
        sql
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedQuery {
    pub sql: String,
    pub plan: QueryPlan,
}

/// A spec whose fields name the translated query's output columns and which
/// carries no aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct DeaggregatedSpec(VisualizationSpec);

impl DeaggregatedSpec {
    pub fn into_inner(self) -> VisualizationSpec {
        self.0
    }
}

impl Deref for DeaggregatedSpec {
    type Target = VisualizationSpec;

    fn deref(&self) -> &VisualizationSpec {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub deagg_spec: DeaggregatedSpec,
    pub query: TranslatedQuery,
}

/// Translate `spec` into a query and its deaggregated counterpart.
pub fn translate(spec: &VisualizationSpec) -> Result<Translation> {
    let table = spec.data.table_name()?;
    let is_aggregate_query = spec.encoding.has_aggregate();

    let mut deagg = spec.clone();
    let mut select = Vec::with_capacity(spec.encoding.len());
    let mut group_by = Vec::new();

    for (channel, def) in spec.encoding.iter() {
        let item = if def.is_aggregate() {
            let op = normalize_aggregate(def.aggregate_str())?;
            let field = if def.field.is_empty() {
                if op != "count" {
                    return Err(BridgeError::MalformedSpec(format!(
                        "encoding.{}: aggregate '{}' needs a field",
                        channel, op
                    )));
                }
                None
            } else {
                Some(def.field.clone())
            };
            SelectItem {
                channel,
                output: op.clone(),
                expr: SelectExpr::Aggregate { op, field },
            }
        } else {
            if def.field.is_empty() {
                return Err(BridgeError::MalformedSpec(format!(
                    "encoding.{}: missing field",
                    channel
                )));
            }
            if is_aggregate_query {
                group_by.push(def.field.clone());
            }
            SelectItem {
                channel,
                // The store reports plain columns lower-cased.
                output: def.field.to_lowercase(),
                expr: SelectExpr::Column(def.field.clone()),
            }
        };

        if let Some(out) = deagg.encoding.get_mut(channel) {
            out.field = item.output.clone();
            if out.is_aggregate() {
                out.aggregate = Some(String::new());
            }
        }
        select.push(item);
    }

    let plan = QueryPlan {
        table,
        select,
        group_by,
    };

    Ok(Translation {
        deagg_spec: DeaggregatedSpec(deagg),
        query: TranslatedQuery {
            sql: plan.to_sql(),
            plan,
        },
    })
}

/// Lower-case an aggregate name and apply the `mean → avg` synonym.
pub fn normalize_aggregate(name: &str) -> Result<String> {
    let lower = name.trim().to_ascii_lowercase();
    if !is_plain_ident(&lower) {
        return Err(BridgeError::UnsupportedAggregate(name.to_string()));
    }
    Ok(AGGREGATE_SYNONYMS
        .iter()
        .find(|(from, _)| *from == lower)
        .map(|(_, to)| (*to).to_string())
        .unwrap_or(lower))
}

fn is_plain_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Plain identifiers are emitted bare; anything else is double-quoted.
fn sql_ident(name: &str) -> Cow<'_, str> {
    if is_plain_ident(name) {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}
