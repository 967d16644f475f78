// Encoding shorthand parser
//
// Format: `x: Origin, y: mean(Horsepower), color: Cylinders:ordinal`
// A field is an identifier or a double-quoted name; `count()` takes no field.

use super::lexer::{identifier, string_literal, ws};
use crate::error::{BridgeError, Result};
use crate::spec::{Channel, DataRef, Encoding, ExpandedType, FieldDef, VisualizationSpec};
use nom::{
    branch::alt,
    character::complete::char,
    combinator::{all_consuming, map, opt},
    multi::separated_list1,
    sequence::{delimited, preceded},
    IResult,
};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
struct RawEntry {
    channel: String,
    aggregate: Option<String>,
    field: String,
    field_type: Option<String>,
}

fn field_name(input: &str) -> IResult<&str, String> {
    alt((string_literal, identifier))(input)
}

/// `agg(field)` or `agg()`
fn aggregate_call(input: &str) -> IResult<&str, (Option<String>, String)> {
    let (input, op) = ws(identifier)(input)?;
    let (input, field) = delimited(ws(char('(')), opt(ws(field_name)), ws(char(')')))(input)?;
    Ok((input, (Some(op), field.unwrap_or_default())))
}

fn parse_entry(input: &str) -> IResult<&str, RawEntry> {
    let (input, channel) = ws(identifier)(input)?;
    let (input, _) = ws(char(':'))(input)?;
    let (input, (aggregate, field)) = alt((
        aggregate_call,
        map(ws(field_name), |f| (None, f)),
    ))(input)?;
    let (input, field_type) = opt(preceded(ws(char(':')), ws(identifier)))(input)?;

    Ok((
        input,
        RawEntry {
            channel,
            aggregate,
            field,
            field_type,
        },
    ))
}

fn parse_entries(input: &str) -> IResult<&str, Vec<RawEntry>> {
    all_consuming(separated_list1(ws(char(',')), parse_entry))(input)
}

fn parse_type(name: &str) -> Result<ExpandedType> {
    match name.to_ascii_lowercase().as_str() {
        "q" | "quantitative" => Ok(ExpandedType::Quantitative),
        "o" | "ordinal" => Ok(ExpandedType::Ordinal),
        "n" | "nominal" => Ok(ExpandedType::Nominal),
        "t" | "temporal" => Ok(ExpandedType::Temporal),
        _ => Err(BridgeError::MalformedSpec(format!("unknown field type '{}'", name))),
    }
}

/// Parse an encoding shorthand. Unknown channels and repeated channels are
/// rejected.
pub fn parse_encoding(input: &str) -> Result<Encoding> {
    let (_, entries) = parse_entries(input).map_err(|e| {
        BridgeError::MalformedSpec(format!("invalid encoding shorthand: {}", e))
    })?;

    let mut encoding = Encoding::new();
    for entry in entries {
        let channel: Channel = entry.channel.parse()?;
        let mut def = FieldDef::new(entry.field);
        if let Some(aggregate) = entry.aggregate {
            def = def.with_aggregate(aggregate);
        }
        if let Some(name) = entry.field_type {
            def = def.with_type(parse_type(&name)?);
        }
        if encoding.insert(channel, def).is_some() {
            return Err(BridgeError::MalformedSpec(format!(
                "channel '{}' given more than once",
                channel
            )));
        }
    }
    Ok(encoding)
}

/// Build a spec over table `table` from an encoding shorthand.
pub fn spec_from_shorthand(table: &str, encoding: &str, mark: Option<&str>) -> Result<VisualizationSpec> {
    let mut spec = VisualizationSpec::new(DataRef::named(table), parse_encoding(encoding)?);
    if let Some(mark) = mark {
        spec.extra.insert("mark".to_string(), Value::String(mark.to_string()));
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::translate;

    #[test]
    fn test_parse_plain_and_aggregate() {
        let enc = parse_encoding("x: a, y: mean(b)").unwrap();
        assert_eq!(enc.get(Channel::X), Some(&FieldDef::new("a")));
        assert_eq!(enc.get(Channel::Y), Some(&FieldDef::new("b").with_aggregate("mean")));
    }

    #[test]
    fn test_parse_with_whitespace_and_types() {
        let enc = parse_encoding("  color : Cylinders : ordinal ,x:Origin:n ").unwrap();
        assert_eq!(enc.get(Channel::Color).unwrap().field_type, Some(ExpandedType::Ordinal));
        assert_eq!(enc.get(Channel::X).unwrap().field_type, Some(ExpandedType::Nominal));
    }

    #[test]
    fn test_parse_quoted_field_and_count() {
        let enc = parse_encoding(r#"x: "Release Date", y: count()"#).unwrap();
        assert_eq!(enc.get(Channel::X).unwrap().field, "Release Date");
        let y = enc.get(Channel::Y).unwrap();
        assert_eq!(y.field, "");
        assert_eq!(y.aggregate_str(), "count");
    }

    #[test]
    fn test_unknown_channel() {
        let err = parse_encoding("tooltip: a").unwrap_err();
        assert!(matches!(err, BridgeError::UnknownChannel(ref c) if c == "tooltip"));
    }

    #[test]
    fn test_duplicate_channel() {
        assert!(parse_encoding("x: a, x: b").is_err());
    }

    #[test]
    fn test_trailing_garbage() {
        assert!(parse_encoding("x: a,").is_err());
        assert!(parse_encoding("x: a y: b").is_err());
        assert!(parse_encoding("").is_err());
    }

    #[test]
    fn test_unknown_type() {
        assert!(parse_encoding("x: a:weird").is_err());
    }

    #[test]
    fn test_shorthand_translates() {
        let spec = spec_from_shorthand("cars", "x: Origin, y: mean(Horsepower)", Some("bar")).unwrap();
        let t = translate(&spec).unwrap();
        assert_eq!(t.query.sql, "SELECT Origin, avg(Horsepower) FROM cars GROUP BY Origin;");
        assert_eq!(t.deagg_spec.extra.get("mark"), Some(&Value::String("bar".to_string())));
    }
}
