// Token-level parsers shared by the shorthand grammars

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag},
    character::complete::{alpha1, alphanumeric1, char, multispace0},
    combinator::{map, recognize, value},
    multi::many0_count,
    sequence::{delimited, pair},
    IResult,
};

/// Wrap a parser so surrounding whitespace is consumed.
pub fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

/// Column-style identifier: `[A-Za-z_][A-Za-z0-9_.]*`
pub fn identifier(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0_count(alt((alphanumeric1, tag("_"), tag(".")))),
        )),
        |s: &str| s.to_string(),
    )(input)
}

/// Double-quoted string with `\"` and `\\` escapes.
pub fn string_literal(input: &str) -> IResult<&str, String> {
    alt((
        // escaped_transform rejects an empty body, so match "" first.
        value(String::new(), tag("\"\"")),
        delimited(
            char('"'),
            escaped_transform(
                is_not("\\\""),
                '\\',
                alt((value("\\", tag("\\")), value("\"", tag("\"")))),
            ),
            char('"'),
        ),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier() {
        assert_eq!(identifier("Miles_per_Gallon rest"), Ok((" rest", "Miles_per_Gallon".to_string())));
        assert_eq!(identifier("_x1.y"), Ok(("", "_x1.y".to_string())));
        assert!(identifier("1abc").is_err());
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(string_literal("\"Release Date\""), Ok(("", "Release Date".to_string())));
        assert_eq!(string_literal(r#""say \"hi\"""#), Ok(("", "say \"hi\"".to_string())));
        assert_eq!(string_literal("\"\""), Ok(("", String::new())));
        assert!(string_literal("\"unterminated").is_err());
    }

    #[test]
    fn test_ws() {
        assert_eq!(ws(identifier)("   abc  ,"), Ok((",", "abc".to_string())));
    }
}
