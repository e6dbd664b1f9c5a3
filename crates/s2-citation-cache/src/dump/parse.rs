//! Dump line parsing.
//!
//! Two line formats are accepted:
//!
//! ```text
//! {"citingcorpusid": 12, "citedcorpusid": "34"}
//! 12 34
//! ```
//!
//! Identifiers may be integers or strings; numeric strings are normalized so
//! `"0034"` and `34` index under the same key.

use serde_json::{Map, Value};

/// A successfully read line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// A citation edge.
    Edge {
        /// Citing paper.
        citing: String,
        /// Cited paper.
        cited: String,
    },
    /// A well-formed record with a null or empty endpoint.
    MissingEndpoint,
    /// An empty line.
    Blank,
}

/// Parse one line (without its terminator). `Err` carries the reason.
pub fn parse_line(line: &str) -> Result<ParsedLine, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ParsedLine::Blank);
    }
    if line.starts_with('{') {
        parse_json(line)
    } else {
        parse_pair(line)
    }
}

fn parse_json(line: &str) -> Result<ParsedLine, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {e}"))?;
    let Value::Object(obj) = value else {
        return Err("expected a JSON object".to_string());
    };
    let citing = endpoint(&obj, "citingcorpusid")?;
    let cited = endpoint(&obj, "citedcorpusid")?;
    Ok(match (citing, cited) {
        (Some(citing), Some(cited)) => ParsedLine::Edge { citing, cited },
        _ => ParsedLine::MissingEndpoint,
    })
}

fn endpoint(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, String> {
    match obj.get(key) {
        None => Err(format!("missing field `{key}`")),
        Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            n.as_u64().map(|v| Some(v.to_string())).ok_or_else(|| format!("`{key}` is not a corpus id: {n}"))
        }
        Some(Value::String(s)) => Ok(normalize(s)),
        Some(other) => Err(format!("`{key}` has unsupported type: {other}")),
    }
}

fn parse_pair(line: &str) -> Result<ParsedLine, String> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(citing), Some(cited), None) => match (normalize(citing), normalize(cited)) {
            (Some(citing), Some(cited)) => Ok(ParsedLine::Edge { citing, cited }),
            _ => Ok(ParsedLine::MissingEndpoint),
        },
        _ => Err("expected two whitespace-separated identifiers".to_string()),
    }
}

fn normalize(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return None;
    }
    Some(raw.parse::<u64>().map_or_else(|_| raw.to_string(), |n| n.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(citing: &str, cited: &str) -> ParsedLine {
        ParsedLine::Edge { citing: citing.to_string(), cited: cited.to_string() }
    }

    #[test]
    fn test_json_integer_and_string_ids() {
        assert_eq!(parse_line(r#"{"citingcorpusid": 12, "citedcorpusid": 34}"#), Ok(edge("12", "34")));
        assert_eq!(
            parse_line(r#"{"citingcorpusid": "0012", "citedcorpusid": "34", "isinfluential": false}"#),
            Ok(edge("12", "34"))
        );
    }

    #[test]
    fn test_null_endpoint_is_skipped_not_malformed() {
        assert_eq!(
            parse_line(r#"{"citingcorpusid": 12, "citedcorpusid": null}"#),
            Ok(ParsedLine::MissingEndpoint)
        );
    }

    #[test]
    fn test_whitespace_pair() {
        assert_eq!(parse_line("A\tB\r"), Ok(edge("A", "B")));
        assert_eq!(parse_line("  "), Ok(ParsedLine::Blank));
    }

    #[test]
    fn test_malformed_lines() {
        assert!(parse_line("{not json").is_err());
        assert!(parse_line(r#"{"citingcorpusid": 1}"#).is_err());
        assert!(parse_line(r#"{"citingcorpusid": -1, "citedcorpusid": 2}"#).is_err());
        assert!(parse_line("only-one").is_err());
        assert!(parse_line("a b c").is_err());
        assert!(parse_line("[1, 2]").is_err());
    }
}
