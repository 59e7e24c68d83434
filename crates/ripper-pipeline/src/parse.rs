//! Lenient parsing of model output into raw skeleton records.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use ripper_core::{ParseError, RawSkeleton};

static FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json|JSON)?\s*([\s\S]*?)\s*```").unwrap());
static OPEN_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s\S]*?```(?:json|JSON)?\s*").unwrap());
static CLOSE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```[\s\S]*$").unwrap());

/// Remove markdown code fences around the payload.
fn strip_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.to_string();
    }
    if let Some(inner) = FENCED.captures(text).and_then(|c| c.get(1)) {
        return inner.as_str().to_string();
    }
    let opened = OPEN_FENCE.replace(text, "");
    CLOSE_FENCE.replace(&opened, "").into_owned()
}

/// Parse model output into raw records.
///
/// Accepts fenced output, leading prose before the first `[` or `{`, trailing
/// prose after the JSON value, and a single object in place of an array.
/// Array elements that are not objects are dropped.
pub fn parse_records(output: &str) -> Result<Vec<RawSkeleton>, ParseError> {
    let cleaned = strip_fences(output.trim());
    let start = cleaned
        .find(|c| c == '[' || c == '{')
        .ok_or(ParseError::NoPayload)?;

    let value = serde_json::Deserializer::from_str(&cleaned[start..])
        .into_iter::<Value>()
        .next()
        .ok_or(ParseError::NoPayload)?
        .map_err(|e| ParseError::Json(e.to_string()))?;

    let elements = match value {
        Value::Array(elements) => elements,
        object @ Value::Object(_) => vec![object],
        other => return Err(ParseError::UnexpectedShape(kind(&other).to_string())),
    };

    Ok(elements
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|element| serde_json::from_value(element).ok())
        .collect())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(records: &[RawSkeleton]) -> Vec<String> {
        records.iter().filter_map(|r| r.item_id()).collect()
    }

    #[test]
    fn test_plain_array() {
        let records = parse_records(r#"[{"video_id": "a"}, {"video_id": "b"}]"#).unwrap();
        assert_eq!(ids(&records), vec!["a", "b"]);
    }

    #[test]
    fn test_fenced_output() {
        let output = "Here you go:\n```json\n[{\"video_id\": \"a\"}]\n```\nLet me know!";
        assert_eq!(ids(&parse_records(output).unwrap()), vec!["a"]);
    }

    #[test]
    fn test_unterminated_fence() {
        let output = "```json\n[{\"video_id\": \"a\"}]";
        assert_eq!(ids(&parse_records(output).unwrap()), vec!["a"]);
    }

    #[test]
    fn test_leading_and_trailing_prose() {
        let output = "Sure! [{\"video_id\": \"a\"}] Hope this helps.";
        assert_eq!(ids(&parse_records(output).unwrap()), vec!["a"]);
    }

    #[test]
    fn test_single_object_is_wrapped() {
        let records = parse_records(r#"{"video_id": "solo", "hook": "x"}"#).unwrap();
        assert_eq!(ids(&records), vec!["solo"]);
    }

    #[test]
    fn test_non_object_elements_dropped() {
        let records = parse_records(r#"[1, "two", {"video_id": "c"}]"#).unwrap();
        assert_eq!(ids(&records), vec!["c"]);
    }

    #[test]
    fn test_failures() {
        assert_eq!(parse_records("I could not do that."), Err(ParseError::NoPayload));
        assert!(matches!(
            parse_records("[{\"video_id\": \"a\","),
            Err(ParseError::Json(_))
        ));
    }
}
