//! Event line parsing
//!
//! Each line of `twm listen` output is a bare JSON object of the form
//! `{"name": "...", "data": {...}}`. Only that minimal shape is enforced;
//! what `data` means is up to the consumer.

use serde_json::Value;

use crate::error::{DecodeCause, DecodeError};
use crate::payload::Payload;
use crate::types::Event;

/// Decode one line into an event
///
/// Returns `Ok(None)` for blank or whitespace-only lines, which carry no
/// event and are not errors. A missing or `null` `data` field yields an
/// empty payload. Unknown top-level fields are ignored.
///
/// # Errors
///
/// Returns a `DecodeError` holding the raw line when it is not JSON, not an
/// object, has no non-empty string `name`, or has a non-object `data`. The
/// error is recoverable: callers log it and move on to the next line.
///
/// # Example
///
/// ```ignore
/// match parse_line(&line) {
///     Ok(Some(event)) => dispatcher.dispatch(&event),
///     Ok(None) => {} // blank line
///     Err(e) => warn!("{}", e),
/// }
/// ```
pub fn parse_line(line: &str) -> Result<Option<Event>, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let fail = |cause| DecodeError {
        line: line.to_string(),
        cause,
    };

    let value: Value = serde_json::from_str(trimmed).map_err(|e| fail(DecodeCause::Json(e)))?;

    let mut record = match value {
        Value::Object(record) => record,
        other => {
            return Err(fail(DecodeCause::NotAnObject {
                found: json_type(&other),
            }))
        }
    };

    let name = match record.remove("name") {
        Some(Value::String(name)) if name.is_empty() => return Err(fail(DecodeCause::EmptyName)),
        Some(Value::String(name)) => name,
        _ => return Err(fail(DecodeCause::MissingName)),
    };

    let data = match record.remove("data") {
        None | Some(Value::Null) => Payload::new(),
        Some(Value::Object(map)) => Payload::from(map),
        Some(other) => {
            return Err(fail(DecodeCause::DataNotObject {
                found: json_type(&other),
            }))
        }
    };

    Ok(Some(Event { name, data }))
}

/// Decode one raw line into an event
///
/// Same rules as `parse_line`, with the line taken as bytes straight from
/// the stream.
///
/// # Errors
///
/// Returns a `DecodeError` with `DecodeCause::InvalidUtf8` when the bytes
/// are not valid UTF-8, and otherwise whatever `parse_line` reports.
pub fn parse_bytes(line: &[u8]) -> Result<Option<Event>, DecodeError> {
    match std::str::from_utf8(line) {
        Ok(text) => parse_line(text),
        Err(e) => Err(DecodeError {
            line: String::from_utf8_lossy(line).into_owned(),
            cause: DecodeCause::InvalidUtf8(e),
        }),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
