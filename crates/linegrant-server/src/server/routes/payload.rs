//! Request decoding and response bodies.
//!
//! Bodies are decoded leniently: anything that is not the expected shape
//! degrades to an empty batch instead of an error, so a malformed request can
//! never crash a handler or poison the claim queue.

use linegrant::Identifier;
use serde::Serialize;
use serde_json::Value;

/// Decoded `POST /claim` body.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ClaimPayload {
    pub lines: Vec<String>,
    pub limit: Option<usize>,
}

impl ClaimPayload {
    pub fn from_body(body: &[u8]) -> Self {
        let value = parse_object(body);
        Self {
            lines: lines_of(&value),
            limit: value.get("limit").and_then(non_negative_integer),
        }
    }
}

/// Decoded `POST /append` body.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestPayload {
    pub lines: Vec<String>,
}

impl IngestPayload {
    pub fn from_body(body: &[u8]) -> Self {
        Self {
            lines: lines_of(&parse_object(body)),
        }
    }
}

fn parse_object(body: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) | Err(_) => {
            tracing::debug!("Malformed request body treated as an empty batch");
            Value::Null
        }
    }
}

/// String elements of `lines`. Other element types are skipped.
fn lines_of(value: &Value) -> Vec<String> {
    value
        .get("lines")
        .and_then(Value::as_array)
        .map(|lines| {
            lines
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Accepts `3` and `3.0`; anything negative, fractional or non-numeric is
/// treated as no limit at all.
fn non_negative_integer(value: &Value) -> Option<usize> {
    if let Some(n) = value.as_u64() {
        return usize::try_from(n).ok();
    }
    value
        .as_f64()
        .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= usize::MAX as f64)
        .map(|f| f as usize)
}

/// `POST /claim` response. `error` is present only on failure.
#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub claimed: Vec<Identifier>,
    pub rejected: Vec<Identifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClaimResponse {
    pub fn failed(rejected: Vec<Identifier>, error: impl ToString) -> Self {
        Self {
            claimed: Vec::new(),
            rejected,
            error: Some(error.to_string()),
        }
    }
}

/// `POST /append` response.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub added: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestResponse {
    pub const fn added(added: usize) -> Self {
        Self {
            ok: true,
            added,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            ok: false,
            added: 0,
            error: Some(error.to_string()),
        }
    }
}
