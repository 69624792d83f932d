//! JSON-RPC 2.0 line codec
//!
//! One JSON object per line over the worker's stdio. Outgoing requests are
//! encoded here; incoming lines are decoded into replies, blanks, or parse
//! failures that the reader loop logs and skips.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::Result;

/// Protocol version stamped on every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// Well-known JSON-RPC error codes emitted by the worker.
pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const SERVER_ERROR: i64 = -32000;

/// An outgoing request. Immutable once built.
///
/// `Deserialize` exists only so the encode/decode round-trip can be
/// verified; the worker never sends us requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    pub params: Map<String, JsonValue>,
    pub id: String,
}

impl Request {
    pub fn new(
        method: impl Into<String>,
        params: Map<String, JsonValue>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: id.into(),
        }
    }
}

/// A decoded worker reply: success (`result`) or failure (`error`).
///
/// `id` may be absent when the worker failed before it could parse the
/// request; such replies match no pending call and are dropped after logging.
#[derive(Debug, Clone, Deserialize)]
pub struct Reply {
    pub result: Option<JsonValue>,
    pub error: Option<RemoteFault>,
    pub id: Option<String>,
}

/// The `error` object of a JSON-RPC error response.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFault {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<JsonValue>,
}

/// A line that could not be decoded. Logged and skipped, never fatal.
#[derive(Debug)]
pub struct ParseFailure {
    pub line: String,
    pub reason: String,
}

/// Outcome of decoding one stdout line.
#[derive(Debug)]
pub enum Decoded {
    /// Blank or whitespace-only line; ignore.
    Blank,
    Reply(Reply),
    Failure(ParseFailure),
}

/// Serialize a request to a single-line JSON object.
///
/// serde_json escapes control characters inside strings, so the emitted
/// line can never contain a literal newline and break the framing.
pub fn encode(request: &Request) -> Result<String> {
    let line = serde_json::to_string(request)?;
    debug_assert!(!line.contains('\n'));
    Ok(line)
}

/// Decode one line from the worker's stdout.
pub fn decode(line: &str) -> Decoded {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Decoded::Blank;
    }

    let value: JsonValue = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(e) => {
            return Decoded::Failure(ParseFailure {
                line: line.to_string(),
                reason: e.to_string(),
            })
        }
    };

    if value.get("result").is_none() && value.get("error").is_none() {
        return Decoded::Failure(ParseFailure {
            line: line.to_string(),
            reason: "missing both 'result' and 'error'".to_string(),
        });
    }

    match serde_json::from_value::<Reply>(value) {
        Ok(reply) => Decoded::Reply(reply),
        Err(e) => Decoded::Failure(ParseFailure {
            line: line.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request() -> Request {
        let mut params = Map::new();
        params.insert("a".to_string(), json!(5));
        params.insert("b".to_string(), json!(7));
        Request::new("add", params, "1700000000000_deadbeef")
    }

    #[test]
    fn test_encode_is_single_line() {
        let mut params = Map::new();
        params.insert("text".to_string(), json!("line one\nline two"));
        // Control characters in any string field get escaped, so a raw
        // newline can never reach the wire.
        let request = Request::new("echo\nme", params, "id\n1");

        let line = encode(&request).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.starts_with('{') && line.ends_with('}'));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let request = sample_request();
        let line = encode(&request).unwrap();
        let back: Request = serde_json::from_str(&line).unwrap();
        assert_eq!(back, request);
        assert_eq!(back.jsonrpc, JSONRPC_VERSION);
    }

    #[test]
    fn test_decode_blank_line_is_ignored() {
        assert!(matches!(decode(""), Decoded::Blank));
        assert!(matches!(decode("   \t  "), Decoded::Blank));
    }

    #[test]
    fn test_decode_success_reply() {
        let line = r#"{"jsonrpc":"2.0","result":12,"id":"abc"}"#;
        match decode(line) {
            Decoded::Reply(reply) => {
                assert_eq!(reply.result, Some(json!(12)));
                assert!(reply.error.is_none());
                assert_eq!(reply.id.as_deref(), Some("abc"));
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_reply() {
        let line = r#"{"jsonrpc":"2.0","error":{"code":-32000,"message":"division by zero"},"id":"abc"}"#;
        match decode(line) {
            Decoded::Reply(reply) => {
                let fault = reply.error.unwrap();
                assert_eq!(fault.code, SERVER_ERROR);
                assert_eq!(fault.message, "division by zero");
                assert!(fault.data.is_none());
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_without_id() {
        let line = r#"{"jsonrpc":"2.0","error":{"code":-32700,"message":"parse error"}}"#;
        match decode(line) {
            Decoded::Reply(reply) => {
                assert!(reply.id.is_none());
                assert_eq!(reply.error.unwrap().code, PARSE_ERROR);
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_non_json_is_parse_failure() {
        match decode("not json") {
            Decoded::Failure(failure) => {
                assert_eq!(failure.line, "not json");
                assert!(!failure.reason.is_empty());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_object_without_result_or_error_is_failure() {
        let line = r#"{"jsonrpc":"2.0","id":"abc"}"#;
        match decode(line) {
            Decoded::Failure(failure) => {
                assert!(failure.reason.contains("result"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
