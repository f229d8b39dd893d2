//! Text encoding of step responses for the step cache.
//!
//! Payloads are JSON objects tagged by `type`. Decoding looks at the tag first so
//! a payload written by a newer version fails with a clear error instead of a
//! generic serde message.

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::step_response::StepResponse;

const KNOWN_KINDS: &[&str] = &[
    "step-key",
    "cache-check",
    "step-result",
    "step-error",
    "step-delay",
    "workflow-result",
    "step-invalid",
];

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode step response: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("step payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("step payload has no `type` tag")]
    MissingKind,

    #[error("unknown step response kind `{0}`")]
    UnknownKind(String),

    #[error("malformed `{kind}` payload: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn serialize(response: &StepResponse) -> Result<String, CodecError> {
    serde_json::to_string(response).map_err(CodecError::Encode)
}

pub fn deserialize(payload: &str) -> Result<StepResponse, CodecError> {
    let value: JsonValue = serde_json::from_str(payload).map_err(CodecError::InvalidJson)?;

    let kind = value
        .get("type")
        .and_then(JsonValue::as_str)
        .ok_or(CodecError::MissingKind)?
        .to_string();

    if !KNOWN_KINDS.contains(&kind.as_str()) {
        return Err(CodecError::UnknownKind(kind));
    }

    serde_json::from_value(value).map_err(|source| CodecError::Malformed { kind, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StepError;
    use crate::step_response::{BackoffStrategy, RetryPolicy};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_round_trip_with_nested_error() {
        let response = StepResponse::result(json!({
            "a": 1,
            "b": "two",
            "c": [false, null, { "d": 4.5 }],
        }));
        let decoded = deserialize(&serialize(&response).unwrap()).unwrap();
        assert_eq!(decoded, response);

        let err = StepError::new("TypeError", "x is undefined").with_stack("at step 3");
        let response = StepResponse::error(err, RetryPolicy::new(5, Duration::from_millis(250)));
        let decoded = deserialize(&serialize(&response).unwrap()).unwrap();

        match decoded {
            StepResponse::Error {
                err,
                max_attempts,
                retry_interval,
                backoff_strategy,
            } => {
                assert_eq!(err.name, "TypeError");
                assert_eq!(err.message, "x is undefined");
                assert_eq!(err.stack.as_deref(), Some("at step 3"));
                assert_eq!(max_attempts, 5);
                assert_eq!(retry_interval, 250);
                assert_eq!(backoff_strategy, BackoffStrategy::Decay);
            }
            other => panic!("expected step-error, got {:?}", other),
        }
    }

    #[test]
    fn test_protocol_messages_round_trip() {
        let responses = [
            StepResponse::StepKey { key: Some("charge-card".to_string()) },
            StepResponse::StepKey { key: None },
            StepResponse::CacheCheck,
        ];

        for response in responses {
            let payload = serialize(&response).unwrap();
            assert_eq!(deserialize(&payload).unwrap(), response, "payload {}", payload);
        }

        assert_eq!(
            serialize(&StepResponse::StepKey { key: None }).unwrap(),
            r#"{"type":"step-key","key":null}"#
        );
        assert_eq!(serialize(&StepResponse::CacheCheck).unwrap(), r#"{"type":"cache-check"}"#);
    }

    #[test]
    fn test_wire_shape() {
        let payload = serialize(&StepResponse::delay(1_700_000_000_000)).unwrap();
        assert_eq!(payload, r#"{"type":"step-delay","resumeAt":1700000000000}"#);

        let payload = serialize(&StepResponse::Invalid).unwrap();
        assert_eq!(payload, r#"{"type":"step-invalid"}"#);

        let payload = serialize(&StepResponse::WorkflowResult { result: json!([1, 2]) }).unwrap();
        assert_eq!(payload, r#"{"type":"workflow-result","result":[1,2]}"#);
    }

    #[test]
    fn test_error_defaults_when_policy_missing() {
        let decoded =
            deserialize(r#"{"type":"step-error","err":{"name":"Error","message":"boom"}}"#).unwrap();

        assert_eq!(decoded.retry_policy(), Some(RetryPolicy::default()));
    }

    #[test]
    fn test_null_result_round_trips() {
        let response = StepResponse::result(JsonValue::Null);
        let payload = serialize(&response).unwrap();

        assert_eq!(payload, r#"{"type":"step-result","result":null}"#);
        assert_eq!(deserialize(&payload).unwrap(), response);
    }

    #[test]
    fn test_rejects_bad_payloads() {
        assert!(matches!(deserialize("not json"), Err(CodecError::InvalidJson(_))));
        assert!(matches!(deserialize(r#"{"result":1}"#), Err(CodecError::MissingKind)));
        assert!(matches!(
            deserialize(r#"{"type":"step-timeout"}"#),
            Err(CodecError::UnknownKind(kind)) if kind == "step-timeout"
        ));
        assert!(matches!(
            deserialize(r#"{"type":"step-delay","resumeAt":"soon"}"#),
            Err(CodecError::Malformed { .. })
        ));
    }
}
