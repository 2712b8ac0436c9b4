use tracehouse_core::config::Encoding;
use tracehouse_core::error::{Result, TracehouseError};
use tracehouse_core::model::span::Span;

/// Serializes a span into the `model` column payload.
pub fn encode(encoding: Encoding, span: &Span) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Json => serde_json::to_vec(span)
            .map_err(|e| TracehouseError::Decode(format!("json encode failed: {e}"))),
        Encoding::Binary => bincode::serialize(span)
            .map_err(|e| TracehouseError::Decode(format!("binary encode failed: {e}"))),
    }
}

/// Parses a `model` payload with the configured variant. A payload written by
/// the other variant fails here and the error is surfaced to the caller.
pub fn decode(encoding: Encoding, payload: &[u8]) -> Result<Span> {
    match encoding {
        Encoding::Json => serde_json::from_slice(payload)
            .map_err(|e| TracehouseError::Decode(format!("json decode failed: {e}"))),
        Encoding::Binary => bincode::deserialize(payload)
            .map_err(|e| TracehouseError::Decode(format!("binary decode failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use tracehouse_core::ids::{SpanId, TraceId};
    use tracehouse_core::model::span::{KeyValue, RefType, SpanLog, SpanRef, TagValue};

    use super::*;

    fn full_span() -> Span {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 12, 30, 0).unwrap();
        Span {
            trace_id: TraceId::new(7, 11),
            span_id: SpanId(99),
            operation_name: "GET /v1/orders".to_string(),
            service_name: "api".to_string(),
            start_time: start,
            duration: Duration::from_micros(1_250),
            span_kind: "server".to_string(),
            tags: vec![
                KeyValue::new("http.status_code", TagValue::Int(500)),
                KeyValue::new("error", TagValue::Bool(true)),
                KeyValue::new("peer", TagValue::String("redis:6379".into())),
                KeyValue::new("payload", TagValue::Bytes(vec![1, 2, 3])),
                KeyValue::new("ratio", TagValue::Float(0.25)),
            ],
            logs: vec![SpanLog {
                timestamp: start + chrono::Duration::milliseconds(1),
                fields: vec![KeyValue::new("event", TagValue::String("retry".into()))],
            }],
            references: vec![SpanRef {
                trace_id: TraceId::new(7, 11),
                span_id: SpanId(98),
                ref_type: RefType::ChildOf,
            }],
        }
        .normalized()
    }

    #[test]
    fn json_round_trips() {
        let span = full_span();
        let payload = encode(Encoding::Json, &span).unwrap();
        assert_eq!(decode(Encoding::Json, &payload).unwrap(), span);
    }

    #[test]
    fn binary_round_trips() {
        let span = full_span();
        let payload = encode(Encoding::Binary, &span).unwrap();
        assert_eq!(decode(Encoding::Binary, &payload).unwrap(), span);
    }

    #[test]
    fn binary_payload_fails_json_decode() {
        let payload = encode(Encoding::Binary, &full_span()).unwrap();
        let err = decode(Encoding::Json, &payload).unwrap_err();
        assert!(matches!(err, TracehouseError::Decode(_)));
        assert!(err.to_string().contains("json decode failed"));
    }

    #[test]
    fn json_payload_fails_binary_decode() {
        let payload = encode(Encoding::Json, &full_span()).unwrap();
        let err = decode(Encoding::Binary, &payload).unwrap_err();
        assert!(matches!(err, TracehouseError::Decode(_)));
    }

    #[test]
    fn garbage_fails_both_variants() {
        assert!(decode(Encoding::Json, b"{not_a_key}").is_err());
        assert!(decode(Encoding::Binary, &[]).is_err());
    }

    #[test]
    fn json_tolerates_missing_optional_fields() {
        // Older payloads without tags/logs/references still decode.
        let payload = br#"{
            "trace_id": "0000000000000001",
            "span_id": "0000000000000002",
            "operation_name": "op",
            "service_name": "svc",
            "start_time": "2026-02-01T00:00:00Z",
            "duration": {"secs": 0, "nanos": 1000}
        }"#;
        let span = decode(Encoding::Json, payload).unwrap();
        assert!(span.tags.is_empty());
        assert!(span.span_kind.is_empty());
    }
}
