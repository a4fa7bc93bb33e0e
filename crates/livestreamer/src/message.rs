//! WebSocket envelope construction.

use serde::Serialize;

use shared::WsEnvelope;

/// Wrap `payload` in a version 1 envelope stamped with the current time.
pub fn envelope<T: Serialize>(kind: &str, payload: &T) -> WsEnvelope {
    let payload = match serde_json::to_value(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(kind, error = %e, "Envelope payload failed to serialize");
            serde_json::Value::Null
        }
    };
    WsEnvelope {
        version: 1,
        r#type: kind.to_string(),
        payload,
        ts: Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ws_types, StatsSnapshot};

    #[test]
    fn envelope_carries_payload_and_timestamp() {
        let env = envelope(ws_types::STATS, &StatsSnapshot { count: 2, peak: 5 });
        assert_eq!(env.version, 1);
        assert_eq!(env.r#type, "stats");
        assert_eq!(env.payload, serde_json::json!({"count": 2, "peak": 5}));
        assert!(env.ts.unwrap().ends_with('Z'));
    }

    #[test]
    fn unserializable_payload_becomes_null() {
        // JSON object keys must be strings
        let payload = std::collections::HashMap::from([((1, 2), 3)]);
        let env = envelope(ws_types::STATS, &payload);
        assert_eq!(env.r#type, "stats");
        assert!(env.payload.is_null());
    }
}
