//! Response models for the control-plane API
//!
//! Deserialization is lenient: every field the core might omit defaults, so a
//! newer or older core version never turns a status poll into a parse error.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// `GET /version`
#[derive(Debug, Clone, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    #[serde(default)]
    pub meta: bool,
}

/// `GET /connections`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsResponse {
    #[serde(default)]
    pub download_total: u64,
    #[serde(default)]
    pub upload_total: u64,
    #[serde(default)]
    pub connections: Option<Vec<ConnectionData>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionData {
    pub id: String,
    #[serde(default)]
    pub metadata: ConnectionMetadata,
    #[serde(default)]
    pub upload: u64,
    #[serde(default)]
    pub download: u64,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub rule: String,
    #[serde(default)]
    pub rule_payload: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetadata {
    #[serde(default)]
    pub network: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default, rename = "sourceIP")]
    pub source_ip: String,
    #[serde(default, rename = "destinationIP")]
    pub destination_ip: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub source_port: String,
    #[serde(default)]
    pub destination_port: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_response_ignores_unknown_fields() {
        let parsed: VersionResponse =
            serde_json::from_str(r#"{"version":"v1.18.1","meta":true,"premium":false}"#).unwrap();
        assert_eq!(parsed.version, "v1.18.1");
        assert!(parsed.meta);
    }

    #[test]
    fn connections_response_tolerates_missing_fields() {
        let parsed: ConnectionsResponse = serde_json::from_str(
            r#"{"downloadTotal":10,"uploadTotal":3,"connections":[{"id":"abc","metadata":{"host":"example.com","type":"HTTP"}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.download_total, 10);
        let connections = parsed.connections.unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].id, "abc");
        assert_eq!(connections[0].metadata.host, "example.com");
        assert_eq!(connections[0].metadata.kind, "HTTP");
        assert!(connections[0].start.is_none());
    }

    #[test]
    fn connections_response_default_is_empty() {
        let parsed: ConnectionsResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.download_total, 0);
        assert!(parsed.connections.is_none());
    }
}
