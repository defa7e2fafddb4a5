use crate::error::{Result, SourceError};
use std::str::FromStr;

/// How raw record bytes become the strings carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Strict UTF-8. Invalid bytes fail the record as malformed.
    #[default]
    Utf8,
    /// Standard base64 rendering of the raw bytes. Never fails.
    Base64,
}

impl FromStr for Codec {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Codec::Utf8),
            "base64" => Ok(Codec::Base64),
            other => Err(SourceError::InvalidConfig(format!(
                "Unknown codec '{other}', expected 'utf8' or 'base64'"
            ))),
        }
    }
}

/// SASL/PLAIN credentials.
///
/// Applied as `security.protocol=SASL_PLAINTEXT` with the PLAIN mechanism;
/// anything beyond that goes through raw passthrough properties.
#[derive(Debug, Clone)]
pub struct SaslPlainLogin {
    pub username: String,
    pub password: String,
}

/// Configuration for a Kafka event source
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// Topics to consume from
    pub topics: Vec<String>,
    /// Consumer group ID
    pub group_id: String,
    /// Codec for record keys
    pub key_codec: Codec,
    /// Codec for record values
    pub value_codec: Codec,
    /// Maximum records pulled into the buffer per fill
    ///
    /// The larger the buffer, the fewer broker round trips, in exchange for
    /// more memory and more duplicates redelivered after a failure.
    pub max_fetch_records: usize,
    /// Commit decoded offsets automatically at buffer exhaustion and close
    ///
    /// When false the caller owns progress and must mark events processed
    /// explicitly.
    pub auto_commit: bool,
    /// Log current lag once per this many decoded events, if set
    pub lag_report_interval: Option<u64>,
    /// SASL/PLAIN login, if the broker requires one
    pub sasl: Option<SaslPlainLogin>,
    /// Raw client properties, applied after everything the source sets
    ///
    /// These win over generated configuration, so they can override
    /// anything except the offset handling the commit protocol relies on.
    pub properties: Vec<(String, String)>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topics: Vec::new(),
            group_id: "logtap".to_string(),
            key_codec: Codec::Utf8,
            value_codec: Codec::Utf8,
            max_fetch_records: 500,
            auto_commit: true,
            lag_report_interval: None,
            sasl: None,
            properties: Vec::new(),
        }
    }
}

impl SourceOptions {
    /// Check every constraint that can be checked without touching the
    /// network. Called before any client is created.
    pub fn validate(&self) -> Result<()> {
        if self.brokers.trim().is_empty() {
            return Err(SourceError::InvalidConfig(
                "Broker address(es) must not be blank".to_string(),
            ));
        }
        if self.topics.is_empty() {
            return Err(SourceError::InvalidConfig(
                "At least one topic is required".to_string(),
            ));
        }
        if let Some(topic) = self.topics.iter().find(|t| t.trim().is_empty()) {
            return Err(SourceError::InvalidConfig(format!(
                "Topic name must not be blank (got {topic:?})"
            )));
        }
        if self.group_id.trim().is_empty() {
            return Err(SourceError::InvalidConfig(
                "Consumer group id must not be blank".to_string(),
            ));
        }
        if self.max_fetch_records < 1 {
            return Err(SourceError::InvalidConfig(format!(
                "max_fetch_records must be at least 1, got {}",
                self.max_fetch_records
            )));
        }
        Ok(())
    }
}
