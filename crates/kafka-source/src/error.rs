use crate::broker::BrokerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Event source is closed")]
    Closed,

    #[error("Invalid offset for {topic}[{partition}]: {detail}")]
    InvalidOffset {
        topic: String,
        partition: i32,
        detail: String,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Malformed record at {topic}[{partition}]@{offset}: {detail}")]
    MalformedRecord {
        topic: String,
        partition: i32,
        offset: i64,
        detail: String,
    },

    #[error("No partitions assigned: {0}")]
    NoPartitionsAssigned(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Broker error: {0}")]
    Broker(String),
}

impl SourceError {
    /// Lift a broker client error into the source taxonomy.
    ///
    /// `Interrupted` is recoverable and normally handled before reaching
    /// this; mapping it anyway keeps the conversion total.
    pub(crate) fn from_broker(e: BrokerError) -> Self {
        match e {
            BrokerError::Interrupted => SourceError::Broker("fetch interrupted".to_string()),
            BrokerError::InvalidOffset {
                topic,
                partition,
                detail,
            } => SourceError::InvalidOffset {
                topic,
                partition,
                detail,
            },
            BrokerError::Authentication(detail) => SourceError::Authentication(detail),
            BrokerError::Authorization(detail) => SourceError::Authorization(detail),
            BrokerError::NoPartitionsAssigned(detail) => {
                SourceError::NoPartitionsAssigned(detail)
            }
            BrokerError::InvalidTopic(detail) => SourceError::InvalidTopic(detail),
            BrokerError::Timeout(detail) => {
                SourceError::Broker(format!("operation timed out: {detail}"))
            }
            BrokerError::Other(detail) => SourceError::Broker(detail),
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
