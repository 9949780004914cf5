use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("MQTT broker refused connection: {0:?}")]
    ConnectionRefused(rumqttc::ConnectReturnCode),

    #[error("Malformed topic '{topic}': {reason}")]
    MalformedTopic { topic: String, reason: &'static str },

    #[error("Malformed payload on '{topic}': {source}")]
    MalformedPayload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("TLS configuration error: {0}")]
    TlsConfiguration(String),
}

impl Error {
    /// Errors that end the receive loop because the broker link is gone.
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::ConnectionRefused(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
