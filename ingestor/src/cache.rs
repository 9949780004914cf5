use crate::errors::{Error, Result};
use crate::sinks::LiveCache;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;
use url::Url;

const LIVE_KEY_PREFIX: &str = "live_";

/// Cache key holding the latest raw payload for a device.
pub fn live_key(device_id: &str) -> String {
    format!("{}{}", LIVE_KEY_PREFIX, device_id)
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RedisSettings {
    /// Builds a `redis://` URL; credentials are percent-encoded by `url`.
    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("redis://{}:{}/{}", self.host, self.port, self.db))
            .map_err(|e| invalid_settings(format!("invalid redis address: {}", e)))?;

        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            url.set_username(username)
                .map_err(|_| invalid_settings("cannot set redis username".to_string()))?;
        }
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|_| invalid_settings("cannot set redis password".to_string()))?;
        }

        Ok(url)
    }
}

fn invalid_settings(detail: String) -> Error {
    Error::Cache(redis::RedisError::from((
        redis::ErrorKind::InvalidClientConfig,
        "invalid redis settings",
        detail,
    )))
}

/// Live cache backed by Redis `SET` without expiry.
#[derive(Clone)]
pub struct RedisLiveCache {
    conn: ConnectionManager,
}

impl RedisLiveCache {
    pub async fn connect(settings: &RedisSettings) -> Result<Self> {
        info!(
            "Connecting to Redis at {}:{} (db {})",
            settings.host, settings.port, settings.db
        );
        let client = redis::Client::open(settings.url()?.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        info!("Redis connection established");
        Ok(Self { conn })
    }

    /// Latest raw payload for a device, if one was ever cached.
    pub async fn latest(&self, device_id: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(live_key(device_id)).await?;
        Ok(value)
    }
}

#[async_trait]
impl LiveCache for RedisLiveCache {
    async fn set(&self, key: &str, raw: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, raw).await?;
        Ok(())
    }
}
