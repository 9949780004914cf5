use crate::errors::{Error, Result};
use crate::metrics::DB_FAILURES_TOTAL;
use crate::model::TelemetryRecord;
use crate::sinks::{DeviceResolver, TelemetryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info, warn};

pub async fn make_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = connect(database_url, max_connections).await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Pool for the device registry. The registry schema belongs to another
/// service, so no migrations run against it.
pub async fn make_registry_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to device registry...");
    let pool = connect(database_url, max_connections).await?;
    info!("Device registry connection established");
    Ok(pool)
}

async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Postgres-backed persistence sink writing to `"DeviceData"`.
#[derive(Debug, Clone)]
pub struct PgTelemetryStore {
    pool: PgPool,
    max_attempts: u32,
}

impl PgTelemetryStore {
    pub fn new(pool: PgPool, max_attempts: u32) -> Self {
        Self {
            pool,
            max_attempts: max_attempts.max(1),
        }
    }

    async fn insert_once(&self, device_id: &str, record: &TelemetryRecord) -> Result<()> {
        let query = r#"
            INSERT INTO "DeviceData" (
                device_id, temperature, humidity, pressure,
                co, co2, methane, lpg, pm25, pm10, noise, light, recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#;

        sqlx::query(query)
            .bind(device_id)
            .bind(record.temperature)
            .bind(record.humidity)
            .bind(record.pressure)
            .bind(record.co)
            .bind(record.co2)
            .bind(record.methane)
            .bind(record.lpg)
            .bind(record.pm25)
            .bind(record.pm10)
            .bind(record.noise)
            .bind(record.light)
            .bind(recorded_at(device_id, record))
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn insert(&self, device_id: &str, record: &TelemetryRecord) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.insert_once(device_id, record).await {
                Ok(()) => return Ok(()),
                Err(Error::Storage(db_err)) => {
                    if attempts >= self.max_attempts || !is_transient_error(&db_err) {
                        error!(
                            device_id,
                            "Database insert failed after {} attempt(s): {}", attempts, db_err
                        );
                        return Err(Error::Storage(db_err));
                    }

                    let wait_ms = retry_delay_ms(attempts);
                    warn!(
                        device_id,
                        "Database insert failed (attempt {}/{}), retrying in {}ms: {}",
                        attempts,
                        self.max_attempts,
                        wait_ms,
                        db_err
                    );
                    DB_FAILURES_TOTAL.inc();
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Looks devices up by name in the registry's `devices` table.
#[derive(Debug, Clone)]
pub struct PgDeviceResolver {
    pool: PgPool,
}

impl PgDeviceResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceResolver for PgDeviceResolver {
    async fn resolve(&self, device_name: &str) -> Result<Option<String>> {
        let device_id = sqlx::query_scalar::<_, String>(
            r#"SELECT device_id::text FROM "devices" WHERE device_name = $1"#,
        )
        .bind(device_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device_id)
    }
}

/// Publisher timestamp for the row. Values chrono cannot represent are
/// stored as NULL.
fn recorded_at(device_id: &str, record: &TelemetryRecord) -> Option<DateTime<Utc>> {
    let converted = record.recorded_at_utc();
    if let (Some(secs), None) = (record.recorded_at, converted) {
        warn!(device_id, recorded_at = secs, "recorded_at out of range, storing NULL");
    }
    converted
}

/// Backoff before the next insert attempt, doubling up to 3.2s.
fn retry_delay_ms(attempts: u32) -> u64 {
    100 * 2_u64.saturating_pow(attempts.saturating_sub(1)).min(32)
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            // Connection-class SQLSTATEs
            db_err.code().is_some_and(|code| {
                code == "08000" || // connection_exception
                code == "08003" || // connection_does_not_exist
                code == "08006" || // connection_failure
                code == "57P03" || // cannot_connect_now
                code == "53300" // too_many_connections
            })
        }
        _ => false,
    }
}
