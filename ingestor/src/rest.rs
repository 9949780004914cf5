use crate::cache::RedisLiveCache;
use crate::model::{StoredReading, TelemetryResponse};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::error;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    cache: RedisLiveCache,
}

#[derive(Debug, Default, Deserialize)]
pub struct TelemetryQuery {
    device_id: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl TelemetryQuery {
    fn page(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }

    fn to_sql(&self) -> QueryBuilder<'_, Postgres> {
        let (limit, offset) = self.page();
        let mut query = QueryBuilder::new(
            r#"SELECT device_id, received_at, recorded_at, temperature, humidity, pressure,
                      co, co2, methane, lpg, pm25, pm10, noise, light
               FROM "DeviceData" WHERE TRUE"#,
        );

        if let Some(device_id) = &self.device_id {
            query.push(" AND device_id = ").push_bind(device_id);
        }
        if let Some(start) = self.start {
            query.push(" AND received_at >= ").push_bind(start);
        }
        if let Some(end) = self.end {
            query.push(" AND received_at <= ").push_bind(end);
        }

        query
            .push(" ORDER BY received_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        query
    }
}

pub fn create_router(pool: PgPool, cache: RedisLiveCache) -> Router {
    let state = AppState { pool, cache };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/telemetry", get(get_telemetry))
        .route("/api/v1/live/:device_id", get(get_live))
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn get_telemetry(
    State(state): State<AppState>,
    Query(params): Query<TelemetryQuery>,
) -> Result<Json<TelemetryResponse>, AppError> {
    let (limit, offset) = params.page();

    let data = params
        .to_sql()
        .build_query_as::<StoredReading>()
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(TelemetryResponse {
        total: data.len(),
        data,
        limit,
        offset,
    }))
}

/// Raw latest payload exactly as the device published it.
async fn get_live(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Response, AppError> {
    let latest = state
        .cache
        .latest(&device_id)
        .await
        .map_err(|e| AppError(anyhow::anyhow!("Live cache lookup failed: {}", e)))?;

    match latest {
        Some(raw) => Ok(([(header::CONTENT_TYPE, "application/json")], raw).into_response()),
        None => Ok((StatusCode::NOT_FOUND, "no live reading for device").into_response()),
    }
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
