use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Payload published on `envqmon/<device_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub co: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub co2: Option<f64>,
    pub methane: f64,
    pub lpg: f64,
    pub pm25: f64,
    pub pm10: f64,
    pub noise: f64,
    pub light: f64,
    pub recorded_at: i64,
}

fn reading(rng: &mut impl Rng, low: f64, high: f64) -> f64 {
    (rng.gen_range(low..high) * 100.0).round() / 100.0
}

pub fn generate(rng: &mut impl Rng, with_co2: bool) -> Telemetry {
    Telemetry {
        temperature: reading(rng, 20.0, 35.0),
        humidity: reading(rng, 30.0, 70.0),
        pressure: reading(rng, 950.0, 1050.0),
        co: reading(rng, 0.0, 5.0),
        co2: with_co2.then(|| reading(rng, 400.0, 2000.0)),
        methane: reading(rng, 0.0, 1000.0),
        lpg: reading(rng, 0.0, 1000.0),
        pm25: reading(rng, 0.0, 500.0),
        pm10: reading(rng, 0.0, 500.0),
        noise: reading(rng, 30.0, 90.0),
        light: reading(rng, 100.0, 1000.0),
        recorded_at: Utc::now().timestamp(),
    }
}
