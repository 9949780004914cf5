use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_messages_total",
        "Total messages received from MQTT"
    ))
    .expect("valid metric opts");
    pub static ref MALFORMED_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_malformed_messages_total",
        "Messages dropped because topic or payload could not be decoded"
    ))
    .expect("valid metric opts");
    pub static ref PERSISTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_persisted_total",
        "Readings written to durable storage"
    ))
    .expect("valid metric opts");
    pub static ref STORAGE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_storage_failures_total",
        "Readings that could not be persisted"
    ))
    .expect("valid metric opts");
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_db_failures_total",
        "Total database insert attempts that failed and were retried"
    ))
    .expect("valid metric opts");
    pub static ref CACHE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_cache_failures_total",
        "Live cache updates that failed"
    ))
    .expect("valid metric opts");
    pub static ref UNRESOLVED_DEVICES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_unresolved_devices_total",
        "Messages whose device name had no registry entry"
    ))
    .expect("valid metric opts");
    pub static ref TLS_DEGRADED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_tls_degraded_total",
        "Broker connections set up with unverified or disabled TLS"
    ))
    .expect("valid metric opts");
    pub static ref DISPATCH_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_dispatch_latency_seconds",
            "Time taken to persist and cache one message"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .expect("valid metric opts");
    pub static ref CONNECTION_STATE: Gauge = Gauge::with_opts(Opts::new(
        "ingestor_connection_state",
        "Broker link state: 0 disconnected, 1 connecting, 2 subscribed, 3 failed"
    ))
    .expect("valid metric opts");
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MALFORMED_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PERSISTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORAGE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CACHE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UNRESOLVED_DEVICES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TLS_DEGRADED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DISPATCH_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(CONNECTION_STATE.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# failed to encode metrics: {}\n", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
