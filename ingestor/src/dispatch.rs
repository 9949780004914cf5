use crate::cache::live_key;
use crate::decode::{decode_payload, device_id_from_topic, payload_preview};
use crate::errors::Result;
use crate::metrics::{
    CACHE_FAILURES_TOTAL, DISPATCH_LATENCY_SECONDS, MALFORMED_MESSAGES_TOTAL, MESSAGES_TOTAL,
    PERSISTED_TOTAL, STORAGE_FAILURES_TOTAL, UNRESOLVED_DEVICES_TOTAL,
};
use crate::sinks::{DeviceResolver, LiveCache, TelemetryStore};
use clap::ValueEnum;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// What to do with a reading whose device name has no registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum UnresolvedPolicy {
    /// Do not persist; the live cache is still updated.
    #[default]
    Skip,
    /// Persist under the raw topic identifier.
    Passthrough,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Persistence {
    Stored,
    Skipped,
}

/// Per-sink outcome of one message. The two writes are independent: a
/// failed insert never prevents the cache update and vice versa.
#[derive(Debug)]
pub struct Dispatched {
    pub device_id: String,
    pub storage: Result<Persistence>,
    pub cache: Result<()>,
}

impl Dispatched {
    pub fn is_clean(&self) -> bool {
        matches!(self.storage, Ok(Persistence::Stored)) && self.cache.is_ok()
    }
}

/// Routes one broker message to durable storage and the live cache.
pub struct Dispatcher {
    store: Arc<dyn TelemetryStore>,
    cache: Arc<dyn LiveCache>,
    resolver: Option<Arc<dyn DeviceResolver>>,
    on_unresolved: UnresolvedPolicy,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn TelemetryStore>, cache: Arc<dyn LiveCache>) -> Self {
        Self {
            store,
            cache,
            resolver: None,
            on_unresolved: UnresolvedPolicy::default(),
        }
    }

    pub fn with_resolver(
        mut self,
        resolver: Arc<dyn DeviceResolver>,
        on_unresolved: UnresolvedPolicy,
    ) -> Self {
        self.resolver = Some(resolver);
        self.on_unresolved = on_unresolved;
        self
    }

    /// Decodes and fans out one message.
    ///
    /// Returns `Err` only for malformed topics or payloads, in which case no
    /// sink has been called. Sink failures are carried in the report.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> Result<Dispatched> {
        let device_id = device_id_from_topic(topic)?;
        let record = decode_payload(topic, payload)?;

        let storage = match self.storage_id(device_id).await {
            Ok(Some(storage_id)) => self
                .store
                .insert(&storage_id, &record)
                .await
                .map(|()| Persistence::Stored),
            Ok(None) => Ok(Persistence::Skipped),
            Err(e) => Err(e),
        };

        let cache = self.cache.set(&live_key(device_id), payload).await;

        Ok(Dispatched {
            device_id: device_id.to_string(),
            storage,
            cache,
        })
    }

    /// Identifier to persist under, or `None` when the reading is skipped.
    async fn storage_id(&self, device_id: &str) -> Result<Option<String>> {
        let Some(resolver) = &self.resolver else {
            return Ok(Some(device_id.to_string()));
        };

        match resolver.resolve(device_id).await? {
            Some(resolved) => Ok(Some(resolved)),
            None => {
                UNRESOLVED_DEVICES_TOTAL.inc();
                match self.on_unresolved {
                    UnresolvedPolicy::Skip => {
                        warn!(device_id, "Unknown device name, reading not persisted");
                        Ok(None)
                    }
                    UnresolvedPolicy::Passthrough => {
                        warn!(device_id, "Unknown device name, persisting under raw id");
                        Ok(Some(device_id.to_string()))
                    }
                }
            }
        }
    }

    /// Entry point for the receive loop. Never fails: every problem is
    /// logged with the topic and a payload preview, and the loop moves on.
    pub async fn handle(&self, topic: &str, payload: &[u8]) {
        MESSAGES_TOTAL.inc();
        debug!(topic, size = payload.len(), "Received message");
        let start = Instant::now();

        match self.dispatch(topic, payload).await {
            Ok(report) => {
                DISPATCH_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
                record_outcome(topic, payload, &report);
            }
            Err(e) => {
                MALFORMED_MESSAGES_TOTAL.inc();
                warn!(topic, payload = %payload_preview(payload), "Dropping message: {}", e);
            }
        }
    }
}

fn record_outcome(topic: &str, payload: &[u8], report: &Dispatched) {
    if report.is_clean() {
        debug!(topic, device_id = %report.device_id, "Reading persisted and cached");
    }

    match &report.storage {
        Ok(Persistence::Stored) => PERSISTED_TOTAL.inc(),
        Ok(Persistence::Skipped) => {}
        Err(e) => {
            STORAGE_FAILURES_TOTAL.inc();
            error!(
                topic,
                device_id = %report.device_id,
                payload = %payload_preview(payload),
                "Failed to persist reading: {}",
                e
            );
        }
    }

    if let Err(e) = &report.cache {
        CACHE_FAILURES_TOTAL.inc();
        error!(
            topic,
            device_id = %report.device_id,
            "Failed to update live cache: {}",
            e
        );
    }
}
