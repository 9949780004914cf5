use crate::dispatch::Dispatcher;
use crate::errors::Result;
use crate::mqtt::{BrokerConfig, Supervisor};
use std::time::Duration;
use tracing::{info, warn};

/// Reconnection policy wrapped around the supervisor.
///
/// `max_attempts == 0` disables reconnection: the first connection error
/// ends ingestion and is left to the process supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before reconnect `attempt` (1-based): doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Runs the supervisor, reconnecting after connection errors per `policy`.
/// A connection that reached the subscribed state resets the attempt count.
pub async fn supervise(
    config: &BrokerConfig,
    policy: &RetryPolicy,
    dispatcher: &Dispatcher,
) -> Result<()> {
    let mut attempt = 0;

    loop {
        let mut supervisor = Supervisor::new(config);
        let outcome = supervisor.run(dispatcher).await;

        let error = match outcome {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_connection() => return Err(e),
            Err(e) => e,
        };

        if supervisor.reached_subscribed() {
            attempt = 0;
        }
        if attempt >= policy.max_attempts {
            return Err(error);
        }

        attempt += 1;
        let wait = policy.backoff(attempt);
        warn!(
            "Broker link {:?} ({}); reconnect {}/{} in {:?}",
            supervisor.state(),
            error,
            attempt,
            policy.max_attempts,
            wait
        );
        tokio::time::sleep(wait).await;
        info!("Reconnecting to MQTT broker");
    }
}
