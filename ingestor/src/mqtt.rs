use crate::decode::TOPIC_FILTER;
use crate::dispatch::Dispatcher;
use crate::errors::{Error, Result};
use crate::metrics::{CONNECTION_STATE, TLS_DEGRADED_TOTAL};
use crate::tls::{transport_for, TlsSettings};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeReasonCode,
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub tls: TlsSettings,
    pub keep_alive: Duration,
}

/// Lifecycle of the broker link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    DisconnectedOnError,
}

/// What the event loop observed, reduced to what moves the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Dialing,
    Accepted,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn on(self, event: LinkEvent) -> ConnectionState {
        use ConnectionState::*;
        match (self, event) {
            (Disconnected | DisconnectedOnError, LinkEvent::Dialing) => Connecting,
            (Connecting | Subscribed, LinkEvent::Accepted) => Subscribed,
            (_, LinkEvent::Closed) => Disconnected,
            (_, LinkEvent::Failed) => DisconnectedOnError,
            (state, _) => state,
        }
    }

    fn gauge_value(self) -> f64 {
        match self {
            ConnectionState::Disconnected => 0.0,
            ConnectionState::Connecting => 1.0,
            ConnectionState::Subscribed => 2.0,
            ConnectionState::DisconnectedOnError => 3.0,
        }
    }
}

/// Builds client options: credentials when configured, and the transport
/// picked from the TLS settings. A TLS setup failure downgrades to plain TCP
/// with an error log instead of aborting startup.
pub fn mqtt_options(config: &BrokerConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(true);

    if let Some(credentials) = &config.credentials {
        options.set_credentials(&credentials.username, &credentials.password);
    }

    match transport_for(&config.tls.mode()) {
        Ok(transport) => {
            options.set_transport(transport);
        }
        Err(e) => {
            TLS_DEGRADED_TOTAL.inc();
            error!("Failed to configure TLS ({}), continuing without TLS", e);
        }
    }

    options
}

/// Owns the single broker connection and drives the receive loop.
pub struct Supervisor {
    client: AsyncClient,
    eventloop: EventLoop,
    state: ConnectionState,
    reached_subscribed: bool,
}

impl Supervisor {
    pub fn new(config: &BrokerConfig) -> Self {
        info!(
            "Connecting to MQTT broker at {}:{} as {}",
            config.host, config.port, config.client_id
        );
        let (client, eventloop) =
            AsyncClient::new(mqtt_options(config), REQUEST_CHANNEL_CAPACITY);

        Self {
            client,
            eventloop,
            state: ConnectionState::Disconnected,
            reached_subscribed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether this connection was ever fully subscribed.
    pub fn reached_subscribed(&self) -> bool {
        self.reached_subscribed
    }

    fn transition(&mut self, event: LinkEvent) {
        let next = self.state.on(event);
        if next != self.state {
            debug!("MQTT link {:?} -> {:?}", self.state, next);
            self.state = next;
            CONNECTION_STATE.set(next.gauge_value());
        }
        if next == ConnectionState::Subscribed {
            self.reached_subscribed = true;
        }
    }

    /// Runs until the link closes. Each publish is dispatched to completion
    /// before the next event is polled.
    ///
    /// Returns `Ok` on a clean disconnect and an error when the connection
    /// fails or the broker refuses it. Nothing is retried here.
    pub async fn run(&mut self, dispatcher: &Dispatcher) -> Result<()> {
        self.transition(LinkEvent::Dialing);

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("Connected to MQTT broker (session present: {})", ack.session_present);
                    // Queued on the request channel; sent on the next poll.
                    self.client
                        .try_subscribe(TOPIC_FILTER, QoS::AtLeastOnce)
                        .map_err(Error::Mqtt)?;
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        warn!("Broker rejected subscription to {}", TOPIC_FILTER);
                    } else {
                        info!("Subscribed to {} with QoS 1", TOPIC_FILTER);
                        self.transition(LinkEvent::Accepted);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    dispatcher.handle(&publish.topic, &publish.payload).await;
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    info!("Broker closed the connection");
                    self.transition(LinkEvent::Closed);
                    return Ok(());
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("Disconnecting from MQTT broker");
                    self.transition(LinkEvent::Closed);
                    return Ok(());
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) => {
                    error!(
                        "Failed to connect, broker return code {:?} ({})",
                        code,
                        refusal_reason(&code)
                    );
                    self.transition(LinkEvent::Failed);
                    return Err(Error::ConnectionRefused(code));
                }
                Err(e) => {
                    error!("MQTT connection error: {}", e);
                    self.transition(LinkEvent::Failed);
                    return Err(Error::Connection(e));
                }
            }
        }
    }
}

/// Human-readable reason for a refused connection.
pub fn refusal_reason(code: &ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "accepted",
        ConnectReturnCode::RefusedProtocolVersion => "unsupported protocol version",
        ConnectReturnCode::BadClientId => "client identifier rejected",
        ConnectReturnCode::ServiceUnavailable => "broker unavailable",
        ConnectReturnCode::BadUserNamePassword => "bad username or password",
        ConnectReturnCode::NotAuthorized => "not authorized",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::Transport;

    fn config() -> BrokerConfig {
        BrokerConfig {
            host: "broker.local".to_string(),
            port: 1883,
            client_id: "ingestor-test".to_string(),
            credentials: None,
            tls: TlsSettings::default(),
            keep_alive: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_state_machine_happy_path() {
        let state = ConnectionState::Disconnected;
        let state = state.on(LinkEvent::Dialing);
        assert_eq!(state, ConnectionState::Connecting);
        let state = state.on(LinkEvent::Accepted);
        assert_eq!(state, ConnectionState::Subscribed);
        let state = state.on(LinkEvent::Closed);
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_machine_failure() {
        assert_eq!(
            ConnectionState::Connecting.on(LinkEvent::Failed),
            ConnectionState::DisconnectedOnError
        );
        assert_eq!(
            ConnectionState::Subscribed.on(LinkEvent::Failed),
            ConnectionState::DisconnectedOnError
        );
        assert_eq!(
            ConnectionState::DisconnectedOnError.on(LinkEvent::Dialing),
            ConnectionState::Connecting
        );
    }

    #[test]
    fn test_state_machine_ignores_out_of_order_events() {
        assert_eq!(
            ConnectionState::Disconnected.on(LinkEvent::Accepted),
            ConnectionState::Disconnected
        );
        assert_eq!(
            ConnectionState::Subscribed.on(LinkEvent::Dialing),
            ConnectionState::Subscribed
        );
    }

    #[test]
    fn test_anonymous_plain_options() {
        let options = mqtt_options(&config());
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1883));
        assert_eq!(options.client_id(), "ingestor-test");
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(options.credentials().is_none());
        assert!(matches!(options.transport(), Transport::Tcp));
    }

    #[test]
    fn test_credentials_applied() {
        let mut config = config();
        config.credentials = Some(Credentials {
            username: "sensor".to_string(),
            password: "secret".to_string(),
        });

        let options = mqtt_options(&config);
        assert_eq!(
            options.credentials(),
            Some(("sensor".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_insecure_opt_in_uses_tls() {
        let mut config = config();
        config.port = 8883;
        config.tls = TlsSettings {
            enabled: true,
            ca_cert_path: None,
            insecure_skip_verify: true,
        };

        let options = mqtt_options(&config);
        assert!(matches!(options.transport(), Transport::Tls(_)));
    }

    #[test]
    fn test_refusal_reason() {
        assert_eq!(
            refusal_reason(&ConnectReturnCode::BadUserNamePassword),
            "bad username or password"
        );
        assert_eq!(refusal_reason(&ConnectReturnCode::NotAuthorized), "not authorized");
    }
}
