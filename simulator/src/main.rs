mod telemetry;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use rumqttc::{AsyncClient, MqttOptions, QoS, TlsConfiguration, Transport};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Publishes synthetic environmental telemetry to `envqmon/<device_id>`.
#[derive(Debug, Parser)]
#[command(name = "simulator", version, about)]
struct Args {
    #[arg(long, env = "DEVICE_ID", default_value = "testdevice123")]
    device_id: String,

    /// Number of simulated devices; more than one appends `-<n>` to the id.
    #[arg(long, env = "DEVICES", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    devices: u32,

    #[arg(long, env = "INTERVAL_MS", default_value_t = 5000, value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: u64,

    /// Include the `co2` field in every payload.
    #[arg(long, env = "WITH_CO2", default_value = "false", action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    with_co2: bool,

    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    mqtt_broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,

    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    mqtt_password: Option<String>,

    #[arg(long, env = "MQTT_USE_TLS", default_value = "false", action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    mqtt_use_tls: bool,

    #[arg(long, env = "MQTT_CA_CERT_PATH")]
    mqtt_ca_cert_path: Option<PathBuf>,
}

impl Args {
    fn device_ids(&self) -> Vec<String> {
        if self.devices == 1 {
            return vec![self.device_id.clone()];
        }
        (0..self.devices)
            .map(|n| format!("{}-{}", self.device_id, n))
            .collect()
    }

    fn mqtt_options(&self) -> std::io::Result<MqttOptions> {
        let client_id = format!("sim_{}", self.device_id);
        let mut options = MqttOptions::new(client_id, &self.mqtt_broker, self.mqtt_port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_session(true);

        if let (Some(username), Some(password)) = (&self.mqtt_username, &self.mqtt_password) {
            if !username.is_empty() && !password.is_empty() {
                options.set_credentials(username, password);
            }
        }

        if self.mqtt_use_tls {
            match &self.mqtt_ca_cert_path {
                Some(path) => {
                    let ca = std::fs::read(path)?;
                    options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                        ca,
                        alpn: None,
                        client_auth: None,
                    }));
                    info!("TLS enabled with CA cert: {}", path.display());
                }
                None => warn!("MQTT_USE_TLS set without MQTT_CA_CERT_PATH, publishing without TLS"),
            }
        }

        Ok(options)
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let device_ids = args.device_ids();
    let interval = Duration::from_millis(args.interval_ms);

    info!("Starting envqmon simulator");
    info!(
        "Broker: {}:{}, Devices: {}, Interval: {:?}",
        args.mqtt_broker,
        args.mqtt_port,
        device_ids.len(),
        interval
    );

    let mqtt_options = match args.mqtt_options() {
        Ok(options) => options,
        Err(e) => {
            error!("Failed to configure MQTT client: {}", e);
            std::process::exit(1);
        }
    };

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    // Spawn eventloop handler
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let publisher = async {
        let mut ticker = tokio::time::interval(interval);
        let mut published = 0u64;

        loop {
            ticker.tick().await;

            for device_id in &device_ids {
                let telemetry = telemetry::generate(&mut rand::thread_rng(), args.with_co2);
                let topic = format!("envqmon/{}", device_id);
                let payload = match serde_json::to_string(&telemetry) {
                    Ok(p) => p,
                    Err(e) => {
                        error!("Failed to serialize telemetry: {}", e);
                        continue;
                    }
                };

                match client
                    .publish(&topic, QoS::AtLeastOnce, false, payload.clone())
                    .await
                {
                    Ok(()) => {
                        published += 1;
                        info!(topic = %topic, "Published {}", payload);
                    }
                    Err(e) => warn!(topic = %topic, "Failed to publish: {}", e),
                }
            }

            if published > 0 && published % 1000 == 0 {
                info!("Published {} messages", published);
            }
        }
    };

    tokio::select! {
        _ = publisher => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Simulation stopped");
        }
    }

    if let Err(e) = client.disconnect().await {
        warn!("Failed to disconnect cleanly: {}", e);
    }
}
