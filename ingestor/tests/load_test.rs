use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(Debug, Clone, Serialize)]
struct Reading {
    temperature: f64,
    humidity: f64,
    pressure: f64,
    co: f64,
    methane: f64,
    lpg: f64,
    pm25: f64,
    pm10: f64,
    noise: f64,
    light: f64,
    recorded_at: i64,
}

impl Reading {
    fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Self {
            temperature: rng.gen_range(20.0..35.0),
            humidity: rng.gen_range(30.0..70.0),
            pressure: rng.gen_range(950.0..1050.0),
            co: rng.gen_range(0.0..5.0),
            methane: rng.gen_range(0.0..1000.0),
            lpg: rng.gen_range(0.0..1000.0),
            pm25: rng.gen_range(0.0..500.0),
            pm10: rng.gen_range(0.0..500.0),
            noise: rng.gen_range(30.0..90.0),
            light: rng.gen_range(100.0..1000.0),
            recorded_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Publishes a steady stream of readings plus a share of malformed messages
/// against a broker on localhost. The ingestor must keep running throughout;
/// check `ingestor_malformed_messages_total` and `ingestor_persisted_total`
/// on `/metrics` afterwards.
#[tokio::test]
#[ignore]
async fn test_sustained_ingest_with_malformed_traffic() {
    println!("\nStarting load test: 200 msg/s for 10 seconds");

    let test_duration_secs = 10;
    let target_rate = 200;
    let total_messages = test_duration_secs * target_rate;

    let mut mqtt_options = MqttOptions::new("envqmon-load-test", "localhost", 1883);
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                eprintln!("MQTT error: {}", e);
                break;
            }
        }
    });

    sleep(Duration::from_millis(500)).await;

    let start = Instant::now();
    let mut sent_count = 0;
    let mut malformed_count = 0;
    let mut error_count = 0;

    let burst_size = 20;
    let delay_per_burst = Duration::from_micros((burst_size * 1_000_000) / target_rate as u64);

    for batch_start in (0..total_messages).step_by(burst_size as usize) {
        for i in batch_start..std::cmp::min(batch_start + burst_size as usize, total_messages) {
            let device_id = format!("load-test-dev-{}", i % 10);

            // Every 50th message is garbage and must be dropped, not crash the loop.
            let payload = if i % 50 == 49 {
                malformed_count += 1;
                b"not json".to_vec()
            } else {
                serde_json::to_vec(&Reading::random()).unwrap()
            };

            match client
                .publish(
                    format!("envqmon/{}", device_id),
                    QoS::AtLeastOnce,
                    false,
                    payload,
                )
                .await
            {
                Ok(_) => sent_count += 1,
                Err(e) => {
                    error_count += 1;
                    if error_count < 10 {
                        eprintln!("Send error: {}", e);
                    }
                }
            }
        }

        sleep(delay_per_burst).await;
    }

    let duration = start.elapsed();

    println!("  Total Sent:     {}", sent_count);
    println!("  Malformed:      {}", malformed_count);
    println!("  Errors:         {}", error_count);
    println!("  Duration:       {:.2}s", duration.as_secs_f64());
    println!(
        "  Actual Rate:    {:.2} msg/s",
        sent_count as f64 / duration.as_secs_f64()
    );

    assert_eq!(error_count, 0, "publish errors: {}", error_count);
    assert_eq!(sent_count, total_messages);
}
