use crate::config::MqttConfig;
use crate::ingest::IngestHandle;
use crate::record::Record;
use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS, TlsConfiguration, Transport};
use tokio::time::{sleep, Duration};

fn mqtt_options(config: &MqttConfig, ca: Vec<u8>) -> MqttOptions {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(config.keepalive);
    options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth: None,
    }));
    if let Some(username) = &config.username {
        options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
    }
    options
}

/// Subscribes to the configured topic over TLS and feeds every publish to the
/// engine. Reconnects forever; only an unreadable CA file is fatal.
pub async fn run_listener(config: MqttConfig, ingest: IngestHandle) -> Result<()> {
    let ca = tokio::fs::read(&config.ca_file)
        .await
        .with_context(|| format!("failed to read MQTT CA file {}", config.ca_file.display()))?;

    loop {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(&config, ca.clone()), 32);

        if let Err(err) = client.subscribe(config.topic.clone(), QoS::AtLeastOnce).await {
            tracing::warn!(error=%err, "failed to subscribe to MQTT; retrying");
            sleep(Duration::from_secs(2)).await;
            continue;
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    tracing::info!(host=%config.host, topic=%config.topic, "connected to MQTT broker");
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    handle_payload(&ingest, &publish.topic, &publish.payload).await;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error=%err, "MQTT connection dropped; reconnecting");
                    break;
                }
            }
        }

        sleep(Duration::from_secs(1)).await;
    }
}

async fn handle_payload(ingest: &IngestHandle, topic: &str, payload: &[u8]) {
    let record = match Record::from_json_slice(payload) {
        Ok(record) => record,
        Err(err) => {
            tracing::warn!(error=%err, topic, "failed to decode MQTT payload");
            return;
        }
    };
    match ingest.ingest(record).await {
        Ok(_) => {}
        Err(err) if err.is_record_rejection() => {
            tracing::warn!(error=%err, topic, "dropping MQTT message");
        }
        Err(err) => {
            tracing::error!(error=%err, topic, "failed to ingest MQTT message");
        }
    }
}
