use crate::handoff::HandoffPolicy;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_MQTTS_PORT: u16 = 8883;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    ObjectStore {
        bucket: String,
        key: String,
        region: String,
        endpoint: Option<String>,
    },
    TableStore {
        table: String,
        region: String,
        endpoint: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub ca_file: PathBuf,
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keepalive: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpPollConfig {
    pub url: Url,
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Mqtts(MqttConfig),
    HttpPoll(HttpPollConfig),
    /// Records arrive only through `POST /iot-data`.
    HttpPush,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub local_file_path: PathBuf,
    pub sink: SinkTarget,
    pub transport: TransportConfig,
    pub http_bind: String,
    pub handoff: HandoffPolicy,
    pub shutdown_grace: Duration,
    pub finalize_on_shutdown: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let local_file_path = PathBuf::from(env_string(
            "ARCHIVER_LOCAL_FILE_PATH",
            Some("/var/lib/telemetry-archiver/messages.log".to_string()),
        )?);
        if local_file_path.file_name().is_none() {
            bail!("ARCHIVER_LOCAL_FILE_PATH must name a file");
        }

        let sink = sink_from_env()?;
        let transport = transport_from_env()?;

        let http_bind = env_string("ARCHIVER_HTTP_BIND", Some("127.0.0.1:9102".to_string()))?;

        let handoff = HandoffPolicy {
            max_attempts: attempts_from(env_u64("ARCHIVER_UPLOAD_MAX_ATTEMPTS", Some(5))?)?,
            initial_backoff: Duration::from_millis(env_u64("ARCHIVER_UPLOAD_BACKOFF_MS", Some(500))?),
            max_backoff: Duration::from_millis(env_u64(
                "ARCHIVER_UPLOAD_MAX_BACKOFF_MS",
                Some(30_000),
            )?),
        };

        let shutdown_grace =
            Duration::from_secs(env_u64("ARCHIVER_SHUTDOWN_GRACE_SECONDS", Some(30))?);
        let finalize_on_shutdown = env_bool("ARCHIVER_FINALIZE_ON_SHUTDOWN", false)?;

        Ok(Self {
            local_file_path,
            sink,
            transport,
            http_bind,
            handoff,
            shutdown_grace,
            finalize_on_shutdown,
        })
    }
}

fn sink_from_env() -> Result<SinkTarget> {
    let kind = env_string("ARCHIVER_SINK", Some("s3".to_string()))?;
    match kind.to_ascii_lowercase().as_str() {
        "s3" | "object-store" => Ok(SinkTarget::ObjectStore {
            bucket: env_string("ARCHIVER_S3_BUCKET", None)?,
            key: env_string("ARCHIVER_S3_KEY", Some("telemetry/messages.log".to_string()))?,
            region: env_string("ARCHIVER_S3_REGION", Some("us-east-1".to_string()))?,
            endpoint: env_optional("ARCHIVER_S3_ENDPOINT"),
        }),
        "dynamodb" | "table-store" => Ok(SinkTarget::TableStore {
            table: env_string("ARCHIVER_DYNAMODB_TABLE", None)?,
            region: env_string("ARCHIVER_DYNAMODB_REGION", Some("us-east-1".to_string()))?,
            endpoint: env_optional("ARCHIVER_DYNAMODB_ENDPOINT"),
        }),
        other => Err(anyhow!(
            "invalid ARCHIVER_SINK {other:?}; expected s3 or dynamodb"
        )),
    }
}

fn transport_from_env() -> Result<TransportConfig> {
    let kind = env_string("ARCHIVER_TRANSPORT", Some("mqtts".to_string()))?;
    match kind.to_ascii_lowercase().as_str() {
        "mqtts" => {
            let raw = env_string("ARCHIVER_MQTT_URL", None)?;
            let (host, port) = parse_broker_url(&raw)?;
            Ok(TransportConfig::Mqtts(MqttConfig {
                host,
                port,
                client_id: env_string(
                    "ARCHIVER_MQTT_CLIENT_ID",
                    Some("telemetry-archiver".to_string()),
                )?,
                ca_file: PathBuf::from(env_string("ARCHIVER_MQTT_CA_FILE", None)?),
                topic: env_string("ARCHIVER_MQTT_TOPIC", None)?,
                username: env_optional("ARCHIVER_MQTT_USERNAME"),
                password: env_optional("ARCHIVER_MQTT_PASSWORD"),
                keepalive: Duration::from_secs(env_u64("ARCHIVER_MQTT_KEEPALIVE_SECONDS", Some(30))?),
            }))
        }
        "http-poll" | "http" => {
            let raw = env_string("ARCHIVER_POLL_URL", None)?;
            let url = Url::parse(&raw).context("invalid ARCHIVER_POLL_URL")?;
            let interval = env_u64("ARCHIVER_POLL_INTERVAL_SECONDS", Some(60))?;
            if interval == 0 {
                bail!("ARCHIVER_POLL_INTERVAL_SECONDS must be positive");
            }
            Ok(TransportConfig::HttpPoll(HttpPollConfig {
                url,
                interval: Duration::from_secs(interval),
                timeout: Duration::from_secs(env_u64("ARCHIVER_POLL_TIMEOUT_SECONDS", Some(10))?),
            }))
        }
        "http-push" | "push" => Ok(TransportConfig::HttpPush),
        other => Err(anyhow!(
            "invalid ARCHIVER_TRANSPORT {other:?}; expected mqtts, http-poll or http-push"
        )),
    }
}

fn attempts_from(raw: u64) -> Result<u32> {
    let attempts = u32::try_from(raw)
        .with_context(|| format!("ARCHIVER_UPLOAD_MAX_ATTEMPTS {raw} is out of range"))?;
    Ok(attempts.max(1))
}

fn parse_broker_url(raw: &str) -> Result<(String, u16)> {
    let url = Url::parse(raw).context("invalid ARCHIVER_MQTT_URL")?;
    if url.scheme() != "mqtts" && url.scheme() != "ssl" {
        bail!("ARCHIVER_MQTT_URL must use mqtts://, got {}://", url.scheme());
    }
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("ARCHIVER_MQTT_URL missing host"))?
        .to_string();
    Ok((host, url.port().unwrap_or(DEFAULT_MQTTS_PORT)))
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env_optional(key) {
        Some(value) => value
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        None => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match env_optional(key) {
        Some(value) => parse_bool(&value).ok_or_else(|| anyhow!("invalid {key}: {value:?}")),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
