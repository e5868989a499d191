use crate::config::HttpPollConfig;
use crate::error::{ArchiveError, Result as ArchiveResult};
use crate::ingest::IngestHandle;
use crate::record::Record;
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::value::RawValue;
use tokio::time::MissedTickBehavior;

/// Fetches the configured URL on every tick and ingests what it returns.
/// Failed fetches are logged and retried on the next tick.
pub async fn run_poller(config: HttpPollConfig, ingest: IngestHandle) -> Result<()> {
    let client = Client::builder()
        .timeout(config.timeout)
        .build()
        .context("failed to build HTTP poll client")?;

    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(url=%config.url, interval_secs = config.interval.as_secs(), "HTTP poller started");

    loop {
        ticker.tick().await;
        match fetch(&client, &config).await {
            Ok(body) => {
                let (accepted, rejected) = ingest_body(&ingest, body).await;
                tracing::debug!(accepted, rejected, "poll complete");
            }
            Err(err) => tracing::warn!(error=%err, url=%config.url, "poll failed"),
        }
    }
}

async fn fetch(client: &Client, config: &HttpPollConfig) -> reqwest::Result<String> {
    client
        .get(config.url.clone())
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
}

async fn ingest_body(ingest: &IngestHandle, body: String) -> (u64, u64) {
    let mut accepted = 0;
    let mut rejected = 0;
    for record in records_from_body(&body) {
        let result = match record {
            Ok(record) => ingest.ingest(record).await.map(|_| ()),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => accepted += 1,
            Err(err) => {
                rejected += 1;
                tracing::warn!(error=%err, "failed to ingest polled record");
            }
        }
    }
    (accepted, rejected)
}

/// A poll response is one record object or an array of them. Each record
/// keeps its own text as sent.
pub fn records_from_body(body: &str) -> Vec<ArchiveResult<Record>> {
    let trimmed = body.trim_start();
    if !trimmed.starts_with('[') {
        return vec![Record::from_json_slice(trimmed.as_bytes())];
    }
    match serde_json::from_str::<Vec<&RawValue>>(trimmed) {
        Ok(items) => items
            .into_iter()
            .map(|item| Record::from_json_slice(item.get().as_bytes()))
            .collect(),
        Err(err) => vec![Err(ArchiveError::invalid_record(format!(
            "poll response is not a JSON array: {err}"
        )))],
    }
}
