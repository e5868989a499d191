//! Background hand-off of superseded day files: upload with bounded retry,
//! then delete the local copy. Files that cannot be delivered stay on disk.
//! The engine never writes to a path after queueing it, so the worker owns
//! every file it receives.

use crate::error::ArchiveError;
use crate::sink::{ClosedFile, Sink};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct HandoffPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for HandoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl HandoffPolicy {
    fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Default)]
pub struct HandoffStats {
    submitted: AtomicU64,
    pending: AtomicU64,
    delivered: AtomicU64,
    retained: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HandoffSnapshot {
    pub submitted: u64,
    pub pending: u64,
    pub delivered: u64,
    pub retained: u64,
    pub failed: u64,
}

impl HandoffStats {
    pub fn snapshot(&self) -> HandoffSnapshot {
        HandoffSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            retained: self.retained.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &HandoffOutcome) {
        let counter = match outcome {
            HandoffOutcome::Delivered => &self.delivered,
            HandoffOutcome::Retained { .. } => &self.retained,
            HandoffOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Sending half, owned by the rotation engine. Submitting never blocks.
#[derive(Clone)]
pub struct HandoffQueue {
    tx: mpsc::UnboundedSender<ClosedFile>,
    stats: Arc<HandoffStats>,
}

pub struct HandoffReceiver {
    rx: mpsc::UnboundedReceiver<ClosedFile>,
    stats: Arc<HandoffStats>,
}

pub fn handoff_channel() -> (HandoffQueue, HandoffReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stats = Arc::new(HandoffStats::default());
    (
        HandoffQueue {
            tx,
            stats: stats.clone(),
        },
        HandoffReceiver { rx, stats },
    )
}

impl HandoffQueue {
    pub fn submit(&self, file: ClosedFile) -> bool {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.stats.pending.fetch_add(1, Ordering::Relaxed);
        match self.tx.send(file) {
            Ok(()) => true,
            Err(mpsc::error::SendError(file)) => {
                self.stats.pending.fetch_sub(1, Ordering::Relaxed);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(path=%file.path.display(), "hand-off worker gone; day file left on disk");
                false
            }
        }
    }

    pub fn snapshot(&self) -> HandoffSnapshot {
        self.stats.snapshot()
    }

    pub fn stats(&self) -> Arc<HandoffStats> {
        self.stats.clone()
    }
}

impl HandoffReceiver {
    /// Next queued file, or `None` once every queue handle is dropped and the
    /// backlog is drained.
    pub async fn recv(&mut self) -> Option<ClosedFile> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ClosedFile> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
pub enum HandoffOutcome {
    Delivered,
    /// Uploaded, but deleting the local copy failed.
    Retained { reason: String },
    Failed(ArchiveError),
}

/// Runs until the engine drops its queue, then drains what is left.
pub fn spawn_handoff_worker<S>(
    sink: Arc<S>,
    policy: HandoffPolicy,
    receiver: HandoffReceiver,
) -> JoinHandle<()>
where
    S: Sink + ?Sized + 'static,
{
    tokio::spawn(async move {
        let HandoffReceiver { mut rx, stats } = receiver;
        while let Some(file) = rx.recv().await {
            let outcome = hand_off(sink.as_ref(), &file, &policy).await;
            stats.record(&outcome);
        }
        tracing::info!("hand-off queue closed");
    })
}

pub async fn hand_off<S: Sink + ?Sized>(
    sink: &S,
    file: &ClosedFile,
    policy: &HandoffPolicy,
) -> HandoffOutcome {
    let path = file.path.display();
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match sink.upload(file).await {
            Ok(receipt) => {
                return match sink.delete_local(&file.path).await {
                    Ok(()) => {
                        tracing::info!(path=%path, day=%file.day, sink = sink.name(), bytes = receipt.bytes, "day file handed off");
                        HandoffOutcome::Delivered
                    }
                    Err(err) => {
                        tracing::warn!(path=%path, error=%err, "uploaded but failed to delete local day file");
                        HandoffOutcome::Retained {
                            reason: err.to_string(),
                        }
                    }
                };
            }
            Err(err) => {
                tracing::warn!(path=%path, attempt, attempts, error=%err, "day file upload failed");
                last_err = Some(err);
                if attempt < attempts {
                    sleep(policy.backoff_after(attempt)).await;
                }
            }
        }
    }

    let err = last_err.unwrap_or_else(|| ArchiveError::upload(&file.path, "no upload attempted"));
    tracing::error!(path=%path, error=%err, "giving up on day file; left on local disk");
    HandoffOutcome::Failed(err)
}
