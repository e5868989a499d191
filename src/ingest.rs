use crate::error::{ArchiveError, Result};
use crate::record::Record;
use crate::rotation::{EngineStatus, IngestOutcome, RotationEngine};
use crate::sink::ClosedFile;
use anyhow::Context;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
pub enum EngineCommand {
    Ingest {
        record: Record,
        respond_to: oneshot::Sender<Result<IngestOutcome>>,
    },
    Finalize {
        respond_to: oneshot::Sender<Option<ClosedFile>>,
    },
    GetStatus {
        respond_to: oneshot::Sender<EngineStatus>,
    },
}

/// Cloneable entry point shared by every transport. Commands are queued to a
/// single engine thread, so concurrent callers are processed one at a time.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl IngestHandle {
    pub fn new(tx: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { tx }
    }

    pub async fn ingest(&self, record: Record) -> Result<IngestOutcome> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Ingest {
                record,
                respond_to: tx,
            })
            .map_err(|_| ArchiveError::EngineStopped)?;
        rx.await.map_err(|_| ArchiveError::EngineStopped)?
    }

    pub async fn finalize(&self) -> Result<Option<ClosedFile>> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Finalize { respond_to: tx })
            .map_err(|_| ArchiveError::EngineStopped)?;
        rx.await.map_err(|_| ArchiveError::EngineStopped)
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::GetStatus { respond_to: tx })
            .map_err(|_| ArchiveError::EngineStopped)?;
        rx.await.map_err(|_| ArchiveError::EngineStopped)
    }
}

/// Moves the engine onto its own thread. The thread exits once every
/// `IngestHandle` is dropped, which also closes the hand-off queue.
pub fn spawn_engine_thread(
    engine: RotationEngine,
) -> anyhow::Result<(IngestHandle, std::thread::JoinHandle<()>)> {
    let (tx, mut rx) = mpsc::unbounded_channel::<EngineCommand>();

    let handle = std::thread::Builder::new()
        .name("rotation-engine".to_string())
        .spawn(move || run_engine_thread(engine, &mut rx))
        .context("failed to spawn rotation engine thread")?;

    Ok((IngestHandle::new(tx), handle))
}

fn run_engine_thread(mut engine: RotationEngine, rx: &mut mpsc::UnboundedReceiver<EngineCommand>) {
    tracing::info!(base_path=%engine.base_path().display(), "rotation engine started");

    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            EngineCommand::Ingest { record, respond_to } => {
                let res = engine.ingest(&record);
                let _ = respond_to.send(res);
            }
            EngineCommand::Finalize { respond_to } => {
                let closed = engine.finalize();
                let _ = respond_to.send(closed);
            }
            EngineCommand::GetStatus { respond_to } => {
                let _ = respond_to.send(engine.status());
            }
        }
    }

    tracing::info!("rotation engine stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::handoff_channel;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn concurrent_callers_rotate_once() {
        let dir = TempDir::new().unwrap();
        let (queue, mut receiver) = handoff_channel();
        let engine = RotationEngine::new(dir.path().join("messages.log"), queue);
        let (handle, thread) = spawn_engine_thread(engine).unwrap();

        let first = Record::from_value(json!({"timePublished": "2023-11-28 23:59:59"})).unwrap();
        handle.ingest(first).await.unwrap();

        let mut tasks = Vec::new();
        for minute in 0..20 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                let record = Record::from_value(json!({
                    "timePublished": format!("2023-11-29 00:{minute:02}:00"),
                }))
                .unwrap();
                handle.ingest(record).await.unwrap()
            }));
        }
        let mut rotations = 0;
        for task in tasks {
            if matches!(task.await.unwrap(), IngestOutcome::Rotated { .. }) {
                rotations += 1;
            }
        }

        assert_eq!(rotations, 1);
        let status = handle.status().await.unwrap();
        assert_eq!(status.records_appended, 21);
        assert_eq!(status.active_day.unwrap().to_string(), "2023-11-29");

        drop(handle);
        tokio::task::spawn_blocking(move || thread.join().unwrap())
            .await
            .unwrap();
        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn stopped_engine_is_reported() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = IngestHandle::new(tx);

        let record = Record::from_value(json!({"timePublished": "2023-11-28"})).unwrap();
        assert!(matches!(handle.ingest(record).await, Err(ArchiveError::EngineStopped)));
        assert!(matches!(handle.status().await, Err(ArchiveError::EngineStopped)));
    }
}
