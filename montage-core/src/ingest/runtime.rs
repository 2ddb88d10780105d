use std::{fmt, sync::Arc, time::Duration};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pipeline::{IngestJob, IngestPipeline};
use crate::error::{ContentError, Result};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Bounded job queue drained by a fixed pool of worker tasks.
pub(crate) struct IngestRuntime {
    pipeline: IngestPipeline,
    sender: std::sync::Mutex<Option<mpsc::Sender<IngestJob>>>,
    receiver: Arc<Mutex<mpsc::Receiver<IngestJob>>>,
    shutdown_token: CancellationToken,
    worker_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl fmt::Debug for IngestRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_handle_count = self
            .worker_handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();
        let accepting = self
            .sender
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false);

        f.debug_struct("IngestRuntime")
            .field("pipeline", &self.pipeline)
            .field("worker_handle_count", &worker_handle_count)
            .field("accepting", &accepting)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl IngestRuntime {
    /// Spawns `workers` tasks on the current Tokio runtime.
    pub(crate) fn start(
        pipeline: IngestPipeline,
        workers: usize,
        queue_size: usize,
    ) -> Result<Self> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ContentError::Internal(
                "ingestion workers need a running Tokio runtime".into(),
            ));
        }

        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown_token = CancellationToken::new();

        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    pipeline.clone(),
                    Arc::clone(&receiver),
                    shutdown_token.clone(),
                ))
            })
            .collect();
        info!(workers, queue_size, "ingestion workers started");

        Ok(Self {
            pipeline,
            sender: std::sync::Mutex::new(Some(sender)),
            receiver,
            shutdown_token,
            worker_handles: Mutex::new(handles),
        })
    }

    /// Queues a job without waiting. A full or closed queue is an error.
    pub(crate) fn submit(&self, job: IngestJob) -> Result<()> {
        let guard = self
            .sender
            .lock()
            .map_err(|_| ContentError::Internal("ingestion queue lock poisoned".into()))?;
        let Some(sender) = guard.as_ref() else {
            return Err(ContentError::Internal(
                "ingestion runtime has been shut down".into(),
            ));
        };
        sender.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                ContentError::Internal("ingestion queue is full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ContentError::Internal("ingestion queue is closed".into())
            }
        })
    }

    /// Stops accepting work, lets running jobs finish and fails every job
    /// still waiting in the queue.
    pub(crate) async fn shutdown(&self) {
        info!("shutting down ingestion workers");
        self.shutdown_token.cancel();
        if let Ok(mut guard) = self.sender.lock() {
            *guard = None;
        }

        let handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("ingestion worker failed: {err:?}"),
                Err(_) => warn!("ingestion worker timed out during shutdown"),
            }
        }

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while let Ok(job) = receiver.try_recv() {
            self.pipeline
                .abandon(&job, "Ingestion stopped before the upload was processed")
                .await;
        }
        info!("ingestion workers stopped");
    }
}

async fn worker_loop(
    worker: usize,
    pipeline: IngestPipeline,
    receiver: Arc<Mutex<mpsc::Receiver<IngestJob>>>,
    shutdown: CancellationToken,
) {
    debug!(worker, "ingestion worker ready");
    loop {
        let job = {
            let mut guard = tokio::select! {
                _ = shutdown.cancelled() => break,
                guard = receiver.lock() => guard,
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                job = guard.recv() => job,
            }
        };
        let Some(job) = job else { break };

        // A panicking job must not take the worker with it.
        let outcome = tokio::spawn({
            let pipeline = pipeline.clone();
            let job = job.clone();
            async move { pipeline.run(job).await }
        })
        .await;
        if let Err(err) = outcome {
            error!(
                worker,
                token_id = %job.token_id,
                "ingestion job panicked: {err}"
            );
            pipeline
                .abandon(&job, "Exception while processing the upload")
                .await;
        }
    }
    debug!(worker, "ingestion worker exiting");
}
