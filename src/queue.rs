//! Background execution: a job queue and the worker pool that drains it.
//!
//! Job creation enqueues exactly one unit of work (the job id); a pool of
//! 1..N workers consumes the queue. "At most one task per job" is
//! therefore structural — an id enters the channel once and is received by
//! exactly one worker — rather than an accident of call sites.
//!
//! Workers never die of a bad job: every pipeline failure is caught and
//! recorded as that job's terminal `Error`, and the worker moves on to the
//! next id. There is no cancellation; once picked up, a job runs to its
//! terminal state.

use crate::config::ConversionConfig;
use crate::convert::convert_document;
use crate::error::ProcmapError;
use crate::pipeline::llm::TextGenerator;
use crate::store::JobStore;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Cloneable handle for enqueueing jobs.
///
/// Holds only a weak sender: the pool owns the channel's lifetime, so
/// outstanding handles cannot keep workers alive past
/// [`WorkerPool::shutdown`].
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::WeakUnboundedSender<String>,
}

impl JobQueue {
    /// Enqueue a job id for background processing.
    pub fn enqueue(&self, job_id: impl Into<String>) -> Result<(), ProcmapError> {
        let sender = self
            .sender
            .upgrade()
            .ok_or_else(|| ProcmapError::Internal("job queue is shut down".into()))?;
        sender
            .send(job_id.into())
            .map_err(|_| ProcmapError::Internal("job queue is shut down".into()))
    }
}

/// A fixed-size pool of async workers sharing one queue.
pub struct WorkerPool {
    sender: mpsc::UnboundedSender<String>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers against the given store and generator.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn start(
        store: Arc<dyn JobStore>,
        generator: Arc<dyn TextGenerator>,
        config: Arc<ConversionConfig>,
        worker_count: usize,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");

        let (sender, receiver) = mpsc::unbounded_channel::<String>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let receiver = Arc::clone(&receiver);
            let store = Arc::clone(&store);
            let generator = Arc::clone(&generator);
            let config = Arc::clone(&config);

            workers.push(tokio::spawn(async move {
                debug!("Worker {} started", worker_id);
                loop {
                    // Lock only to receive; processing runs unlocked so
                    // workers drain the queue concurrently.
                    let job_id = { receiver.lock().await.recv().await };
                    match job_id {
                        Some(job_id) => {
                            process_job(&*store, &*generator, &config, &job_id).await;
                        }
                        None => break,
                    }
                }
                debug!("Worker {} stopped", worker_id);
            }));
        }

        info!("Started {} workers", worker_count);
        Self { sender, workers }
    }

    /// Handle for submitting jobs.
    pub fn queue(&self) -> JobQueue {
        JobQueue {
            sender: self.sender.downgrade(),
        }
    }

    /// Close the queue and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        info!("Shutting down worker pool...");
        drop(self.sender);
        for (i, outcome) in join_all(self.workers).await.into_iter().enumerate() {
            if let Err(e) = outcome {
                error!("Worker {} panicked: {:?}", i, e);
            }
        }
        info!("All workers have stopped");
    }
}

/// Drive one job from `Pending` to its terminal state.
///
/// Every failure path ends in a store update, never a propagated error:
/// the job registry is the worker's only output channel.
pub async fn process_job(
    store: &dyn JobStore,
    generator: &dyn TextGenerator,
    config: &ConversionConfig,
    job_id: &str,
) {
    let Some(mut job) = store.get(job_id) else {
        error!("Dequeued unknown job {}", job_id);
        return;
    };

    if let Err(e) = job.begin_processing() {
        // Only possible if something else already advanced the job, which
        // the queue construction is supposed to rule out.
        warn!("Job {} not in a startable state: {}", job_id, e);
        return;
    }
    if let Err(e) = store.update(&job) {
        error!("Failed to mark job {} as processing: {}", job_id, e);
        return;
    }
    info!("Processing job {} ({})", job.id, job.source_filename);

    let result = convert_document(&job.source_path, config, generator).await;

    let transition = match result {
        Ok(output) => job.complete(output),
        Err(e) => {
            warn!("Job {} failed: {}", job.id, e);
            job.fail(e.to_string())
        }
    };

    match transition {
        Ok(()) => {
            if let Err(e) = store.update(&job) {
                error!("Failed to persist terminal state of job {}: {}", job.id, e);
            }
        }
        Err(e) => error!("Job {} could not reach a terminal state: {}", job.id, e),
    }
}
