//! In-memory review job queue with a single consumer task.
//!
//! The queue decouples the fast webhook acknowledgement from the slow review
//! pipeline: producers only await the channel send, never job processing.
//! Exactly one consumer task drains the queue in FIFO order, so concurrent
//! jobs for the same repository are processed sequentially and cannot race
//! on the same PR. The worker is spawned lazily on first enqueue and
//! respawned if a previous incarnation exited (e.g. a handler panic).
//!
//! No persistence: queued-but-unprocessed jobs are lost on crash or restart.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use futures_util::future::BoxFuture;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::payload::ReviewJob;

pub type JobHandler =
    Arc<dyn Fn(ReviewJob) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub struct ReviewQueue {
    tx: UnboundedSender<ReviewJob>,
    rx: Arc<tokio::sync::Mutex<UnboundedReceiver<ReviewJob>>>,
    handler: Arc<Mutex<Option<JobHandler>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
}

impl Default for ReviewQueue {
    fn default() -> Self { Self::new() }
}

impl ReviewQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            handler: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set or replace the job handler. Jobs dequeued while no handler is
    /// configured are dropped with a warning; that is a startup-ordering
    /// safety net, not normal operation.
    pub fn configure_handler(&self, handler: Option<JobHandler>) {
        *self.handler.lock().unwrap() = handler;
    }

    /// Add a job to the queue, starting the worker if needed. Returns as
    /// soon as the job lands in the channel.
    pub fn enqueue(&self, job: ReviewJob) -> anyhow::Result<()> {
        self.ensure_worker();
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            anyhow::anyhow!("review queue channel closed")
        })
    }

    /// Number of jobs waiting in the queue.
    pub fn pending(&self) -> usize { self.pending.load(Ordering::SeqCst) }

    fn ensure_worker(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let rx = self.rx.clone();
        let handler = self.handler.clone();
        let pending = self.pending.clone();
        *worker = Some(tokio::spawn(worker_loop(rx, handler, pending)));
    }

    /// Stop the worker task and await its cancellation.
    pub async fn shutdown(&self) {
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            worker.abort();
            let _ = worker.await;
        }
    }
}

async fn worker_loop(
    rx: Arc<tokio::sync::Mutex<UnboundedReceiver<ReviewJob>>>,
    handler: Arc<Mutex<Option<JobHandler>>>,
    pending: Arc<AtomicUsize>,
) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };
        pending.fetch_sub(1, Ordering::SeqCst);
        let delivery_id = job.delivery_id.clone();
        let event = job.payload.event_kind();
        tracing::info!(delivery_id, event, "Dequeued review job");
        let handler = handler.lock().unwrap().clone();
        match handler {
            None => {
                tracing::warn!(delivery_id, "No review job handler configured; dropping job");
            }
            Some(handler) => {
                // One bad job must not kill the loop or block the rest of
                // the queue.
                if let Err(err) = handler(job).await {
                    tracing::error!(delivery_id, "Review job failed: {err:#}");
                } else {
                    tracing::info!(delivery_id, "Review job completed");
                }
            }
        }
    }
}
