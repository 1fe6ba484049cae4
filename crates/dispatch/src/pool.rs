//! Dispatch Queue and Worker Pool

use alerting::Alert;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{DispatchError, Pipeline};

/// Worker pool sizing
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Number of independent workers
    pub workers: usize,
    /// Queue slots before `enqueue` blocks
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 100,
        }
    }
}

/// Producer handle for the dispatch queue
#[derive(Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<Alert>,
    capacity: usize,
}

impl DispatchQueue {
    /// Queue an alert, waiting for a free slot when the queue is full
    pub async fn enqueue(&self, alert: Alert) -> Result<(), DispatchError> {
        self.sender
            .send(alert)
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Alerts waiting for a worker
    pub fn pending(&self) -> usize {
        self.capacity - self.sender.capacity()
    }
}

/// Fixed set of workers sharing one queue receiver
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create the queue and start the workers
    pub fn start(config: PoolConfig, pipeline: Arc<Pipeline>) -> (DispatchQueue, WorkerPool) {
        let capacity = config.queue_capacity.max(1);
        let workers = config.workers.max(1);
        info!("Starting dispatch pool: workers={}, queue_capacity={}", workers, capacity);

        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers)
            .map(|id| tokio::spawn(run_worker(id, Arc::clone(&receiver), Arc::clone(&pipeline))))
            .collect();

        (DispatchQueue { sender, capacity }, WorkerPool { handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit. Workers exit once all queue handles are
    /// dropped and the queue is drained.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Alert>>>, pipeline: Arc<Pipeline>) {
    debug!("Worker {} started", id);

    loop {
        // Lock is released before the alert is processed.
        let next = receiver.lock().await.recv().await;
        let Some(alert) = next else {
            break;
        };

        // A panic inside the pipeline is contained to this alert.
        let pipeline = Arc::clone(&pipeline);
        if let Err(e) = tokio::spawn(async move { pipeline.process(alert).await }).await {
            error!("Worker {} pipeline task failed: {}", id, e);
        }
    }

    debug!("Worker {} stopped", id);
}
