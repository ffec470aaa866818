//! Asynchronous delete pipeline.
//!
//! A fixed pool of workers drains deletion jobs so the HTTP and gRPC
//! handlers can acknowledge a delete immediately. Each worker owns a bounded
//! channel of capacity one; jobs are dispatched round-robin, so a saturated
//! pool makes the submitting handler wait; this is the ingress backpressure the
//! service relies on instead of an unbounded queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use kurz_core::{DeleteRequest, Result, Storage, StorageError};

/// Number of delete workers. Sized to bound concurrent `UPDATE` load on the
/// Postgres backend while keeping the queue drained under typical load.
pub const DELETE_WORKER_COUNT: usize = 3;

/// Producer half of the delete pipeline, handed to the request façade.
#[derive(Clone)]
pub struct DeleteQueue {
    workers: Arc<Vec<mpsc::Sender<DeleteRequest>>>,
    next_worker: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl DeleteQueue {
    /// Hands a deletion job to the next worker, waiting while the pool is
    /// saturated.
    pub async fn submit(&self, request: DeleteRequest) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(StorageError::Unavailable(
                "delete pool is shutting down".to_string(),
            ));
        }

        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[index]
            .send(request)
            .await
            .map_err(|_| StorageError::Unavailable(format!("delete worker {index} channel closed")))
    }
}

/// Consumer half of the delete pipeline, kept by the application for
/// shutdown.
pub struct DeletePool {
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl DeletePool {
    /// Stops the pool: refuses new submissions, lets every worker finish the
    /// jobs already queued, and waits for all of them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles = match self.handles.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        for handle in handles {
            if let Err(err) = handle.await {
                error!(%err, "delete worker panicked");
            }
        }
        debug!("delete pool stopped");
    }
}

/// Launches the worker pool against `storage` and returns both halves.
pub fn spawn_delete_pool(storage: Arc<dyn Storage>) -> (DeleteQueue, DeletePool) {
    let shutdown = CancellationToken::new();
    let mut senders = Vec::with_capacity(DELETE_WORKER_COUNT);
    let mut handles = Vec::with_capacity(DELETE_WORKER_COUNT);

    for worker_id in 0..DELETE_WORKER_COUNT {
        let (tx, rx) = mpsc::channel(1);
        senders.push(tx);
        handles.push(tokio::spawn(worker_loop(
            worker_id,
            rx,
            Arc::clone(&storage),
            shutdown.clone(),
        )));
    }

    let queue = DeleteQueue {
        workers: Arc::new(senders),
        next_worker: Arc::new(AtomicUsize::new(0)),
        shutdown: shutdown.clone(),
    };
    let pool = DeletePool {
        handles: Mutex::new(handles),
        shutdown,
    };
    (queue, pool)
}

async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<DeleteRequest>,
    storage: Arc<dyn Storage>,
    shutdown: CancellationToken,
) {
    debug!(worker_id, "delete worker started");

    loop {
        tokio::select! {
            job = rx.recv() => match job {
                Some(request) => apply(worker_id, &*storage, request).await,
                None => break,
            },
            _ = shutdown.cancelled() => {
                // Drain whatever is already queued, then exit.
                while let Ok(request) = rx.try_recv() {
                    apply(worker_id, &*storage, request).await;
                }
                break;
            }
        }
    }

    debug!(worker_id, "delete worker stopped");
}

async fn apply(worker_id: usize, storage: &dyn Storage, request: DeleteRequest) {
    if let Err(err) = storage.delete_user_urls(&request).await {
        error!(worker_id, user = request.user, %err, "failed to apply delete job");
    }
}
