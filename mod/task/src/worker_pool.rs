use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Boxed async task handler invoked with a task id.
type TaskFn = Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Fixed-size pool of workers draining a bounded FIFO queue of task ids.
///
/// The queue holds at most `2 * size` ids. [`submit`](Self::submit) never
/// blocks: a full queue rejects the offer and the caller retries on a
/// later poll tick. Closing the queue is the shutdown signal — workers
/// drain what remains, finish in-flight handlers and exit.
pub struct WorkerPool {
    size: usize,
    tx: std::sync::Mutex<Option<mpsc::Sender<String>>>,
    rx: std::sync::Mutex<Option<mpsc::Receiver<String>>>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool with `size` workers and a queue of capacity `2 * size`.
    pub fn new(size: usize) -> Self {
        let (tx, rx) = mpsc::channel(size * 2);
        Self {
            size,
            tx: std::sync::Mutex::new(Some(tx)),
            rx: std::sync::Mutex::new(Some(rx)),
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn the workers. Each dequeued id is passed to `handler`; ids are
    /// dequeued in submission order across the pool as a whole, while
    /// per-worker execution runs concurrently.
    pub fn run<F, Fut>(&self, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: TaskFn = Arc::new(move |id| Box::pin(handler(id)));

        let rx = self
            .rx
            .lock()
            .expect("worker pool lock poisoned")
            .take()
            .expect("worker pool already running");
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = self.handles.lock().expect("worker pool lock poisoned");
        for worker_id in 0..self.size {
            let rx = Arc::clone(&rx);
            let handler = Arc::clone(&handler);

            handles.push(tokio::spawn(async move {
                loop {
                    let next = { rx.lock().await.recv().await };
                    match next {
                        Some(task_id) => {
                            debug!("worker {worker_id} picked up task {task_id}");
                            handler(task_id).await;
                        }
                        None => break,
                    }
                }
            }));
        }
    }

    /// Non-blocking offer. Returns `false` when the queue is full or the
    /// pool has been stopped.
    pub fn submit(&self, task_id: &str) -> bool {
        let tx = self.tx.lock().expect("worker pool lock poisoned");
        match tx.as_ref() {
            Some(tx) => tx.try_send(task_id.to_string()).is_ok(),
            None => false,
        }
    }

    /// Close the inbound queue and wait for all workers to finish their
    /// in-flight handlers. Safe to call once; later calls are no-ops.
    pub async fn stop(&self) {
        // Dropping the sender closes the channel; workers exit once the
        // remaining queue is drained.
        self.tx.lock().expect("worker pool lock poisoned").take();

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().expect("worker pool lock poisoned");
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}
