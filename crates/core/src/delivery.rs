use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{RelayError, RelayResult};

pub const SEND_SPACING: Duration = Duration::from_millis(200);
pub const QUEUE_IDLE_GRACE: Duration = Duration::from_secs(10);

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Per-channel FIFO of outbound sends.
///
/// Each channel gets one worker task. Tasks on a channel run one at a time in
/// submission order, and a task never starts sooner than `spacing` after the
/// previous one on that channel finished. Channels are independent. A worker
/// that sits idle for `idle_grace` retires and drops its queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<Inner>,
}

struct Inner {
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
    spacing: Duration,
    idle_grace: Duration,
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new(SEND_SPACING, QUEUE_IDLE_GRACE)
    }
}

impl DeliveryQueue {
    pub fn new(spacing: Duration, idle_grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                spacing,
                idle_grace,
            }),
        }
    }

    /// Runs `task` on the channel's queue and resolves with its result. A
    /// failing task only fails its own caller.
    pub async fn enqueue<F, Fut, T>(&self, channel_id: &str, task: F) -> RelayResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = RelayResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                // caller may have gone away; the send still happened
                let _ = tx.send(task().await);
            })
        });
        self.inner.submit(channel_id, job);

        rx.await.map_err(|_| {
            RelayError::UpstreamUnavailable("delivery worker stopped".to_string())
        })?
    }

    /// Number of live channel queues.
    pub fn active_queues(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<Job>>> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn submit(self: &Arc<Self>, channel_id: &str, job: Job) {
        let mut queues = self.lock();

        let job = match queues.get(channel_id) {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                // worker died without retiring
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(job);
        queues.insert(channel_id.to_string(), tx);
        debug!(%channel_id, "delivery queue created");

        tokio::spawn(run_worker(self.clone(), channel_id.to_string(), rx));
    }

    /// Called by an idle worker. Either hands back a job that raced in, or
    /// unregisters the queue so the next submit starts a fresh one.
    fn retire(&self, channel_id: &str, rx: &mut mpsc::UnboundedReceiver<Job>) -> Option<Job> {
        let mut queues = self.lock();
        match rx.try_recv() {
            Ok(job) => Some(job),
            Err(_) => {
                queues.remove(channel_id);
                None
            }
        }
    }
}

async fn run_worker(inner: Arc<Inner>, channel_id: String, mut rx: mpsc::UnboundedReceiver<Job>) {
    let mut last_done: Option<Instant> = None;

    loop {
        let job = match tokio::time::timeout(inner.idle_grace, rx.recv()).await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(_) => match inner.retire(&channel_id, &mut rx) {
                Some(job) => job,
                None => {
                    debug!(%channel_id, "delivery queue retired");
                    break;
                }
            },
        };

        if let Some(done) = last_done {
            tokio::time::sleep_until(done + inner.spacing).await;
        }

        job().await;
        last_done = Some(Instant::now());
    }
}
