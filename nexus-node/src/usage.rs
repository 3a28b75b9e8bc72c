use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use nexus_common::model::ApiKeyUsage;
use nexus_store::Store;

const QUEUE_CAP: usize = 4_096;

/// Bounded fire-and-forget queue for API-key usage rows. Overflow drops the
/// oldest entry and counts it; recording never gates the response path.
pub struct UsageRecorder {
    queue: Mutex<VecDeque<ApiKeyUsage>>,
    notify: Notify,
    dropped: AtomicU64,
    cap: usize,
}

impl UsageRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            cap: QUEUE_CAP,
        })
    }

    pub async fn record(&self, usage: ApiKeyUsage) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.cap {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(usage);
        drop(queue);
        self.notify.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn drain(&self) -> Vec<ApiKeyUsage> {
        let mut queue = self.queue.lock().await;
        queue.drain(..).collect()
    }

    /// Writer task: drains the queue into the store. Write failures are
    /// logged and the rows are lost; usage is best-effort by design.
    pub fn spawn_writer(self: &Arc<Self>, store: Arc<Store>) -> tokio::task::JoinHandle<()> {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                recorder.notify.notified().await;
                for usage in recorder.drain().await {
                    if let Err(e) = store.insert_usage(&usage) {
                        tracing::warn!(target: "usage", "usage write failed: {}", e);
                    }
                }
            }
        })
    }
}
