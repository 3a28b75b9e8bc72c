use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;

const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Per-user TTL cache for idempotent hot reads, keyed `(route, userId)`.
/// Only 200 responses are written back; any mutation by the same user
/// invalidates all of that user's entries. Advisory only: the store stays
/// the system of record.
pub struct ResponseCache {
    entries: Mutex<HashMap<(String, String), (Value, Instant)>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl }
    }

    pub async fn get(&self, route: &str, user_id: &str) -> Option<Value> {
        let entries = self.entries.lock().await;
        let (value, stored_at) = entries.get(&(route.to_string(), user_id.to_string()))?;
        (stored_at.elapsed() < self.ttl).then(|| value.clone())
    }

    pub async fn put(&self, route: &str, user_id: &str, value: Value) {
        self.entries
            .lock()
            .await
            .insert((route.to_string(), user_id.to_string()), (value, Instant::now()));
    }

    pub async fn invalidate_user(&self, user_id: &str) {
        self.entries.lock().await.retain(|(_, uid), _| uid != user_id);
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}
