use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;

/// Where workers announce that they started and that they exited.
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    async fn register(&self, worker_id: &str) -> Result<()>;
    async fn deregister(&self, worker_id: &str) -> Result<()>;
}

/// Server-side set of workers that registered and have not left yet.
#[derive(Default)]
pub struct LiveWorkers {
    ids: Mutex<HashSet<String>>,
}

impl LiveWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn insert(&self, worker_id: &str) -> bool {
        self.lock().insert(worker_id.to_string())
    }

    pub(crate) fn remove(&self, worker_id: &str) -> bool {
        self.lock().remove(worker_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // a panic while holding the set cannot leave it half-updated
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl WorkerRegistry for LiveWorkers {
    async fn register(&self, worker_id: &str) -> Result<()> {
        self.insert(worker_id);
        Ok(())
    }

    async fn deregister(&self, worker_id: &str) -> Result<()> {
        self.remove(worker_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_registered_workers() {
        let live = LiveWorkers::new();
        live.register("a").await.unwrap();
        live.register("b").await.unwrap();
        live.register("a").await.unwrap();
        assert_eq!(live.count(), 2);
        live.deregister("a").await.unwrap();
        live.deregister("unknown").await.unwrap();
        assert_eq!(live.count(), 1);
    }
}
