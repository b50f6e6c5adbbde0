use async_channel::{Receiver, Sender, TryRecvError};
use async_trait::async_trait;

use super::Queue;
use crate::error::{Error, Result};

/// In-process unbounded queue.
pub struct LocalQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> LocalQueue<T> {
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self { sender, receiver }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl<T> Default for LocalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Queue<T> for LocalQueue<T> {
    async fn put(&self, item: T) -> Result<()> {
        self.sender
            .send(item)
            .await
            .map_err(|_| Error::Protocol("queue closed".to_string()))
    }

    async fn try_get(&self) -> Result<Option<T>> {
        match self.receiver.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(Error::Protocol("queue closed".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn fifo_per_producer() {
        let queue = LocalQueue::new();
        for i in 0..5 {
            queue.put(i).await.unwrap();
        }
        assert_eq!(queue.len(), 5);
        for i in 0..5 {
            assert_eq!(queue.try_get().await.unwrap(), Some(i));
        }
        assert_eq!(queue.try_get().await.unwrap(), None);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn concurrent_producers_lose_nothing() {
        let queue = Arc::new(LocalQueue::new());
        let mut handles = Vec::new();
        for p in 0..4u32 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                for i in 0..100u32 {
                    queue.put((p, i)).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut last = [None::<u32>; 4];
        let mut total = 0;
        while let Some((p, i)) = queue.try_get().await.unwrap() {
            let prev = last[p as usize].replace(i);
            assert!(prev.map_or(true, |prev| prev < i));
            total += 1;
        }
        assert_eq!(total, 400);
    }
}
