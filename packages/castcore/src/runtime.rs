//! Task-spawning abstraction, so services aren't tied to a live Tokio
//! runtime handle at construction time.

use std::future::Future;

pub trait TaskSpawner: Send + Sync {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-backed spawner; the only implementation this crate ships, since
/// `cast-server` is the sole consumer.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// # Panics
    /// Panics if called outside of a Tokio runtime context.
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn tokio_spawner_executes_task() {
        let spawner = TokioSpawner::current();
        let executed = Arc::new(AtomicBool::new(false));
        let flag = executed.clone();
        spawner.spawn(async move {
            flag.store(true, Ordering::SeqCst);
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(executed.load(Ordering::SeqCst));
    }
}
