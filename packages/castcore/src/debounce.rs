//! Single-shot resettable delayed callback.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Schedules a single delayed invocation of `function`, rescheduling it on
/// new activity rather than stacking up duplicate timers.
///
/// Mirrors the teacher's single-in-flight-task timer shape (an
/// `AsyncDebounce` over a `tokio::task::JoinHandle` rather than Python's
/// `asyncio.Task`): at most one task is ever pending; [`update_args`]
/// cancels any pending task and re-arms with the new arguments, unless a
/// prior task has *already completed*, in which case it reports `false` and
/// does nothing (there is nothing left to cancel, and re-arming silently
/// would hide that the debounce already fired).
pub struct AsyncDebounce<A: Clone + Send + 'static> {
    function: Arc<dyn Fn(A) -> BoxFuture + Send + Sync>,
    timeout: Duration,
    inner: Mutex<Inner<A>>,
}

struct Inner<A> {
    task: Option<JoinHandle<()>>,
    args: Option<A>,
}

impl<A: Clone + Send + 'static> AsyncDebounce<A> {
    pub fn new<F, Fut>(timeout: Duration, function: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            function: Arc::new(move |args| Box::pin(function(args))),
            timeout,
            inner: Mutex::new(Inner {
                task: None,
                args: None,
            }),
        }
    }

    fn run(&self, inner: &mut Inner<A>) -> bool {
        let Some(args) = inner.args.clone() else {
            return false;
        };
        let function = self.function.clone();
        let timeout = self.timeout;
        inner.task = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            function(args).await;
        }));
        true
    }

    /// Cancels any pending task, remembers `args`, and schedules a fresh
    /// delayed call. Returns `false` without rescheduling if the previous
    /// task already fired.
    pub fn update_args(&self, args: A) -> bool {
        let mut inner = self.inner.lock();
        if let Some(task) = &inner.task {
            if task.is_finished() {
                return false;
            }
            task.abort();
        }
        inner.args = Some(args);
        self.run(&mut inner)
    }

    /// Re-arms the timer using the most recently remembered arguments.
    pub fn reschedule(&self) -> bool {
        let mut inner = self.inner.lock();
        self.run(&mut inner)
    }
}

impl<A: Clone + Send + 'static> Drop for AsyncDebounce<A> {
    fn drop(&mut self) {
        if let Some(task) = self.inner.lock().task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_timeout() {
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        let debounce = AsyncDebounce::new(Duration::from_millis(100), move |_: ()| {
            let count = count2.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        debounce.update_args(());
        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn update_args_replaces_pending_call() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let debounce = AsyncDebounce::new(Duration::from_millis(100), move |x: u32| {
            let seen = seen2.clone();
            async move {
                seen.lock().push(x);
            }
        });

        debounce.update_args(1);
        debounce.update_args(2);
        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn update_args_after_fire_returns_false() {
        let debounce = AsyncDebounce::new(Duration::from_millis(50), |_: ()| async {});
        debounce.update_args(());
        tokio::time::advance(Duration::from_millis(80)).await;
        tokio::task::yield_now().await;
        assert!(!debounce.update_args(()));
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_rearms_with_remembered_args() {
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        let debounce = AsyncDebounce::new(Duration::from_millis(50), move |_: ()| {
            let count = count2.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        debounce.update_args(());
        tokio::time::advance(Duration::from_millis(80)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        debounce.reschedule();
        tokio::time::advance(Duration::from_millis(80)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
