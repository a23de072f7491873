//! A single asynchronous operation with observable status, value and error.
use futures_util::future::{BoxFuture, FutureExt};
use log::{debug, warn};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::utils::RunOnce;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Idle,
    Pending,
    Success,
    Error,
}

/// State of an [`AsyncTask`]. A value only exists in `Success` and an error only in `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncState<T, E> {
    Idle,
    Pending,
    Success(T),
    Error(E),
}

impl<T, E> Default for AsyncState<T, E> {
    fn default() -> Self {
        AsyncState::Idle
    }
}

impl<T, E> AsyncState<T, E> {
    pub fn status(&self) -> Status {
        match self {
            AsyncState::Idle => Status::Idle,
            AsyncState::Pending => Status::Pending,
            AsyncState::Success(_) => Status::Success,
            AsyncState::Error(_) => Status::Error,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            AsyncState::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            AsyncState::Error(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, AsyncState::Pending)
    }
}

type Operation<I, T, E> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

struct Inner<I, T, E> {
    label: &'static str,
    operation: Operation<I, T, E>,
    state: watch::Sender<AsyncState<T, E>>,
    // Only read or written while holding the watch lock (inside send_modify closures)
    generation: AtomicU64,
    immediate: RunOnce,
}

/// Wraps an async operation and tracks the state of its latest invocation.
///
/// Every `execute()` starts a new generation. Results from an older generation, or from a
/// generation that was `reset()`, are dropped instead of overwriting the newer state.
/// Clones share the same state.
pub struct AsyncTask<I, T, E> {
    inner: Arc<Inner<I, T, E>>,
}

impl<I, T, E> Clone for AsyncTask<I, T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<I, T, E> AsyncTask<I, T, E>
where
    I: Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Display + Send + Sync + 'static,
{
    pub fn new<F, Fut>(label: &'static str, operation: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (state, _) = watch::channel(AsyncState::default());
        Self {
            inner: Arc::new(Inner {
                label,
                operation: Arc::new(move |input| operation(input).boxed()),
                state,
                generation: AtomicU64::new(0),
                immediate: RunOnce::new(),
            }),
        }
    }

    /// Create a task that executes once with a default input straight away.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn immediate<F, Fut>(label: &'static str, operation: F) -> Self
    where
        I: Default,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let task = Self::new(label, operation);
        task.run_immediate();
        task
    }

    /// Spawn the initial `execute(I::default())`. Only the first call across all clones
    /// of this task does anything.
    pub fn run_immediate(&self)
    where
        I: Default,
    {
        let task = self.clone();
        self.inner.immediate.run(move || {
            debug!("{}: running immediately", task.inner.label);
            tokio::spawn(async move {
                task.execute(I::default()).await;
            });
        });
    }

    /// Run the operation. State goes to `Pending` right away and to `Success`/`Error`
    /// when the operation settles, unless a newer `execute()` or a `reset()` happened
    /// in the meantime.
    ///
    /// Resolves to the value on success and `None` on failure; the error itself is only
    /// reported through the task state.
    pub async fn execute(&self, input: I) -> Option<T> {
        let generation = self.begin();
        let outcome = (self.inner.operation)(input).await;
        let value = outcome.as_ref().ok().cloned();
        self.settle(generation, outcome);
        value
    }

    /// Back to `Idle`, discarding whatever is in flight.
    pub fn reset(&self) {
        self.inner.state.send_modify(|state| {
            self.inner.generation.fetch_add(1, Ordering::Relaxed);
            *state = AsyncState::Idle;
        });
        debug!("{}: reset", self.inner.label);
    }

    pub fn state(&self) -> AsyncState<T, E> {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> Status {
        self.inner.state.borrow().status()
    }

    pub fn value(&self) -> Option<T> {
        self.inner.state.borrow().value().cloned()
    }

    pub fn error(&self) -> Option<E> {
        self.inner.state.borrow().error().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading()
    }

    /// Receiver that is notified on every state transition.
    pub fn subscribe(&self) -> watch::Receiver<AsyncState<T, E>> {
        self.inner.state.subscribe()
    }

    fn begin(&self) -> u64 {
        let mut generation = 0;
        self.inner.state.send_modify(|state| {
            generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
            *state = AsyncState::Pending;
        });
        debug!("{}: pending (generation {})", self.inner.label, generation);
        generation
    }

    fn settle(&self, generation: u64, outcome: Result<T, E>) {
        let label = self.inner.label;
        let applied = self.inner.state.send_if_modified(|state| {
            if self.inner.generation.load(Ordering::Relaxed) != generation {
                return false;
            }
            *state = match outcome {
                Ok(value) => {
                    debug!("{}: success (generation {})", label, generation);
                    AsyncState::Success(value)
                }
                Err(error) => {
                    warn!("{}: failed (generation {}): {}", label, generation, error);
                    AsyncState::Error(error)
                }
            };
            true
        });

        if !applied {
            debug!("{}: discarding stale result of generation {}", label, generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::poll;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    type Reply = oneshot::Receiver<Result<u32, String>>;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// A task whose operation resolves whenever the test sends on the paired channel.
    fn controlled_task() -> AsyncTask<Reply, u32, String> {
        AsyncTask::new("controlled", |reply: Reply| async move {
            reply.await.unwrap_or_else(|_| Err("sender dropped".to_string()))
        })
    }

    fn assert_invariant(state: &AsyncState<u32, String>) {
        match state.status() {
            Status::Success => assert!(state.value().is_some() && state.error().is_none()),
            Status::Error => assert!(state.value().is_none() && state.error().is_some()),
            Status::Idle | Status::Pending => {
                assert!(state.value().is_none() && state.error().is_none())
            }
        }
        assert_eq!(state.is_loading(), state.status() == Status::Pending);
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let task = controlled_task();
        assert_eq!(task.state(), AsyncState::Idle);
        assert!(!task.is_loading());
        assert_eq!(task.value(), None);
        assert_eq!(task.error(), None);
    }

    #[tokio::test]
    async fn test_success_sets_value() {
        init_logger();
        let task: AsyncTask<u32, u32, String> =
            AsyncTask::new("double", |n: u32| async move { Ok(n * 2) });

        assert_eq!(task.execute(21).await, Some(42));
        assert_eq!(task.status(), Status::Success);
        assert_eq!(task.value(), Some(42));
        assert_eq!(task.error(), None);
    }

    #[tokio::test]
    async fn test_error_is_captured_in_state() {
        init_logger();
        let task: AsyncTask<(), u32, String> =
            AsyncTask::new("failing", |_: ()| async { Err("boom".to_string()) });

        assert_eq!(task.execute(()).await, None);
        assert_eq!(task.state(), AsyncState::Error("boom".to_string()));
    }

    #[tokio::test]
    async fn test_pending_while_in_flight() {
        let task = controlled_task();
        let (tx, rx) = oneshot::channel();

        let mut call = Box::pin(task.execute(rx));
        assert!(poll!(&mut call).is_pending());
        assert_eq!(task.state(), AsyncState::Pending);
        assert!(task.is_loading());

        tx.send(Ok(7)).unwrap();
        assert_eq!(call.await, Some(7));
        assert_eq!(task.state(), AsyncState::Success(7));
    }

    #[tokio::test]
    async fn test_execute_clears_previous_error() {
        let task = controlled_task();
        let (tx, rx) = oneshot::channel();
        tx.send(Err("first".to_string())).unwrap();
        task.execute(rx).await;
        assert_eq!(task.error(), Some("first".to_string()));

        let (_tx, rx) = oneshot::channel();
        let mut call = Box::pin(task.execute(rx));
        assert!(poll!(&mut call).is_pending());
        assert_eq!(task.state(), AsyncState::Pending);
    }

    #[tokio::test]
    async fn test_stale_result_does_not_overwrite_newer_call() {
        init_logger();
        let task = controlled_task();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();

        let mut a = Box::pin(task.execute(rx_a));
        assert!(poll!(&mut a).is_pending());
        let mut b = Box::pin(task.execute(rx_b));
        assert!(poll!(&mut b).is_pending());

        tx_b.send(Ok(2)).unwrap();
        assert_eq!(b.await, Some(2));
        tx_a.send(Ok(1)).unwrap();
        // The superseded caller still gets its own outcome
        assert_eq!(a.await, Some(1));

        assert_eq!(task.state(), AsyncState::Success(2));
    }

    #[tokio::test]
    async fn test_stale_error_does_not_overwrite_newer_call() {
        let task = controlled_task();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();

        let mut a = Box::pin(task.execute(rx_a));
        assert!(poll!(&mut a).is_pending());
        let mut b = Box::pin(task.execute(rx_b));
        assert!(poll!(&mut b).is_pending());

        tx_a.send(Err("old".to_string())).unwrap();
        assert_eq!(a.await, None);
        assert_eq!(task.state(), AsyncState::Pending);

        tx_b.send(Ok(5)).unwrap();
        b.await;
        assert_eq!(task.state(), AsyncState::Success(5));
    }

    #[tokio::test]
    async fn test_reset_during_flight_discards_result() {
        let task = controlled_task();
        let (tx, rx) = oneshot::channel();

        let mut call = Box::pin(task.execute(rx));
        assert!(poll!(&mut call).is_pending());
        task.reset();
        assert_eq!(task.state(), AsyncState::Idle);

        tx.send(Ok(9)).unwrap();
        call.await;
        assert_eq!(task.state(), AsyncState::Idle);
    }

    #[tokio::test]
    async fn test_reset_from_every_status() {
        let task = controlled_task();
        task.reset();
        assert_eq!(task.state(), AsyncState::Idle);

        for outcome in [Ok(1), Err("nope".to_string())] {
            let (tx, rx) = oneshot::channel();
            tx.send(outcome).unwrap();
            task.execute(rx).await;
            assert_ne!(task.status(), Status::Idle);
            task.reset();
            assert_eq!(task.state(), AsyncState::Idle);
        }
    }

    #[tokio::test]
    async fn test_invariant_holds_across_call_sequence() {
        let task = controlled_task();
        let mut watcher = task.subscribe();
        let outcomes = [Ok(1), Err("e1".to_string()), Ok(3), Err("e2".to_string())];

        for (i, outcome) in outcomes.into_iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            let mut call = Box::pin(task.execute(rx));
            assert!(poll!(&mut call).is_pending());
            assert_invariant(&task.state());
            tx.send(outcome).unwrap();
            call.await;
            assert_invariant(&task.state());
            if i % 2 == 1 {
                task.reset();
                assert_invariant(&task.state());
            }
            assert!(watcher.has_changed().unwrap());
            assert_invariant(&watcher.borrow_and_update());
        }
    }

    #[tokio::test]
    async fn test_subscriber_sees_transitions() {
        let task = controlled_task();
        let mut watcher = task.subscribe();
        let (tx, rx) = oneshot::channel();

        let mut call = Box::pin(task.execute(rx));
        assert!(poll!(&mut call).is_pending());
        assert!(watcher.has_changed().unwrap());
        assert_eq!(*watcher.borrow_and_update(), AsyncState::Pending);

        tx.send(Ok(3)).unwrap();
        call.await;
        watcher.changed().await.unwrap();
        assert_eq!(*watcher.borrow_and_update(), AsyncState::Success(3));
    }

    #[tokio::test]
    async fn test_immediate_runs_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let task: AsyncTask<(), usize, String> = AsyncTask::immediate("config", move |_: ()| {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }
        });

        task.run_immediate();
        task.clone().run_immediate();

        let mut watcher = task.subscribe();
        watcher
            .wait_for(|state| state.status() == Status::Success)
            .await
            .unwrap();
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(task.value(), Some(1));
    }

    #[tokio::test]
    async fn test_not_immediate_by_default() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _task: AsyncTask<(), (), String> = AsyncTask::new("lazy", move |_: ()| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
