//! Self-rescheduling timer chain that runs an async callback while a predicate allows it.
use anyhow::Result;
use futures_util::future::{BoxFuture, FutureExt};
use log::{debug, warn};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type Callback = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;
type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(anyhow::Error) + Send + Sync>;

struct Shared {
    callback: RwLock<Callback>,
    should_run: Predicate,
    on_error: RwLock<Option<ErrorHandler>>,
    // Held for the duration of a callback so two chains never overlap
    invoking: tokio::sync::Mutex<()>,
}

impl Shared {
    fn current_callback(&self) -> Callback {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn error_handler(&self) -> Option<ErrorHandler> {
        self.on_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct Chain {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct RunnerState {
    delay: Option<Duration>,
    chain: Option<Chain>,
}

/// Runs `callback` every `delay` for as long as the runner is enabled.
///
/// After each wait the `should_run` predicate is checked; when it passes the callback is
/// awaited before the next wait is scheduled, so ticks never overlap and the spacing is
/// `delay` plus however long the callback took. The callback cell can be swapped at any
/// time and the newest one is always the one invoked.
///
/// A callback error is handed to the error handler and ends the current chain; changing
/// the delay or callback, or calling [`IntervalRunner::ensure_running`], starts a new one.
///
/// Enabling the runner spawns onto the current Tokio runtime.
pub struct IntervalRunner {
    shared: Arc<Shared>,
    state: Mutex<RunnerState>,
}

impl IntervalRunner {
    /// Create a disabled runner. Call [`IntervalRunner::with_delay`] or
    /// [`IntervalRunner::set_delay`] to start ticking.
    pub fn new<F, Fut, P>(callback: F, should_run: P) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
        P: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                callback: RwLock::new(boxed_callback(callback)),
                should_run: Arc::new(should_run),
                on_error: RwLock::new(None),
                invoking: tokio::sync::Mutex::new(()),
            }),
            state: Mutex::new(RunnerState::default()),
        }
    }

    pub fn on_error<H>(self, handler: H) -> Self
    where
        H: Fn(anyhow::Error) + Send + Sync + 'static,
    {
        let handler: ErrorHandler = Arc::new(handler);
        *self
            .shared
            .on_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
        self
    }

    pub fn with_delay(self, delay: Option<Duration>) -> Self {
        self.set_delay(delay);
        self
    }

    /// `Some` (zero included) restarts the chain with the new delay, `None` disables the
    /// runner. A pending wait is cancelled before this returns.
    pub fn set_delay(&self, delay: Option<Duration>) {
        let mut state = self.lock_state();
        state.delay = delay;
        self.restart(&mut state);
    }

    pub fn delay(&self) -> Option<Duration> {
        self.lock_state().delay
    }

    /// Swap in a new callback and reschedule the pending wait.
    pub fn set_callback<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        *self
            .shared
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = boxed_callback(callback);

        let mut state = self.lock_state();
        if state.delay.is_some() {
            self.restart(&mut state);
        }
    }

    /// Start a new chain if the runner is enabled but its chain has ended after an error.
    pub fn ensure_running(&self) {
        let mut state = self.lock_state();
        let finished = state
            .chain
            .as_ref()
            .map_or(true, |chain| chain.handle.is_finished());
        if state.delay.is_some() && finished {
            debug!("Interval chain not running, restarting");
            self.restart(&mut state);
        }
    }

    pub fn stop(&self) {
        self.set_delay(None);
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().chain.as_ref().map_or(false, |chain| {
            !chain.token.is_cancelled() && !chain.handle.is_finished()
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn restart(&self, state: &mut RunnerState) {
        if let Some(chain) = state.chain.take() {
            chain.token.cancel();
        }

        let Some(delay) = state.delay else {
            debug!("Interval disabled");
            return;
        };

        debug!("Interval chain starting with delay {:?}", delay);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_chain(self.shared.clone(), delay, token.clone()));
        state.chain = Some(Chain { token, handle });
    }
}

impl Drop for IntervalRunner {
    fn drop(&mut self) {
        if let Some(chain) = self.lock_state().chain.take() {
            chain.token.cancel();
        }
    }
}

fn boxed_callback<F, Fut>(callback: F) -> Callback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || callback().boxed())
}

async fn run_chain(shared: Arc<Shared>, delay: Duration, token: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let _invoking = shared.invoking.lock().await;
        if token.is_cancelled() {
            break;
        }
        if !(shared.should_run)() {
            continue;
        }

        let callback = shared.current_callback();
        if let Err(e) = callback().await {
            warn!("Interval callback failed, stopping chain: {:#}", e);
            if let Some(handler) = shared.error_handler() {
                handler(e);
            }
            break;
        }
    }
    debug!("Interval chain finished");
}
