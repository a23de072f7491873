//! Submit an image, then poll for its thumbnails until they exist.
use anyhow::Result;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::api::{ImageUpload, ProcessingApi, ResultPayload, SubmitResult, ThumbnailClient};
use crate::async_task::{AsyncTask, Status};
use crate::config::Config;
use crate::error::ApiError;
use crate::interval::IntervalRunner;

pub type SubmitTask = AsyncTask<ImageUpload, SubmitResult, ApiError>;
pub type FetchTask = AsyncTask<String, ResultPayload, ApiError>;

/// Where the coordinator is in the submit/poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingPhase {
    Idle,
    Submitting,
    SubmitError,
    Polling,
    PollError,
    Ready,
}

/// Merged snapshot of both tasks, as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingView {
    pub status: Status,
    pub phase: ProcessingPhase,
    pub value: Option<ResultPayload>,
    pub error: Option<ApiError>,
}

/// Drives one submit task and one fetch task.
///
/// `execute()` only submits. Once the submission has produced an id, the poller fetches the
/// result every `poll_interval` until a payload with thumbnails arrives or a fetch fails.
/// A failed fetch pauses polling until `reset()`; there is no automatic retry.
pub struct ProcessingCoordinator {
    submit: SubmitTask,
    fetch: FetchTask,
    poller: IntervalRunner,
    poll_interval: Duration,
}

impl ProcessingCoordinator {
    pub fn new<A: ProcessingApi>(api: Arc<A>, poll_interval: Duration) -> Self {
        let submit_api = api.clone();
        let submit: SubmitTask = AsyncTask::new("submit", move |image: ImageUpload| {
            let api = submit_api.clone();
            async move { api.submit(image).await }
        });

        let fetch: FetchTask = AsyncTask::new("fetch", move |id: String| {
            let api = api.clone();
            async move { api.fetch_result(&id).await }
        });

        let poller = {
            let (submit, fetch) = (submit.clone(), fetch.clone());
            let gate = (submit.clone(), fetch.clone());
            IntervalRunner::new(
                move || poll_once(submit.clone(), fetch.clone()),
                move || should_poll(&gate.0, &gate.1),
            )
            .on_error(|e| warn!("Polling stopped: {:#}", e))
        };

        Self {
            submit,
            fetch,
            poller,
            poll_interval,
        }
    }

    /// Coordinator talking HTTP to the configured service
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(ThumbnailClient::new(config)), config.poll_interval)
    }

    /// Submit an image. Resolves to the submission once the upload settles; thumbnails
    /// arrive later through polling.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn execute(&self, image: ImageUpload) -> Option<SubmitResult> {
        info!("Submitting {}", image.file_name);
        self.start_polling();
        self.submit.execute(image).await
    }

    /// `reset()` followed by `execute()`, for submitting a different image.
    pub async fn restart(&self, image: ImageUpload) -> Option<SubmitResult> {
        self.reset();
        self.execute(image).await
    }

    /// Clear both tasks and stop the poller.
    pub fn reset(&self) {
        self.poller.stop();
        self.submit.reset();
        self.fetch.reset();
        debug!("Processing reset");
    }

    /// The fetch status while a fetch is in flight, otherwise the submit status
    pub fn status(&self) -> Status {
        if self.fetch.is_loading() {
            self.fetch.status()
        } else {
            self.submit.status()
        }
    }

    /// The result, only once it actually has thumbnails
    pub fn value(&self) -> Option<ResultPayload> {
        self.fetch.value().filter(ResultPayload::is_ready)
    }

    pub fn error(&self) -> Option<ApiError> {
        self.fetch.error().or_else(|| self.submit.error())
    }

    pub fn phase(&self) -> ProcessingPhase {
        if self.submit.is_loading() {
            ProcessingPhase::Submitting
        } else if self.submit.error().is_some() {
            ProcessingPhase::SubmitError
        } else if self.value().is_some() {
            ProcessingPhase::Ready
        } else if self.fetch.error().is_some() {
            ProcessingPhase::PollError
        } else if has_submission_id(&self.submit) {
            ProcessingPhase::Polling
        } else {
            ProcessingPhase::Idle
        }
    }

    pub fn view(&self) -> ProcessingView {
        ProcessingView {
            status: self.status(),
            phase: self.phase(),
            value: self.value(),
            error: self.error(),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.submit.is_loading()
    }

    pub fn is_polling(&self) -> bool {
        self.fetch.is_loading()
    }

    pub fn is_loading(&self) -> bool {
        self.is_processing() || self.is_polling()
    }

    /// Whether the poll timer is currently scheduled
    pub fn is_poller_active(&self) -> bool {
        self.poller.is_running()
    }

    pub fn submit_task(&self) -> &SubmitTask {
        &self.submit
    }

    pub fn fetch_task(&self) -> &FetchTask {
        &self.fetch
    }

    /// Wait until the thumbnails are ready or either task has failed.
    ///
    /// Does not return while nothing has been submitted.
    pub async fn wait_until_settled(&self) -> Result<ResultPayload, ApiError> {
        let mut submit_rx = self.submit.subscribe();
        let mut fetch_rx = self.fetch.subscribe();

        loop {
            if let Some(payload) = self.value() {
                return Ok(payload);
            }
            if let Some(error) = self.error() {
                return Err(error);
            }

            tokio::select! {
                _ = submit_rx.changed() => {}
                _ = fetch_rx.changed() => {}
            }
        }
    }

    fn start_polling(&self) {
        if self.poller.delay().is_none() {
            self.poller.set_delay(Some(self.poll_interval));
        } else {
            self.poller.ensure_running();
        }
    }
}

fn has_submission_id(submit: &SubmitTask) -> bool {
    submit.value().map_or(false, |submitted| !submitted.id.is_empty())
}

/// Poll only while there is an id, no ready result and no fetch error.
fn should_poll(submit: &SubmitTask, fetch: &FetchTask) -> bool {
    let has_result = fetch.value().map_or(false, |payload| payload.is_ready());
    has_submission_id(submit) && !has_result && fetch.error().is_none()
}

async fn poll_once(submit: SubmitTask, fetch: FetchTask) -> Result<()> {
    // Reset can land between the gate check and here
    let Some(id) = submit.value().map(|submitted| submitted.id) else {
        debug!("Nothing to poll");
        return Ok(());
    };

    match fetch.execute(id.clone()).await {
        Some(payload) if payload.is_ready() => info!("Thumbnails ready for {}", id),
        Some(_) => debug!("Thumbnails for {} not ready yet", id),
        None => {}
    }
    Ok(())
}
