//! Export job lifecycle.
//!
//! An [`ExportJob`] tracks one kick-off from its first response to a terminal
//! outcome:
//!
//! ```text
//! NotStarted --initiate--> Ongoing | Completed | Failed | Cancelled
//! Ongoing    --poll------> Ongoing | Completed | Failed | Cancelled
//! Ongoing    --cancel----> Ongoing (cancel requested, confirmed by a later poll)
//! Completed | Failed | Cancelled: final, answered from cache without I/O
//! ```
//!
//! No background task is spawned. Polling happens inside [`ExportJob::is_done`],
//! [`ExportJob::is_cancelled`] and [`ExportJob::wait`], on the caller's task.
//! All of them serialize on one lock, so two callers never poll the same job
//! concurrently, and a status response is reused until its `Retry-After`
//! deadline has passed.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use url::Url;

use crate::error::{BulkClientError, Result};
use crate::interpret::{self, STATUS_ACCEPTED, StatusClass};
use crate::manifest::{
    CompletionManifest, OperationFailure, materialize_failure, materialize_manifest,
};
use crate::request::RequestDescriptor;
use crate::response::RawResponse;
use crate::transport::ExportTransport;

/// Observable lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    Ongoing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::NotStarted => write!(f, "not_started"),
            JobState::Ongoing => write!(f, "ongoing"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal result of a job. Remote failure and cancellation are ordinary values.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Completed(CompletionManifest),
    Failed(OperationFailure),
    Cancelled,
}

impl ExportOutcome {
    pub fn state(&self) -> JobState {
        match self {
            Self::Completed(_) => JobState::Completed,
            Self::Failed(_) => JobState::Failed,
            Self::Cancelled => JobState::Cancelled,
        }
    }

    pub fn manifest(&self) -> Option<&CompletionManifest> {
        match self {
            Self::Completed(manifest) => Some(manifest),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&OperationFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// What one polling round of [`ExportJob::wait`] found.
enum WaitStep {
    Done(ExportOutcome),
    Pending(Duration),
}

enum Phase {
    NotStarted,
    Ongoing,
    Finished(ExportOutcome),
}

struct JobInner {
    phase: Phase,
    location: Option<Url>,
    /// Most recent status response; its body has already been consumed when terminal.
    last_response: Option<RawResponse>,
    next_poll_at: Instant,
    progress: Option<String>,
    cancel_requested: bool,
}

impl JobInner {
    fn state(&self) -> JobState {
        match &self.phase {
            Phase::NotStarted => JobState::NotStarted,
            Phase::Ongoing => JobState::Ongoing,
            Phase::Finished(outcome) => outcome.state(),
        }
    }

    fn outcome(&self) -> Option<&ExportOutcome> {
        match &self.phase {
            Phase::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }

    fn polling_location(&self) -> Result<Url> {
        self.location
            .clone()
            .ok_or_else(|| BulkClientError::protocol_violation("job has no polling location"))
    }
}

/// Handle to one asynchronous export job.
///
/// Share it between tasks with an `Arc`; every method takes `&self`.
pub struct ExportJob {
    transport: Arc<dyn ExportTransport>,
    min_poll_interval: Duration,
    inner: Mutex<JobInner>,
    cancel_signal: Notify,
    /// Bumped on every accepted cancellation.
    cancel_epoch: AtomicU64,
}

impl fmt::Debug for ExportJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportJob")
            .field("min_poll_interval", &self.min_poll_interval)
            .finish_non_exhaustive()
    }
}

impl ExportJob {
    pub(crate) fn new(transport: Arc<dyn ExportTransport>, min_poll_interval: Duration) -> Self {
        Self::with_phase(transport, min_poll_interval, Phase::NotStarted, None)
    }

    /// A job already running on the server, known only by its polling location.
    pub(crate) fn resume(
        transport: Arc<dyn ExportTransport>,
        min_poll_interval: Duration,
        location: Url,
    ) -> Self {
        Self::with_phase(transport, min_poll_interval, Phase::Ongoing, Some(location))
    }

    fn with_phase(
        transport: Arc<dyn ExportTransport>,
        min_poll_interval: Duration,
        phase: Phase,
        location: Option<Url>,
    ) -> Self {
        Self {
            transport,
            min_poll_interval,
            inner: Mutex::new(JobInner {
                phase,
                location,
                last_response: None,
                next_poll_at: Instant::now(),
                progress: None,
                cancel_requested: false,
            }),
            cancel_signal: Notify::new(),
            cancel_epoch: AtomicU64::new(0),
        }
    }

    /// Sends the kick-off request. Called exactly once, before the job is handed out.
    pub(crate) async fn initiate(&self, request: &RequestDescriptor) -> Result<JobState> {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.phase, Phase::NotStarted) {
            return Err(BulkClientError::caller_contract("export job was already initiated"));
        }

        let response = self.transport.initiate(request).await?;
        Self::apply(&mut inner, response, Some(request.uri()))?;
        Ok(inner.state())
    }

    /// State as of the last observed response. Never performs I/O.
    pub async fn state(&self) -> JobState {
        self.inner.lock().await.state()
    }

    /// Current polling location.
    pub async fn location(&self) -> Option<Url> {
        self.inner.lock().await.location.clone()
    }

    /// Last `X-Progress` value reported by the server.
    pub async fn progress(&self) -> Option<String> {
        self.inner.lock().await.progress.clone()
    }

    /// Status code of the last kick-off or status response.
    pub async fn last_status(&self) -> Option<u16> {
        self.inner
            .lock()
            .await
            .last_response
            .as_ref()
            .map(RawResponse::status)
    }

    /// Whether the server accepted a cancellation request for this job.
    pub async fn cancel_requested(&self) -> bool {
        self.inner.lock().await.cancel_requested
    }

    /// Whether the job reached a terminal state, polling if the cached status is stale.
    ///
    /// # Errors
    ///
    /// Transport failures and protocol violations from the poll are returned
    /// as errors and leave the job unchanged.
    pub async fn is_done(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        self.refresh(&mut inner).await?;
        Ok(inner.state().is_terminal())
    }

    /// Whether the server confirmed cancellation, polling if the cached status is stale.
    pub async fn is_cancelled(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        self.refresh(&mut inner).await?;
        Ok(inner.state() == JobState::Cancelled)
    }

    /// Asks the server to cancel the job.
    ///
    /// Returns `false` without any request if the job is already terminal, and
    /// `false` if the server does not answer `202 Accepted`. An accepted request
    /// wakes every pending [`wait`](Self::wait); the job itself stays `Ongoing`
    /// until a later status response carries the cancellation marker.
    pub async fn cancel(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.phase {
            Phase::Finished(_) => {
                tracing::debug!(state = %inner.state(), "Export job already finished; nothing to cancel");
                return Ok(false);
            }
            Phase::NotStarted => {
                return Err(BulkClientError::caller_contract("export job was never initiated"));
            }
            Phase::Ongoing => {}
        }

        let location = inner.polling_location()?;
        let response = self.transport.cancel(&location).await?;

        if response.status() != STATUS_ACCEPTED {
            tracing::warn!(
                location = %location,
                status = response.status(),
                "Server rejected bulk export cancellation"
            );
            return Ok(false);
        }

        inner.cancel_requested = true;
        self.cancel_epoch.fetch_add(1, Ordering::SeqCst);
        drop(inner);

        tracing::info!(location = %location, "Bulk export cancellation accepted");
        self.cancel_signal.notify_waiters();
        Ok(true)
    }

    /// Waits until the job is terminal, sleeping between polls.
    ///
    /// Each sleep lasts until the `Retry-After` deadline of the last status
    /// response, but never less than the configured minimum poll interval. An
    /// accepted [`cancel`](Self::cancel) from another task ends the wait at once
    /// with [`ExportOutcome::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if `timeout` elapses first, including while another
    /// caller holds the job or a status request is in flight. An interrupted
    /// status request leaves the job as it was, and it may be waited on again.
    /// A timeout too large to represent as a deadline waits without limit.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<ExportOutcome> {
        let deadline =
            timeout.and_then(|limit| Instant::now().checked_add(limit).map(|at| (at, limit)));
        let cancel_epoch = self.cancel_epoch.load(Ordering::SeqCst);

        loop {
            let cancelled = self.cancel_signal.notified();
            tokio::pin!(cancelled);
            cancelled.as_mut().enable();

            if self.cancel_epoch.load(Ordering::SeqCst) != cancel_epoch {
                tracing::info!("Cancellation requested while waiting for bulk export");
                return Ok(ExportOutcome::Cancelled);
            }

            let step = match deadline {
                Some((at, limit)) => tokio::time::timeout_at(at, self.wait_step())
                    .await
                    .map_err(|_| BulkClientError::Timeout(limit))??,
                None => self.wait_step().await?,
            };
            let backoff = match step {
                WaitStep::Done(outcome) => return Ok(outcome),
                WaitStep::Pending(backoff) => backoff,
            };

            let mut sleep_for = backoff.max(self.min_poll_interval);
            if let Some((deadline, limit)) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(BulkClientError::Timeout(limit));
                }
                sleep_for = sleep_for.min(remaining);
            }

            tracing::debug!(sleep = ?sleep_for, "Waiting for bulk export");
            tokio::select! {
                biased;
                () = &mut cancelled => {
                    tracing::info!("Cancellation requested while waiting for bulk export");
                    return Ok(ExportOutcome::Cancelled);
                }
                () = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    async fn wait_step(&self) -> Result<WaitStep> {
        let mut inner = self.inner.lock().await;
        self.refresh(&mut inner).await?;
        Ok(match inner.outcome() {
            Some(outcome) => WaitStep::Done(outcome.clone()),
            None => WaitStep::Pending(inner.next_poll_at.saturating_duration_since(Instant::now())),
        })
    }

    /// The terminal outcome. Never performs I/O.
    ///
    /// # Errors
    ///
    /// Returns `CallerContract` if the job has not been observed as done yet.
    pub async fn result(&self) -> Result<ExportOutcome> {
        let inner = self.inner.lock().await;
        inner.outcome().cloned().ok_or_else(|| {
            BulkClientError::caller_contract(format!(
                "result requested while export job is {}",
                inner.state()
            ))
        })
    }

    /// Polls unless the job is finished or the cached response is still fresh.
    async fn refresh(&self, inner: &mut JobInner) -> Result<()> {
        match inner.phase {
            Phase::Finished(_) => return Ok(()),
            Phase::NotStarted => {
                return Err(BulkClientError::caller_contract("export job was never initiated"));
            }
            Phase::Ongoing => {}
        }

        let now = Instant::now();
        if inner.last_response.is_some() && now < inner.next_poll_at {
            let remaining = inner.next_poll_at - now;
            tracing::trace!(remaining = ?remaining, "Using cached bulk export status");
            return Ok(());
        }

        let location = inner.polling_location()?;
        tracing::info!(location = %location, "Polling bulk export status");
        let response = self.transport.poll(&location).await?;
        Self::apply(inner, response, None)
    }

    /// Folds a kick-off or status response into the job.
    ///
    /// Everything that can fail is evaluated before the job is touched, so a
    /// protocol violation leaves the previous state in place.
    fn apply(inner: &mut JobInner, mut response: RawResponse, request_uri: Option<&Url>) -> Result<()> {
        let progress = interpret::progress(&response).map(str::to_string);

        if interpret::is_cancelled(&response) {
            tracing::info!(status = response.status(), progress = ?progress, "Bulk export cancelled");
            inner.progress = progress;
            inner.last_response = Some(response);
            inner.phase = Phase::Finished(ExportOutcome::Cancelled);
            return Ok(());
        }

        let status = response.status();
        match interpret::classify_status(status)? {
            StatusClass::InProgress | StatusClass::RateLimited => {
                let base = inner.location.as_ref().or(request_uri);
                let location = match interpret::next_location(&response, base)? {
                    Some(location) => location,
                    None => inner.location.clone().ok_or_else(|| {
                        BulkClientError::protocol_violation(format!(
                            "HTTP {status} kick-off response has no Content-Location header"
                        ))
                    })?,
                };
                let backoff = interpret::retry_after(&response);

                tracing::info!(
                    location = %location,
                    status,
                    progress = ?progress,
                    retry_after = ?backoff,
                    "Bulk export in progress"
                );

                inner.location = Some(location);
                inner.next_poll_at = deadline_after(backoff);
                inner.progress = progress;
                inner.last_response = Some(response);
                inner.phase = Phase::Ongoing;
            }
            StatusClass::Success => {
                let body = response.take_body();
                let manifest = materialize_manifest(body.as_deref());
                tracing::info!(
                    status,
                    outputs = manifest.output.len(),
                    errors = manifest.error.len(),
                    "Bulk export completed"
                );
                inner.progress = progress;
                inner.last_response = Some(response);
                inner.phase = Phase::Finished(ExportOutcome::Completed(manifest));
            }
            StatusClass::Failure => {
                let body = response.take_body();
                let failure = materialize_failure(status, body.as_deref());
                tracing::info!(status, issues = failure.issues.len(), "Bulk export failed");
                inner.progress = progress;
                inner.last_response = Some(response);
                inner.phase = Phase::Finished(ExportOutcome::Failed(failure));
            }
        }
        Ok(())
    }
}

/// `now + delay`, falling back to the longest representable `Retry-After`
/// deadline when the sum overflows.
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(interpret::MAX_RETRY_AFTER))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    /// Replays canned poll responses; kick-off and cancel are unused here.
    struct ReplayTransport {
        polls: StdMutex<VecDeque<RawResponse>>,
    }

    impl ReplayTransport {
        fn new(polls: Vec<RawResponse>) -> Arc<Self> {
            Arc::new(Self {
                polls: StdMutex::new(polls.into()),
            })
        }
    }

    #[async_trait]
    impl ExportTransport for ReplayTransport {
        async fn initiate(&self, _request: &RequestDescriptor) -> Result<RawResponse> {
            Err(BulkClientError::transport("not scripted"))
        }

        async fn poll(&self, _location: &Url) -> Result<RawResponse> {
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| BulkClientError::transport("no more responses"))
        }

        async fn cancel(&self, _location: &Url) -> Result<RawResponse> {
            Ok(RawResponse::new(202))
        }
    }

    fn location() -> Url {
        Url::parse("http://fhir.test/status/1").unwrap()
    }

    #[test]
    fn test_job_state_terminal() {
        assert!(!JobState::NotStarted.is_terminal());
        assert!(!JobState::Ongoing.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert_eq!(JobState::Ongoing.to_string(), "ongoing");
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = ExportOutcome::Completed(CompletionManifest::default());
        assert_eq!(outcome.state(), JobState::Completed);
        assert!(outcome.manifest().is_some());
        assert!(outcome.failure().is_none());

        let outcome = ExportOutcome::Failed(OperationFailure::default());
        assert_eq!(outcome.state(), JobState::Failed);
        assert!(outcome.failure().is_some());

        assert_eq!(ExportOutcome::Cancelled.state(), JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_resumed_job_polls_immediately() {
        let transport = ReplayTransport::new(vec![RawResponse::new(200)]);
        let job = ExportJob::resume(transport, Duration::from_secs(1), location());

        assert_eq!(job.state().await, JobState::Ongoing);
        assert!(job.is_done().await.unwrap());
        assert_eq!(job.state().await, JobState::Completed);
        assert_eq!(job.last_status().await, Some(200));
    }

    #[tokio::test]
    async fn test_unknown_status_leaves_job_unchanged() {
        let transport = ReplayTransport::new(vec![
            RawResponse::new(302),
            RawResponse::new(202).with_header("X-Progress", "working").unwrap(),
        ]);
        let job = ExportJob::resume(transport, Duration::from_secs(1), location());

        let err = job.is_done().await.unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(job.state().await, JobState::Ongoing);
        assert_eq!(job.last_status().await, None);

        assert!(!job.is_done().await.unwrap());
        assert_eq!(job.progress().await.as_deref(), Some("working"));
    }

    #[tokio::test]
    async fn test_poll_location_is_updated() {
        let transport = ReplayTransport::new(vec![
            RawResponse::new(202)
                .with_header("Content-Location", "/status/2")
                .unwrap(),
            RawResponse::new(200),
        ]);
        let job = ExportJob::resume(transport, Duration::from_secs(1), location());

        assert!(!job.is_done().await.unwrap());
        assert_eq!(
            job.location().await.unwrap().as_str(),
            "http://fhir.test/status/2"
        );
    }

    #[tokio::test]
    async fn test_never_initiated_job_is_a_contract_error() {
        let transport = ReplayTransport::new(vec![]);
        let job = ExportJob::new(transport, Duration::from_secs(1));

        assert_eq!(job.state().await, JobState::NotStarted);
        assert!(job.is_done().await.unwrap_err().is_caller_contract());
        assert!(job.cancel().await.unwrap_err().is_caller_contract());
    }

    #[tokio::test]
    async fn test_rate_limited_is_not_terminal() {
        let transport = ReplayTransport::new(vec![
            RawResponse::new(429).with_header("Retry-After", "30").unwrap(),
        ]);
        let job = ExportJob::resume(transport, Duration::from_secs(1), location());

        assert!(!job.is_done().await.unwrap());
        assert_eq!(job.state().await, JobState::Ongoing);
        // Within the Retry-After window the cached 429 is reused; the replay queue is empty.
        assert!(!job.is_done().await.unwrap());
    }

    #[tokio::test]
    async fn test_huge_retry_after_keeps_job_ongoing() {
        let transport = ReplayTransport::new(vec![
            RawResponse::new(202)
                .with_header("Retry-After", "18446744073709551615")
                .unwrap(),
        ]);
        let job = ExportJob::resume(transport, Duration::from_secs(1), location());

        assert!(!job.is_done().await.unwrap());
        assert_eq!(job.state().await, JobState::Ongoing);
        assert!(!job.is_done().await.unwrap());
    }

    #[tokio::test]
    async fn test_deadline_after_saturates() {
        let now = Instant::now();
        assert!(deadline_after(Duration::MAX) > now);
        assert!(deadline_after(Duration::from_secs(5)) >= now + Duration::from_secs(5));
    }
}
