//! Request executor for asynchronous remote operations.
//!
//! The server runs long operations in the background: the client submits a
//! descriptor, receives a handle, and polls it until the operation finishes.
//! [`RequestExecutor::execute`] wraps that protocol and turns every way it can
//! go wrong into a [`RequestError`].
//!
//! # Polling
//!
//! The loop sleeps [`ExecutorSettings::poll_interval`] between polls and gives
//! up after [`ExecutorSettings::max_wait`]. A transient transport error on a
//! poll is tolerated once per request; anything else ends the request. The
//! sleep races a [`CancellationToken`] so an interrupt never leaves the caller
//! parked in the loop.
//!
//! # Example
//!
//! ```no_run
//! use omero_downloader::remote::{FoundChildren, HttpSession, OperationDescriptor};
//! use omero_downloader::request::{ExecutorSettings, RequestExecutor};
//! use omero_downloader::target::Target;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(session: &HttpSession) -> Result<(), Box<dyn std::error::Error>> {
//! let executor =
//!     RequestExecutor::new(session, ExecutorSettings::default(), CancellationToken::new());
//! let targets = vec![Target::parse("Dataset:1")?];
//! let found: FoundChildren = executor
//!     .execute("finding images", &OperationDescriptor::find_images(&targets))
//!     .await?;
//! println!("{} images", found.images().len());
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::RequestError;

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::remote::{
    ExpectedResponse, HandleStatus, OperationDescriptor, RemoteOperationService, RequestHandle,
};

/// Default delay between polls (250 milliseconds).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default upper bound on how long one request is polled (5 minutes).
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

/// Timing of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Delay before each poll.
    pub poll_interval: Duration,
    /// Total time after which a still-running request is abandoned.
    pub max_wait: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl ExecutorSettings {
    /// Creates settings with the given interval and wait bound.
    #[must_use]
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            poll_interval,
            max_wait,
        }
    }

    /// Returns the number of polls that fit in the wait bound (at least one).
    #[must_use]
    pub fn max_polls(&self) -> u64 {
        let interval = self.poll_interval.as_millis().max(1);
        let polls = self.max_wait.as_millis().div_ceil(interval).max(1);
        u64::try_from(polls).unwrap_or(u64::MAX)
    }
}

/// Lifecycle of one submitted request.
///
/// Transitions only move forward:
/// `Submitted -> Polling -> {Succeeded | Failed | TimedOut}`, and a request
/// whose submission fails goes straight from `Submitted` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Descriptor handed to the server.
    Submitted,
    /// Handle obtained, waiting for a terminal state.
    Polling,
    /// Finished with the expected response.
    Succeeded,
    /// Finished with an error, wrong response shape, or transport failure.
    Failed,
    /// Wait bound exceeded or polling interrupted.
    TimedOut,
}

impl RequestState {
    /// Returns true if no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Submitted, Self::Polling | Self::Failed) => true,
            (Self::Polling, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// Book-keeping for one request: what was asked, when, and where it stands.
#[derive(Debug)]
struct Request<'d> {
    description: &'d str,
    descriptor: &'d OperationDescriptor,
    submitted_at: Instant,
    state: RequestState,
}

impl<'d> Request<'d> {
    fn new(description: &'d str, descriptor: &'d OperationDescriptor) -> Self {
        Self {
            description,
            descriptor,
            submitted_at: Instant::now(),
            state: RequestState::Submitted,
        }
    }

    fn advance(&mut self, next: RequestState) {
        if self.state.can_advance_to(next) {
            debug!(
                description = self.description,
                from = ?self.state,
                to = ?next,
                "request state changed"
            );
            self.state = next;
        } else {
            warn!(
                description = self.description,
                from = ?self.state,
                to = ?next,
                "ignoring backwards request state transition"
            );
        }
    }
}

/// Submits operations and polls them to completion.
///
/// Holds no state between calls; each [`execute`](Self::execute) is
/// independent.
pub struct RequestExecutor<'a> {
    service: &'a dyn RemoteOperationService,
    settings: ExecutorSettings,
    cancel: CancellationToken,
}

impl<'a> RequestExecutor<'a> {
    /// Creates an executor over `service`.
    #[must_use]
    pub fn new(
        service: &'a dyn RemoteOperationService,
        settings: ExecutorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            settings,
            cancel,
        }
    }

    /// Returns the poll timing in use.
    #[must_use]
    pub fn settings(&self) -> ExecutorSettings {
        self.settings
    }

    /// Runs `descriptor` to completion and returns its response as `R`.
    ///
    /// `description` names the operation in logs and errors.
    ///
    /// # Errors
    ///
    /// - [`RequestError::ProtocolMismatch`] if the response is not an `R`
    /// - [`RequestError::OperationFailed`] if the server reports a failure
    /// - [`RequestError::Timeout`] if the wait bound is exceeded
    /// - [`RequestError::Cancelled`] if the cancellation token fires
    /// - [`RequestError::Remote`] on transport errors
    #[instrument(skip(self, descriptor), fields(expected = %R::KIND))]
    pub async fn execute<R: ExpectedResponse>(
        &self,
        description: &str,
        descriptor: &OperationDescriptor,
    ) -> Result<R, RequestError> {
        let mut request = Request::new(description, descriptor);
        debug!(descriptor = ?request.descriptor, "submitting operation");

        let handle = match self.service.submit(request.descriptor).await {
            Ok(handle) => handle,
            Err(source) => {
                request.advance(RequestState::Failed);
                return Err(RequestError::remote(description, source));
            }
        };
        request.advance(RequestState::Polling);

        let outcome = self.poll_to_completion::<R>(&request, &handle).await;
        match &outcome {
            Ok(_) => request.advance(RequestState::Succeeded),
            Err(RequestError::Timeout { .. } | RequestError::Cancelled { .. }) => {
                request.advance(RequestState::TimedOut);
            }
            Err(_) => request.advance(RequestState::Failed),
        }

        if !matches!(outcome, Err(RequestError::Cancelled { .. })) {
            if let Err(error) = self.service.close(&handle).await {
                debug!(handle = %handle, error = %error, "failed to release request handle");
            }
        }
        outcome
    }

    async fn poll_to_completion<R: ExpectedResponse>(
        &self,
        request: &Request<'_>,
        handle: &RequestHandle,
    ) -> Result<R, RequestError> {
        let description = request.description;
        let max_polls = self.settings.max_polls();
        let mut transient_retry_used = false;
        let mut polls: u64 = 0;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Err(RequestError::cancelled(description));
                }
                () = tokio::time::sleep(self.settings.poll_interval) => {}
            }
            polls += 1;

            let polled = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Err(RequestError::cancelled(description));
                }
                polled = self.service.poll(handle) => polled,
            };

            match polled {
                Ok(HandleStatus::Running) => {}
                Ok(HandleStatus::Finished { response }) => {
                    let actual = response.kind();
                    return R::from_response(response).map_err(|_| {
                        RequestError::protocol_mismatch(description, R::KIND, actual)
                    });
                }
                Ok(HandleStatus::Failed { error }) => {
                    return Err(RequestError::operation_failed(description, error));
                }
                Err(error) if error.is_transient() && !transient_retry_used => {
                    warn!(handle = %handle, error = %error, "transient error polling request, retrying once");
                    transient_retry_used = true;
                }
                Err(error) => return Err(RequestError::remote(description, error)),
            }

            let waited = request.submitted_at.elapsed();
            if polls >= max_polls || waited >= self.settings.max_wait {
                warn!(handle = %handle, polls, waited_ms = waited.as_millis(), "request timed out");
                return Err(RequestError::timeout(description, waited));
            }
        }
    }
}
