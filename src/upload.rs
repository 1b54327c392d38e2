use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::transport::{MultipartBody, ProgressFn, Transport};

#[derive(Debug, Clone, PartialEq)]
pub enum UploadPhase {
    Pending,
    Transferring,
    Succeeded,
    Failed(ApiError),
    Cancelled,
}

impl UploadPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadPhase::Succeeded | UploadPhase::Failed(_) | UploadPhase::Cancelled
        )
    }
}

/// One in-flight multipart submission.
#[derive(Clone)]
pub struct UploadTask {
    progress: Arc<AtomicU8>,
    phase: Arc<Mutex<UploadPhase>>,
    cancel: CancellationToken,
}

impl Default for UploadTask {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadTask {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    pub fn with_token(cancel: CancellationToken) -> Self {
        UploadTask {
            progress: Arc::new(AtomicU8::new(0)),
            phase: Arc::new(Mutex::new(UploadPhase::Pending)),
            cancel,
        }
    }

    /// Highest progress seen so far, in `[0, 100]`.
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase_guard().clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn phase_guard(&self) -> MutexGuard<'_, UploadPhase> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, phase: UploadPhase) {
        let mut guard = self.phase_guard();
        if !guard.is_terminal() {
            *guard = phase;
        }
    }

    /// Progress sink that records the running maximum and forwards only
    /// increases to `observer`.
    fn progress_sink(&self, observer: Option<ProgressFn>) -> ProgressFn {
        let progress = Arc::clone(&self.progress);
        Arc::new(move |pct: u8| {
            let pct = pct.min(100);
            let previous = progress.fetch_max(pct, Ordering::SeqCst);
            if pct > previous {
                if pct % 25 == 0 {
                    debug!(progress = pct, "upload progress");
                }
                if let Some(observer) = &observer {
                    observer(pct);
                }
            }
        })
    }

    /// Send `body` to `path`, resolving once the full response has arrived.
    pub async fn run(
        &self,
        transport: &dyn Transport,
        path: &str,
        body: MultipartBody,
        observer: Option<ProgressFn>,
    ) -> Result<Value, ApiError> {
        if self.cancel.is_cancelled() {
            self.set_phase(UploadPhase::Cancelled);
            return Err(ApiError::Cancelled);
        }
        self.set_phase(UploadPhase::Transferring);
        let sink = self.progress_sink(observer);

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ApiError::Cancelled),
            result = transport.upload(path, body, sink, self.cancel.clone()) => result,
        };

        match &result {
            Ok(_) => {
                info!(path, "upload finished");
                self.set_phase(UploadPhase::Succeeded);
            }
            Err(ApiError::Cancelled) => {
                info!(path, "upload cancelled");
                self.set_phase(UploadPhase::Cancelled);
            }
            Err(err) => self.set_phase(UploadPhase::Failed(err.clone())),
        }
        result
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<T> {
    Idle,
    Pending,
    Succeeded(T),
    Failed(ApiError),
}

impl<T> MutationState<T> {
    /// Settled data or error; idle and pending slots read as not submitted.
    pub fn into_result(self) -> Result<T, ApiError> {
        match self {
            MutationState::Succeeded(data) => Ok(data),
            MutationState::Failed(err) => Err(err),
            MutationState::Idle | MutationState::Pending => {
                Err(ApiError::Invalid("submission has not settled".to_string()))
            }
        }
    }
}

/// Identifies one submission to a [`Mutation`].
#[derive(Debug, Clone)]
pub struct Ticket {
    seq: u64,
    cancel: CancellationToken,
}

impl Ticket {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

struct MutationSlot<T> {
    seq: u64,
    state: MutationState<T>,
    current: Option<CancellationToken>,
}

/// Outcome slot for one kind of submission; the latest submission wins.
pub struct Mutation<T> {
    slot: Arc<Mutex<MutationSlot<T>>>,
}

impl<T> Clone for Mutation<T> {
    fn clone(&self) -> Self {
        Mutation {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Clone> Default for Mutation<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Mutation<T> {
    pub fn new() -> Self {
        Mutation {
            slot: Arc::new(Mutex::new(MutationSlot {
                seq: 0,
                state: MutationState::Idle,
                current: None,
            })),
        }
    }

    fn slot(&self) -> MutexGuard<'_, MutationSlot<T>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a submission, cancelling whichever one was still running.
    pub fn begin(&self) -> Ticket {
        let mut slot = self.slot();
        if let Some(previous) = slot.current.take() {
            debug!("superseding running submission");
            previous.cancel();
        }
        slot.seq += 1;
        slot.state = MutationState::Pending;
        let cancel = CancellationToken::new();
        slot.current = Some(cancel.clone());
        Ticket {
            seq: slot.seq,
            cancel,
        }
    }

    /// Record the outcome for `ticket`. Returns false when a newer
    /// submission has started since, in which case nothing changes.
    pub fn settle(&self, ticket: &Ticket, result: Result<T, ApiError>) -> bool {
        let mut slot = self.slot();
        if ticket.seq != slot.seq {
            debug!(stale = ticket.seq, current = slot.seq, "dropping superseded result");
            return false;
        }
        slot.current = None;
        slot.state = match result {
            Ok(data) => MutationState::Succeeded(data),
            Err(err) => MutationState::Failed(err),
        };
        true
    }

    /// Begin, run `submit` with the ticket's cancellation token, settle.
    ///
    /// Returns this submission's own outcome. A caller superseded by a newer
    /// submission gets `Failed(Cancelled)`, never the newer one's state.
    pub async fn run<F, Fut>(&self, submit: F) -> MutationState<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let ticket = self.begin();
        let result = submit(ticket.cancel_token()).await;
        let outcome = match &result {
            Ok(data) => MutationState::Succeeded(data.clone()),
            Err(err) => MutationState::Failed(err.clone()),
        };
        if self.settle(&ticket, result) {
            outcome
        } else {
            MutationState::Failed(ApiError::Cancelled)
        }
    }

    /// Cancel the running submission, if any, and return to idle.
    pub fn reset(&self) {
        let mut slot = self.slot();
        if let Some(current) = slot.current.take() {
            current.cancel();
        }
        slot.seq += 1;
        slot.state = MutationState::Idle;
    }

    pub fn state(&self) -> MutationState<T> {
        self.slot().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.slot().state, MutationState::Pending)
    }

    pub fn data(&self) -> Option<T> {
        match &self.slot().state {
            MutationState::Succeeded(data) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<ApiError> {
        match &self.slot().state {
            MutationState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }
}
