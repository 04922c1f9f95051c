//! Runtime bootstrap pipeline
//!
//! One pipeline per runtime kind. The first [`BootstrapPipeline::ensure_ready`]
//! call spawns the load; later and concurrent callers await the same
//! in-flight future, so the adapter is never loaded twice.
//!
//! Phases move forward only:
//! `NotStarted -> LoadingCore -> LoadingLibraries -> Ready`. `Failed` is
//! reachable from either loading phase and is followed by a degraded
//! `Ready` so cells can run and report a runtime-level error instead of
//! waiting forever.

use crate::adapter::RuntimeAdapter;
use crate::error::BootstrapError;
use crate::kind::RuntimeKind;
use futures::future::{BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Bootstrap phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
    /// Not requested yet
    NotStarted,
    /// Loading the interpreter
    LoadingCore,
    /// Loading optional libraries
    LoadingLibraries,
    /// Usable, possibly degraded
    Ready,
    /// Core load failed
    Failed,
}

impl BootstrapPhase {
    /// Phases reachable from this one
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [BootstrapPhase] {
        match self {
            Self::NotStarted => &[Self::LoadingCore],
            Self::LoadingCore => &[Self::LoadingLibraries, Self::Failed],
            Self::LoadingLibraries => &[Self::Ready, Self::Failed],
            // degraded best-effort mode
            Self::Failed => &[Self::Ready],
            Self::Ready => &[],
        }
    }

    /// Check if a transition is allowed
    #[must_use]
    pub fn can_transition_to(self, to: BootstrapPhase) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Whether a load is in progress
    #[must_use]
    pub fn is_loading(self) -> bool {
        matches!(self, Self::LoadingCore | Self::LoadingLibraries)
    }
}

/// Validate a phase transition
///
/// # Errors
/// Returns [`BootstrapError::IllegalTransition`] for backward or skipping moves.
pub fn validate_transition(from: BootstrapPhase, to: BootstrapPhase) -> Result<(), BootstrapError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(BootstrapError::IllegalTransition { from, to })
    }
}

/// Observable pipeline state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapStatus {
    /// Current phase
    pub phase: BootstrapPhase,
    /// Ready after a failure
    pub degraded: bool,
    /// Reason for the failure, if any
    pub failure: Option<String>,
    /// Per-library load result, in load order
    pub libraries: IndexMap<String, bool>,
}

impl Default for BootstrapStatus {
    fn default() -> Self {
        Self {
            phase: BootstrapPhase::NotStarted,
            degraded: false,
            failure: None,
            libraries: IndexMap::new(),
        }
    }
}

impl BootstrapStatus {
    /// Whether cells may run
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase == BootstrapPhase::Ready
    }

    /// Number of libraries loaded successfully
    #[must_use]
    pub fn libraries_loaded(&self) -> usize {
        self.libraries.values().filter(|ok| **ok).count()
    }
}

/// Pipeline notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapEvent {
    /// Core loaded, libraries loading
    LoadingLibraries { kind: RuntimeKind },
    /// Load failed; a degraded `Ready` follows
    Failed { kind: RuntimeKind, reason: String },
    /// Sent exactly once per pipeline
    Ready { kind: RuntimeKind, degraded: bool },
}

/// Result of a finished bootstrap
#[derive(Debug, Clone)]
pub struct ReadyHandle {
    /// Runtime kind
    pub kind: RuntimeKind,
    /// Adapter to execute with
    pub adapter: Arc<dyn RuntimeAdapter>,
    /// Ready after a failure
    pub degraded: bool,
    /// Reason for the failure, if any
    pub failure: Option<String>,
}

type InFlight = Shared<BoxFuture<'static, ReadyHandle>>;

#[derive(Debug)]
struct PipelineInner {
    kind: RuntimeKind,
    adapter: Arc<dyn RuntimeAdapter>,
    status: watch::Sender<BootstrapStatus>,
    events: broadcast::Sender<BootstrapEvent>,
}

/// Shared loader for one runtime kind
pub struct BootstrapPipeline {
    inner: Arc<PipelineInner>,
    in_flight: Mutex<Option<InFlight>>,
}

impl std::fmt::Debug for BootstrapPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapPipeline")
            .field("kind", &self.inner.kind)
            .field("phase", &self.status().phase)
            .finish_non_exhaustive()
    }
}

impl BootstrapPipeline {
    /// Create new pipeline; nothing is loaded until [`Self::ensure_ready`]
    #[must_use]
    pub fn new(adapter: Arc<dyn RuntimeAdapter>, event_capacity: usize) -> Self {
        let (status, _) = watch::channel(BootstrapStatus::default());
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: Arc::new(PipelineInner {
                kind: adapter.kind(),
                adapter,
                status,
                events,
            }),
            in_flight: Mutex::new(None),
        }
    }

    /// Runtime kind
    #[must_use]
    pub fn kind(&self) -> &RuntimeKind {
        &self.inner.kind
    }

    /// Adapter behind this pipeline
    #[must_use]
    pub fn adapter(&self) -> Arc<dyn RuntimeAdapter> {
        Arc::clone(&self.inner.adapter)
    }

    /// Bring the runtime to `Ready`
    ///
    /// Idempotent. Concurrent callers share one load; callers after
    /// completion get the stored handle immediately.
    pub async fn ensure_ready(&self) -> ReadyHandle {
        let in_flight = {
            let mut slot = self.in_flight.lock();
            slot.get_or_insert_with(|| Self::start(Arc::clone(&self.inner)))
                .clone()
        };
        in_flight.await
    }

    fn start(inner: Arc<PipelineInner>) -> InFlight {
        let task = tokio::spawn(Arc::clone(&inner).load());
        async move {
            match task.await {
                Ok(handle) => handle,
                Err(err) => {
                    tracing::error!("Runtime bootstrap task for {} aborted: {}", inner.kind, err);
                    inner.fail_degraded(format!("bootstrap aborted: {err}"))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> BootstrapStatus {
        self.inner.status.borrow().clone()
    }

    /// Whether the pipeline reached `Ready`
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.status.borrow().is_ready()
    }

    /// Subscribe to pipeline events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BootstrapEvent> {
        self.inner.events.subscribe()
    }

    /// Watch status changes
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<BootstrapStatus> {
        self.inner.status.subscribe()
    }
}

impl PipelineInner {
    async fn load(self: Arc<Self>) -> ReadyHandle {
        self.advance(BootstrapPhase::LoadingCore);
        tracing::info!("Loading runtime core: {}", self.kind);

        if let Err(err) = self.adapter.load_core().await {
            tracing::error!("Runtime {} failed to load: {}", self.kind, err);
            return self.fail_degraded(err.to_string());
        }

        self.advance(BootstrapPhase::LoadingLibraries);
        let _ = self.events.send(BootstrapEvent::LoadingLibraries {
            kind: self.kind.clone(),
        });

        for name in self.adapter.libraries() {
            let loaded = match self.adapter.load_library(&name).await {
                Ok(()) => {
                    tracing::info!("Loaded library {} for {}", name, self.kind);
                    true
                }
                Err(err) => {
                    tracing::warn!("Library {} for {} unavailable: {}", name, self.kind, err);
                    false
                }
            };
            self.status.send_modify(|status| {
                status.libraries.insert(name, loaded);
            });
        }

        self.finish(false, None)
    }

    fn advance(&self, to: BootstrapPhase) -> bool {
        let mut moved = false;
        self.status.send_modify(|status| {
            match validate_transition(status.phase, to) {
                Ok(()) => {
                    status.phase = to;
                    moved = true;
                }
                Err(err) => tracing::debug!("{}: {}", self.kind, err),
            }
        });
        moved
    }

    fn fail_degraded(&self, reason: String) -> ReadyHandle {
        if self.advance(BootstrapPhase::Failed) {
            self.status.send_modify(|status| status.failure = Some(reason.clone()));
            let _ = self.events.send(BootstrapEvent::Failed {
                kind: self.kind.clone(),
                reason: reason.clone(),
            });
        }
        self.finish(true, Some(reason))
    }

    fn finish(&self, degraded: bool, failure: Option<String>) -> ReadyHandle {
        // status flips before the event so receivers observe Ready
        if self.advance(BootstrapPhase::Ready) {
            self.status.send_modify(|status| status.degraded = degraded);
            tracing::info!("Runtime {} ready (degraded: {})", self.kind, degraded);
            let _ = self.events.send(BootstrapEvent::Ready {
                kind: self.kind.clone(),
                degraded,
            });
        }

        let status = self.status.borrow();
        ReadyHandle {
            kind: self.kind.clone(),
            adapter: Arc::clone(&self.adapter),
            degraded: status.degraded,
            failure: status.failure.clone().or(failure),
        }
    }
}
