//! Cell lifecycle controller
//!
//! [`CellManager`] owns the cell registry, one bootstrap pipeline per
//! runtime kind and the execution engine. It decides when a cell's
//! one-shot directives fire:
//!
//! - collapse is applied synchronously when a cell is first materialized
//! - first-render activation (template splice, autorun dispatch) runs once
//!   per id, guarded by the processed-id set
//! - autorun is marked consumed at dispatch, before the run starts
//! - console forwarding fires after the first completed run
//!
//! Manual runs ignore the one-shot flags.
//!
//! Methods that spawn work must be called inside a Tokio runtime.

use crate::config::ManagerConfig;
use crate::console::ConsoleBridge;
use crate::error::{CellError, Diagnostic, ErrorClass};
use crate::host::{HostInputSurface, RenderContext, SurfaceId};
use crate::identity::{identify, CellId};
use crate::registry::{CellEntry, CellRegistry};
use crate::state::{CellState, RunStatus};
use crate::view::{CellEvent, MountPoint, RunControl};
use dashmap::DashMap;
use livecell_magic::load::annotate_line;
use livecell_runtime::{
    Artifact, BinaryPayload, BootstrapEvent, BootstrapPhase, BootstrapPipeline, ExecutionEngine,
    ExecutionRequest, ExecutionResult, ReadyHandle, RuntimeAdapter, RuntimeKind, TemplateFetcher,
    TemplateMode,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, OwnedMutexGuard};
use tokio::task::JoinHandle;

/// Cell to materialize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeRequest {
    /// Cell identity
    pub id: CellId,
    /// Runtime the cell runs on
    pub kind: RuntimeKind,
    /// Surface the cell is mounted under
    pub surface: SurfaceId,
    /// Block text as rendered
    pub raw_text: String,
}

/// Manager statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Mounted cells
    pub editors_count: usize,
    /// Every registered runtime reached `Ready`
    pub runtime_ready: bool,
    /// Runtime kind -> library -> loaded
    pub packages_loaded: BTreeMap<String, BTreeMap<String, bool>>,
}

struct ManagerInner {
    config: ManagerConfig,
    registry: CellRegistry,
    runtimes: DashMap<RuntimeKind, Arc<BootstrapPipeline>>,
    languages: DashMap<String, RuntimeKind>,
    engine: ExecutionEngine,
    fetcher: Arc<dyn TemplateFetcher>,
    console: ConsoleBridge,
    events: broadcast::Sender<CellEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Lifecycle manager for all cells of a document session
#[derive(Clone)]
pub struct CellManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for CellManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellManager")
            .field("cells", &self.inner.registry.len())
            .field("runtimes", &self.inner.runtimes.len())
            .finish_non_exhaustive()
    }
}

impl CellManager {
    /// Create new manager
    #[must_use]
    pub fn new(
        config: ManagerConfig,
        fetcher: Arc<dyn TemplateFetcher>,
        host_input: Arc<dyn HostInputSurface>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(ManagerInner {
                engine: ExecutionEngine::new(config.max_output_chars),
                config,
                registry: CellRegistry::new(),
                runtimes: DashMap::new(),
                languages: DashMap::new(),
                fetcher,
                console: ConsoleBridge::new(host_input),
                events,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Cell registry
    #[must_use]
    pub fn registry(&self) -> &CellRegistry {
        &self.inner.registry
    }

    /// Register a runtime and its fence languages
    ///
    /// With `eager_bootstrap` the runtime starts loading right away.
    pub fn register_runtime(&self, adapter: Arc<dyn RuntimeAdapter>) -> Arc<BootstrapPipeline> {
        let kind = adapter.kind();
        let languages = adapter.languages();
        let pipeline = Arc::new(BootstrapPipeline::new(adapter, self.inner.config.event_capacity));

        self.inner.languages.insert(kind.as_str().to_string(), kind.clone());
        for language in languages {
            self.inner
                .languages
                .insert(language.trim().to_ascii_lowercase(), kind.clone());
        }
        for (language, target) in &self.inner.config.languages {
            if RuntimeKind::new(target) == kind {
                self.inner
                    .languages
                    .insert(language.trim().to_ascii_lowercase(), kind.clone());
            }
        }
        self.inner.runtimes.insert(kind.clone(), Arc::clone(&pipeline));
        tracing::info!("Registered runtime {}", kind);

        self.spawn_ready_listener(&pipeline);
        if self.inner.config.eager_bootstrap {
            Self::start_bootstrap(&pipeline);
        }
        pipeline
    }

    fn start_bootstrap(pipeline: &Arc<BootstrapPipeline>) {
        let pipeline = Arc::clone(pipeline);
        tokio::spawn(async move {
            pipeline.ensure_ready().await;
        });
    }

    /// Activates cells that mounted while their runtime was loading
    fn spawn_ready_listener(&self, pipeline: &Arc<BootstrapPipeline>) {
        let mut events = pipeline.subscribe();
        let kind = pipeline.kind().clone();
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(BootstrapEvent::Ready { .. }) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let Some(inner) = weak.upgrade() else { return };
                        let manager = CellManager::from_inner(inner);
                        if manager.pipeline(&kind).is_some_and(|p| p.is_ready()) {
                            manager.activate_pending(&kind);
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }

    fn activate_pending(&self, kind: &RuntimeKind) {
        for id in self.inner.registry.ids() {
            let pending = self
                .inner
                .registry
                .get(&id)
                .is_some_and(|entry| entry.with(|s| &s.kind == kind));
            if pending && !self.inner.registry.processed().contains(&id) {
                self.spawn_activation(id);
            }
        }
    }

    /// Runtime kind for a fence language
    #[must_use]
    pub fn resolve_language(&self, language: &str) -> Option<RuntimeKind> {
        self.inner
            .languages
            .get(&language.trim().to_ascii_lowercase())
            .map(|k| k.value().clone())
    }

    /// Bootstrap pipeline of a runtime kind
    #[must_use]
    pub fn pipeline(&self, kind: &RuntimeKind) -> Option<Arc<BootstrapPipeline>> {
        self.inner.runtimes.get(kind).map(|p| Arc::clone(p.value()))
    }

    fn require_pipeline(&self, kind: &RuntimeKind) -> Result<Arc<BootstrapPipeline>, CellError> {
        self.pipeline(kind)
            .ok_or_else(|| CellError::UnknownRuntime(kind.to_string()))
    }

    fn require_cell(&self, id: CellId) -> Result<Arc<CellEntry>, CellError> {
        self.inner.registry.get(&id).ok_or(CellError::UnknownCell(id))
    }

    /// Bring a runtime to `Ready`
    ///
    /// # Errors
    /// Returns [`CellError::UnknownRuntime`] for unregistered kinds.
    pub async fn ensure_ready(&self, kind: &RuntimeKind) -> Result<ReadyHandle, CellError> {
        let pipeline = self.require_pipeline(kind)?;
        Ok(pipeline.ensure_ready().await)
    }

    /// Renderer hook for a fenced block
    ///
    /// Returns `None` for unknown languages and while the surface is still
    /// streaming; the renderer then shows the block as plain code.
    pub fn on_fenced_block(
        &self,
        language: &str,
        raw_text: &str,
        position: usize,
        context: &RenderContext,
    ) -> Option<MountPoint> {
        if context.streaming {
            tracing::debug!("Skipping {} block {} on streaming surface", language, position);
            return None;
        }
        let kind = self.resolve_language(language)?;
        let request = MaterializeRequest {
            id: identify(raw_text, position),
            kind,
            surface: context.surface.clone(),
            raw_text: raw_text.to_string(),
        };
        match self.materialize(request) {
            Ok(mount) => Some(mount),
            Err(err) => {
                tracing::warn!("Cannot materialize block {}: {}", position, err);
                None
            }
        }
    }

    /// Create or reuse the state of a cell
    ///
    /// A known id only bumps its render generation; one-shot flags are
    /// never reset.
    ///
    /// # Errors
    /// Returns [`CellError::UnknownRuntime`] if `kind` is not registered.
    pub fn materialize(&self, request: MaterializeRequest) -> Result<MountPoint, CellError> {
        let pipeline = self.require_pipeline(&request.kind)?;
        let state = CellState::new(
            request.id,
            request.kind.clone(),
            request.surface.clone(),
            &request.raw_text,
        );
        let (entry, inserted) = self.inner.registry.insert_if_absent(state);
        let id = request.id;

        if !inserted {
            let (collapsed, status) = entry.with(|s| {
                s.render_generation += 1;
                s.surface = request.surface;
                (s.collapsed, s.run_status)
            });
            tracing::debug!("Reusing mounted cell {}", id);
            self.emit(CellEvent::Mounted { id, reused: true });
            return Ok(MountPoint {
                id,
                reused: true,
                collapsed,
                run_control: RunControl::derive(&pipeline.status(), status),
            });
        }

        let (collapsed, warnings) = entry.with(|s| {
            if !s.warnings.is_empty() {
                s.editable_text = livecell_magic::annotate_warnings(&s.editable_text, &s.warnings);
            }
            // before first paint
            if s.commands.collapse && s.flags.consume_collapse() {
                s.collapsed = true;
            }
            (s.collapsed, s.warnings.clone())
        });
        tracing::debug!("Mounted cell {} ({})", id, request.kind);
        self.emit(CellEvent::Mounted { id, reused: false });
        if collapsed {
            self.emit(CellEvent::Collapsed { id, collapsed });
        }
        if let Some(warning) = warnings.iter().find(|w| w.directive_ignored()) {
            self.emit(CellEvent::Diagnostic {
                id,
                diagnostic: Diagnostic::parse_warning(warning),
            });
        }

        let status = pipeline.status();
        if status.phase == BootstrapPhase::NotStarted {
            Self::start_bootstrap(&pipeline);
        }
        if pipeline.is_ready() {
            self.spawn_activation(id);
        }

        Ok(MountPoint {
            id,
            reused: false,
            collapsed,
            run_control: RunControl::derive(&status, RunStatus::Idle),
        })
    }

    fn spawn_activation(&self, id: CellId) {
        let manager = self.clone();
        self.spawn_tracked(async move {
            manager.activate_first_render(id).await;
        });
    }

    /// Apply first-render side effects once per id
    ///
    /// Splices a `#%load` template, applies collapse and dispatches
    /// autorun. Returns `false` if the id was already processed or is not
    /// mounted.
    pub async fn activate_first_render(&self, id: CellId) -> bool {
        let Some((entry, pipeline)) = self.claim_first_render(id) else {
            return false;
        };
        self.apply_first_render(entry, pipeline, id).await;
        true
    }

    /// Claim first-render activation now and finish it on a spawned task
    ///
    /// Returns `false` if the id was already processed or is not mounted.
    pub fn spawn_first_render(&self, id: CellId) -> bool {
        let Some((entry, pipeline)) = self.claim_first_render(id) else {
            return false;
        };
        let manager = self.clone();
        self.spawn_tracked(async move {
            manager.apply_first_render(entry, pipeline, id).await;
        });
        true
    }

    fn claim_first_render(&self, id: CellId) -> Option<(Arc<CellEntry>, Arc<BootstrapPipeline>)> {
        let entry = self.inner.registry.get(&id)?;
        let kind = entry.with(|s| s.kind.clone());
        let pipeline = self.pipeline(&kind)?;
        if !self.inner.registry.processed().claim(id) {
            return None;
        }
        tracing::debug!("Activating cell {}", id);
        Some((entry, pipeline))
    }

    async fn apply_first_render(
        &self,
        entry: Arc<CellEntry>,
        pipeline: Arc<BootstrapPipeline>,
        id: CellId,
    ) {
        let load_url = entry.with(|s| s.commands.load_url.clone());
        if let Some(url) = load_url {
            if pipeline.adapter().template_mode() == TemplateMode::Splice {
                self.splice_template(&entry, id, &url).await;
                if entry.is_detached() {
                    return;
                }
            }
        }

        let collapsed = entry.with(|s| {
            if s.commands.collapse && s.flags.consume_collapse() {
                s.collapsed = true;
                true
            } else {
                false
            }
        });
        if collapsed {
            self.emit(CellEvent::Collapsed { id, collapsed: true });
        }

        let dispatch = entry.with(|s| s.commands.autorun && s.flags.consume_autorun());
        if dispatch {
            tracing::debug!("Dispatching autorun for {}", id);
            let manager = self.clone();
            self.spawn_tracked(async move {
                manager.autorun(entry, pipeline).await;
            });
        }
    }

    async fn splice_template(&self, entry: &CellEntry, id: CellId, url: &str) {
        let fetched = match livecell_magic::resolve_url(url, &self.inner.config.host_origin) {
            Ok(resolved) => self
                .inner
                .fetcher
                .fetch(&resolved)
                .await
                .map_err(|err| (resolved, err.to_string())),
            Err(err) => Err((url.to_string(), err.to_string())),
        };

        let outcome = entry.with(|s| {
            let line = livecell_magic::find_load_line(&s.editable_text)?;
            Some(match &fetched {
                Ok(template) => {
                    let report = livecell_magic::parse_report(template);
                    let annotated = livecell_magic::annotate_warnings(template, &report.warnings);
                    s.editable_text =
                        livecell_magic::splice_template(&s.editable_text, line.index, &annotated);
                    let discovered = livecell_magic::parse(&s.editable_text);
                    let consumed = s.flags.as_consumed();
                    s.commands.merge_discovered(&discovered, consumed);
                    s.warnings.extend(report.warnings.iter().cloned());
                    Ok(report.warnings)
                }
                Err((resolved, reason)) => {
                    s.editable_text = annotate_line(
                        &s.editable_text,
                        line.index,
                        &format!("template not loaded: {reason}"),
                    );
                    let diagnostic = Diagnostic::load_error(resolved, reason);
                    s.diagnostic = Some(diagnostic.clone());
                    Err(diagnostic)
                }
            })
        });

        match outcome {
            Some(Ok(warnings)) => {
                tracing::debug!("Spliced template {} into {}", url, id);
                if let Some(warning) = warnings.iter().find(|w| w.directive_ignored()) {
                    let diagnostic =
                        Diagnostic::parse_warning(warning).with_hint(format!("in template {url}"));
                    self.emit(CellEvent::Diagnostic { id, diagnostic });
                }
            }
            Some(Err(diagnostic)) => {
                tracing::warn!("Template {} for {} not loaded: {}", url, id, diagnostic.message);
                self.emit(CellEvent::Diagnostic { id, diagnostic });
            }
            None => {}
        }
    }

    async fn autorun(&self, entry: Arc<CellEntry>, pipeline: Arc<BootstrapPipeline>) {
        self.mark_queued(&entry);
        let ready = pipeline.ensure_ready().await;
        let guard = entry.run_gate().await;
        if entry.is_detached() {
            return;
        }
        self.execute_cell(&entry, guard, &ready).await;
    }

    /// Run a cell on user request
    ///
    /// `edited_text` replaces the editor text first. One-shot flags do not
    /// gate manual runs.
    ///
    /// # Errors
    /// - [`CellError::UnknownCell`] if the id is not mounted
    /// - [`CellError::RuntimeNotReady`] while the runtime is loading
    /// - [`CellError::RunInProgress`] if the cell is already running
    /// - [`CellError::EmptySource`] if there is no code
    pub async fn run(
        &self,
        id: CellId,
        edited_text: Option<String>,
    ) -> Result<Arc<ExecutionResult>, CellError> {
        let entry = self.require_cell(id)?;
        let kind = entry.with(|s| s.kind.clone());
        let pipeline = self.require_pipeline(&kind)?;
        if !pipeline.is_ready() {
            return Err(CellError::RuntimeNotReady { kind });
        }
        let guard = entry.try_run_gate().ok_or(CellError::RunInProgress(id))?;

        let empty = entry.with(|s| {
            if let Some(text) = edited_text {
                s.editable_text = text;
            }
            s.editable_text.trim().is_empty()
        });
        if empty {
            return Err(CellError::EmptySource(id));
        }

        self.mark_queued(&entry);
        let ready = pipeline.ensure_ready().await;
        Ok(self.execute_cell(&entry, guard, &ready).await)
    }

    async fn execute_cell(
        &self,
        entry: &CellEntry,
        _guard: OwnedMutexGuard<()>,
        ready: &ReadyHandle,
    ) -> Arc<ExecutionResult> {
        // a run that overtook this one may have finished in between
        self.mark_queued(entry);
        let (id, code) = entry.with(|s| {
            if let Err(err) = s.transition(RunStatus::Running) {
                tracing::debug!("{}: {}", s.id, err);
                s.run_status = RunStatus::Running;
            }
            (s.id, s.editable_text.clone())
        });
        self.emit(CellEvent::StatusChanged {
            id,
            status: RunStatus::Running,
        });

        let request = ExecutionRequest::new(id.to_string(), code);
        let result = Arc::new(self.inner.engine.execute(ready, request).await);

        if entry.is_detached() {
            tracing::debug!("Dropping result of unmounted cell {}", id);
            return result;
        }

        let success = result.is_success();
        let status = if success {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        let (diagnostic, console_commands) = entry.with(|s| {
            s.last_output = Some(Arc::clone(&result));
            s.run_status = status;
            match &result.error {
                Some(failure) => s.diagnostic = Some(Diagnostic::from(failure)),
                None => {
                    if s.diagnostic.as_ref().is_some_and(|d| d.class != ErrorClass::LoadError) {
                        s.diagnostic = None;
                    }
                }
            }
            let console = (s.commands.console_command().is_some() && s.flags.consume_console())
                .then(|| s.commands.clone());
            (s.diagnostic.clone().filter(|_| !success), console)
        });

        self.emit(CellEvent::StatusChanged { id, status });
        self.emit(CellEvent::OutputReady { id, success });
        if let Some(diagnostic) = diagnostic {
            self.emit(CellEvent::Diagnostic { id, diagnostic });
        }

        if let Some(commands) = console_commands {
            let outcome = self.inner.console.forward(&result, &commands).await;
            tracing::debug!("Console forward for {}: {:?}", id, outcome);
            self.emit(CellEvent::ConsoleForwarded { id, outcome });
        }

        result
    }

    /// Move a cell to `Queued` unless it already waits there
    fn mark_queued(&self, entry: &CellEntry) {
        let queued = entry.with(|s| {
            if s.run_status == RunStatus::Queued {
                return None;
            }
            match s.transition(RunStatus::Queued) {
                Ok(()) => Some(s.id),
                Err(err) => {
                    tracing::debug!("{}: {}", s.id, err);
                    None
                }
            }
        });
        if let Some(id) = queued {
            self.emit(CellEvent::StatusChanged {
                id,
                status: RunStatus::Queued,
            });
        }
    }

    /// Clear the output of a finished cell
    ///
    /// # Errors
    /// Returns [`CellError::UnknownCell`] or [`CellError::RunInProgress`].
    pub fn reset(&self, id: CellId) -> Result<(), CellError> {
        let entry = self.require_cell(id)?;
        let changed = entry.with(|s| {
            if s.run_status.is_busy() {
                return Err(CellError::RunInProgress(id));
            }
            if s.run_status == RunStatus::Idle {
                return Ok(false);
            }
            s.transition(RunStatus::Idle)?;
            s.last_output = None;
            s.diagnostic = None;
            Ok(true)
        })?;
        if changed {
            self.emit(CellEvent::StatusChanged {
                id,
                status: RunStatus::Idle,
            });
        }
        Ok(())
    }

    /// Show or hide the editor body; returns the new collapsed state
    ///
    /// # Errors
    /// Returns [`CellError::UnknownCell`] if the id is not mounted.
    pub fn toggle_collapse(&self, id: CellId) -> Result<bool, CellError> {
        let entry = self.require_cell(id)?;
        let collapsed = entry.with(|s| {
            s.collapsed = !s.collapsed;
            s.collapsed
        });
        self.emit(CellEvent::Collapsed { id, collapsed });
        Ok(collapsed)
    }

    /// Untruncated text of the last run
    ///
    /// # Errors
    /// Returns [`CellError::UnknownCell`] if the id is not mounted.
    pub fn full_output(&self, id: CellId) -> Result<Option<String>, CellError> {
        let entry = self.require_cell(id)?;
        Ok(entry.with(|s| s.last_output.as_ref().map(|r| r.text.full().to_string())))
    }

    /// Artifact of the last run, for download
    ///
    /// # Errors
    /// Returns [`CellError::UnknownCell`] if the id is not mounted.
    pub fn artifact(&self, id: CellId, artifact_id: &str) -> Result<Option<Artifact>, CellError> {
        let entry = self.require_cell(id)?;
        Ok(entry.with(|s| {
            s.last_output
                .as_ref()
                .and_then(|r| r.artifact(artifact_id).cloned())
        }))
    }

    /// Binary result of the last run, for download
    ///
    /// # Errors
    /// Returns [`CellError::UnknownCell`] if the id is not mounted.
    pub fn binary_result(&self, id: CellId) -> Result<Option<BinaryPayload>, CellError> {
        let entry = self.require_cell(id)?;
        Ok(entry.with(|s| s.last_output.as_ref().and_then(|r| r.binary.clone())))
    }

    /// Dismiss a dismissible diagnostic; `true` if one was removed
    ///
    /// # Errors
    /// Returns [`CellError::UnknownCell`] if the id is not mounted.
    pub fn dismiss_diagnostic(&self, id: CellId) -> Result<bool, CellError> {
        let entry = self.require_cell(id)?;
        Ok(entry.with(|s| {
            if s.diagnostic.as_ref().is_some_and(|d| d.dismissible) {
                s.diagnostic = None;
                true
            } else {
                false
            }
        }))
    }

    /// Remove a cell; an in-flight run finishes but its result is dropped
    pub fn unmount(&self, id: CellId) -> bool {
        let removed = self.inner.registry.remove(&id).is_some();
        if removed {
            tracing::debug!("Unmounted cell {}", id);
            self.emit(CellEvent::Unmounted { id });
        }
        removed
    }

    /// Re-attach UI handlers; returns the new bind generation
    ///
    /// # Errors
    /// Returns [`CellError::UnknownCell`] if the id is not mounted.
    pub fn rebind(&self, id: CellId) -> Result<u64, CellError> {
        let entry = self.require_cell(id)?;
        let generation = entry.with(|s| {
            s.bind_generation += 1;
            s.bind_generation
        });
        self.emit(CellEvent::Rebound { id, generation });
        Ok(generation)
    }

    /// Current run control of a cell
    ///
    /// # Errors
    /// Returns [`CellError::UnknownCell`] or [`CellError::UnknownRuntime`].
    pub fn run_control(&self, id: CellId) -> Result<RunControl, CellError> {
        let entry = self.require_cell(id)?;
        let (kind, status) = entry.with(|s| (s.kind.clone(), s.run_status));
        let pipeline = self.require_pipeline(&kind)?;
        Ok(RunControl::derive(&pipeline.status(), status))
    }

    /// State snapshot of a cell
    #[must_use]
    pub fn state(&self, id: CellId) -> Option<CellState> {
        self.inner.registry.snapshot(&id)
    }

    /// Statistics
    #[must_use]
    pub fn get_stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            editors_count: self.inner.registry.len(),
            runtime_ready: !self.inner.runtimes.is_empty(),
            packages_loaded: BTreeMap::new(),
        };
        for item in &self.inner.runtimes {
            let status = item.value().status();
            stats.runtime_ready &= status.is_ready();
            stats.packages_loaded.insert(
                item.key().to_string(),
                status.libraries.into_iter().collect(),
            );
        }
        stats
    }

    /// Subscribe to cell events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CellEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until all spawned activations and autoruns finished
    pub async fn settle(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.inner.tasks.lock());
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(err) = task.await {
                    tracing::error!("Cell task failed: {}", err);
                }
            }
        }
    }

    fn spawn_tracked<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    fn emit(&self, event: CellEvent) {
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NullInputSurface;
    use async_trait::async_trait;
    use livecell_runtime::{FetchError, RawOutput, RuntimeError, RuntimeFault};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Echo {
        ready: AtomicBool,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl RuntimeAdapter for Echo {
        fn kind(&self) -> RuntimeKind {
            RuntimeKind::new("echo")
        }

        fn languages(&self) -> Vec<String> {
            vec!["echo".into(), "ECHO2".into()]
        }

        async fn load_core(&self) -> Result<(), RuntimeError> {
            self.ready.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn run(&self, request: &ExecutionRequest) -> Result<RawOutput, RuntimeFault> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(RawOutput::stdout(request.code.lines().last().unwrap_or_default()))
        }
    }

    #[derive(Debug)]
    struct NoFetch;

    #[async_trait]
    impl TemplateFetcher for NoFetch {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            Err(FetchError::Unsupported(url.to_string()))
        }
    }

    fn manager() -> (CellManager, Arc<Echo>) {
        let manager = CellManager::new(
            ManagerConfig::default().with_language("e", "echo"),
            Arc::new(NoFetch),
            Arc::new(NullInputSurface),
        );
        let echo = Arc::new(Echo::default());
        manager.register_runtime(echo.clone());
        (manager, echo)
    }

    #[tokio::test]
    async fn languages_resolve_case_insensitively() {
        let (manager, _) = manager();
        let echo = Some(RuntimeKind::new("echo"));
        assert_eq!(manager.resolve_language("Echo"), echo);
        assert_eq!(manager.resolve_language("echo2"), echo);
        assert_eq!(manager.resolve_language("e"), echo);
        assert_eq!(manager.resolve_language("rust"), None);
    }

    #[tokio::test]
    async fn unknown_language_is_not_a_cell() {
        let (manager, _) = manager();
        let ctx = RenderContext::rendered("s");
        assert!(manager.on_fenced_block("rust", "fn main() {}", 0, &ctx).is_none());
        assert_eq!(manager.get_stats().editors_count, 0);
    }

    #[tokio::test]
    async fn streaming_surface_is_skipped() {
        let (manager, _) = manager();
        let ctx = RenderContext::streaming("s");
        assert!(manager.on_fenced_block("echo", "hi", 0, &ctx).is_none());
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn manual_run_stores_output() {
        let (manager, echo) = manager();
        manager.ensure_ready(&RuntimeKind::new("echo")).await.unwrap();
        let mount = manager
            .on_fenced_block("echo", "hello", 0, &RenderContext::rendered("s"))
            .unwrap();
        manager.settle().await;

        let result = manager.run(mount.id, None).await.unwrap();
        assert_eq!(result.text.full(), "hello");
        assert_eq!(echo.runs.load(Ordering::SeqCst), 1);

        let state = manager.state(mount.id).unwrap();
        assert_eq!(state.run_status, RunStatus::Succeeded);
        assert!(!state.flags.autorun_consumed());
        assert_eq!(manager.full_output(mount.id).unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn run_with_edited_text() {
        let (manager, _) = manager();
        manager.ensure_ready(&RuntimeKind::new("echo")).await.unwrap();
        let mount = manager
            .on_fenced_block("echo", "a", 0, &RenderContext::rendered("s"))
            .unwrap();
        let result = manager.run(mount.id, Some("b".into())).await.unwrap();
        assert_eq!(result.text.full(), "b");
        assert!(matches!(
            manager.run(mount.id, Some("  ".into())).await,
            Err(CellError::EmptySource(_))
        ));
    }

    #[tokio::test]
    async fn reset_clears_output_only() {
        let (manager, _) = manager();
        manager.ensure_ready(&RuntimeKind::new("echo")).await.unwrap();
        let mount = manager
            .on_fenced_block("echo", "#%autorun\nx", 0, &RenderContext::rendered("s"))
            .unwrap();
        manager.settle().await;
        assert_eq!(manager.state(mount.id).unwrap().run_status, RunStatus::Succeeded);

        manager.reset(mount.id).unwrap();
        let state = manager.state(mount.id).unwrap();
        assert_eq!(state.run_status, RunStatus::Idle);
        assert!(state.last_output.is_none());
        assert!(state.flags.autorun_consumed());
    }

    #[tokio::test]
    async fn unknown_cell_errors() {
        let (manager, _) = manager();
        let id = identify("nothing", 0);
        assert!(manager.run(id, None).await.unwrap_err().is_unknown_cell());
        assert!(manager.toggle_collapse(id).is_err());
        assert!(!manager.unmount(id));
    }

    #[tokio::test]
    async fn materialize_unknown_runtime() {
        let (manager, _) = manager();
        let err = manager
            .materialize(MaterializeRequest {
                id: identify("x", 0),
                kind: RuntimeKind::new("cobol"),
                surface: "s".into(),
                raw_text: "x".into(),
            })
            .unwrap_err();
        assert!(matches!(err, CellError::UnknownRuntime(_)));
    }

    #[tokio::test]
    async fn stats_report_runtime_state() {
        let (manager, _) = manager();
        manager.ensure_ready(&RuntimeKind::new("echo")).await.unwrap();
        manager.on_fenced_block("echo", "a", 0, &RenderContext::rendered("s"));
        manager.on_fenced_block("echo", "b", 1, &RenderContext::rendered("s"));
        let stats = manager.get_stats();
        assert_eq!(stats.editors_count, 2);
        assert!(stats.runtime_ready);
        assert!(stats.packages_loaded.contains_key("echo"));
    }
}
