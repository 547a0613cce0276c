pub mod cancel;
pub mod config;
pub mod extract;
pub mod ingest;
pub mod payload;
pub mod poller;
pub mod providers;
pub mod router;
pub mod validate;

use std::borrow::Cow;
use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use kiln_contracts::capabilities::CapabilityTable;
use kiln_contracts::errors::{ErrorKind, GenerationError, RoutingError};
use kiln_contracts::events::ProgressEvent;
use kiln_contracts::jobs::{JobStatus, ProviderJob};
use kiln_contracts::normalized::AssetReference;
use kiln_contracts::providers::{Delivery, ProviderKind};
use kiln_contracts::request::GenerationRequest;
use kiln_contracts::result::MediaResult;

pub use cancel::CancelToken;
pub use config::{EngineConfig, PollPolicy, ProviderEndpoint};
pub use poller::PollError;
pub use providers::{
    MediaProvider, MediaProviderRegistry, OperationHandle, OperationStatus, StorageClient,
};
pub use router::{ProviderEnvelope, Route, Router};

/// Runs generation requests end to end: validate, ingest, build, submit, poll, extract.
///
/// The engine holds only immutable state and is shared across worker threads via `Arc`.
pub struct Engine {
    config: EngineConfig,
    capabilities: Cow<'static, CapabilityTable>,
    router: Router,
    providers: MediaProviderRegistry,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let providers = providers::default_registry(&config);
        Self {
            config,
            capabilities: Cow::Borrowed(CapabilityTable::global()),
            router: Router::default(),
            providers,
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityTable) -> Self {
        self.capabilities = Cow::Owned(capabilities);
        self
    }

    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Replaces the registered provider with the same name.
    pub fn with_provider(mut self, provider: Box<dyn MediaProvider>) -> Self {
        self.providers.register(provider);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn providers(&self) -> &MediaProviderRegistry {
        &self.providers
    }

    /// Blocking run of one generation. Progress events are delivered in order;
    /// the last one is always `done` or `failed`.
    pub fn run(
        &self,
        request: GenerationRequest,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<MediaResult, GenerationError> {
        let model = request.model.trim().to_string();
        let span = tracing::info_span!("generation", model = %model, kind = %request.kind);
        let _entered = span.enter();

        let result = self.run_stages(request, &model, cancel, progress);
        match &result {
            Ok(media) => {
                tracing::info!(uri = media.uri().unwrap_or("<inline>"), "generation done");
                progress(ProgressEvent::Done {
                    model: media.model.clone(),
                    kind: media.kind,
                    uri: media.uri().map(str::to_string),
                    mime_type: media.mime_type.clone(),
                });
            }
            Err(err) => {
                tracing::warn!(kind = %err.kind, error = %err.message, "generation failed");
                progress(ProgressEvent::Failed {
                    kind: err.kind,
                    message: err.message.clone(),
                });
            }
        }
        result
    }

    fn run_stages(
        &self,
        request: GenerationRequest,
        model: &str,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<MediaResult, GenerationError> {
        let spec = validate::lookup(&self.capabilities, model)
            .map_err(|err| GenerationError::validation(err, model))?;
        let normalized =
            validate::validate(request, spec).map_err(|err| GenerationError::validation(err, model))?;
        for adjustment in &normalized.adjustments {
            tracing::info!(adjustment = %adjustment.describe(), "request normalized");
        }
        progress(ProgressEvent::ValidationDone {
            model: model.to_string(),
            adjustments: normalized.adjustments.clone(),
        });
        check_cancel(cancel, model)?;

        let route = self
            .router
            .resolve(model)
            .map_err(|err| GenerationError::routing(err, model))?;
        let provider = self.providers.get(route.provider).ok_or_else(|| {
            GenerationError::routing(RoutingError::ProviderUnavailable(route.provider), model)
        })?;

        let assets = ingest::ingest(&normalized.parts, route.transport, provider.storage())
            .map_err(|err| GenerationError::ingestion(err, model, route.provider))?;
        let hosted = assets
            .iter()
            .filter(|asset| matches!(asset.reference, AssetReference::Hosted(_)))
            .count();
        tracing::debug!(count = assets.len(), hosted, "assets ingested");
        progress(ProgressEvent::AssetsIngested {
            count: assets.len(),
            hosted,
        });
        check_cancel(cancel, model)?;

        let envelope = router::build_envelope(route, &normalized, &assets);
        for warning in &envelope.warnings {
            tracing::warn!(%warning, "payload warning");
        }

        let raw = match route.delivery {
            Delivery::Sync => {
                let mut job = ProviderJob::submitted(route.provider, None);
                progress(submitted_event(&job));
                let response = provider.call(&envelope);
                job.status = if response.is_ok() {
                    JobStatus::Succeeded
                } else {
                    JobStatus::Failed
                };
                tracing::debug!(job = %job.id, status = ?job.status, "sync call finished");
                response.map_err(|err| GenerationError::provider_call(err, model))?
            }
            Delivery::Async => {
                let handle = provider
                    .start_operation(&envelope)
                    .map_err(|err| GenerationError::provider_call(err, model))?;
                let mut job = ProviderJob::submitted(route.provider, Some(handle.name.clone()));
                progress(submitted_event(&job));
                poller::poll_to_completion(
                    &**provider,
                    &handle,
                    &mut job,
                    self.config.poll,
                    cancel,
                    &mut |job| {
                        progress(ProgressEvent::PollingTick {
                            job_id: job.id.clone(),
                            attempt: job.polls,
                            progress: job.progress,
                            poll_errors: job.poll_errors,
                        })
                    },
                )
                .map_err(|err| poll_failure(err, model, route.provider))?
            }
        };

        let output = extract::extract(&raw, normalized.kind)
            .map_err(|err| GenerationError::extraction(err, model, route.provider))?;
        Ok(MediaResult::new(output, normalized.prompt, model))
    }

    /// Runs one generation on a worker thread and streams its updates.
    pub fn submit(self: &Arc<Self>, request: GenerationRequest) -> io::Result<GenerationHandle> {
        self.submit_with_cancel(request, CancelToken::new())
    }

    pub fn submit_with_cancel(
        self: &Arc<Self>,
        request: GenerationRequest,
        cancel: CancelToken,
    ) -> io::Result<GenerationHandle> {
        let (tx, rx) = mpsc::channel::<GenerationUpdate>();
        let model = request.model.trim().to_string();
        let engine = Arc::clone(self);
        let worker_cancel = cancel.clone();
        let worker = thread::Builder::new()
            .name("kiln-generation".to_string())
            .spawn(move || {
                let progress_tx = tx.clone();
                let result = engine.run(request, &worker_cancel, &mut |event| {
                    let _ = progress_tx.send(GenerationUpdate::Progress(event));
                });
                let _ = tx.send(GenerationUpdate::Finished(result));
            })?;
        Ok(GenerationHandle {
            model,
            updates: rx,
            cancel,
            worker: Some(worker),
        })
    }
}

fn submitted_event(job: &ProviderJob) -> ProgressEvent {
    ProgressEvent::Submitted {
        provider: job.provider,
        job_id: job.id.clone(),
        handle: job.handle.clone(),
    }
}

fn check_cancel(cancel: &CancelToken, model: &str) -> Result<(), GenerationError> {
    if cancel.is_cancelled() {
        return Err(GenerationError::new(
            ErrorKind::Cancelled,
            model,
            "generation cancelled",
        ));
    }
    Ok(())
}

fn poll_failure(err: PollError, model: &str, provider: ProviderKind) -> GenerationError {
    let message = err.to_string();
    match err {
        PollError::Rejected { raw, .. } => {
            let out = GenerationError::new(ErrorKind::ProviderRejected, model, message)
                .with_provider(provider);
            match raw {
                Some(raw) => out.with_raw(raw),
                None => out,
            }
        }
        PollError::SafetyFiltered {
            count, reasons, raw, ..
        } => GenerationError::safety_filtered(model, provider, count, reasons).with_raw(raw),
        PollError::Timeout { .. } => {
            GenerationError::new(ErrorKind::Timeout, model, message).with_provider(provider)
        }
        PollError::Cancelled { .. } => {
            GenerationError::new(ErrorKind::Cancelled, model, message).with_provider(provider)
        }
    }
}

#[derive(Debug)]
pub enum GenerationUpdate {
    Progress(ProgressEvent),
    Finished(Result<MediaResult, GenerationError>),
}

/// Caller side of a submitted generation. Dropping it cancels a generation still in flight.
pub struct GenerationHandle {
    model: String,
    updates: mpsc::Receiver<GenerationUpdate>,
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
}

impl GenerationHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Next update; `None` once the worker has finished and every update was read.
    pub fn recv(&self) -> Option<GenerationUpdate> {
        self.updates.recv().ok()
    }

    pub fn iter(&self) -> mpsc::Iter<'_, GenerationUpdate> {
        self.updates.iter()
    }

    /// Drains progress and returns the terminal result.
    pub fn wait(mut self) -> Result<MediaResult, GenerationError> {
        let mut finished = None;
        for update in self.updates.iter() {
            if let GenerationUpdate::Finished(result) = update {
                finished = Some(result);
                break;
            }
        }
        let panicked = self
            .worker
            .take()
            .map(|worker| worker.join().is_err())
            .unwrap_or(false);
        finished.unwrap_or_else(|| {
            let message = if panicked {
                "generation worker panicked"
            } else {
                "generation worker exited without a result"
            };
            Err(GenerationError::new(ErrorKind::Internal, self.model.as_str(), message))
        })
    }
}

impl Drop for GenerationHandle {
    fn drop(&mut self) {
        let running = self
            .worker
            .as_ref()
            .map(|worker| !worker.is_finished())
            .unwrap_or(false);
        if running {
            self.cancel.cancel();
        }
    }
}
