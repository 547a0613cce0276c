mod dryrun;
mod fal;
mod gemini;
mod http;

use kiln_contracts::errors::ProviderCallError;
use kiln_contracts::providers::{NamedProvider, ProviderKind, ProviderRegistry};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::router::ProviderEnvelope;

pub use dryrun::{DryrunProvider, DryrunStorage};
pub use fal::{FalProvider, FalStorage};
pub use gemini::{GeminiProvider, VeoProvider};

/// Opaque name of a long-running provider operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    pub name: String,
}

impl OperationHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError {
    pub code: Option<i64>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationStatus {
    pub done: bool,
    pub response: Option<Value>,
    pub error: Option<OperationError>,
    pub progress: Option<f64>,
}

impl OperationStatus {
    pub fn pending() -> Self {
        Self {
            done: false,
            response: None,
            error: None,
            progress: None,
        }
    }

    pub fn finished(response: Value) -> Self {
        Self {
            done: true,
            response: Some(response),
            error: None,
            progress: Some(100.0),
        }
    }

    /// Reads a Google long-running operation: `{name, done, response, error, metadata}`.
    pub fn from_operation_json(payload: &Value) -> Self {
        let done = payload.get("done").and_then(Value::as_bool).unwrap_or(false);
        let error = payload.get("error").filter(|error| !error.is_null()).map(|error| {
            OperationError {
                code: error.get("code").and_then(Value::as_i64),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            }
        });
        let progress = payload
            .pointer("/metadata/progressPercent")
            .or_else(|| payload.pointer("/metadata/progress"))
            .and_then(Value::as_f64);
        Self {
            done,
            response: payload.get("response").cloned(),
            error,
            progress,
        }
    }
}

/// Uploads reference bytes somewhere a provider can fetch them.
pub trait StorageClient: Send + Sync {
    fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<String, ProviderCallError>;
}

/// One provider's transport. Sync providers implement `call`; async providers
/// implement `start_operation` and `poll_operation`.
pub trait MediaProvider: Send + Sync {
    fn name(&self) -> ProviderKind;

    fn call(&self, envelope: &ProviderEnvelope) -> Result<Value, ProviderCallError> {
        Err(unsupported(self.name(), "synchronous calls", envelope))
    }

    fn start_operation(
        &self,
        envelope: &ProviderEnvelope,
    ) -> Result<OperationHandle, ProviderCallError> {
        Err(unsupported(self.name(), "long-running operations", envelope))
    }

    fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationStatus, ProviderCallError> {
        Err(ProviderCallError::new(
            self.name(),
            format!("cannot poll operation {}", handle.name),
        ))
    }

    /// Storage used for hosted asset transport, if the provider has one.
    fn storage(&self) -> Option<&dyn StorageClient> {
        None
    }
}

impl NamedProvider for Box<dyn MediaProvider> {
    fn name(&self) -> ProviderKind {
        (**self).name()
    }
}

fn unsupported(provider: ProviderKind, what: &str, envelope: &ProviderEnvelope) -> ProviderCallError {
    ProviderCallError::new(
        provider,
        format!("{provider} does not support {what} (model {})", envelope.model),
    )
}

pub type MediaProviderRegistry = ProviderRegistry<Box<dyn MediaProvider>>;

pub fn default_registry(config: &EngineConfig) -> MediaProviderRegistry {
    let mut registry: MediaProviderRegistry = ProviderRegistry::default();
    registry.register(Box::new(DryrunProvider::new()));
    registry.register(Box::new(FalProvider::new(config)));
    registry.register(Box::new(GeminiProvider::new(config)));
    registry.register(Box::new(VeoProvider::new(config)));
    registry
}
