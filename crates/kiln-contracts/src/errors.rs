use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::providers::ProviderKind;
use crate::request::{MediaKind, PartRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Ingestion,
    Routing,
    ProviderCall,
    ProviderRejected,
    SafetyFiltered,
    Extraction,
    Timeout,
    Cancelled,
    /// The generation worker died before reporting a result.
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Ingestion => "ingestion",
            Self::Routing => "routing",
            Self::ProviderCall => "provider_call",
            Self::ProviderRejected => "provider_rejected",
            Self::SafetyFiltered => "safety_filtered",
            Self::Extraction => "extraction",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Whether resubmitting the same request may succeed. The core never retries on its own.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Ingestion | Self::ProviderCall | Self::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFailure {
    UnknownModel,
    KindMismatch,
    EmptyPrompt,
    ConflictingParameters,
    MissingRequiredInput,
    TooManyReferences,
    UnsupportedResolution,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub failure: ValidationFailure,
    pub message: String,
}

impl ValidationError {
    pub fn new(failure: ValidationFailure, message: impl Into<String>) -> Self {
        Self {
            failure,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{role} reference at position {position} failed to ingest: {message}")]
pub struct IngestionError {
    pub role: PartRole,
    pub position: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no provider adapter handles model '{0}'")]
    UnsupportedModel(String),
    #[error("provider '{0}' is not registered with the engine")]
    ProviderUnavailable(ProviderKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider} request failed{}: {message}", status_suffix(.status))]
pub struct ProviderCallError {
    pub provider: ProviderKind,
    pub status: Option<u16>,
    pub message: String,
    /// Connection resets, timeouts, 429 and 5xx.
    pub transient: bool,
}

impl ProviderCallError {
    pub fn new(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self {
            provider,
            status: None,
            message: message.into(),
            transient: false,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self.transient = status == 429 || status >= 500;
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("no {kind} media found in provider response")]
    NoMediaFound { kind: MediaKind, raw: Value },
    #[error("provider returned undecodable inline media at {path}")]
    InvalidInlineData { path: String },
    #[error("provider filtered {count} output(s) for safety: {}", .reasons.join("; "))]
    SafetyFiltered { count: u64, reasons: Vec<String> },
}

/// Terminal failure of one generation, tagged for the caller.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} error for model '{model}': {message}")]
pub struct GenerationError {
    pub kind: ErrorKind,
    pub message: String,
    pub model: String,
    pub provider: Option<ProviderKind>,
    pub validation: Option<ValidationFailure>,
    /// Provider-stated reasons for safety filtering.
    pub reasons: Vec<String>,
    /// Raw provider payload kept for diagnosing contract changes.
    pub raw: Option<Value>,
}

impl GenerationError {
    pub fn new(kind: ErrorKind, model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            model: model.into(),
            provider: None,
            validation: None,
            reasons: Vec::new(),
            raw: None,
        }
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn validation(err: ValidationError, model: &str) -> Self {
        let mut out = Self::new(ErrorKind::Validation, model, err.message);
        out.validation = Some(err.failure);
        out
    }

    pub fn ingestion(err: IngestionError, model: &str, provider: ProviderKind) -> Self {
        Self::new(ErrorKind::Ingestion, model, err.to_string()).with_provider(provider)
    }

    pub fn routing(err: RoutingError, model: &str) -> Self {
        Self::new(ErrorKind::Routing, model, err.to_string())
    }

    pub fn provider_call(err: ProviderCallError, model: &str) -> Self {
        let provider = err.provider;
        Self::new(ErrorKind::ProviderCall, model, err.to_string()).with_provider(provider)
    }

    pub fn safety_filtered(
        model: &str,
        provider: ProviderKind,
        count: u64,
        reasons: Vec<String>,
    ) -> Self {
        let message = if reasons.is_empty() {
            format!("{count} output(s) removed by provider safety filters")
        } else {
            format!(
                "{count} output(s) removed by provider safety filters: {}",
                reasons.join("; ")
            )
        };
        let mut out = Self::new(ErrorKind::SafetyFiltered, model, message).with_provider(provider);
        out.reasons = reasons;
        out
    }

    pub fn extraction(err: ExtractionError, model: &str, provider: ProviderKind) -> Self {
        match err {
            ExtractionError::SafetyFiltered { count, reasons } => {
                Self::safety_filtered(model, provider, count, reasons)
            }
            ExtractionError::NoMediaFound { kind, raw } => Self::new(
                ErrorKind::Extraction,
                model,
                format!("no {kind} media found in provider response"),
            )
            .with_provider(provider)
            .with_raw(raw),
            other => {
                Self::new(ErrorKind::Extraction, model, other.to_string()).with_provider(provider)
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn provider_call_status_marks_transient() {
        let rate_limited = ProviderCallError::new(ProviderKind::Fal, "slow down").with_status(429);
        assert!(rate_limited.transient);
        assert_eq!(rate_limited.to_string(), "fal request failed (429): slow down");

        let rejected = ProviderCallError::new(ProviderKind::Fal, "bad field").with_status(422);
        assert!(!rejected.transient);

        let offline = ProviderCallError::new(ProviderKind::Veo, "connection reset");
        assert_eq!(offline.to_string(), "veo request failed: connection reset");
    }

    #[test]
    fn validation_error_keeps_failure_tag() {
        let err = GenerationError::validation(
            ValidationError::new(ValidationFailure::MissingRequiredInput, "seed image required"),
            "fal-ai/nano-banana/edit",
        );
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.validation, Some(ValidationFailure::MissingRequiredInput));
        assert!(!err.is_retryable());
    }

    #[test]
    fn extraction_safety_maps_to_safety_kind() {
        let err = GenerationError::extraction(
            ExtractionError::SafetyFiltered {
                count: 1,
                reasons: vec!["celebrity likeness".to_string()],
            },
            "veo-3.1-generate-preview",
            ProviderKind::Veo,
        );
        assert_eq!(err.kind, ErrorKind::SafetyFiltered);
        assert_eq!(err.reasons, vec!["celebrity likeness".to_string()]);
        assert_eq!(err.provider, Some(ProviderKind::Veo));
    }

    #[test]
    fn extraction_miss_carries_raw_payload() {
        let raw = json!({"unexpected": true});
        let err = GenerationError::extraction(
            ExtractionError::NoMediaFound {
                kind: MediaKind::Image,
                raw: raw.clone(),
            },
            "fal-ai/nano-banana",
            ProviderKind::Fal,
        );
        assert_eq!(err.kind, ErrorKind::Extraction);
        assert_eq!(err.raw, Some(raw));
    }

    #[test]
    fn retry_hints_follow_taxonomy() {
        assert!(ErrorKind::ProviderCall.is_retryable());
        assert!(ErrorKind::Ingestion.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::SafetyFiltered.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
        assert!(!ErrorKind::Internal.is_retryable());
        assert!(!ErrorKind::Routing.is_retryable());
    }
}
