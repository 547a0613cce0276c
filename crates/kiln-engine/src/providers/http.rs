use std::time::Duration;

use kiln_contracts::errors::ProviderCallError;
use kiln_contracts::providers::ProviderKind;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

const ERROR_BODY_CHARS: usize = 512;

pub(crate) fn build_client(timeout: Duration) -> HttpClient {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

pub(crate) fn response_json_or_error(
    provider: ProviderKind,
    response: HttpResponse,
) -> Result<Value, ProviderCallError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| transport_error(provider, "response body read failed", err))?;
    if !status.is_success() {
        tracing::warn!(%provider, status = code, "provider returned an error status");
        return Err(ProviderCallError::new(provider, truncate_text(&body, ERROR_BODY_CHARS))
            .with_status(code));
    }
    serde_json::from_str(&body).map_err(|err| {
        ProviderCallError::new(
            provider,
            format!(
                "returned invalid JSON payload ({err}): {}",
                truncate_text(&body, ERROR_BODY_CHARS)
            ),
        )
    })
}

/// Wraps a reqwest failure, marking timeouts and connection failures transient.
pub(crate) fn transport_error(
    provider: ProviderKind,
    context: &str,
    err: reqwest::Error,
) -> ProviderCallError {
    let retryable = is_retryable_transport_error(&err);
    tracing::warn!(%provider, retryable, error = %err, "{context}");
    let out = ProviderCallError::new(provider, format!("{context}: {err}"));
    if retryable {
        out.transient()
    } else {
        out
    }
}

pub(crate) fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

pub(crate) fn missing_key(provider: ProviderKind, names: &str) -> ProviderCallError {
    ProviderCallError::new(provider, format!("{names} not set"))
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_keeps_short_values() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }

    #[test]
    fn missing_key_names_the_variables() {
        let err = missing_key(ProviderKind::Fal, "FAL_KEY (or FAL_API_KEY)");
        assert_eq!(err.to_string(), "fal request failed: FAL_KEY (or FAL_API_KEY) not set");
        assert!(!err.transient);
    }
}
