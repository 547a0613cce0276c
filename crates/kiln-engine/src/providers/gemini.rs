use kiln_contracts::errors::ProviderCallError;
use kiln_contracts::providers::ProviderKind;
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use super::http::{build_client, missing_key, response_json_or_error, transport_error};
use super::{MediaProvider, OperationHandle, OperationStatus};
use crate::config::{EngineConfig, ProviderEndpoint};
use crate::router::ProviderEnvelope;

const GEMINI_KEY_NAMES: &str = "GEMINI_API_KEY (or GOOGLE_API_KEY)";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Shared Gemini API plumbing for the image and video adapters.
struct GeminiApi {
    endpoint: ProviderEndpoint,
    http: HttpClient,
    provider: ProviderKind,
}

impl GeminiApi {
    fn new(config: &EngineConfig, provider: ProviderKind) -> Self {
        Self {
            endpoint: config.gemini.clone(),
            http: build_client(config.request_timeout),
            provider,
        }
    }

    fn api_key(&self) -> Result<&str, ProviderCallError> {
        self.endpoint
            .api_key
            .as_deref()
            .ok_or_else(|| missing_key(self.provider, GEMINI_KEY_NAMES))
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{method}", self.endpoint.api_base, model_path)
    }

    fn operation_url(&self, name: &str) -> String {
        let trimmed = name.trim().trim_start_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return trimmed.to_string();
        }
        format!("{}/{}", self.endpoint.api_base, trimmed)
    }

    fn post(&self, url: &str, body: &Value) -> Result<Value, ProviderCallError> {
        let api_key = self.api_key()?;
        tracing::debug!(provider = %self.provider, %url, "gemini request");
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, api_key)
            .json(body)
            .send()
            .map_err(|err| transport_error(self.provider, &format!("request failed ({url})"), err))?;
        response_json_or_error(self.provider, response)
    }

    fn get(&self, url: &str) -> Result<Value, ProviderCallError> {
        let api_key = self.api_key()?;
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, api_key)
            .send()
            .map_err(|err| transport_error(self.provider, &format!("poll failed ({url})"), err))?;
        response_json_or_error(self.provider, response)
    }
}

/// `generateContent` image models.
pub struct GeminiProvider {
    api: GeminiApi,
}

impl GeminiProvider {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api: GeminiApi::new(config, ProviderKind::Gemini),
        }
    }
}

impl MediaProvider for GeminiProvider {
    fn name(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn call(&self, envelope: &ProviderEnvelope) -> Result<Value, ProviderCallError> {
        let url = self.api.model_url(&envelope.model, "generateContent");
        self.api.post(&url, &envelope.body)
    }
}

/// Veo video models: `predictLongRunning`, then `GET /{operation}` until done.
pub struct VeoProvider {
    api: GeminiApi,
}

impl VeoProvider {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api: GeminiApi::new(config, ProviderKind::Veo),
        }
    }
}

impl MediaProvider for VeoProvider {
    fn name(&self) -> ProviderKind {
        ProviderKind::Veo
    }

    fn start_operation(
        &self,
        envelope: &ProviderEnvelope,
    ) -> Result<OperationHandle, ProviderCallError> {
        let url = self.api.model_url(&envelope.model, "predictLongRunning");
        let payload = self.api.post(&url, &envelope.body)?;
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                ProviderCallError::new(
                    ProviderKind::Veo,
                    "predictLongRunning response carried no operation name",
                )
            })?;
        tracing::info!(operation = %name, "veo operation started");
        Ok(OperationHandle::new(name))
    }

    fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationStatus, ProviderCallError> {
        let payload = self.api.get(&self.api.operation_url(&handle.name))?;
        Ok(OperationStatus::from_operation_json(&payload))
    }
}
