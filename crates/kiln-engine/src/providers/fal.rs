use kiln_contracts::errors::ProviderCallError;
use kiln_contracts::providers::ProviderKind;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use super::http::{build_client, missing_key, response_json_or_error, transport_error};
use super::{MediaProvider, StorageClient};
use crate::config::{EngineConfig, ProviderEndpoint};
use crate::router::ProviderEnvelope;

const FAL_KEY_NAMES: &str = "FAL_KEY (or FAL_API_KEY)";

/// Synchronous `fal.run` endpoints; the model id is the URL path.
pub struct FalProvider {
    endpoint: ProviderEndpoint,
    http: HttpClient,
    storage: FalStorage,
}

impl FalProvider {
    pub fn new(config: &EngineConfig) -> Self {
        let http = build_client(config.request_timeout);
        Self {
            endpoint: config.fal.clone(),
            storage: FalStorage::with_client(config.fal_storage.clone(), http.clone()),
            http,
        }
    }

    fn resolve_endpoint(&self, model: &str) -> String {
        let model = model.trim();
        if model.starts_with("http://") || model.starts_with("https://") {
            return model.to_string();
        }
        format!("{}/{}", self.endpoint.api_base, model.trim_start_matches('/'))
    }

    fn api_key(&self) -> Result<&str, ProviderCallError> {
        self.endpoint
            .api_key
            .as_deref()
            .ok_or_else(|| missing_key(ProviderKind::Fal, FAL_KEY_NAMES))
    }
}

impl MediaProvider for FalProvider {
    fn name(&self) -> ProviderKind {
        ProviderKind::Fal
    }

    fn call(&self, envelope: &ProviderEnvelope) -> Result<Value, ProviderCallError> {
        let api_key = self.api_key()?;
        let endpoint = self.resolve_endpoint(&envelope.model);
        tracing::debug!(%endpoint, "fal request");
        let response = self
            .http
            .post(&endpoint)
            .header(AUTHORIZATION, format!("Key {api_key}"))
            .json(&envelope.body)
            .send()
            .map_err(|err| transport_error(ProviderKind::Fal, &format!("Fal request failed ({endpoint})"), err))?;
        response_json_or_error(ProviderKind::Fal, response)
    }

    fn storage(&self) -> Option<&dyn StorageClient> {
        Some(&self.storage)
    }
}

/// Two-step upload to the Fal CDN: initiate to get a signed URL, then PUT the bytes.
pub struct FalStorage {
    endpoint: ProviderEndpoint,
    http: HttpClient,
}

impl FalStorage {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_client(config.fal_storage.clone(), build_client(config.request_timeout))
    }

    fn with_client(endpoint: ProviderEndpoint, http: HttpClient) -> Self {
        Self { endpoint, http }
    }

    fn initiate(&self, api_key: &str, mime_type: &str) -> Result<(String, String), ProviderCallError> {
        let url = format!(
            "{}/storage/upload/initiate?storage_type=fal-cdn-v3",
            self.endpoint.api_base
        );
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("Key {api_key}"))
            .json(&json!({
                "content_type": mime_type,
                "file_name": file_name_for(mime_type),
            }))
            .send()
            .map_err(|err| transport_error(ProviderKind::Fal, "Fal upload initiate failed", err))?;
        let payload = response_json_or_error(ProviderKind::Fal, response)?;
        let field = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    ProviderCallError::new(
                        ProviderKind::Fal,
                        format!("upload initiate response missing {key}"),
                    )
                })
        };
        Ok((field("upload_url")?, field("file_url")?))
    }
}

impl StorageClient for FalStorage {
    fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<String, ProviderCallError> {
        let api_key = self
            .endpoint
            .api_key
            .as_deref()
            .ok_or_else(|| missing_key(ProviderKind::Fal, FAL_KEY_NAMES))?;
        let (upload_url, file_url) = self.initiate(api_key, mime_type)?;
        let response = self
            .http
            .put(&upload_url)
            .header(CONTENT_TYPE, mime_type)
            .body(bytes.to_vec())
            .send()
            .map_err(|err| transport_error(ProviderKind::Fal, "Fal upload failed", err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ProviderCallError::new(
                ProviderKind::Fal,
                format!("upload rejected: {}", super::http::truncate_text(&body, 256)),
            )
            .with_status(status.as_u16()));
        }
        tracing::debug!(%file_url, bytes = bytes.len(), "uploaded reference to fal storage");
        Ok(file_url)
    }
}

fn file_name_for(mime_type: &str) -> String {
    let ext = match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    };
    format!("reference.{ext}")
}

#[cfg(test)]
mod tests {
    use kiln_contracts::providers::Delivery;

    use super::*;

    #[test]
    fn model_id_becomes_the_url_path() {
        let provider = FalProvider::new(&EngineConfig::default());
        assert_eq!(
            provider.resolve_endpoint("fal-ai/nano-banana/edit"),
            "https://fal.run/fal-ai/nano-banana/edit"
        );
        assert_eq!(
            provider.resolve_endpoint("https://queue.example/x"),
            "https://queue.example/x"
        );
    }

    #[test]
    fn missing_key_fails_before_any_request() {
        let provider = FalProvider::new(&EngineConfig::default());
        let envelope = ProviderEnvelope {
            provider: ProviderKind::Fal,
            model: "fal-ai/nano-banana".to_string(),
            delivery: Delivery::Sync,
            body: json!({"prompt": "x"}),
            warnings: Vec::new(),
        };
        let err = provider.call(&envelope).unwrap_err();
        assert!(err.message.contains("FAL_KEY"));

        let storage = FalStorage::new(&EngineConfig::default());
        assert!(storage.upload(b"png", "image/png").is_err());
    }

    #[test]
    fn upload_file_names_follow_mime() {
        assert_eq!(file_name_for("image/jpeg"), "reference.jpg");
        assert_eq!(file_name_for("image/png"), "reference.png");
    }
}
