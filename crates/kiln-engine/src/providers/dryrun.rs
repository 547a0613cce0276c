use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use kiln_contracts::errors::ProviderCallError;
use kiln_contracts::providers::ProviderKind;
use kiln_contracts::request::parse_ratio;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{MediaProvider, OperationHandle, OperationStatus, StorageClient};
use crate::router::ProviderEnvelope;

const LONG_SIDE: u32 = 256;

/// Offline provider: solid-colour PNGs for image requests, fake operations for video.
pub struct DryrunProvider {
    storage: DryrunStorage,
    pending_polls: u32,
    operations: Mutex<HashMap<String, u32>>,
}

impl Default for DryrunProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DryrunProvider {
    pub fn new() -> Self {
        Self {
            storage: DryrunStorage,
            pending_polls: 0,
            operations: Mutex::new(HashMap::new()),
        }
    }

    /// Operations report not-done this many times before finishing.
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    fn prompt(envelope: &ProviderEnvelope) -> &str {
        envelope
            .body
            .get("prompt")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

impl MediaProvider for DryrunProvider {
    fn name(&self) -> ProviderKind {
        ProviderKind::Dryrun
    }

    fn call(&self, envelope: &ProviderEnvelope) -> Result<Value, ProviderCallError> {
        let ratio = envelope
            .body
            .get("aspect_ratio")
            .and_then(Value::as_str)
            .unwrap_or("1:1");
        let (width, height) = dims_for_ratio(ratio);
        let png = render_png(width, height, Self::prompt(envelope))
            .map_err(|err| ProviderCallError::new(ProviderKind::Dryrun, err.to_string()))?;
        Ok(json!({
            "candidates": [{
                "content": {"parts": [{
                    "inlineData": {"mimeType": "image/png", "data": BASE64.encode(png)}
                }]},
                "finishReason": "STOP"
            }],
            "modelVersion": envelope.model,
        }))
    }

    fn start_operation(
        &self,
        envelope: &ProviderEnvelope,
    ) -> Result<OperationHandle, ProviderCallError> {
        let id = short_id(&envelope.body);
        let name = format!("operations/dryrun-{id}");
        self.operations
            .lock()
            .map_err(|_| ProviderCallError::new(ProviderKind::Dryrun, "operation table poisoned"))?
            .insert(name.clone(), self.pending_polls);
        Ok(OperationHandle::new(name))
    }

    fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationStatus, ProviderCallError> {
        let mut operations = self
            .operations
            .lock()
            .map_err(|_| ProviderCallError::new(ProviderKind::Dryrun, "operation table poisoned"))?;
        let Some(remaining) = operations.get_mut(&handle.name) else {
            return Err(
                ProviderCallError::new(ProviderKind::Dryrun, format!("unknown operation {}", handle.name))
                    .with_status(404),
            );
        };
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(OperationStatus::pending());
        }
        operations.remove(&handle.name);
        let id = handle.name.trim_start_matches("operations/");
        Ok(OperationStatus::finished(json!({
            "generateVideoResponse": {
                "generatedSamples": [{
                    "video": {"uri": format!("dryrun://{id}.mp4"), "mimeType": "video/mp4"}
                }],
                "raiMediaFilteredCount": 0
            }
        })))
    }

    fn storage(&self) -> Option<&dyn StorageClient> {
        Some(&self.storage)
    }
}

/// Content-addressed fake uploads.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunStorage;

impl StorageClient for DryrunStorage {
    fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<String, ProviderCallError> {
        let digest = Sha256::digest(bytes);
        let ext = mime_type.rsplit('/').next().unwrap_or("bin");
        Ok(format!("dryrun://assets/{}.{ext}", hex::encode(&digest[..6])))
    }
}

fn dims_for_ratio(ratio: &str) -> (u32, u32) {
    let (w, h) = parse_ratio(ratio).unwrap_or((1, 1));
    if w >= h {
        (LONG_SIDE, (LONG_SIDE * h / w).max(1))
    } else {
        ((LONG_SIDE * w / h).max(1), LONG_SIDE)
    }
}

fn render_png(width: u32, height: u32, prompt: &str) -> Result<Vec<u8>, image::ImageError> {
    let (r, g, b) = color_from_prompt(prompt);
    let mut image = RgbImage::new(width, height);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}

fn short_id(body: &Value) -> String {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.update(timestamp_nanos().to_be_bytes());
    hex::encode(&hasher.finalize()[..6])
}

fn timestamp_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use kiln_contracts::providers::Delivery;
    use kiln_contracts::request::MediaKind;

    use super::*;
    use crate::extract::extract;

    fn envelope(body: Value, delivery: Delivery) -> ProviderEnvelope {
        ProviderEnvelope {
            provider: ProviderKind::Dryrun,
            model: "dryrun-image-1".to_string(),
            delivery,
            body,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn sync_call_renders_png_sized_to_ratio() {
        let provider = DryrunProvider::new();
        let raw = provider
            .call(&envelope(json!({"prompt": "teal fox", "aspect_ratio": "9:16"}), Delivery::Sync))
            .unwrap();
        let output = extract(&raw, MediaKind::Image).unwrap();
        let decoded = image::load_from_memory(output.source.bytes().unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (144, 256));
        let first = decoded.to_rgb8().get_pixel(0, 0).0;
        let (r, g, b) = color_from_prompt("teal fox");
        assert_eq!(first, [r, g, b]);
    }

    #[test]
    fn operation_finishes_after_pending_polls() {
        let provider = DryrunProvider::new().with_pending_polls(2);
        let handle = provider
            .start_operation(&envelope(json!({"prompt": "waves"}), Delivery::Async))
            .unwrap();
        assert!(handle.name.starts_with("operations/dryrun-"));
        assert!(!provider.poll_operation(&handle).unwrap().done);
        assert!(!provider.poll_operation(&handle).unwrap().done);
        let done = provider.poll_operation(&handle).unwrap();
        assert!(done.done);
        let output = extract(done.response.as_ref().unwrap(), MediaKind::Video).unwrap();
        assert!(output.source.uri().unwrap().starts_with("dryrun://dryrun-"));
        assert_eq!(provider.poll_operation(&handle).unwrap_err().status, Some(404));
    }

    #[test]
    fn storage_is_content_addressed() {
        let storage = DryrunStorage;
        let first = storage.upload(b"abc", "image/png").unwrap();
        assert_eq!(first, storage.upload(b"abc", "image/png").unwrap());
        assert!(first.ends_with(".png"));
        assert_ne!(first, storage.upload(b"abd", "image/png").unwrap());
    }
}
