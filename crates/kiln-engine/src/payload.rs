use kiln_contracts::normalized::{AssetReference, IngestedAsset, NormalizedRequest};
use serde_json::{json, Map, Value};

use crate::router::{veo_field, DurationUnit, FalFields, RoleField, VeoField};

pub fn dryrun_body(normalized: &NormalizedRequest, assets: &[IngestedAsset]) -> Value {
    let references = assets
        .iter()
        .map(|asset| {
            json!({
                "role": asset.role,
                "position": asset.position,
                "mime_type": asset.mime_type,
                "reference": match &asset.reference {
                    AssetReference::Hosted(url) => json!({ "url": url }),
                    AssetReference::Inline(bytes) => json!({ "bytes": bytes.len() }),
                },
            })
        })
        .collect::<Vec<Value>>();
    let mut body = json!({
        "kind": normalized.kind,
        "model": normalized.model,
        "prompt": normalized.prompt,
        "aspect_ratio": normalized.aspect_ratio,
        "count": normalized.image_count(),
        "references": references,
    });
    if let Some(video) = normalized.video.as_ref() {
        body["duration_seconds"] = json!(video.duration_seconds);
        body["resolution"] = json!(video.resolution);
        body["audio"] = json!(video.audio);
    }
    body
}

pub fn fal_body(
    fields: &FalFields,
    normalized: &NormalizedRequest,
    assets: &[IngestedAsset],
    warnings: &mut Vec<String>,
) -> Value {
    let mut body = Map::new();
    body.insert(fields.prompt.to_string(), json!(normalized.prompt));
    if let Some(key) = fields.aspect_ratio {
        body.insert(key.to_string(), json!(normalized.aspect_ratio));
    }
    if let Some(video) = normalized.video.as_ref() {
        if let Some((key, unit)) = fields.duration {
            let value = match unit {
                DurationUnit::Number => json!(video.duration_seconds),
                DurationUnit::Text => json!(video.duration_seconds.to_string()),
            };
            body.insert(key.to_string(), value);
        }
        if let (Some(key), Some(resolution)) = (fields.resolution, video.resolution.as_ref()) {
            body.insert(key.to_string(), json!(resolution));
        }
        if let Some(key) = fields.audio {
            body.insert(key.to_string(), json!(video.audio));
        }
    } else if let Some(key) = fields.count {
        body.insert(key.to_string(), json!(normalized.image_count()));
    }
    if let (Some(key), Some(size)) = (
        fields.image_size,
        normalized.edit.as_ref().and_then(|edit| edit.image_size.as_ref()),
    ) {
        body.insert(key.to_string(), json!(size));
    }

    for asset in assets {
        match fields.role_field(asset.role) {
            Some(RoleField::Single(key)) => {
                if body.contains_key(key) {
                    warnings.push(format!(
                        "extra {} reference at position {} ignored",
                        asset.role, asset.position
                    ));
                    continue;
                }
                body.insert(key.to_string(), json!(asset.url_or_data_url()));
            }
            Some(RoleField::List(key)) => {
                let entry = body
                    .entry(key.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = entry {
                    items.push(json!(asset.url_or_data_url()));
                }
            }
            None => warnings.push(unmapped_role(asset)),
        }
    }
    Value::Object(body)
}

pub fn gemini_body(normalized: &NormalizedRequest, assets: &[IngestedAsset]) -> Value {
    let mut parts = assets.iter().map(gemini_part).collect::<Vec<Value>>();
    parts.push(json!({ "text": normalized.prompt }));

    let mut image_config = Map::new();
    image_config.insert("aspectRatio".to_string(), json!(normalized.aspect_ratio));
    if let Some(size) = normalized
        .edit
        .as_ref()
        .and_then(|edit| edit.image_size.as_ref())
    {
        image_config.insert("imageSize".to_string(), json!(size));
    }

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
            "imageConfig": image_config,
            "candidateCount": normalized.image_count(),
        },
    })
}

fn gemini_part(asset: &IngestedAsset) -> Value {
    match &asset.reference {
        AssetReference::Hosted(url) => json!({
            "fileData": { "mimeType": asset.mime_type, "fileUri": url }
        }),
        AssetReference::Inline(_) => json!({
            "inlineData": {
                "mimeType": asset.mime_type,
                "data": asset.inline_base64().unwrap_or_default(),
            }
        }),
    }
}

/// `predictLongRunning` body: `instances[0]` carries prompt and images, `parameters` the video settings.
pub fn veo_body(
    normalized: &NormalizedRequest,
    assets: &[IngestedAsset],
    audio_param: bool,
    warnings: &mut Vec<String>,
) -> Value {
    let mut instance = Map::new();
    instance.insert("prompt".to_string(), json!(normalized.prompt));

    let mut references = Vec::new();
    for asset in assets {
        match veo_field(asset.role) {
            Some(VeoField::Slot(field)) => {
                if instance.contains_key(field) {
                    warnings.push(format!(
                        "extra {} reference at position {} ignored",
                        asset.role, asset.position
                    ));
                } else {
                    instance.insert(field.to_string(), veo_image(asset));
                }
            }
            Some(VeoField::Reference(reference_type)) => references.push(json!({
                "image": veo_image(asset),
                "referenceType": reference_type,
            })),
            None => warnings.push(unmapped_role(asset)),
        }
    }
    if !references.is_empty() {
        instance.insert("referenceImages".to_string(), Value::Array(references));
    }

    let mut parameters = Map::new();
    parameters.insert("aspectRatio".to_string(), json!(normalized.aspect_ratio));
    if let Some(video) = normalized.video.as_ref() {
        parameters.insert("durationSeconds".to_string(), json!(video.duration_seconds));
        if let Some(resolution) = video.resolution.as_ref() {
            parameters.insert("resolution".to_string(), json!(resolution));
        }
        if audio_param {
            parameters.insert("generateAudio".to_string(), json!(video.audio));
        }
    }
    parameters.insert("sampleCount".to_string(), json!(1));

    json!({
        "instances": [Value::Object(instance)],
        "parameters": parameters,
    })
}

fn veo_image(asset: &IngestedAsset) -> Value {
    match &asset.reference {
        AssetReference::Hosted(url) => json!({ "gcsUri": url, "mimeType": asset.mime_type }),
        AssetReference::Inline(_) => json!({
            "bytesBase64Encoded": asset.inline_base64().unwrap_or_default(),
            "mimeType": asset.mime_type,
        }),
    }
}

fn unmapped_role(asset: &IngestedAsset) -> String {
    format!(
        "{} reference at position {} has no field on this model; ignored",
        asset.role, asset.position
    )
}
