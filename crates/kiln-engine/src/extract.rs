//! Pulls the single primary output out of a raw provider response.
//!
//! Providers disagree on nesting (`{data: {video: ...}}` vs `{video: ...}`) and on
//! naming (`url` vs `uri`, `content_type` vs `mimeType`). Shapes are tried in a
//! fixed order, nested before flat, and unknown fields are ignored.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use kiln_contracts::errors::ExtractionError;
use kiln_contracts::request::MediaKind;
use kiln_contracts::result::{MediaOutput, MediaSource};
use serde_json::Value;

const VIDEO_SHAPES: &[&str] = &[
    "/data/video",
    "/data/videos/0",
    "/video",
    "/videos/0",
    "/response/generateVideoResponse/generatedSamples/0/video",
    "/generateVideoResponse/generatedSamples/0/video",
    "/generatedVideos/0/video",
];

const IMAGE_SHAPES: &[&str] = &["/data/images/0", "/data/image", "/images/0", "/image"];

const RAI_COUNT_PATHS: &[&str] = &[
    "/response/generateVideoResponse",
    "/generateVideoResponse",
    "",
];

const GEMINI_SAFETY_REASONS: &[&str] = &[
    "SAFETY",
    "IMAGE_SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
];

pub fn extract(raw: &Value, kind: MediaKind) -> Result<MediaOutput, ExtractionError> {
    if let Some((count, reasons)) = safety_verdict(raw) {
        return Err(ExtractionError::SafetyFiltered { count, reasons });
    }

    let found = if kind.is_video() {
        first_shape(raw, VIDEO_SHAPES)?
    } else {
        match first_shape(raw, IMAGE_SHAPES)? {
            Some(found) => Some(found),
            None => match gemini_candidate(raw)? {
                Some(found) => Some(found),
                None => media_at(raw, "/predictions/0")?,
            },
        }
    };

    let Some((source, mime_type)) = found else {
        return Err(ExtractionError::NoMediaFound {
            kind,
            raw: raw.clone(),
        });
    };
    Ok(MediaOutput {
        source,
        mime_type,
        kind,
    })
}

/// Count and reasons when the provider says it filtered the output.
pub fn safety_verdict(raw: &Value) -> Option<(u64, Vec<String>)> {
    for path in RAI_COUNT_PATHS {
        let Some(node) = raw.pointer(path) else {
            continue;
        };
        let count = node
            .get("raiMediaFilteredCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if count > 0 {
            return Some((count, string_list(node.get("raiMediaFilteredReasons"))));
        }
    }

    if let Some(reason) = raw
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        let mut reasons = vec![reason.to_string()];
        if let Some(message) = raw
            .pointer("/promptFeedback/blockReasonMessage")
            .and_then(Value::as_str)
        {
            reasons.push(message.to_string());
        }
        return Some((1, reasons));
    }

    if let Some(candidates) = raw.get("candidates").and_then(Value::as_array) {
        let reasons = candidates
            .iter()
            .filter_map(|candidate| candidate.get("finishReason").and_then(Value::as_str))
            .filter(|reason| GEMINI_SAFETY_REASONS.contains(reason))
            .map(str::to_string)
            .collect::<Vec<String>>();
        if !candidates.is_empty() && reasons.len() == candidates.len() {
            return Some((reasons.len() as u64, reasons));
        }
    }

    if let Some(flags) = raw.get("has_nsfw_concepts").and_then(Value::as_array) {
        if !flags.is_empty() && flags.iter().all(|flag| flag.as_bool() == Some(true)) {
            return Some((flags.len() as u64, vec!["nsfw content detected".to_string()]));
        }
    }
    None
}

type Found = Option<(MediaSource, Option<String>)>;

fn first_shape(raw: &Value, shapes: &[&str]) -> Result<Found, ExtractionError> {
    for path in shapes {
        if let Some(found) = media_at(raw, path)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn media_at(raw: &Value, path: &str) -> Result<Found, ExtractionError> {
    let Some(node) = raw.pointer(path) else {
        return Ok(None);
    };
    media_from(node, path)
}

fn media_from(node: &Value, path: &str) -> Result<Found, ExtractionError> {
    if let Some(url) = node.as_str().map(str::trim).filter(|url| !url.is_empty()) {
        return Ok(Some((MediaSource::Uri(url.to_string()), None)));
    }
    let Some(object) = node.as_object() else {
        return Ok(None);
    };
    let mime_type = ["content_type", "mimeType", "mime_type"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::to_string);

    if let Some(url) = ["url", "uri", "fileUri"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|url| !url.is_empty())
    {
        return Ok(Some((MediaSource::Uri(url.to_string()), mime_type)));
    }

    if let Some(encoded) = ["bytesBase64Encoded", "b64_json", "data"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
    {
        let bytes = BASE64
            .decode(encoded.trim().as_bytes())
            .map_err(|_| ExtractionError::InvalidInlineData {
                path: path.to_string(),
            })?;
        return Ok(Some((MediaSource::Bytes(bytes), mime_type)));
    }
    Ok(None)
}

fn gemini_candidate(raw: &Value) -> Result<Found, ExtractionError> {
    let Some(candidates) = raw.get("candidates").and_then(Value::as_array) else {
        return Ok(None);
    };
    for (candidate_idx, candidate) in candidates.iter().enumerate() {
        let Some(parts) = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
        else {
            continue;
        };
        for (part_idx, part) in parts.iter().enumerate() {
            for key in ["inlineData", "inline_data", "fileData"] {
                let Some(node) = part.get(key) else {
                    continue;
                };
                let path = format!("/candidates/{candidate_idx}/content/parts/{part_idx}/{key}");
                if let Some(found) = media_from(node, &path)? {
                    return Ok(Some(found));
                }
            }
        }
    }
    Ok(None)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
