use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::request::{EditParams, GenerationRequest, MediaKind, PartRole, ReferencePart};

/// One normalization the validator applied to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Adjustment {
    AspectRatioFallback {
        requested: String,
        applied: String,
    },
    DurationDefaulted {
        applied: u32,
    },
    DurationOverridden {
        requested: u32,
        applied: u32,
    },
    DurationSnapped {
        requested: u32,
        applied: u32,
    },
    /// Duration moved to satisfy a resolution that is only legal at certain lengths.
    DurationForResolution {
        resolution: String,
        requested: u32,
        applied: u32,
    },
    ResolutionDefaulted {
        requested: Option<String>,
        applied: String,
    },
    ResolutionDowngraded {
        requested: String,
        applied: String,
        duration: u32,
    },
    /// The model takes no resolution parameter.
    ResolutionIgnored {
        requested: String,
    },
    AudioDisabled,
}

impl Adjustment {
    pub fn describe(&self) -> String {
        match self {
            Self::AspectRatioFallback { requested, applied } => {
                format!("aspect ratio {requested:?} unsupported; using {applied}")
            }
            Self::DurationDefaulted { applied } => format!("duration defaulted to {applied}s"),
            Self::DurationOverridden { requested, applied } => {
                format!("duration fixed at {applied}s (requested {requested}s)")
            }
            Self::DurationSnapped { requested, applied } => {
                format!("duration snapped from {requested}s to {applied}s")
            }
            Self::DurationForResolution {
                resolution,
                requested,
                applied,
            } => format!("{resolution} requires {applied}s (requested {requested}s)"),
            Self::ResolutionDefaulted { requested, applied } => match requested {
                Some(requested) => format!("resolution {requested:?} unsupported; using {applied}"),
                None => format!("resolution defaulted to {applied}"),
            },
            Self::ResolutionDowngraded {
                requested,
                applied,
                duration,
            } => format!("{requested} unavailable at {duration}s; downgraded to {applied}"),
            Self::ResolutionIgnored { requested } => {
                format!("resolution {requested:?} ignored; model has no resolution setting")
            }
            Self::AudioDisabled => "audio unsupported by model; disabled".to_string(),
        }
    }
}

/// Resolved video settings after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedVideo {
    pub duration_seconds: u32,
    pub resolution: Option<String>,
    pub audio: bool,
}

/// A request that passed validation, with every applied normalization recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRequest {
    pub kind: MediaKind,
    pub model: String,
    pub prompt: String,
    pub aspect_ratio: String,
    pub parts: Vec<ReferencePart>,
    pub video: Option<NormalizedVideo>,
    pub edit: Option<EditParams>,
    pub adjustments: Vec<Adjustment>,
}

impl NormalizedRequest {
    /// Starts from the request as given; validator rules fill in the rest.
    pub fn from_request(request: GenerationRequest) -> Self {
        Self {
            kind: request.kind,
            model: request.model.trim().to_string(),
            prompt: request.prompt.trim().to_string(),
            aspect_ratio: request.aspect_ratio.trim().to_string(),
            parts: request.parts,
            video: None,
            edit: request.edit,
            adjustments: Vec::new(),
        }
    }

    pub fn image_count(&self) -> u32 {
        self.edit
            .as_ref()
            .and_then(|edit| edit.count)
            .unwrap_or(1)
            .max(1)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum AssetReference {
    Hosted(String),
    Inline(Vec<u8>),
}

/// A reference part after ingestion, still tagged with its role and original position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedAsset {
    pub role: PartRole,
    pub position: usize,
    pub mime_type: String,
    pub reference: AssetReference,
}

impl IngestedAsset {
    pub fn hosted_url(&self) -> Option<&str> {
        match &self.reference {
            AssetReference::Hosted(url) => Some(url.as_str()),
            AssetReference::Inline(_) => None,
        }
    }

    pub fn inline_base64(&self) -> Option<String> {
        match &self.reference {
            AssetReference::Hosted(_) => None,
            AssetReference::Inline(bytes) => Some(BASE64.encode(bytes)),
        }
    }

    /// Hosted URL, or a `data:` URL for inline bytes.
    pub fn url_or_data_url(&self) -> String {
        match &self.reference {
            AssetReference::Hosted(url) => url.clone(),
            AssetReference::Inline(bytes) => {
                format!("data:{};base64,{}", self.mime_type, BASE64.encode(bytes))
            }
        }
    }
}

impl std::fmt::Debug for AssetReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hosted(url) => f.debug_tuple("Hosted").field(url).finish(),
            Self::Inline(bytes) => f
                .debug_tuple("Inline")
                .field(&format_args!("{} bytes", bytes.len()))
                .finish(),
        }
    }
}
