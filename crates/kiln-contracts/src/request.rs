use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Edit,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Edit => "edit",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "edit" => Some(Self::Edit),
            _ => None,
        }
    }

    pub fn is_video(self) -> bool {
        self == Self::Video
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a reference image is for. Some providers map roles to distinct fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartRole {
    StartFrame,
    EndFrame,
    Subject,
    Location,
    Style,
    Source,
}

impl PartRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartFrame => "start-frame",
            Self::EndFrame => "end-frame",
            Self::Subject => "subject",
            Self::Location => "location",
            Self::Style => "style",
            Self::Source => "source",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "start-frame" | "start" => Some(Self::StartFrame),
            "end-frame" | "end" => Some(Self::EndFrame),
            "subject" => Some(Self::Subject),
            "location" => Some(Self::Location),
            "style" => Some(Self::Style),
            "source" => Some(Self::Source),
            _ => None,
        }
    }
}

impl fmt::Display for PartRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum PartData {
    Bytes(Vec<u8>),
    /// Plain base64 or a `data:<mime>;base64,` URL.
    Base64(String),
}

impl PartData {
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::Base64(raw) => {
                let payload = match raw.split_once(";base64,") {
                    Some((_, data)) => data,
                    None => raw.as_str(),
                };
                BASE64.decode(payload.trim().as_bytes())
            }
        }
    }
}

impl fmt::Debug for PartData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Base64(raw) => write!(f, "Base64({} chars)", raw.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePart {
    pub role: PartRole,
    pub mime_type: String,
    pub data: PartData,
}

impl ReferencePart {
    pub fn from_bytes(role: PartRole, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            role,
            mime_type: mime_type.into(),
            data: PartData::Bytes(bytes),
        }
    }

    /// Accepts `data:image/png;base64,...`; the MIME type in the URL wins over `fallback_mime`.
    pub fn from_data_url(role: PartRole, raw: impl Into<String>, fallback_mime: &str) -> Self {
        let raw = raw.into();
        let mime_type = raw
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(";base64,"))
            .map(|(mime, _)| mime.trim().to_string())
            .filter(|mime| !mime.is_empty())
            .unwrap_or_else(|| fallback_mime.to_string());
        Self {
            role,
            mime_type,
            data: PartData::Base64(raw),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoParams {
    pub duration_seconds: Option<u32>,
    pub resolution: Option<String>,
    #[serde(default)]
    pub audio: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditParams {
    pub image_size: Option<String>,
    pub count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub kind: MediaKind,
    pub prompt: String,
    pub aspect_ratio: String,
    pub model: String,
    pub parts: Vec<ReferencePart>,
    pub video: Option<VideoParams>,
    pub edit: Option<EditParams>,
}

impl GenerationRequest {
    pub fn new(
        kind: MediaKind,
        model: impl Into<String>,
        prompt: impl Into<String>,
        aspect_ratio: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            aspect_ratio: aspect_ratio.into(),
            model: model.into(),
            parts: Vec::new(),
            video: None,
            edit: None,
        }
    }

    pub fn with_part(mut self, part: ReferencePart) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_video(mut self, video: VideoParams) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_edit(mut self, edit: EditParams) -> Self {
        self.edit = Some(edit);
        self
    }
}

/// Parses `W:H` (or `W/H`, `WxH`) into a positive pair.
pub fn parse_ratio(raw: &str) -> Option<(u32, u32)> {
    let normalized = raw.trim().to_ascii_lowercase().replace(['/', 'x'], ":");
    let (left, right) = normalized.split_once(':')?;
    let width = left.trim().parse::<u32>().ok()?;
    let height = right.trim().parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}
