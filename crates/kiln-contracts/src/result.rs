use std::fmt;

use crate::request::MediaKind;

#[derive(Clone, PartialEq, Eq)]
pub enum MediaSource {
    Uri(String),
    Bytes(Vec<u8>),
}

impl MediaSource {
    pub fn uri(&self) -> Option<&str> {
        match self {
            Self::Uri(uri) => Some(uri.as_str()),
            Self::Bytes(_) => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Uri(_) => None,
            Self::Bytes(bytes) => Some(bytes.as_slice()),
        }
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uri(uri) => f.debug_tuple("Uri").field(uri).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

/// What the result extractor pulls out of a provider response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaOutput {
    pub source: MediaSource,
    pub mime_type: Option<String>,
    pub kind: MediaKind,
}

/// Canonical successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaResult {
    pub source: MediaSource,
    pub mime_type: Option<String>,
    pub kind: MediaKind,
    /// Prompt text actually sent to the provider.
    pub prompt: String,
    pub model: String,
}

impl MediaResult {
    pub fn new(output: MediaOutput, prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            source: output.source,
            mime_type: output.mime_type,
            kind: output.kind,
            prompt: prompt.into(),
            model: model.into(),
        }
    }

    pub fn uri(&self) -> Option<&str> {
        self.source.uri()
    }
}
