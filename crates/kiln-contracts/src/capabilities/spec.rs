use crate::request::{MediaKind, PartRole};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurationRule {
    Any,
    Fixed(u32),
    /// Sorted ascending, never empty.
    OneOf(Vec<u32>),
}

impl DurationRule {
    pub fn permits(&self, seconds: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Fixed(value) => *value == seconds,
            Self::OneOf(values) => values.contains(&seconds),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRule {
    pub token: String,
    /// Durations this resolution is legal at; empty means any.
    pub durations: Vec<u32>,
    pub downgrade_to: Option<String>,
}

impl ResolutionRule {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            durations: Vec::new(),
            downgrade_to: None,
        }
    }

    pub fn only_at(mut self, durations: &[u32]) -> Self {
        self.durations = durations.to_vec();
        self
    }

    pub fn downgrade_to(mut self, token: &str) -> Self {
        self.downgrade_to = Some(token.to_string());
        self
    }

    pub fn legal_at(&self, seconds: u32) -> bool {
        self.durations.is_empty() || self.durations.contains(&seconds)
    }
}

/// Static description of what one model accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySpec {
    pub model: String,
    pub kinds: Vec<MediaKind>,
    pub aspect_ratios: Vec<String>,
    /// Fallback for image models when the requested ratio is unsupported.
    pub default_aspect_ratio: String,
    pub durations: DurationRule,
    pub resolutions: Vec<ResolutionRule>,
    pub audio: bool,
    pub min_references: usize,
    pub max_references: usize,
    pub seed_required: bool,
    pub seed_roles: Vec<PartRole>,
}

impl CapabilitySpec {
    pub fn image(model: &str, kinds: &[MediaKind], ratios: &[&str], default_ratio: &str) -> Self {
        Self {
            model: model.to_string(),
            kinds: kinds.to_vec(),
            aspect_ratios: ratios.iter().map(|item| (*item).to_string()).collect(),
            default_aspect_ratio: default_ratio.to_string(),
            durations: DurationRule::Any,
            resolutions: Vec::new(),
            audio: false,
            min_references: 0,
            max_references: 0,
            seed_required: false,
            seed_roles: Vec::new(),
        }
    }

    pub fn video(model: &str, ratios: &[&str], durations: DurationRule) -> Self {
        Self {
            model: model.to_string(),
            kinds: vec![MediaKind::Video],
            aspect_ratios: ratios.iter().map(|item| (*item).to_string()).collect(),
            default_aspect_ratio: "9:16".to_string(),
            durations,
            resolutions: Vec::new(),
            audio: false,
            min_references: 0,
            max_references: 0,
            seed_required: false,
            seed_roles: Vec::new(),
        }
    }

    pub fn with_references(mut self, min: usize, max: usize) -> Self {
        self.min_references = min;
        self.max_references = max;
        self
    }

    pub fn with_seed(mut self, roles: &[PartRole]) -> Self {
        self.seed_required = true;
        self.seed_roles = roles.to_vec();
        self
    }

    pub fn with_resolutions(mut self, resolutions: Vec<ResolutionRule>) -> Self {
        self.resolutions = resolutions;
        self
    }

    pub fn with_audio(mut self) -> Self {
        self.audio = true;
        self
    }

    pub fn supports(&self, kind: MediaKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn is_video_model(&self) -> bool {
        self.supports(MediaKind::Video)
    }

    pub fn allows_ratio(&self, ratio: &str) -> bool {
        self.aspect_ratios.iter().any(|item| item == ratio)
    }

    pub fn resolution(&self, token: &str) -> Option<&ResolutionRule> {
        self.resolutions
            .iter()
            .find(|rule| rule.token.eq_ignore_ascii_case(token))
    }
}
