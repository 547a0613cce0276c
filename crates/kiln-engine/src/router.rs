//! Model id → provider adapter routing.
//!
//! Routes are data: an ordered table of exact or prefix matches, each naming the
//! provider, how it delivers results, how it wants reference images and the static
//! field-mapping profile used to shape its request body.

use kiln_contracts::errors::RoutingError;
use kiln_contracts::normalized::{IngestedAsset, NormalizedRequest};
use kiln_contracts::providers::{AssetTransport, Delivery, ProviderKind};
use kiln_contracts::request::PartRole;
use serde_json::Value;

use crate::payload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelMatch {
    Exact(String),
    Prefix(String),
}

impl ModelMatch {
    pub fn matches(&self, model: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == model,
            Self::Prefix(prefix) => model.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Number,
    /// Seconds sent as a string, e.g. `"5"`.
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleField {
    Single(&'static str),
    List(&'static str),
}

/// Flat JSON field names for one Fal endpoint.
#[derive(Debug, PartialEq, Eq)]
pub struct FalFields {
    pub prompt: &'static str,
    pub aspect_ratio: Option<&'static str>,
    pub duration: Option<(&'static str, DurationUnit)>,
    pub resolution: Option<&'static str>,
    pub audio: Option<&'static str>,
    pub count: Option<&'static str>,
    pub image_size: Option<&'static str>,
    pub roles: &'static [(PartRole, RoleField)],
}

impl FalFields {
    pub fn role_field(&self, role: PartRole) -> Option<RoleField> {
        self.roles
            .iter()
            .find(|(mapped, _)| *mapped == role)
            .map(|(_, field)| *field)
    }
}

pub static NANO_BANANA: FalFields = FalFields {
    prompt: "prompt",
    aspect_ratio: Some("aspect_ratio"),
    duration: None,
    resolution: None,
    audio: None,
    count: Some("num_images"),
    image_size: None,
    roles: &[],
};

pub static NANO_BANANA_EDIT: FalFields = FalFields {
    prompt: "prompt",
    aspect_ratio: Some("aspect_ratio"),
    duration: None,
    resolution: None,
    audio: None,
    count: Some("num_images"),
    image_size: None,
    roles: &[
        (PartRole::Source, RoleField::List("image_urls")),
        (PartRole::Subject, RoleField::List("image_urls")),
        (PartRole::Location, RoleField::List("image_urls")),
        (PartRole::Style, RoleField::List("image_urls")),
    ],
};

pub static KLING_VIDEO: FalFields = FalFields {
    prompt: "prompt",
    aspect_ratio: Some("aspect_ratio"),
    duration: Some(("duration", DurationUnit::Text)),
    resolution: None,
    audio: None,
    count: None,
    image_size: None,
    roles: &[
        (PartRole::StartFrame, RoleField::Single("image_url")),
        (PartRole::EndFrame, RoleField::Single("tail_image_url")),
    ],
};

/// Where a Veo reference image lands in `instances[0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VeoField {
    /// A single image slot such as `image` or `lastFrame`.
    Slot(&'static str),
    /// An entry in `referenceImages` with this `referenceType`.
    Reference(&'static str),
}

pub static VEO_ROLES: &[(PartRole, VeoField)] = &[
    (PartRole::StartFrame, VeoField::Slot("image")),
    (PartRole::Source, VeoField::Slot("image")),
    (PartRole::EndFrame, VeoField::Slot("lastFrame")),
    (PartRole::Subject, VeoField::Reference("asset")),
    (PartRole::Location, VeoField::Reference("asset")),
    (PartRole::Style, VeoField::Reference("style")),
];

pub fn veo_field(role: PartRole) -> Option<VeoField> {
    VEO_ROLES
        .iter()
        .find(|(mapped, _)| *mapped == role)
        .map(|(_, field)| *field)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadProfile {
    Dryrun,
    Fal(&'static FalFields),
    Gemini,
    Veo { audio_param: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub matcher: ModelMatch,
    pub provider: ProviderKind,
    pub delivery: Delivery,
    pub transport: AssetTransport,
    pub profile: PayloadProfile,
}

impl Route {
    pub fn exact(
        model: &str,
        provider: ProviderKind,
        delivery: Delivery,
        transport: AssetTransport,
        profile: PayloadProfile,
    ) -> Self {
        Self {
            matcher: ModelMatch::Exact(model.to_string()),
            provider,
            delivery,
            transport,
            profile,
        }
    }

    pub fn prefix(
        prefix: &str,
        provider: ProviderKind,
        delivery: Delivery,
        transport: AssetTransport,
        profile: PayloadProfile,
    ) -> Self {
        Self {
            matcher: ModelMatch::Prefix(prefix.to_string()),
            ..Self::exact("", provider, delivery, transport, profile)
        }
    }
}

/// Provider-ready request body.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEnvelope {
    pub provider: ProviderKind,
    pub model: String,
    pub delivery: Delivery,
    pub body: Value,
    /// Inputs the adapter had no field for.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<Route>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(default_routes())
    }
}

impl Router {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// First route in table order whose matcher accepts `model`.
    pub fn resolve(&self, model: &str) -> Result<&Route, RoutingError> {
        let model = model.trim();
        self.routes
            .iter()
            .find(|route| route.matcher.matches(model))
            .ok_or_else(|| RoutingError::UnsupportedModel(model.to_string()))
    }

    pub fn build(
        &self,
        normalized: &NormalizedRequest,
        assets: &[IngestedAsset],
    ) -> Result<ProviderEnvelope, RoutingError> {
        let route = self.resolve(&normalized.model)?;
        Ok(build_envelope(route, normalized, assets))
    }
}

pub fn build_envelope(
    route: &Route,
    normalized: &NormalizedRequest,
    assets: &[IngestedAsset],
) -> ProviderEnvelope {
    let mut warnings = Vec::new();
    let body = match route.profile {
        PayloadProfile::Dryrun => payload::dryrun_body(normalized, assets),
        PayloadProfile::Fal(fields) => payload::fal_body(fields, normalized, assets, &mut warnings),
        PayloadProfile::Gemini => payload::gemini_body(normalized, assets),
        PayloadProfile::Veo { audio_param } => {
            payload::veo_body(normalized, assets, audio_param, &mut warnings)
        }
    };
    ProviderEnvelope {
        provider: route.provider,
        model: normalized.model.clone(),
        delivery: route.delivery,
        body,
        warnings,
    }
}

fn default_routes() -> Vec<Route> {
    use AssetTransport::{Hosted, Inline};
    use Delivery::{Async, Sync};

    vec![
        Route::exact("dryrun-image-1", ProviderKind::Dryrun, Sync, Inline, PayloadProfile::Dryrun),
        Route::exact("dryrun-video-1", ProviderKind::Dryrun, Async, Inline, PayloadProfile::Dryrun),
        Route::prefix("gemini-", ProviderKind::Gemini, Sync, Inline, PayloadProfile::Gemini),
        Route::exact(
            "fal-ai/nano-banana/edit",
            ProviderKind::Fal,
            Sync,
            Hosted,
            PayloadProfile::Fal(&NANO_BANANA_EDIT),
        ),
        Route::exact(
            "fal-ai/nano-banana",
            ProviderKind::Fal,
            Sync,
            Hosted,
            PayloadProfile::Fal(&NANO_BANANA),
        ),
        Route::prefix(
            "fal-ai/kling-video/",
            ProviderKind::Fal,
            Sync,
            Hosted,
            PayloadProfile::Fal(&KLING_VIDEO),
        ),
        Route::prefix(
            "veo-3",
            ProviderKind::Veo,
            Async,
            Inline,
            PayloadProfile::Veo { audio_param: true },
        ),
        Route::prefix(
            "veo-2",
            ProviderKind::Veo,
            Async,
            Inline,
            PayloadProfile::Veo { audio_param: false },
        ),
    ]
}
