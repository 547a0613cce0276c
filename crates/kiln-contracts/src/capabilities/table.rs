use std::sync::OnceLock;

use indexmap::IndexMap;

use super::spec::{CapabilitySpec, DurationRule, ResolutionRule};
use crate::request::{MediaKind, PartRole};

const GEMINI_IMAGE_RATIOS: &[&str] = &[
    "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
];
const FAL_IMAGE_RATIOS: &[&str] = &["1:1", "3:4", "4:3", "9:16", "16:9", "21:9"];
const DRYRUN_IMAGE_RATIOS: &[&str] = &["1:1", "3:4", "4:3", "9:16", "16:9"];

/// Read-only lookup of per-model capabilities, in insertion order.
#[derive(Debug, Clone)]
pub struct CapabilityTable {
    models: IndexMap<String, CapabilitySpec>,
}

impl CapabilityTable {
    pub fn new(models: Option<Vec<CapabilitySpec>>) -> Self {
        let models = match models {
            Some(specs) => specs
                .into_iter()
                .map(|spec| (spec.model.clone(), spec))
                .collect(),
            None => default_models(),
        };
        Self { models }
    }

    /// Process-wide table of built-in models, built on first use.
    pub fn global() -> &'static CapabilityTable {
        static TABLE: OnceLock<CapabilityTable> = OnceLock::new();
        TABLE.get_or_init(|| CapabilityTable::new(None))
    }

    pub fn lookup(&self, model: &str) -> Option<&CapabilitySpec> {
        self.models.get(model.trim())
    }

    pub fn list(&self) -> impl Iterator<Item = &CapabilitySpec> {
        self.models.values()
    }

    pub fn by_kind(&self, kind: MediaKind) -> Vec<&CapabilitySpec> {
        self.models
            .values()
            .filter(|spec| spec.supports(kind))
            .collect()
    }
}

fn default_models() -> IndexMap<String, CapabilitySpec> {
    let mut map = IndexMap::new();

    let mut insert = |spec: CapabilitySpec| {
        map.insert(spec.model.clone(), spec);
    };

    insert(
        CapabilitySpec::image(
            "dryrun-image-1",
            &[MediaKind::Image, MediaKind::Edit],
            DRYRUN_IMAGE_RATIOS,
            "3:4",
        )
        .with_references(0, 4),
    );
    insert(
        CapabilitySpec::video("dryrun-video-1", &["16:9", "9:16"], DurationRule::OneOf(vec![4, 8]))
            .with_resolutions(vec![
                ResolutionRule::new("720p"),
                ResolutionRule::new("1080p").only_at(&[8]),
            ])
            .with_references(0, 2)
            .with_audio(),
    );
    insert(
        CapabilitySpec::image(
            "gemini-2.5-flash-image",
            &[MediaKind::Image, MediaKind::Edit],
            GEMINI_IMAGE_RATIOS,
            "3:4",
        )
        .with_references(0, 3),
    );
    insert(CapabilitySpec::image(
        "fal-ai/nano-banana",
        &[MediaKind::Image],
        FAL_IMAGE_RATIOS,
        "3:4",
    ));
    insert(
        CapabilitySpec::image(
            "fal-ai/nano-banana/edit",
            &[MediaKind::Edit],
            FAL_IMAGE_RATIOS,
            "3:4",
        )
        .with_references(1, 10)
        .with_seed(&[PartRole::Source, PartRole::Subject]),
    );
    insert(
        CapabilitySpec::video(
            "fal-ai/kling-video/v2.1/pro/image-to-video",
            &["16:9", "9:16", "1:1"],
            DurationRule::OneOf(vec![5, 10]),
        )
        .with_references(1, 2)
        .with_seed(&[PartRole::StartFrame]),
    );

    let veo3_resolutions = || {
        vec![
            ResolutionRule::new("720p"),
            ResolutionRule::new("1080p").only_at(&[8]).downgrade_to("720p"),
        ]
    };
    for model in ["veo-3.1-generate-preview", "veo-3.1-fast-generate-preview"] {
        insert(
            CapabilitySpec::video(model, &["16:9", "9:16"], DurationRule::OneOf(vec![4, 6, 8]))
                .with_resolutions(veo3_resolutions())
                .with_references(0, 5)
                .with_audio(),
        );
    }
    insert(
        CapabilitySpec::video(
            "veo-2.0-generate-001",
            &["16:9", "9:16"],
            DurationRule::OneOf(vec![5, 6, 8]),
        )
        .with_resolutions(vec![ResolutionRule::new("720p")])
        .with_references(0, 1),
    );

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_builtin_models_and_misses_unknown() {
        let table = CapabilityTable::global();
        assert!(table.lookup("veo-3.1-generate-preview").is_some());
        assert!(table.lookup(" gemini-2.5-flash-image ").is_some());
        assert!(table.lookup("sdxl").is_none());
    }

    #[test]
    fn every_image_default_ratio_is_allowed() {
        for spec in CapabilityTable::global().list() {
            assert!(!spec.aspect_ratios.is_empty(), "{} has no ratios", spec.model);
            if !spec.is_video_model() {
                assert!(
                    spec.allows_ratio(&spec.default_aspect_ratio),
                    "{} default ratio not allowed",
                    spec.model
                );
            }
        }
    }

    #[test]
    fn seed_models_require_at_least_one_reference() {
        for spec in CapabilityTable::global().list() {
            if spec.seed_required {
                assert!(spec.min_references >= 1, "{}", spec.model);
                assert!(!spec.seed_roles.is_empty(), "{}", spec.model);
            }
            assert!(spec.min_references <= spec.max_references, "{}", spec.model);
        }
    }

    #[test]
    fn custom_table_replaces_defaults() {
        let table = CapabilityTable::new(Some(vec![CapabilitySpec::image(
            "M1",
            &[MediaKind::Image],
            &["1:1", "3:4"],
            "3:4",
        )]));
        assert_eq!(table.list().count(), 1);
        assert!(table.lookup("M1").is_some());
        assert!(table.lookup("dryrun-image-1").is_none());
        assert_eq!(table.by_kind(MediaKind::Video).len(), 0);
    }
}
