//! Request normalization against a model's [`CapabilitySpec`].
//!
//! Each rule is a standalone function. Normalizations never fail silently: every
//! change lands in [`NormalizedRequest::adjustments`].

use kiln_contracts::capabilities::{CapabilitySpec, CapabilityTable, DurationRule};
use kiln_contracts::errors::{ValidationError, ValidationFailure};
use kiln_contracts::normalized::{Adjustment, NormalizedRequest, NormalizedVideo};
use kiln_contracts::request::{parse_ratio, GenerationRequest, MediaKind, VideoParams};

/// Used only when a video model places no restriction on duration.
pub const DEFAULT_VIDEO_SECONDS: u32 = 8;

pub fn lookup<'a>(
    table: &'a CapabilityTable,
    model: &str,
) -> Result<&'a CapabilitySpec, ValidationError> {
    table.lookup(model).ok_or_else(|| {
        ValidationError::new(
            ValidationFailure::UnknownModel,
            format!("model '{}' is not in the capability table", model.trim()),
        )
    })
}

pub fn validate(
    request: GenerationRequest,
    spec: &CapabilitySpec,
) -> Result<NormalizedRequest, ValidationError> {
    check_kind(&request, spec)?;
    check_prompt(&request)?;
    check_parameters(&request)?;
    check_references(&request, spec)?;

    let video_params = request.video.clone();
    let mut normalized = NormalizedRequest::from_request(request);
    normalized.aspect_ratio =
        resolve_aspect_ratio(&normalized.aspect_ratio, spec, &mut normalized.adjustments);

    if normalized.kind.is_video() {
        let video = normalize_video(
            video_params.unwrap_or_default(),
            spec,
            &mut normalized.adjustments,
        )?;
        normalized.video = Some(video);
    }
    Ok(normalized)
}

pub fn check_kind(request: &GenerationRequest, spec: &CapabilitySpec) -> Result<(), ValidationError> {
    if spec.supports(request.kind) {
        return Ok(());
    }
    Err(ValidationError::new(
        ValidationFailure::KindMismatch,
        format!(
            "model '{}' does not support {} requests",
            spec.model, request.kind
        ),
    ))
}

pub fn check_prompt(request: &GenerationRequest) -> Result<(), ValidationError> {
    if request.prompt.trim().is_empty() {
        return Err(ValidationError::new(
            ValidationFailure::EmptyPrompt,
            "prompt is empty",
        ));
    }
    Ok(())
}

/// Video parameters belong to video requests only; edit parameters never do.
pub fn check_parameters(request: &GenerationRequest) -> Result<(), ValidationError> {
    if request.video.is_some() && request.kind != MediaKind::Video {
        return Err(ValidationError::new(
            ValidationFailure::ConflictingParameters,
            format!("video parameters given on a {} request", request.kind),
        ));
    }
    if request.edit.is_some() && request.kind == MediaKind::Video {
        return Err(ValidationError::new(
            ValidationFailure::ConflictingParameters,
            "edit parameters given on a video request",
        ));
    }
    Ok(())
}

pub fn check_references(
    request: &GenerationRequest,
    spec: &CapabilitySpec,
) -> Result<(), ValidationError> {
    let parts = &request.parts;
    let seed_needed = spec.seed_required || request.kind == MediaKind::Edit;
    if seed_needed {
        let has_seed = if spec.seed_roles.is_empty() {
            !parts.is_empty()
        } else {
            parts.iter().any(|part| spec.seed_roles.contains(&part.role))
        };
        if !has_seed {
            let roles = spec
                .seed_roles
                .iter()
                .map(|role| role.as_str())
                .collect::<Vec<&str>>();
            let wanted = if roles.is_empty() {
                "a reference image".to_string()
            } else {
                format!("a {} image", roles.join(" or "))
            };
            return Err(ValidationError::new(
                ValidationFailure::MissingRequiredInput,
                format!("model '{}' requires {wanted}", spec.model),
            ));
        }
    }
    if parts.len() < spec.min_references {
        return Err(ValidationError::new(
            ValidationFailure::MissingRequiredInput,
            format!(
                "model '{}' requires at least {} reference image(s), got {}",
                spec.model,
                spec.min_references,
                parts.len()
            ),
        ));
    }
    if parts.len() > spec.max_references {
        return Err(ValidationError::new(
            ValidationFailure::TooManyReferences,
            format!(
                "model '{}' accepts at most {} reference image(s), got {}",
                spec.model,
                spec.max_references,
                parts.len()
            ),
        ));
    }
    Ok(())
}

/// The returned ratio is always one of `spec.aspect_ratios` unless that list is empty.
pub fn resolve_aspect_ratio(
    requested: &str,
    spec: &CapabilitySpec,
    adjustments: &mut Vec<Adjustment>,
) -> String {
    if spec.allows_ratio(requested) {
        return requested.to_string();
    }
    let candidate = if spec.is_video_model() {
        infer_video_ratio(requested).to_string()
    } else {
        spec.default_aspect_ratio.clone()
    };
    let applied = if spec.allows_ratio(&candidate) {
        candidate
    } else {
        spec.aspect_ratios.first().cloned().unwrap_or(candidate)
    };
    adjustments.push(Adjustment::AspectRatioFallback {
        requested: requested.to_string(),
        applied: applied.clone(),
    });
    applied
}

/// Landscape when wider than tall, otherwise portrait.
pub fn infer_video_ratio(requested: &str) -> &'static str {
    match parse_ratio(requested) {
        Some((width, height)) if width > height => "16:9",
        _ => "9:16",
    }
}

pub fn normalize_video(
    params: VideoParams,
    spec: &CapabilitySpec,
    adjustments: &mut Vec<Adjustment>,
) -> Result<NormalizedVideo, ValidationError> {
    let duration = resolve_duration(params.duration_seconds, &spec.durations, adjustments);
    let resolution = resolve_resolution(params.resolution.as_deref(), spec, adjustments);
    let (resolution, duration) =
        reconcile_resolution_duration(resolution, duration, spec, adjustments)?;
    let audio = resolve_audio(params.audio, spec, adjustments);
    Ok(NormalizedVideo {
        duration_seconds: duration,
        resolution,
        audio,
    })
}

pub fn resolve_duration(
    requested: Option<u32>,
    rule: &DurationRule,
    adjustments: &mut Vec<Adjustment>,
) -> u32 {
    match rule {
        DurationRule::Fixed(value) => {
            match requested {
                Some(seconds) if seconds == *value => {}
                Some(seconds) => adjustments.push(Adjustment::DurationOverridden {
                    requested: seconds,
                    applied: *value,
                }),
                None => adjustments.push(Adjustment::DurationDefaulted { applied: *value }),
            }
            *value
        }
        DurationRule::OneOf(values) => {
            let highest = values.iter().copied().max().unwrap_or(DEFAULT_VIDEO_SECONDS);
            let Some(seconds) = requested else {
                adjustments.push(Adjustment::DurationDefaulted { applied: highest });
                return highest;
            };
            if values.contains(&seconds) {
                return seconds;
            }
            let applied = values
                .iter()
                .copied()
                .filter(|value| *value >= seconds)
                .min()
                .unwrap_or(highest);
            adjustments.push(Adjustment::DurationSnapped {
                requested: seconds,
                applied,
            });
            applied
        }
        DurationRule::Any => match requested {
            Some(seconds) => seconds,
            None => {
                adjustments.push(Adjustment::DurationDefaulted {
                    applied: DEFAULT_VIDEO_SECONDS,
                });
                DEFAULT_VIDEO_SECONDS
            }
        },
    }
}

pub fn resolve_resolution(
    requested: Option<&str>,
    spec: &CapabilitySpec,
    adjustments: &mut Vec<Adjustment>,
) -> Option<String> {
    let requested = requested.map(str::trim).filter(|value| !value.is_empty());
    let Some(first) = spec.resolutions.first() else {
        if let Some(requested) = requested {
            adjustments.push(Adjustment::ResolutionIgnored {
                requested: requested.to_string(),
            });
        }
        return None;
    };
    if let Some(rule) = requested.and_then(|token| spec.resolution(token)) {
        return Some(rule.token.clone());
    }
    adjustments.push(Adjustment::ResolutionDefaulted {
        requested: requested.map(str::to_string),
        applied: first.token.clone(),
    });
    Some(first.token.clone())
}

/// Fixed precedence when a resolution is not legal at the chosen duration:
/// move the duration to the lowest length the resolution allows, else take the
/// resolution's downgrade target, else fail.
pub fn reconcile_resolution_duration(
    resolution: Option<String>,
    duration: u32,
    spec: &CapabilitySpec,
    adjustments: &mut Vec<Adjustment>,
) -> Result<(Option<String>, u32), ValidationError> {
    let Some(token) = resolution else {
        return Ok((None, duration));
    };
    let Some(rule) = spec.resolution(&token) else {
        return Ok((Some(token), duration));
    };
    if rule.legal_at(duration) {
        return Ok((Some(token), duration));
    }

    if let Some(applied) = rule
        .durations
        .iter()
        .copied()
        .filter(|seconds| spec.durations.permits(*seconds))
        .min()
    {
        adjustments.push(Adjustment::DurationForResolution {
            resolution: token.clone(),
            requested: duration,
            applied,
        });
        return Ok((Some(token), applied));
    }

    if let Some(target) = rule
        .downgrade_to
        .as_deref()
        .and_then(|target| spec.resolution(target))
        .filter(|target| target.legal_at(duration))
    {
        adjustments.push(Adjustment::ResolutionDowngraded {
            requested: token,
            applied: target.token.clone(),
            duration,
        });
        return Ok((Some(target.token.clone()), duration));
    }

    Err(ValidationError::new(
        ValidationFailure::UnsupportedResolution,
        format!(
            "model '{}' cannot produce {token} at {duration}s",
            spec.model
        ),
    ))
}

pub fn resolve_audio(requested: bool, spec: &CapabilitySpec, adjustments: &mut Vec<Adjustment>) -> bool {
    if requested && !spec.audio {
        adjustments.push(Adjustment::AudioDisabled);
        return false;
    }
    requested
}

#[cfg(test)]
mod tests {
    use kiln_contracts::capabilities::ResolutionRule;
    use kiln_contracts::request::{EditParams, PartRole, ReferencePart};

    use super::*;

    fn veo_like() -> CapabilitySpec {
        CapabilitySpec::video("veo-test", &["16:9", "9:16"], DurationRule::OneOf(vec![4, 6, 8]))
            .with_resolutions(vec![
                ResolutionRule::new("720p"),
                ResolutionRule::new("1080p").only_at(&[8]).downgrade_to("720p"),
            ])
            .with_references(0, 3)
            .with_audio()
    }

    fn video_request(model: &str, params: VideoParams) -> GenerationRequest {
        GenerationRequest::new(MediaKind::Video, model, "a boat at dusk", "16:9").with_video(params)
    }

    fn png(role: PartRole) -> ReferencePart {
        ReferencePart::from_bytes(role, "image/png", vec![1, 2, 3])
    }

    #[test]
    fn allowed_ratio_passes_through_for_every_model() {
        for spec in CapabilityTable::global().list() {
            for ratio in &spec.aspect_ratios {
                let mut adjustments = Vec::new();
                assert_eq!(&resolve_aspect_ratio(ratio, spec, &mut adjustments), ratio);
                assert!(adjustments.is_empty());
            }
        }
    }

    #[test]
    fn unsupported_ratio_always_lands_in_allowed_set() {
        for spec in CapabilityTable::global().list() {
            for requested in ["21:9", "2:1", "1:3", "banana", "", "5:4", "1:1"] {
                let mut adjustments = Vec::new();
                let applied = resolve_aspect_ratio(requested, spec, &mut adjustments);
                assert!(
                    spec.allows_ratio(&applied),
                    "{} produced {applied} for {requested}",
                    spec.model
                );
            }
        }
    }

    #[test]
    fn image_models_fall_back_to_their_default() {
        let spec = CapabilitySpec::image("M1", &[MediaKind::Image], &["1:1", "3:4"], "3:4");
        let mut adjustments = Vec::new();
        assert_eq!(resolve_aspect_ratio("21:9", &spec, &mut adjustments), "3:4");
        assert_eq!(
            adjustments,
            vec![Adjustment::AspectRatioFallback {
                requested: "21:9".to_string(),
                applied: "3:4".to_string(),
            }]
        );
    }

    #[test]
    fn video_models_infer_orientation() {
        let spec = veo_like();
        let mut adjustments = Vec::new();
        assert_eq!(resolve_aspect_ratio("21:9", &spec, &mut adjustments), "16:9");
        assert_eq!(resolve_aspect_ratio("4:5", &spec, &mut adjustments), "9:16");
        assert_eq!(resolve_aspect_ratio("1:1", &spec, &mut adjustments), "9:16");
        assert_eq!(resolve_aspect_ratio("wide", &spec, &mut adjustments), "9:16");
    }

    #[test]
    fn fixed_duration_overrides_and_records() {
        let mut adjustments = Vec::new();
        assert_eq!(resolve_duration(Some(4), &DurationRule::Fixed(8), &mut adjustments), 8);
        assert_eq!(
            adjustments,
            vec![Adjustment::DurationOverridden {
                requested: 4,
                applied: 8
            }]
        );
    }

    #[test]
    fn enumerated_duration_snaps_up_then_to_highest() {
        let rule = DurationRule::OneOf(vec![4, 6, 8]);
        let mut adjustments = Vec::new();
        assert_eq!(resolve_duration(Some(5), &rule, &mut adjustments), 6);
        assert_eq!(resolve_duration(Some(12), &rule, &mut adjustments), 8);
        assert_eq!(resolve_duration(Some(6), &rule, &mut adjustments), 6);
        assert_eq!(resolve_duration(None, &rule, &mut adjustments), 8);
        assert_eq!(adjustments.len(), 3);
    }

    #[test]
    fn resolution_gated_to_eight_seconds_moves_duration() {
        let spec = veo_like();
        for requested in [4, 5, 6] {
            let normalized = validate(
                video_request(
                    "veo-test",
                    VideoParams {
                        duration_seconds: Some(requested),
                        resolution: Some("1080p".to_string()),
                        audio: false,
                    },
                ),
                &spec,
            )
            .unwrap();
            let video = normalized.video.unwrap();
            assert_eq!(video.duration_seconds, 8);
            assert_eq!(video.resolution.as_deref(), Some("1080p"));
        }
    }

    #[test]
    fn resolution_downgrades_when_no_duration_fits() {
        let spec = CapabilitySpec::video("short-only", &["16:9"], DurationRule::OneOf(vec![4, 6]))
            .with_resolutions(vec![
                ResolutionRule::new("720p"),
                ResolutionRule::new("1080p").only_at(&[8]).downgrade_to("720p"),
            ]);
        let mut adjustments = Vec::new();
        let (resolution, duration) = reconcile_resolution_duration(
            Some("1080p".to_string()),
            4,
            &spec,
            &mut adjustments,
        )
        .unwrap();
        assert_eq!(resolution.as_deref(), Some("720p"));
        assert_eq!(duration, 4);
        assert!(matches!(
            adjustments.as_slice(),
            [Adjustment::ResolutionDowngraded { .. }]
        ));
    }

    #[test]
    fn resolution_without_any_escape_is_rejected() {
        let spec = CapabilitySpec::video("stuck", &["16:9"], DurationRule::OneOf(vec![4, 6]))
            .with_resolutions(vec![ResolutionRule::new("4k").only_at(&[8])]);
        let err = reconcile_resolution_duration(Some("4k".to_string()), 4, &spec, &mut Vec::new())
            .unwrap_err();
        assert_eq!(err.failure, ValidationFailure::UnsupportedResolution);
    }

    #[test]
    fn unknown_resolution_falls_back_to_first() {
        let spec = veo_like();
        let mut adjustments = Vec::new();
        assert_eq!(
            resolve_resolution(Some("4k"), &spec, &mut adjustments).as_deref(),
            Some("720p")
        );
        assert_eq!(
            resolve_resolution(Some("1080P"), &spec, &mut adjustments).as_deref(),
            Some("1080p")
        );
        assert_eq!(adjustments.len(), 1);
    }

    #[test]
    fn audio_is_disabled_on_silent_models() {
        let spec = CapabilityTable::global()
            .lookup("veo-2.0-generate-001")
            .unwrap()
            .clone();
        let normalized = validate(
            video_request(
                "veo-2.0-generate-001",
                VideoParams {
                    duration_seconds: Some(8),
                    resolution: None,
                    audio: true,
                },
            ),
            &spec,
        )
        .unwrap();
        assert!(!normalized.video.as_ref().unwrap().audio);
        assert!(normalized.adjustments.contains(&Adjustment::AudioDisabled));
    }

    #[test]
    fn missing_seed_image_is_rejected() {
        let spec = lookup(CapabilityTable::global(), "fal-ai/kling-video/v2.1/pro/image-to-video")
            .unwrap();
        let request = video_request(
            &spec.model,
            VideoParams {
                duration_seconds: Some(5),
                ..VideoParams::default()
            },
        )
        .with_part(png(PartRole::EndFrame));
        let err = validate(request, spec).unwrap_err();
        assert_eq!(err.failure, ValidationFailure::MissingRequiredInput);
    }

    #[test]
    fn edit_requests_need_a_reference_even_on_general_models() {
        let spec = lookup(CapabilityTable::global(), "gemini-2.5-flash-image").unwrap();
        let request = GenerationRequest::new(MediaKind::Edit, &spec.model, "make it blue", "1:1");
        let err = validate(request.clone(), spec).unwrap_err();
        assert_eq!(err.failure, ValidationFailure::MissingRequiredInput);

        let ok = validate(request.with_part(png(PartRole::Source)), spec).unwrap();
        assert_eq!(ok.parts.len(), 1);
    }

    #[test]
    fn too_many_references_are_rejected() {
        let spec = lookup(CapabilityTable::global(), "veo-2.0-generate-001").unwrap();
        let request = video_request(&spec.model, VideoParams::default())
            .with_part(png(PartRole::StartFrame))
            .with_part(png(PartRole::EndFrame));
        assert_eq!(
            validate(request, spec).unwrap_err().failure,
            ValidationFailure::TooManyReferences
        );
    }

    #[test]
    fn kind_and_parameter_conflicts_are_rejected() {
        let table = CapabilityTable::global();
        let image_model = lookup(table, "fal-ai/nano-banana").unwrap();
        let video_on_image = video_request(&image_model.model, VideoParams::default());
        assert_eq!(
            validate(video_on_image, image_model).unwrap_err().failure,
            ValidationFailure::KindMismatch
        );

        let stray_video = GenerationRequest::new(MediaKind::Image, &image_model.model, "cat", "1:1")
            .with_video(VideoParams::default());
        assert_eq!(
            validate(stray_video, image_model).unwrap_err().failure,
            ValidationFailure::ConflictingParameters
        );

        let veo = lookup(table, "veo-3.1-generate-preview").unwrap();
        let stray_edit = video_request(&veo.model, VideoParams::default()).with_edit(EditParams::default());
        assert_eq!(
            validate(stray_edit, veo).unwrap_err().failure,
            ValidationFailure::ConflictingParameters
        );
    }

    #[test]
    fn blank_prompt_and_unknown_model_are_rejected() {
        let spec = lookup(CapabilityTable::global(), "dryrun-image-1").unwrap();
        let blank = GenerationRequest::new(MediaKind::Image, &spec.model, "   ", "1:1");
        assert_eq!(
            validate(blank, spec).unwrap_err().failure,
            ValidationFailure::EmptyPrompt
        );
        assert_eq!(
            lookup(CapabilityTable::global(), "sdxl").unwrap_err().failure,
            ValidationFailure::UnknownModel
        );
    }

    #[test]
    fn every_normalization_is_recorded() {
        let spec = veo_like();
        let normalized = validate(
            GenerationRequest::new(MediaKind::Video, "veo-test", "storm", "4:3").with_video(
                VideoParams {
                    duration_seconds: Some(5),
                    resolution: Some("1080p".to_string()),
                    audio: true,
                },
            ),
            &spec,
        )
        .unwrap();
        assert_eq!(normalized.aspect_ratio, "16:9");
        assert_eq!(
            normalized.adjustments,
            vec![
                Adjustment::AspectRatioFallback {
                    requested: "4:3".to_string(),
                    applied: "16:9".to_string(),
                },
                Adjustment::DurationSnapped {
                    requested: 5,
                    applied: 6,
                },
                Adjustment::DurationForResolution {
                    resolution: "1080p".to_string(),
                    requested: 6,
                    applied: 8,
                },
            ]
        );
        assert!(normalized.video.unwrap().audio);
    }
}
