use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use kiln_contracts::capabilities::{CapabilitySpec, DurationRule};
use kiln_contracts::events::{EventWriter, ProgressEvent};
use kiln_contracts::request::{
    EditParams, GenerationRequest, MediaKind, PartRole, ReferencePart, VideoParams,
};
use kiln_contracts::result::{MediaResult, MediaSource};
use kiln_engine::{CancelToken, Engine, EngineConfig, GenerationUpdate};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kiln-rs", version, about = "Media generation across image and video providers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List built-in models and what they accept.
    Models(ModelsArgs),
    /// Run one generation and wait for the result.
    Generate(GenerateArgs),
}

#[derive(Debug, Parser)]
struct ModelsArgs {
    #[arg(long)]
    kind: Option<String>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    model: String,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "image")]
    kind: String,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: String,
    /// Reference image as `role=path`; roles: start-frame, end-frame, subject, location, style, source.
    #[arg(long = "ref", value_name = "ROLE=PATH")]
    refs: Vec<String>,
    #[arg(long)]
    duration: Option<u32>,
    #[arg(long)]
    resolution: Option<String>,
    #[arg(long)]
    audio: bool,
    #[arg(long)]
    image_size: Option<String>,
    #[arg(long)]
    count: Option<u32>,
    /// Where to write inline results. Hosted results are printed as a URI.
    #[arg(long)]
    out: Option<PathBuf>,
    /// JSONL progress log, appended to.
    #[arg(long, default_value = "events.jsonl")]
    events: PathBuf,
    /// Cancel the generation after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("kiln-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Models(args) => run_models(args),
        Command::Generate(args) => run_generate(args),
    }
}

fn run_models(args: ModelsArgs) -> Result<i32> {
    let engine = Engine::new(EngineConfig::from_env());
    let kind = args
        .kind
        .as_deref()
        .map(|raw| MediaKind::parse(raw).ok_or_else(|| anyhow!("unknown kind: {raw}")))
        .transpose()?;
    for spec in engine.capabilities().list() {
        if kind.map(|kind| !spec.supports(kind)).unwrap_or(false) {
            continue;
        }
        let route = engine
            .router()
            .resolve(&spec.model)
            .map(|route| format!("{} {:?}", route.provider, route.delivery).to_ascii_lowercase())
            .unwrap_or_else(|_| "unrouted".to_string());
        println!("{}", describe_model(spec, &route));
    }
    Ok(0)
}

fn describe_model(spec: &CapabilitySpec, route: &str) -> String {
    let kinds = spec
        .kinds
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<&str>>()
        .join(",");
    let mut line = format!(
        "{}  [{}]  {}  ratios={}",
        spec.model,
        kinds,
        route,
        spec.aspect_ratios.join(",")
    );
    if spec.is_video_model() {
        line.push_str(&format!("  duration={}", describe_durations(&spec.durations)));
    }
    if !spec.resolutions.is_empty() {
        let resolutions = spec
            .resolutions
            .iter()
            .map(|rule| {
                if rule.durations.is_empty() {
                    rule.token.clone()
                } else {
                    let seconds = rule
                        .durations
                        .iter()
                        .map(|value| format!("{value}s"))
                        .collect::<Vec<String>>()
                        .join("/");
                    format!("{}@{seconds}", rule.token)
                }
            })
            .collect::<Vec<String>>()
            .join(",");
        line.push_str(&format!("  resolution={resolutions}"));
    }
    if spec.max_references > 0 {
        line.push_str(&format!(
            "  refs={}..{}",
            spec.min_references, spec.max_references
        ));
    }
    if spec.audio {
        line.push_str("  audio");
    }
    line
}

fn describe_durations(rule: &DurationRule) -> String {
    match rule {
        DurationRule::Any => "any".to_string(),
        DurationRule::Fixed(value) => format!("{value}s"),
        DurationRule::OneOf(values) => values
            .iter()
            .map(|value| format!("{value}s"))
            .collect::<Vec<String>>()
            .join("|"),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let kind = MediaKind::parse(&args.kind).ok_or_else(|| anyhow!("unknown kind: {}", args.kind))?;
    let request = build_request(&args, kind)?;

    let generation_id = format!("gen-{}", short_stamp());
    let events = EventWriter::new(args.events.clone(), generation_id.clone());

    let engine = Arc::new(Engine::new(EngineConfig::from_env()));
    tracing::info!(%generation_id, model = %args.model, kind = %kind, "starting generation");
    let handle = engine
        .submit_with_cancel(request, cancel_after(args.timeout_secs))
        .context("failed to start generation worker")?;

    let mut finished = None;
    for update in handle.iter() {
        match update {
            GenerationUpdate::Progress(event) => {
                events
                    .record(&event)
                    .with_context(|| format!("failed to write {}", events.path().display()))?;
                println!("{}", progress_line(&event));
            }
            GenerationUpdate::Finished(result) => {
                finished = Some(result);
                break;
            }
        }
    }

    let Some(result) = finished else {
        bail!("generation worker exited without a result");
    };
    let media = result.map_err(|err| {
        let hint = if err.is_retryable() { " (retryable)" } else { "" };
        anyhow!("{err}{hint}")
    })?;
    emit_result(&media, args.out.as_deref())?;
    Ok(0)
}

/// A deadline too far out to represent means no deadline.
fn cancel_after(timeout_secs: Option<u64>) -> CancelToken {
    timeout_secs
        .and_then(|seconds| Instant::now().checked_add(Duration::from_secs(seconds)))
        .map(CancelToken::with_deadline)
        .unwrap_or_default()
}

fn build_request(args: &GenerateArgs, kind: MediaKind) -> Result<GenerationRequest> {
    let mut request = GenerationRequest::new(kind, &args.model, &args.prompt, &args.aspect_ratio);
    for raw in &args.refs {
        request = request.with_part(read_reference(raw)?);
    }
    if kind.is_video() {
        request = request.with_video(VideoParams {
            duration_seconds: args.duration,
            resolution: args.resolution.clone(),
            audio: args.audio,
        });
    } else if args.image_size.is_some() || args.count.is_some() {
        request = request.with_edit(EditParams {
            image_size: args.image_size.clone(),
            count: args.count,
        });
    }
    Ok(request)
}

fn read_reference(raw: &str) -> Result<ReferencePart> {
    let (role, path) = parse_ref_arg(raw)?;
    let bytes = fs::read(&path).with_context(|| format!("failed reading {}", path.display()))?;
    let mime = mime_for_path(&path).unwrap_or("image/png");
    Ok(ReferencePart::from_bytes(role, mime, bytes))
}

fn parse_ref_arg(raw: &str) -> Result<(PartRole, PathBuf)> {
    let Some((role, path)) = raw.split_once('=') else {
        bail!("--ref expects role=path, got {raw:?}");
    };
    let role = PartRole::parse(role).ok_or_else(|| anyhow!("unknown reference role: {role}"))?;
    let path = path.trim();
    if path.is_empty() {
        bail!("--ref {raw:?} has an empty path");
    }
    Ok((role, PathBuf::from(path)))
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn progress_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::ValidationDone { model, adjustments } => {
            let mut line = format!("validated {model}");
            for adjustment in adjustments {
                line.push_str(&format!("\n  - {}", adjustment.describe()));
            }
            line
        }
        ProgressEvent::AssetsIngested { count, hosted } => {
            format!("ingested {count} reference(s), {hosted} hosted")
        }
        ProgressEvent::Submitted {
            provider, handle, ..
        } => match handle {
            Some(handle) => format!("submitted to {provider} ({handle})"),
            None => format!("submitted to {provider}"),
        },
        ProgressEvent::PollingTick {
            attempt,
            progress,
            poll_errors,
            ..
        } => {
            let mut line = format!("waiting (poll {attempt}");
            if let Some(progress) = progress {
                line.push_str(&format!(", {progress:.0}%"));
            }
            if *poll_errors > 0 {
                line.push_str(&format!(", {poll_errors} poll error(s)"));
            }
            line.push(')');
            line
        }
        ProgressEvent::Done { kind, .. } => format!("{kind} ready"),
        ProgressEvent::Failed { kind, message } => format!("failed [{kind}]: {message}"),
    }
}

fn emit_result(media: &MediaResult, out: Option<&Path>) -> Result<()> {
    match (&media.source, out) {
        (MediaSource::Bytes(bytes), Some(path)) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
            println!("{}", path.display());
        }
        (MediaSource::Bytes(bytes), None) => {
            bail!(
                "{} returned {} inline bytes ({}); pass --out to save them",
                media.model,
                bytes.len(),
                media.mime_type.as_deref().unwrap_or("unknown type")
            );
        }
        (MediaSource::Uri(uri), _) => println!("{uri}"),
    }
    Ok(())
}

fn short_stamp() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    format!("{millis:x}")
}
