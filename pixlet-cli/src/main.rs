use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use pixlet::{FilterKind, Intensity, WorkerConfig, WorkerResponse};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pixlet", version)]
struct Cli {
    /// Scratch arena budget in bytes.
    #[arg(long, global = true)]
    arena_limit: Option<usize>,

    /// Largest decoded surface in bytes.
    #[arg(long, global = true)]
    max_surface_bytes: Option<u64>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode an image, apply filters in order and write the result as PNG.
    Apply(ApplyArgs),
    /// Serve the worker protocol over stdin/stdout.
    Serve,
}

#[derive(Parser, Debug)]
struct ApplyArgs {
    /// Encoded input image.
    input: PathBuf,

    /// Filter to apply, as `kind` or `kind=intensity`. Repeatable.
    #[arg(long = "filter", value_parser = parse_filter)]
    filters: Vec<FilterArg>,

    /// Output PNG path.
    #[arg(long)]
    output: PathBuf,
}

#[derive(Debug, Clone, Copy)]
struct FilterArg {
    kind: FilterKind,
    intensity: f32,
}

fn parse_filter(s: &str) -> Result<FilterArg, String> {
    let (name, intensity) = match s.split_once('=') {
        Some((name, value)) => {
            let value: f32 = value
                .trim()
                .parse()
                .map_err(|e| format!("invalid intensity '{value}': {e}"))?;
            (name, value)
        }
        None => (s, Intensity::FULL.get()),
    };
    let kind: FilterKind = name.trim().parse().map_err(|e| format!("{e}"))?;
    Intensity::new(intensity).map_err(|e| e.to_string())?;
    Ok(FilterArg { kind, intensity })
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("PIXLET_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("pixlet={level},pixlet_cli={level}"))
    };

    // stdout carries protocol frames in serve mode.
    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");
    if use_json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = WorkerConfig::from_env();
    if let Some(limit) = cli.arena_limit {
        config = config.with_arena_limit(limit);
    }
    if let Some(max) = cli.max_surface_bytes {
        config = config.with_max_surface_bytes(max);
    }

    match cli.cmd {
        Command::Apply(args) => cmd_apply(args, &config).await,
        Command::Serve => cmd_serve(&config).await,
    }
}

async fn cmd_apply(args: ApplyArgs, config: &WorkerConfig) -> anyhow::Result<()> {
    let encoded = std::fs::read(&args.input)
        .with_context(|| format!("read input '{}'", args.input.display()))?;

    let mut worker = pixlet::spawn_raster_worker(config).context("spawn worker thread")?;
    worker.wait_ready().await.context("worker startup")?;

    worker.load_image(encoded)?;
    for filter in &args.filters {
        worker.apply_filter(filter.kind, filter.intensity)?;
    }

    let mut latest = None;
    while worker.in_flight() > 0 {
        match worker.recv().await {
            Some(WorkerResponse::Render {
                pixels,
                width,
                height,
            }) => latest = Some((pixels, width, height)),
            Some(WorkerResponse::Log { message }) => tracing::info!("{message}"),
            Some(WorkerResponse::Error { kind, message }) => {
                anyhow::bail!("worker error ({kind}): {message}")
            }
            Some(other) => tracing::debug!(response = ?other, "Worker response"),
            None => anyhow::bail!("worker exited with {} requests in flight", worker.in_flight()),
        }
    }
    worker.shutdown().await?;

    let (pixels, width, height) = latest.context("worker produced no image")?;

    if let Some(parent) = args.output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }

    image::save_buffer_with_format(
        &args.output,
        pixels.as_slice(),
        width,
        height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.output.display()))?;

    eprintln!("wrote {}", args.output.display());
    Ok(())
}

async fn cmd_serve(config: &WorkerConfig) -> anyhow::Result<()> {
    tracing::info!("Serving worker protocol on stdio");
    pixlet::serve_framed(tokio::io::stdin(), tokio::io::stdout(), config)
        .await
        .context("serve worker protocol")
}
