use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rollcall_core::{DetectorKind, EmbedderKind, Gallery};
use rollcall_engine::{
    CsvAttendanceSink, EngineConfig, OnnxBackendFactory, PipelineController, StartOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod preview;

use preview::PreviewSink;

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Face-recognition attendance from a live camera")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an attendance session until Ctrl-C
    Run(RunArgs),
    /// Build a gallery from a known_faces/<name>/<image> directory
    Enroll(EnrollArgs),
    /// List V4L2 capture devices
    Devices,
    /// Show the identities in a gallery file
    Gallery {
        /// Gallery JSON file [default: ROLLCALL_GALLERY or the data directory]
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

/// Model selection shared by `run` and `enroll`.
#[derive(Args)]
struct ModelArgs {
    /// Directory containing the ONNX model files
    #[arg(long)]
    models: Option<PathBuf>,
    /// Face detector: scrfd | ultraface
    #[arg(long)]
    detector: Option<DetectorKind>,
    /// Descriptor model: arcface | facenet512
    #[arg(long)]
    embedder: Option<EmbedderKind>,
}

#[derive(Args)]
struct RunArgs {
    /// Camera: /dev/videoN, an index, or stub://WIDTHxHEIGHT
    #[arg(short, long)]
    camera: Option<String>,
    /// Gallery JSON file
    #[arg(long)]
    gallery: Option<PathBuf>,
    /// Cosine distance below which a face matches
    #[arg(long)]
    threshold: Option<f32>,
    /// Attendance CSV file
    #[arg(long)]
    attendance: Option<PathBuf>,
    /// Keep the latest annotated frame at this path
    #[arg(long)]
    preview: Option<PathBuf>,
    /// TrueType font for overlay text
    #[arg(long)]
    font: Option<PathBuf>,
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration: Option<u64>,
    #[command(flatten)]
    models: ModelArgs,
}

#[derive(Args)]
struct EnrollArgs {
    /// Directory with one sub-directory of images per person
    #[arg(long, default_value = "known_faces")]
    dir: PathBuf,
    /// Where to write the gallery [default: ROLLCALL_GALLERY or the data directory]
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    models: ModelArgs,
}

impl ModelArgs {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(dir) = &self.models {
            config.model_dir = dir.clone();
        }
        if let Some(kind) = self.detector {
            config.detector = kind;
        }
        if let Some(kind) = self.embedder {
            config.embedder = kind;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig::from_env();

    match cli.command {
        Commands::Run(args) => run(args, config).await,
        Commands::Enroll(args) => {
            args.models.apply(&mut config);
            let output = args.output.unwrap_or_else(|| config.gallery_path.clone());
            tokio::task::spawn_blocking(move || enroll(&args.dir, &output, &config)).await?
        }
        Commands::Devices => {
            let devices = rollcall_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}\t{}\t{}\t{}", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
        Commands::Gallery { path } => {
            let path = path.unwrap_or(config.gallery_path);
            let gallery = Gallery::load(&path)
                .with_context(|| format!("loading gallery {}", path.display()))?;
            println!(
                "{}: {} identities, {} descriptors ({}-dim)",
                path.display(),
                gallery.len(),
                gallery.descriptor_count(),
                gallery.dimension()
            );
            for (name, samples) in gallery.iter() {
                println!("  {name}\t{} samples", samples.len());
            }
            Ok(())
        }
    }
}

async fn run(args: RunArgs, mut config: EngineConfig) -> Result<()> {
    args.models.apply(&mut config);
    if let Some(camera) = args.camera {
        config.camera_id = camera;
    }
    if let Some(gallery) = args.gallery {
        config.gallery_path = gallery;
    }
    if let Some(threshold) = args.threshold {
        config.match_threshold = threshold;
    }
    if let Some(path) = args.attendance {
        config.attendance_path = path;
    }
    if let Some(font) = args.font {
        config.font_path = Some(font);
    }

    let attendance = CsvAttendanceSink::create(&config.attendance_path)
        .with_context(|| format!("creating {}", config.attendance_path.display()))?;
    let factory = OnnxBackendFactory::new(config.model_dir.clone(), config.gallery_path.clone());
    let controller = Arc::new(PipelineController::new(
        Arc::new(factory),
        Arc::new(attendance),
        Arc::new(PreviewSink::new(args.preview)),
        config.pipeline_settings(),
    ));

    let start = config.start_config();
    let c = controller.clone();
    let outcome = tokio::task::spawn_blocking(move || c.start(start))
        .await?
        .context("failed to start pipeline")?;
    if outcome == StartOutcome::AlreadyRunning {
        anyhow::bail!("pipeline unexpectedly already running");
    }
    tracing::info!(
        camera = %config.camera_id,
        attendance = %config.attendance_path.display(),
        "session running; Ctrl-C to stop"
    );

    match args.duration {
        Some(secs) => {
            tokio::select! {
                r = tokio::signal::ctrl_c() => r?,
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    let c = controller.clone();
    tokio::task::spawn_blocking(move || c.stop()).await?;
    println!("{}", serde_json::to_string_pretty(&controller.stats())?);
    Ok(())
}

fn enroll(dir: &std::path::Path, output: &std::path::Path, config: &EngineConfig) -> Result<()> {
    let mut detector = rollcall_core::load_detector(config.detector, &config.model_dir)
        .context("loading detector")?;
    let mut embedder = rollcall_core::load_embedder(config.embedder, &config.model_dir)
        .context("loading embedder")?;

    let gallery = rollcall_core::enroll_directory(dir, detector.as_mut(), embedder.as_mut())
        .with_context(|| format!("enrolling from {}", dir.display()))?;
    gallery
        .save(output)
        .with_context(|| format!("writing {}", output.display()))?;

    println!(
        "Enrolled {} identities ({} descriptors) into {}",
        gallery.len(),
        gallery.descriptor_count(),
        output.display()
    );
    Ok(())
}
