use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use superview_core::{
    ConvertSettings, Converter, CpuRuntime, KernelRuntime, Orientation, ProgressCallback,
    QualityTier, SettingsStore,
};
use superview_renderer::WgpuRuntime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "superview", version, about = "Convert 4:3 footage to 16:9 with a superview stretch")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a video file
    Convert {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long, value_enum, default_value_t = Backend::Gpu)]
        backend: Backend,
    },
    /// Print the output plan for a video file as JSON
    Plan {
        input: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(clap::Args)]
struct TargetArgs {
    /// wide or tall
    #[arg(long, default_value = "wide")]
    orientation: Orientation,
    /// 4k, 2.7k, 1440p, 1080p or 720p
    #[arg(long, default_value = "1080p")]
    quality: QualityTier,
    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Gpu,
    Cpu,
}

async fn load_settings(config: &Option<PathBuf>) -> Result<ConvertSettings> {
    let store = match config {
        Some(path) => SettingsStore::with_path(path),
        None => SettingsStore::new(),
    };
    let settings = store
        .load()
        .await
        .with_context(|| format!("Failed to load settings from {:?}", store.path()))?;
    Ok(settings)
}

async fn convert<R: KernelRuntime>(
    runtime: R,
    settings: ConvertSettings,
    input: &Path,
    output: &Path,
    target: &TargetArgs,
) -> Result<()> {
    let mut converter = Converter::with_ffmpeg(runtime, settings)?;

    let handle = converter.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling conversion");
            handle.cancel();
        }
    });

    let last_step = AtomicU32::new(0);
    let progress: ProgressCallback = Box::new(move |fraction: f32| {
        let step = (fraction * 10.0).floor() as u32;
        if step > last_step.swap(step, Ordering::Relaxed) {
            info!("Progress: {}%", step * 10);
        }
    });

    let report = converter
        .convert(input, output, target.orientation, target.quality, Some(progress))
        .await
        .with_context(|| format!("Failed to convert {:?}", input))?;

    info!(
        "Wrote {:?}: {}x{} at {} bps, {} frames",
        output,
        report.plan.output_width,
        report.plan.output_height,
        report.plan.target_bitrate,
        report.video_frames
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,superview=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Convert {
            input,
            output,
            target,
            backend,
        } => {
            info!("Starting Superview v{}", env!("CARGO_PKG_VERSION"));
            let settings = load_settings(&target.config).await?;

            match backend {
                Backend::Gpu => match WgpuRuntime::new() {
                    Ok(runtime) => {
                        info!("Rendering on {}", runtime.adapter_name());
                        convert(runtime, settings, &input, &output, &target).await
                    }
                    Err(e) => {
                        warn!("GPU unavailable ({}), falling back to CPU", e);
                        convert(CpuRuntime::new(), settings, &input, &output, &target).await
                    }
                },
                Backend::Cpu => {
                    convert(CpuRuntime::new(), settings, &input, &output, &target).await
                }
            }
        }
        Command::Plan { input, target } => {
            let settings = load_settings(&target.config).await?;
            let converter = Converter::with_ffmpeg(CpuRuntime::new(), settings)?;
            let plan = converter
                .plan(&input, target.orientation, target.quality)
                .await
                .with_context(|| format!("Failed to plan {:?}", input))?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
    }
}
