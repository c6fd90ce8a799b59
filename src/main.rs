use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use rollcast::{
    load_and_validate_manifest, HwCapability, RenderRequest, Renderer, ScrollTimeline,
};

#[derive(Debug, Parser)]
#[command(name = "rollcast")]
#[command(about = "Scroll-video rendering engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render a manifest to a video file.
    Render {
        manifest: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Skip hardware probes and force the CPU pipeline.
        #[arg(long = "no-gpu")]
        no_gpu: bool,
    },
    /// Validate a manifest and print its computed timeline.
    Check {
        manifest: PathBuf,
    },
    /// Report hardware encoding capability.
    Probe {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            manifest,
            output,
            no_gpu,
        } => run_render(&manifest, &output, no_gpu),
        Commands::Check { manifest } => run_check(&manifest),
        Commands::Probe { json } => run_probe(json),
    }
}

fn run_render(manifest_path: &Path, output_path: &Path, no_gpu: bool) -> Result<()> {
    let manifest = load_and_validate_manifest(manifest_path)?;
    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let request = RenderRequest::from_manifest(&manifest, base_dir)?;

    let capability = if no_gpu {
        HwCapability::from_parts(false, false, true)
    } else {
        HwCapability::detect()
    };
    let renderer = Renderer::with_capability(capability);
    let outcome = renderer.render(&request, output_path)?;

    println!(
        "Wrote {} ({} frames, {:.1}s prep, {:.1}s encode, {:.1}s total)",
        outcome.output_path.display(),
        outcome.frames_processed,
        outcome.preparation_seconds,
        outcome.encoding_seconds,
        outcome.total_seconds
    );
    Ok(())
}

fn run_check(manifest_path: &Path) -> Result<()> {
    let manifest = load_and_validate_manifest(manifest_path)?;
    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let request = RenderRequest::from_manifest(&manifest, base_dir)?;

    let timeline = ScrollTimeline::compute(
        request.image_height(),
        request.height,
        request.top_margin,
        request.px_per_frame,
        request.fps,
    );
    println!(
        "OK: {} ({}x{} canvas, {} fps, source {}px tall)",
        manifest_path.display(),
        request.width,
        request.height,
        request.fps,
        request.image_height()
    );
    println!(
        "Timeline: {}px scroll at {}px/frame, {} scroll frames, {:.2}s total",
        timeline.scroll_distance,
        timeline.px_per_frame,
        timeline.scroll_frame_count,
        timeline.total_duration_seconds
    );
    Ok(())
}

fn run_probe(json: bool) -> Result<()> {
    let capability = HwCapability::detect();
    if json {
        let report = serde_json::json!({
            "cuda_device": capability.cuda_device,
            "overlay_cuda_filter": capability.overlay_cuda_filter,
            "forced_cpu": capability.forced_cpu,
            "hardware_available": capability.available(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("cuda device:         {}", capability.cuda_device);
        println!("overlay_cuda filter: {}", capability.overlay_cuda_filter);
        println!("forced cpu:          {}", capability.forced_cpu);
        match capability.unavailable_reason() {
            None => println!("hardware encoding:   available"),
            Some(reason) => println!("hardware encoding:   unavailable ({reason})"),
        }
    }
    Ok(())
}
