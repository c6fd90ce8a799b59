use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Instant;

use anyhow::Context;
use tracing::{info, warn};

use crate::background::BackgroundAsset;
use crate::capability::HwCapability;
use crate::codec::CodecProfile;
use crate::errors::{ProcessFailure, RenderError, RenderResult};
use crate::filtergraph::{self, FilterGraph, GraphParams};
use crate::progress::ProgressMonitor;
use crate::schema::RenderRequest;
use crate::timeline::ScrollTimeline;

/// Characters of diagnostic tail carried into a process error.
const ERROR_DETAIL_CHARS: usize = 2000;

/// Resolve the encoder binary: the sidecar-managed install when the feature
/// is on and the binary is present, otherwise `ffmpeg` from PATH.
pub(crate) fn ffmpeg_program() -> PathBuf {
    #[cfg(feature = "sidecar_ffmpeg")]
    {
        let sidecar = ffmpeg_sidecar::paths::ffmpeg_path();
        if sidecar.exists() {
            return sidecar;
        }
    }
    PathBuf::from("ffmpeg")
}

/// Timing and output summary of a successful render.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub output_path: PathBuf,
    pub preparation_seconds: f64,
    pub encoding_seconds: f64,
    pub total_seconds: f64,
    pub frames_processed: u64,
}

/// Drives one encoder invocation end to end: timeline, codec gate, temp
/// artifacts, filter graph, spawn, progress, classification, cleanup.
pub struct Renderer {
    capability: HwCapability,
    program: PathBuf,
}

impl Renderer {
    pub fn new() -> Self {
        Self::with_capability(HwCapability::detect())
    }

    pub fn with_capability(capability: HwCapability) -> Self {
        Self {
            capability,
            program: ffmpeg_program(),
        }
    }

    pub fn capability(&self) -> &HwCapability {
        &self.capability
    }

    pub fn render(&self, request: &RenderRequest, output_path: &Path) -> RenderResult<RenderOutcome> {
        let started = Instant::now();
        let timeline = ScrollTimeline::compute(
            request.image_height(),
            request.height,
            request.top_margin,
            request.px_per_frame,
            request.fps,
        );
        // The capability gate runs before any temp file is written or any
        // background byte is fetched; callers switching to another render
        // method after a capability error must observe no side effects.
        let codec = CodecProfile::select(&request.codec, &self.capability)?;

        let mut temps = TempArtifacts::default();
        let result = self.render_with_temps(request, output_path, &timeline, &codec, &mut temps, started);
        temps.cleanup();
        result
    }

    fn render_with_temps(
        &self,
        request: &RenderRequest,
        output_path: &Path,
        timeline: &ScrollTimeline,
        codec: &CodecProfile,
        temps: &mut TempArtifacts,
        started: Instant,
    ) -> RenderResult<RenderOutcome> {
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))
                    .map_err(RenderError::Other)?;
            }
        }

        let content_path = stem_sibling(output_path, "_content.png");
        request
            .source
            .save_with_format(&content_path, image::ImageFormat::Png)
            .with_context(|| format!("failed to write scroll content {}", content_path.display()))
            .map_err(RenderError::Other)?;
        temps.register(content_path.clone());

        let background = BackgroundAsset::resolve(
            request.background_color,
            request.background_image.as_deref(),
            request.width,
            request.height,
            output_path,
        );
        if let Some(temp) = background.temp_path() {
            temps.register(temp.to_path_buf());
        }

        let audio = request.audio.as_deref().filter(|path| {
            let present = path.exists();
            if !present {
                warn!("audio file {} not found, rendering without audio", path.display());
            }
            present
        });

        let y_expr = timeline.y_expr();
        let graph = filtergraph::build(&GraphParams {
            background: &background,
            background_color: request.background_color,
            scroll_content_path: &content_path,
            canvas_width: request.width,
            canvas_height: request.height,
            fps: request.fps,
            top_margin: request.top_margin,
            bottom_margin: request.bottom_margin,
            audio_path: audio,
            y_expr: &y_expr,
            hardware: codec.hardware,
        });
        graph.validate()?;

        let args = assemble_args(&graph, codec, timeline, request.fps, output_path);
        let preparation_seconds = started.elapsed().as_secs_f64();
        info!(
            "starting encoder ({}, {} inputs, {:.1}s of video)",
            if codec.hardware { "gpu" } else { "cpu" },
            graph.inputs.len(),
            timeline.total_duration_seconds
        );

        let encode_started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                RenderError::process(
                    ProcessFailure::Spawn,
                    format!("could not launch {}: {error}", self.program.display()),
                )
            })?;

        let monitor = child.stderr.take().map(|stderr| {
            ProgressMonitor::attach(
                stderr,
                timeline.total_duration_seconds,
                timeline.total_frame_count,
            )
        });

        let mut guard = ChildGuard::new(child);
        let status = guard
            .wait()
            .context("failed waiting for the encoder process")
            .map_err(RenderError::Other)?;
        let report = monitor.map(ProgressMonitor::finish).unwrap_or_default();

        if !status.success() {
            let kind = ProcessFailure::classify(&report.stderr_tail, status.code());
            return Err(RenderError::process(
                kind,
                last_n_chars(&report.stderr_tail, ERROR_DETAIL_CHARS),
            ));
        }

        let output_size = fs::metadata(output_path).map(|meta| meta.len()).unwrap_or(0);
        if output_size == 0 {
            return Err(RenderError::process(
                ProcessFailure::NonZeroExit(status.code()),
                format!("encoder exited cleanly but {} is missing or empty", output_path.display()),
            ));
        }

        let encoding_seconds = encode_started.elapsed().as_secs_f64();
        let outcome = RenderOutcome {
            output_path: output_path.to_path_buf(),
            preparation_seconds,
            encoding_seconds,
            total_seconds: started.elapsed().as_secs_f64(),
            frames_processed: report.frames_seen,
        };
        info!(
            "render finished: {} ({} bytes, {:.1}s prep + {:.1}s encode)",
            outcome.output_path.display(),
            output_size,
            outcome.preparation_seconds,
            outcome.encoding_seconds
        );
        Ok(outcome)
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Full encoder argument list, in invocation order. Pure so the ordering
/// contract can be tested without launching anything.
fn assemble_args(
    graph: &FilterGraph,
    codec: &CodecProfile,
    timeline: &ScrollTimeline,
    fps: u32,
    output_path: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-hide_banner".into()];
    if codec.hardware {
        args.extend(str_args(&["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"]));
    }
    for input in &graph.inputs {
        args.extend(input.args.iter().cloned());
    }
    args.extend(str_args(&["-progress", "pipe:2", "-stats", "-stats_period", "1"]));
    args.push("-filter_complex".into());
    args.push(graph.filter_complex.clone());
    args.extend(str_args(&["-map", "[out]"]));
    if let Some(audio_index) = graph.audio_input_index {
        args.extend(str_args(&[
            "-map",
            &format!("{audio_index}:a:0"),
            "-c:a",
            "aac",
            "-b:a",
            "192k",
            "-shortest",
        ]));
    }
    args.extend(codec.args.iter().cloned());
    args.extend(str_args(&[
        "-r",
        &fps.to_string(),
        "-t",
        &format!("{:.3}", timeline.total_duration_seconds),
    ]));
    args.push(output_path.to_string_lossy().into_owned());
    args
}

fn str_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| (*arg).to_owned()).collect()
}

fn stem_sibling(output_path: &Path, suffix: &str) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "render".to_owned());
    output_path.with_file_name(format!("{stem}{suffix}"))
}

fn last_n_chars(text: &str, n: usize) -> String {
    let start = text
        .char_indices()
        .rev()
        .nth(n.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_owned()
}

/// Temporary files owned by one render invocation. Cleanup runs at most once
/// per artifact, tolerates already-missing files, and never escalates a
/// deletion failure; Drop covers early returns and unwinds.
#[derive(Debug, Default)]
pub struct TempArtifacts {
    paths: Vec<PathBuf>,
}

impl TempArtifacts {
    pub fn register(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn cleanup(&mut self) {
        for path in self.paths.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => info!("removed temporary file {}", path.display()),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => warn!("could not remove {}: {error}", path.display()),
            }
        }
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Kills the encoder if the owner unwinds before the process exits, so a
/// cancelled render never leaves an orphan writing to the output file.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait();
        self.reaped = status.is_ok();
        status
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
