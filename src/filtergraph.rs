use std::path::Path;

use regex::Regex;

use crate::background::BackgroundAsset;
use crate::errors::{RenderError, RenderResult};
use crate::schema::Color;

/// Fixed enumeration of the input slots an invocation may carry, in wire
/// order. Indices are derived from which slots are present in one
/// deterministic pass; nothing downstream does its own index arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSlot {
    Background,
    ScrollContent,
    TopMask,
    BottomMask,
    Audio,
}

/// One `-i`-style input: the argument run that precedes and includes the
/// source, in the exact order it appears on the command line.
#[derive(Debug, Clone)]
pub struct ProcessInput {
    pub slot: InputSlot,
    pub args: Vec<String>,
}

/// Ordered process inputs plus the compositing expression that consumes them.
/// The index of each input must match every `[N:v]`/`[N:a]` reference emitted
/// against it; `validate` re-derives that correspondence before any process
/// is launched.
#[derive(Debug, Clone)]
pub struct FilterGraph {
    pub inputs: Vec<ProcessInput>,
    pub filter_complex: String,
    pub audio_input_index: Option<usize>,
}

/// Everything the builder needs. The builder is a pure function of this
/// struct: no I/O, no resource-dependent errors.
#[derive(Debug, Clone)]
pub struct GraphParams<'a> {
    pub background: &'a BackgroundAsset,
    pub background_color: Color,
    pub scroll_content_path: &'a Path,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub fps: u32,
    pub top_margin: u32,
    pub bottom_margin: u32,
    pub audio_path: Option<&'a Path>,
    pub y_expr: &'a str,
    /// GPU-resident compositing (`overlay_cuda`) vs the plain CPU graph of
    /// the same shape.
    pub hardware: bool,
}

pub fn build(params: &GraphParams<'_>) -> FilterGraph {
    match params.background.image_path() {
        Some(background_path) => build_image_background(params, background_path),
        None => build_solid_background(params),
    }
}

fn build_image_background(params: &GraphParams<'_>, background_path: &Path) -> FilterGraph {
    let fps = params.fps;
    let mut inputs = vec![
        ProcessInput {
            slot: InputSlot::Background,
            args: str_args(&[
                "-loop",
                "1",
                "-framerate",
                &fps.to_string(),
                "-i",
                &background_path.to_string_lossy(),
            ]),
        },
        ProcessInput {
            slot: InputSlot::ScrollContent,
            args: str_args(&[
                "-framerate",
                &fps.to_string(),
                "-i",
                &params.scroll_content_path.to_string_lossy(),
            ]),
        },
    ];

    let up = upload_suffix(params.hardware);
    let overlay = overlay_filter(params.hardware);
    let mut stages = vec![
        format!("[0:v]fps={fps},format=yuv420p{up}[bg]"),
        format!("[1:v]fps={fps},format=rgba{up}[scroll]"),
        format!("[bg][scroll]{overlay}=x=0:y='{}'[composited]", params.y_expr),
    ];
    let mut current = "[composited]".to_owned();

    // Mask bands are cropped out of the background image itself so the bands
    // match it pixel for pixel.
    if params.top_margin > 0 {
        stages.push(format!(
            "[0:v]fps={fps},crop=iw:{m}:0:0{up}[top_band]",
            m = params.top_margin
        ));
        stages.push(format!("{current}[top_band]{overlay}=x=0:y=0[with_top]"));
        current = "[with_top]".to_owned();
    }
    if params.bottom_margin > 0 {
        stages.push(format!(
            "[0:v]fps={fps},crop=iw:{m}:0:ih-{m}{up}[bottom_band]",
            m = params.bottom_margin
        ));
        stages.push(format!(
            "{current}[bottom_band]{overlay}=x=0:y={y}[with_bottom]",
            y = params.canvas_height - params.bottom_margin
        ));
        current = "[with_bottom]".to_owned();
    }

    stages.push(final_stage(&current, params.hardware));

    let audio_input_index = push_audio(&mut inputs, params.audio_path);
    FilterGraph {
        inputs,
        filter_complex: stages.join(";"),
        audio_input_index,
    }
}

fn build_solid_background(params: &GraphParams<'_>) -> FilterGraph {
    let fps = params.fps;
    let hex = params.background_color.to_rgb_hex();
    let up = upload_suffix(params.hardware);
    let overlay = overlay_filter(params.hardware);

    let mut inputs = vec![
        ProcessInput {
            slot: InputSlot::Background,
            args: lavfi_color_input(
                &hex,
                params.canvas_width,
                params.canvas_height,
                fps,
                params.hardware,
            ),
        },
        ProcessInput {
            slot: InputSlot::ScrollContent,
            args: str_args(&[
                "-framerate",
                &fps.to_string(),
                "-i",
                &params.scroll_content_path.to_string_lossy(),
            ]),
        },
    ];

    let mut stages = vec![
        format!("[1:v]fps={fps},format=yuv420p{up}[scroll]"),
        format!("[0:v][scroll]{overlay}=x=0:y='{}'[composited]", params.y_expr),
    ];
    let mut current = "[composited]".to_owned();

    // Single deterministic pass: each optional slot appends its input and the
    // stage that consumes it, so the index is always the current length.
    if params.top_margin > 0 {
        let index = inputs.len();
        inputs.push(ProcessInput {
            slot: InputSlot::TopMask,
            args: lavfi_color_input(&hex, params.canvas_width, params.top_margin, fps, params.hardware),
        });
        stages.push(format!("{current}[{index}:v]{overlay}=x=0:y=0[with_top]"));
        current = "[with_top]".to_owned();
    }
    if params.bottom_margin > 0 {
        let index = inputs.len();
        inputs.push(ProcessInput {
            slot: InputSlot::BottomMask,
            args: lavfi_color_input(
                &hex,
                params.canvas_width,
                params.bottom_margin,
                fps,
                params.hardware,
            ),
        });
        stages.push(format!(
            "{current}[{index}:v]{overlay}=x=0:y={y}[with_bottom]",
            y = params.canvas_height - params.bottom_margin
        ));
        current = "[with_bottom]".to_owned();
    }

    stages.push(final_stage(&current, params.hardware));

    let audio_input_index = push_audio(&mut inputs, params.audio_path);
    FilterGraph {
        inputs,
        filter_complex: stages.join(";"),
        audio_input_index,
    }
}

fn push_audio(inputs: &mut Vec<ProcessInput>, audio_path: Option<&Path>) -> Option<usize> {
    let audio_path = audio_path?;
    let index = inputs.len();
    inputs.push(ProcessInput {
        slot: InputSlot::Audio,
        args: str_args(&["-i", &audio_path.to_string_lossy()]),
    });
    Some(index)
}

fn lavfi_color_input(hex: &str, width: u32, height: u32, fps: u32, hardware: bool) -> Vec<String> {
    let up = upload_suffix(hardware);
    str_args(&[
        "-f",
        "lavfi",
        "-i",
        &format!("color=c={hex}:s={width}x{height}:r={fps},format=yuv420p{up}"),
    ])
}

fn upload_suffix(hardware: bool) -> &'static str {
    if hardware {
        ",hwupload_cuda"
    } else {
        ""
    }
}

fn overlay_filter(hardware: bool) -> &'static str {
    if hardware {
        "overlay_cuda"
    } else {
        "overlay"
    }
}

fn final_stage(current: &str, hardware: bool) -> String {
    if hardware {
        format!("{current}hwdownload,format=yuv420p[out]")
    } else {
        format!("{current}format=yuv420p[out]")
    }
}

fn str_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| (*arg).to_owned()).collect()
}

impl FilterGraph {
    pub fn input_index(&self, slot: InputSlot) -> Option<usize> {
        self.inputs.iter().position(|input| input.slot == slot)
    }

    /// Build-time contract check: the set of input indices referenced by the
    /// filter stages (plus the audio stream mapping) must be exactly
    /// `0..inputs.len()`. A mismatch is an internal bug, caught before the
    /// external process is ever launched.
    pub fn validate(&self) -> RenderResult<()> {
        let reference = Regex::new(r"\[(\d+):[va]\]").expect("static regex");
        let mut referenced: Vec<usize> = reference
            .captures_iter(&self.filter_complex)
            .filter_map(|captures| captures[1].parse().ok())
            .collect();
        if let Some(audio_index) = self.audio_input_index {
            referenced.push(audio_index);
        }
        referenced.sort_unstable();
        referenced.dedup();

        let expected: Vec<usize> = (0..self.inputs.len()).collect();
        if referenced != expected {
            return Err(RenderError::build(format!(
                "{} process inputs but filter stages reference indices {:?}",
                self.inputs.len(),
                referenced
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn params_with<'a>(
        background: &'a BackgroundAsset,
        top: u32,
        bottom: u32,
        audio: Option<&'a Path>,
        hardware: bool,
    ) -> GraphParams<'a> {
        GraphParams {
            background,
            background_color: Color::default(),
            scroll_content_path: Path::new("/tmp/out_content.png"),
            canvas_width: 720,
            canvas_height: 1280,
            fps: 60,
            top_margin: top,
            bottom_margin: bottom,
            audio_path: audio,
            y_expr: "if(between(t,2,10), 0 - 1*floor((t-2)*60), if(lt(t,2), 0, -2720))",
            hardware,
        }
    }

    #[test]
    fn solid_mode_indices_follow_present_masks() {
        let solid = BackgroundAsset::SolidColor(Color::default());
        let audio = PathBuf::from("/tmp/voice.mp3");

        let both = build(&params_with(&solid, 120, 80, Some(&audio), true));
        assert_eq!(both.inputs.len(), 5);
        assert_eq!(both.audio_input_index, Some(4));
        assert_eq!(both.input_index(InputSlot::TopMask), Some(2));
        assert_eq!(both.input_index(InputSlot::BottomMask), Some(3));
        both.validate().expect("both masks");

        let top_only = build(&params_with(&solid, 120, 0, Some(&audio), true));
        assert_eq!(top_only.audio_input_index, Some(3));
        top_only.validate().expect("top only");

        let none = build(&params_with(&solid, 0, 0, Some(&audio), true));
        assert_eq!(none.audio_input_index, Some(2));
        none.validate().expect("no masks");
    }

    #[test]
    fn image_mode_always_maps_audio_to_index_two() {
        let image = BackgroundAsset::LocalImage {
            path: PathBuf::from("/tmp/bg.png"),
            temporary: true,
        };
        let audio = PathBuf::from("/tmp/voice.mp3");
        let graph = build(&params_with(&image, 120, 80, Some(&audio), true));

        // Mask bands are cropped from input 0, not separate inputs.
        assert_eq!(graph.inputs.len(), 3);
        assert_eq!(graph.audio_input_index, Some(2));
        assert!(graph.filter_complex.contains("crop=iw:120:0:0"));
        assert!(graph.filter_complex.contains("crop=iw:80:0:ih-80"));
        graph.validate().expect("image mode graph");
    }

    #[test]
    fn hardware_flag_switches_the_filter_flavor() {
        let solid = BackgroundAsset::SolidColor(Color::default());

        let hw = build(&params_with(&solid, 120, 0, None, true));
        assert!(hw.filter_complex.contains("overlay_cuda"));
        assert!(hw.filter_complex.contains("hwdownload"));
        assert!(hw.inputs[0].args.last().unwrap().contains("hwupload_cuda"));

        let cpu = build(&params_with(&solid, 120, 0, None, false));
        assert!(!cpu.filter_complex.contains("cuda"));
        assert!(cpu.filter_complex.contains("overlay=x=0"));
        assert!(cpu.filter_complex.ends_with("format=yuv420p[out]"));
        cpu.validate().expect("cpu graph");
    }

    #[test]
    fn bottom_band_lands_at_canvas_bottom() {
        let solid = BackgroundAsset::SolidColor(Color::default());
        let graph = build(&params_with(&solid, 0, 80, None, false));
        assert!(graph.filter_complex.contains("=x=0:y=1200[with_bottom]"));
    }

    #[test]
    fn validate_catches_index_mismatches() {
        let graph = FilterGraph {
            inputs: vec![ProcessInput {
                slot: InputSlot::Background,
                args: vec!["-i".into(), "x".into()],
            }],
            filter_complex: "[0:v][1:v]overlay[out]".to_owned(),
            audio_input_index: None,
        };
        let error = graph.validate().unwrap_err();
        assert!(matches!(error, RenderError::Build(_)));

        let unreferenced = FilterGraph {
            inputs: vec![
                ProcessInput {
                    slot: InputSlot::Background,
                    args: vec!["-i".into(), "x".into()],
                },
                ProcessInput {
                    slot: InputSlot::ScrollContent,
                    args: vec!["-i".into(), "y".into()],
                },
            ],
            filter_complex: "[0:v]format=yuv420p[out]".to_owned(),
            audio_input_index: None,
        };
        assert!(unreferenced.validate().is_err());
    }
}
