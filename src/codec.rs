use tracing::info;

use crate::capability::{HwCapability, HW_CODEC};
use crate::errors::{RenderError, RenderResult};

/// Concrete encoder parameter set for one render. Derived once; immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecProfile {
    /// Encoder arguments in invocation order (`-c:v`, rate control, GOP, ...).
    pub args: Vec<String>,
    /// Output pixel format baked into `args`.
    pub pix_fmt: &'static str,
    /// Whether the GPU-resident compositing pipeline is in use.
    pub hardware: bool,
}

impl CodecProfile {
    /// Map (requested codec, detected capability, platform) to a parameter
    /// set. Requesting the hardware codec without the hardware available is a
    /// `CapabilityError`: the caller owns the decision to fall back to an
    /// alternate render method, never this layer.
    pub fn select(requested: &str, capability: &HwCapability) -> RenderResult<Self> {
        if requested == HW_CODEC {
            if !capability.available() {
                let reason = capability
                    .unavailable_reason()
                    .unwrap_or("hardware path unavailable");
                return Err(RenderError::capability(format!(
                    "{HW_CODEC} requested but {reason}"
                )));
            }
            if cfg!(any(target_os = "linux", target_os = "windows")) {
                info!("using hardware encoder: {HW_CODEC}");
                return Ok(Self::nvenc());
            }
            // Capability probes passed but there is no native driver stack on
            // this platform; encode on the CPU at equivalent quality/bitrate.
            info!("no native hardware driver support on this platform, using libx264");
            return Ok(Self::libx264());
        }

        info!("using CPU encoder: libx264");
        Ok(Self::libx264())
    }

    fn nvenc() -> Self {
        Self {
            args: str_args(&[
                "-c:v", "h264_nvenc",
                "-preset", "p4",
                // VBR with an average target; CBR would force-pad the bitrate.
                "-rc", "vbr",
                "-cq", "25",
                "-b:v", "10M",
                "-pix_fmt", "yuv420p",
                "-movflags", "+faststart",
                "-bf", "3",
                "-g", "60",
            ]),
            pix_fmt: "yuv420p",
            hardware: true,
        }
    }

    fn libx264() -> Self {
        Self {
            args: str_args(&[
                "-c:v", "libx264",
                "-preset", "medium",
                // crf 18 tracks the NVENC cq=25 output quality.
                "-crf", "18",
                "-b:v", "10M",
                "-maxrate", "15M",
                "-bufsize", "20M",
                "-pix_fmt", "yuv420p",
                "-movflags", "+faststart",
                "-bf", "3",
                "-g", "60",
            ]),
            pix_fmt: "yuv420p",
            hardware: false,
        }
    }
}

fn str_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| (*arg).to_owned()).collect()
}
