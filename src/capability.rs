use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::supervisor::ffmpeg_program;

/// Codec identifier that selects the GPU-resident compositing pipeline.
pub const HW_CODEC: &str = "h264_nvenc";

/// When set (to anything), hardware capability is reported as unavailable
/// regardless of what the probes find.
pub const NO_GPU_ENV: &str = "ROLLCAST_NO_GPU";

/// Result of probing for the hardware compositing path. Pure query; probing
/// mutates nothing and is safe to repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwCapability {
    /// An NVIDIA device answered `nvidia-smi`.
    pub cuda_device: bool,
    /// The installed encoder build lists the `overlay_cuda` filter.
    pub overlay_cuda_filter: bool,
    /// Environment override forcing the CPU outcome.
    pub forced_cpu: bool,
}

impl HwCapability {
    /// Run both independent probes: device presence and compositing-filter
    /// presence. A probe that cannot be executed counts as a failed probe.
    pub fn detect() -> Self {
        let forced_cpu = std::env::var_os(NO_GPU_ENV).is_some();
        if forced_cpu {
            debug!("{NO_GPU_ENV} is set, skipping hardware probes");
            return Self::from_parts(false, false, true);
        }

        let cuda_device = Command::new("nvidia-smi")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);

        let overlay_cuda_filter = probe_overlay_cuda_filter().unwrap_or_else(|error| {
            warn!("compositing filter probe failed: {error}");
            false
        });

        debug!(cuda_device, overlay_cuda_filter, "hardware capability probed");
        Self::from_parts(cuda_device, overlay_cuda_filter, false)
    }

    pub fn from_parts(cuda_device: bool, overlay_cuda_filter: bool, forced_cpu: bool) -> Self {
        Self {
            cuda_device,
            overlay_cuda_filter,
            forced_cpu,
        }
    }

    /// The hardware compositing path is usable only when both probes passed
    /// and no override is in effect.
    pub fn available(&self) -> bool {
        !self.forced_cpu && self.cuda_device && self.overlay_cuda_filter
    }

    /// Human-readable reason the hardware path is unavailable, for error
    /// reporting. `None` when it is available.
    pub fn unavailable_reason(&self) -> Option<&'static str> {
        if self.forced_cpu {
            Some("hardware path disabled by environment override")
        } else if !self.cuda_device {
            Some("no NVIDIA device detected (nvidia-smi probe failed)")
        } else if !self.overlay_cuda_filter {
            Some("encoder build has no overlay_cuda filter")
        } else {
            None
        }
    }
}

fn probe_overlay_cuda_filter() -> anyhow::Result<bool> {
    let output = Command::new(ffmpeg_program())
        .args(["-hide_banner", "-filters"])
        .stderr(Stdio::null())
        .output()?;
    Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).contains("overlay_cuda"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_requires_both_probes() {
        assert!(HwCapability::from_parts(true, true, false).available());
        assert!(!HwCapability::from_parts(false, true, false).available());
        assert!(!HwCapability::from_parts(true, false, false).available());
        assert!(!HwCapability::from_parts(false, false, false).available());
    }

    #[test]
    fn override_wins_over_probes() {
        let forced = HwCapability::from_parts(true, true, true);
        assert!(!forced.available());
        assert!(forced
            .unavailable_reason()
            .unwrap()
            .contains("environment override"));
    }

    #[test]
    fn unavailable_reason_names_the_failing_probe() {
        assert!(HwCapability::from_parts(false, true, false)
            .unavailable_reason()
            .unwrap()
            .contains("NVIDIA device"));
        assert!(HwCapability::from_parts(true, false, false)
            .unavailable_reason()
            .unwrap()
            .contains("overlay_cuda"));
        assert!(HwCapability::from_parts(true, true, false)
            .unavailable_reason()
            .is_none());
    }
}
