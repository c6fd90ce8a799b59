use tracing::info;

/// Fixed lead-in/lead-out with no vertical motion, in seconds.
pub const STATIC_SECONDS: f64 = 2.0;

/// Absolute floor on the scroll segment so the viewer always gets a
/// perceptible scroll, even for very short content or very high speed.
pub const MIN_SCROLL_SECONDS: u32 = 8;

/// Frame-accurate timing and pixel-offset model for one render.
///
/// Derived once per request from integer math only; duration values are
/// computed from the frame counts, never the reverse, so the per-frame step
/// and the frame count cannot drift apart.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollTimeline {
    /// Vertical pixels the source image must travel so its bottom aligns with
    /// the canvas bottom. Zero when the image fits the canvas.
    pub scroll_distance: u32,
    /// Whole pixels of motion per frame during the scroll segment.
    pub px_per_frame: u32,
    pub scroll_frame_count: u32,
    pub start_static_seconds: f64,
    pub end_static_seconds: f64,
    pub scroll_duration_seconds: f64,
    pub total_duration_seconds: f64,
    pub total_frame_count: u64,
    image_height: u32,
    canvas_height: u32,
    top_margin: u32,
    fps: u32,
}

impl ScrollTimeline {
    /// `requested_px_per_frame` may be fractional; it is rounded to a whole
    /// pixel (at least 1) because fractional per-frame motion is visually
    /// unstable under overlay compositing.
    pub fn compute(
        image_height: u32,
        canvas_height: u32,
        top_margin: u32,
        requested_px_per_frame: f64,
        fps: u32,
    ) -> Self {
        debug_assert!(fps > 0);

        let scroll_distance = image_height.saturating_sub(canvas_height);
        let roll_px = (requested_px_per_frame.round() as u32).max(1);
        let min_scroll_steps = scroll_distance.div_ceil(roll_px);

        let scroll_frame_count = min_scroll_steps.max(MIN_SCROLL_SECONDS * fps);
        let scroll_duration_seconds = f64::from(scroll_frame_count) / f64::from(fps);

        // Ceiling keeps px_per_frame * scroll_frame_count >= scroll_distance,
        // so no content is left unscrolled.
        let px_per_frame = scroll_distance.div_ceil(scroll_frame_count).max(1);

        let total_duration_seconds = 2.0 * STATIC_SECONDS + scroll_duration_seconds;
        let total_frame_count =
            u64::from(scroll_frame_count) + 2 * u64::from(STATIC_SECONDS as u32) * u64::from(fps);

        info!(
            scroll_distance,
            px_per_frame,
            scroll_frame_count,
            scroll_duration_seconds,
            total_duration_seconds,
            "computed scroll timeline"
        );

        Self {
            scroll_distance,
            px_per_frame,
            scroll_frame_count,
            start_static_seconds: STATIC_SECONDS,
            end_static_seconds: STATIC_SECONDS,
            scroll_duration_seconds,
            total_duration_seconds,
            total_frame_count,
            image_height,
            canvas_height,
            top_margin,
            fps,
        }
    }

    pub fn scroll_start_time(&self) -> f64 {
        self.start_static_seconds
    }

    pub fn scroll_end_time(&self) -> f64 {
        self.start_static_seconds + self.scroll_duration_seconds
    }

    /// Resting offset once the scroll has completed: the content's bottom is
    /// aligned exactly at the canvas bottom, independent of any rounding
    /// accumulated during the scroll segment.
    pub fn final_offset(&self) -> i64 {
        if self.scroll_distance == 0 {
            return i64::from(self.top_margin);
        }
        -i64::from(self.image_height - self.canvas_height + self.top_margin)
    }

    /// Vertical overlay offset at time `t` (seconds). Defined for all
    /// `t >= 0`, piecewise-linear in frame index within the scroll segment.
    pub fn offset_at(&self, t: f64) -> i64 {
        let top = i64::from(self.top_margin);
        if self.scroll_distance == 0 || t < self.scroll_start_time() {
            return top;
        }
        if t <= self.scroll_end_time() {
            let frames = ((t - self.scroll_start_time()) * f64::from(self.fps)).floor() as i64;
            return top - i64::from(self.px_per_frame) * frames;
        }
        self.final_offset()
    }

    /// The same offset function rendered as an ffmpeg overlay `y` expression.
    pub fn y_expr(&self) -> String {
        if self.scroll_distance == 0 {
            return self.top_margin.to_string();
        }
        format!(
            "if(between(t,{start},{end}), {top} - {px}*floor((t-{start})*{fps}), \
             if(lt(t,{start}), {top}, {rest}))",
            start = self.scroll_start_time(),
            end = self.scroll_end_time(),
            top = self.top_margin,
            px = self.px_per_frame,
            fps = self.fps,
            rest = self.final_offset(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_never_scrolls() {
        let tl = ScrollTimeline::compute(1280, 1280, 120, 1.0, 60);
        assert_eq!(tl.scroll_distance, 0);
        assert_eq!(tl.scroll_duration_seconds, 8.0);
        assert_eq!(tl.px_per_frame, 1);
        for t in [0.0, 1.9, 2.0, 6.0, 10.0, 12.0, 1e6] {
            assert_eq!(tl.offset_at(t), 120, "offset must stay static at t={t}");
        }
        assert_eq!(tl.y_expr(), "120");
    }

    #[test]
    fn tall_content_matches_reference_scenario() {
        let tl = ScrollTimeline::compute(4000, 1280, 120, 1.0, 60);
        assert_eq!(tl.scroll_distance, 2720);
        assert_eq!(tl.px_per_frame, 1);
        assert!((tl.scroll_duration_seconds - 2720.0 / 60.0).abs() < 1e-9);
        assert!((tl.total_duration_seconds - (4.0 + 2720.0 / 60.0)).abs() < 1e-9);
    }

    #[test]
    fn offsets_are_continuous_at_segment_boundaries() {
        let tl = ScrollTimeline::compute(4000, 1280, 120, 3.0, 30);
        assert_eq!(tl.offset_at(0.0), 120);
        assert_eq!(tl.offset_at(tl.scroll_start_time()), 120);
        let resting = -i64::from(4000u32 - 1280 + 120);
        assert_eq!(tl.final_offset(), resting);
        assert_eq!(tl.offset_at(tl.scroll_end_time() + 0.001), resting);
        assert_eq!(tl.offset_at(1e9), resting);
    }

    #[test]
    fn scroll_covers_full_distance() {
        for (img, canvas, px, fps) in [
            (4000u32, 1280u32, 1.0, 60u32),
            (100_000, 1280, 7.0, 60),
            (1500, 1280, 0.4, 24),
            (1281, 1280, 12.0, 25),
        ] {
            let tl = ScrollTimeline::compute(img, canvas, 0, px, fps);
            assert!(
                u64::from(tl.px_per_frame) * u64::from(tl.scroll_frame_count)
                    >= u64::from(tl.scroll_distance),
                "content left unscrolled for image_height={img}"
            );
            assert!(tl.scroll_duration_seconds >= 8.0);
            assert!((tl.total_duration_seconds - (4.0 + tl.scroll_duration_seconds)).abs() < 1e-9);
        }
    }
}
