use std::io::{BufRead, BufReader, Read};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Keep roughly this much of the most recent diagnostic output for error
/// classification; anything older is unlikely to explain the exit.
const TAIL_BUDGET: usize = 8 * 1024;

/// How long `finish` waits for the reader thread after the child has exited.
const FINISH_GRACE: Duration = Duration::from_secs(2);

/// What the reader thread hands back once the diagnostic stream closes.
#[derive(Debug, Default)]
pub struct ProgressReport {
    pub frames_seen: u64,
    pub stderr_tail: String,
}

/// Owns the child's diagnostic stream on a named thread, draining both the
/// machine-readable `key=value` progress records and the human stats lines.
/// Draining is mandatory even when nobody reads the report: a full pipe
/// buffer would stall the encoder.
pub struct ProgressMonitor {
    receiver: mpsc::Receiver<ProgressReport>,
    handle: thread::JoinHandle<()>,
}

impl ProgressMonitor {
    pub fn attach<R>(stream: R, total_duration_seconds: f64, total_frames: u64) -> Self
    where
        R: Read + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("render-progress".to_owned())
            .spawn(move || {
                let report = drain_stream(stream, total_duration_seconds, total_frames);
                // The parent may already have given up waiting; ignore.
                let _ = sender.send(report);
            })
            .expect("failed to spawn progress thread");
        Self { receiver, handle }
    }

    /// Collect the final report. Called after the child has exited, so the
    /// stream is at or near EOF; the grace period covers pipe flushing.
    pub fn finish(self) -> ProgressReport {
        match self.receiver.recv_timeout(FINISH_GRACE) {
            Ok(report) => {
                let _ = self.handle.join();
                report
            }
            Err(_) => {
                warn!("progress stream did not close in time, proceeding without its tail");
                ProgressReport::default()
            }
        }
    }
}

fn drain_stream<R: Read>(stream: R, total_duration_seconds: f64, total_frames: u64) -> ProgressReport {
    let reader = BufReader::new(stream);
    let started = Instant::now();
    let mut tail = String::new();
    let mut frames_seen = 0u64;
    let mut last_logged_percent = -1i64;

    for line in reader.lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        push_tail(&mut tail, trimmed);

        let snapshot = parse_stats_line(trimmed);
        if let Some(frame) = snapshot.frame {
            frames_seen = frames_seen.max(frame);
        }

        let elapsed_media = snapshot
            .out_time_seconds
            .or_else(|| snapshot.frame.map(|f| frame_to_seconds(f, total_frames, total_duration_seconds)));
        if let Some(position) = elapsed_media {
            let percent = if total_duration_seconds > 0.0 {
                ((position / total_duration_seconds) * 100.0).clamp(0.0, 100.0)
            } else {
                0.0
            };
            let percent_step = percent.floor() as i64;
            if percent_step > last_logged_percent {
                last_logged_percent = percent_step;
                let eta = estimate_eta(started.elapsed(), position, total_duration_seconds);
                match (snapshot.speed, eta) {
                    (Some(speed), Some(eta)) => {
                        info!("encoding {percent:.0}% ({speed:.2}x, ~{eta:.0}s remaining)")
                    }
                    (_, Some(eta)) => info!("encoding {percent:.0}% (~{eta:.0}s remaining)"),
                    _ => info!("encoding {percent:.0}%"),
                }
            }
        }

        if extract_value(trimmed, "progress") == Some("end") {
            debug!("encoder reported end of progress stream");
        }
    }

    ProgressReport {
        frames_seen,
        stderr_tail: tail,
    }
}

fn frame_to_seconds(frame: u64, total_frames: u64, total_duration_seconds: f64) -> f64 {
    if total_frames == 0 {
        0.0
    } else {
        (frame as f64 / total_frames as f64) * total_duration_seconds
    }
}

fn estimate_eta(elapsed: Duration, media_position: f64, total_duration: f64) -> Option<f64> {
    if media_position <= 0.0 || total_duration <= media_position {
        return None;
    }
    let rate = media_position / elapsed.as_secs_f64().max(1e-6);
    if rate <= 0.0 {
        return None;
    }
    Some((total_duration - media_position) / rate)
}

fn push_tail(tail: &mut String, line: &str) {
    tail.push_str(line);
    tail.push('\n');
    if tail.len() > 2 * TAIL_BUDGET {
        // Trim from the front on a char boundary.
        let cut = tail.len() - TAIL_BUDGET;
        let cut = (cut..tail.len())
            .find(|&i| tail.is_char_boundary(i))
            .unwrap_or(0);
        tail.replace_range(..cut, "");
    }
}

/// One observation extracted from either record format: `key=value` progress
/// lines or the human `frame= 120 fps= 60 ... time=00:00:02.00 ... speed=1x`
/// stats line.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub frame: Option<u64>,
    pub out_time_seconds: Option<f64>,
    pub speed: Option<f64>,
}

pub fn parse_stats_line(line: &str) -> StatsSnapshot {
    let frame = extract_value(line, "frame").and_then(|value| value.parse().ok());
    let out_time_seconds = extract_value(line, "out_time_ms")
        .and_then(|value| value.parse::<i64>().ok())
        .map(|micros| micros as f64 / 1_000_000.0)
        .or_else(|| extract_value(line, "out_time").and_then(parse_time_str))
        .or_else(|| extract_value(line, "time").and_then(parse_time_str));
    let speed = extract_value(line, "speed")
        .map(|value| value.trim_end_matches('x'))
        .and_then(|value| value.parse().ok());
    StatsSnapshot {
        frame,
        out_time_seconds,
        speed,
    }
}

/// Find `key=` in a stats or progress line and return its value. Tolerates
/// the space padding the human stats format inserts after `=`.
pub fn extract_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("{key}=");
    let mut search_from = 0;
    loop {
        let found = line[search_from..].find(&pattern)? + search_from;
        // Reject longer keys that merely end with ours (out_time vs time).
        if found > 0
            && line[..found]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            search_from = found + pattern.len();
            continue;
        }
        let rest = line[found + pattern.len()..].trim_start();
        let end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        let value = &rest[..end];
        return if value.is_empty() { None } else { Some(value) };
    }
}

/// Parse `HH:MM:SS.cc` into seconds.
pub fn parse_time_str(raw: &str) -> Option<f64> {
    let mut parts = raw.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn progress_records_parse_to_snapshots() {
        let snapshot = parse_stats_line("frame=480");
        assert_eq!(snapshot.frame, Some(480));

        let snapshot = parse_stats_line("out_time_ms=2500000");
        assert_eq!(snapshot.out_time_seconds, Some(2.5));

        let snapshot = parse_stats_line("speed=3.41x");
        assert_eq!(snapshot.speed, Some(3.41));
    }

    #[test]
    fn human_stats_line_parses_all_fields() {
        let line =
            "frame=  120 fps= 60 q=25.0 size=    1024kB time=00:00:02.00 bitrate=4194.3kbits/s speed=1.02x";
        let snapshot = parse_stats_line(line);
        assert_eq!(snapshot.frame, Some(120));
        assert_eq!(snapshot.out_time_seconds, Some(2.0));
        assert_eq!(snapshot.speed, Some(1.02));
    }

    #[test]
    fn time_key_is_not_confused_with_out_time() {
        assert_eq!(extract_value("out_time=00:00:05.00", "time"), None);
        assert_eq!(
            extract_value("out_time=00:00:05.00", "out_time"),
            Some("00:00:05.00")
        );
        assert_eq!(extract_value("a=1 time=00:00:03.00", "time"), Some("00:00:03.00"));
    }

    #[test]
    fn time_strings_convert_to_seconds() {
        assert_eq!(parse_time_str("00:00:05.50"), Some(5.5));
        assert_eq!(parse_time_str("01:02:03.00"), Some(3723.0));
        assert_eq!(parse_time_str("nonsense"), None);
        assert_eq!(parse_time_str("1:2"), None);
    }

    #[test]
    fn monitor_returns_max_frame_and_tail() {
        let stream = Cursor::new(
            "frame=10\nout_time_ms=1000000\nprogress=continue\nframe=240\nprogress=end\nsome diagnostic line\n",
        );
        let monitor = ProgressMonitor::attach(stream, 4.0, 240);
        let report = monitor.finish();
        assert_eq!(report.frames_seen, 240);
        assert!(report.stderr_tail.contains("some diagnostic line"));
        assert!(report.stderr_tail.contains("progress=end"));
    }

    #[test]
    fn tail_stays_bounded() {
        let mut tail = String::new();
        for i in 0..5000 {
            push_tail(&mut tail, &format!("line number {i} with some padding"));
        }
        assert!(tail.len() <= 2 * TAIL_BUDGET + 64);
        assert!(tail.contains("line number 4999"));
        assert!(!tail.contains("line number 0 "));
    }
}
