use std::fs;
use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::tempdir;

fn write_manifest(path: &Path, yaml: &str) {
    fs::write(path, yaml).expect("manifest should write");
}

fn write_source_png(path: &Path, width: u32, height: u32) {
    image::RgbaImage::from_pixel(width, height, image::Rgba([200, 200, 200, 255]))
        .save(path)
        .expect("source image should write");
}

fn run_rollcast(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_rollcast"))
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("rollcast command should run")
}

fn command_available(name: &str, version_arg: &str) -> bool {
    Command::new(name)
        .arg(version_arg)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

const VALID_MANIFEST: &str = r#"
canvas: { width: 32, height: 32 }
fps: 10
scroll: { px_per_frame: 2 }
margins: { top: 4, bottom: 4 }
codec: libx264
source_image: text.png
"#;

#[test]
fn check_prints_the_computed_timeline() {
    let dir = tempdir().expect("tempdir should create");
    write_source_png(&dir.path().join("text.png"), 32, 80);
    write_manifest(&dir.path().join("scene.yaml"), VALID_MANIFEST);

    let output = run_rollcast(dir.path(), &["check", "scene.yaml"]);
    assert!(
        output.status.success(),
        "check should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("OK: scene.yaml"));
    // 80px source on a 32px canvas scrolls 48px; the 8s floor binds at 10fps.
    assert!(stdout.contains("Timeline: 48px scroll at 1px/frame, 80 scroll frames"));
    assert!(stdout.contains("12.00s total"));
}

#[test]
fn check_rejects_malformed_manifests() {
    let dir = tempdir().expect("tempdir should create");
    write_source_png(&dir.path().join("text.png"), 32, 80);

    let odd_canvas = VALID_MANIFEST.replace("width: 32", "width: 33");
    write_manifest(&dir.path().join("odd.yaml"), &odd_canvas);
    let output = run_rollcast(dir.path(), &["check", "odd.yaml"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("must be even"));

    let unknown_field = format!("{VALID_MANIFEST}\nmystery_knob: 1");
    write_manifest(&dir.path().join("unknown.yaml"), &unknown_field);
    let output = run_rollcast(dir.path(), &["check", "unknown.yaml"]);
    assert!(!output.status.success());

    let output = run_rollcast(dir.path(), &["check", "missing.yaml"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read manifest"));
}

#[test]
fn probe_json_reflects_the_cpu_override() {
    let dir = tempdir().expect("tempdir should create");
    let output = Command::new(env!("CARGO_BIN_EXE_rollcast"))
        .current_dir(dir.path())
        .env("ROLLCAST_NO_GPU", "1")
        .args(["probe", "--json"])
        .output()
        .expect("probe command should run");
    assert!(output.status.success());

    let parsed: Value = serde_json::from_slice(&output.stdout).expect("stdout should be json");
    assert_eq!(parsed["forced_cpu"], Value::Bool(true));
    assert_eq!(parsed["hardware_available"], Value::Bool(false));
}

#[test]
fn hardware_request_fails_before_any_temp_file_is_written() {
    let dir = tempdir().expect("tempdir should create");
    write_source_png(&dir.path().join("text.png"), 32, 80);
    // Default codec is the hardware encoder.
    let manifest = VALID_MANIFEST.replace("codec: libx264\n", "");
    write_manifest(&dir.path().join("scene.yaml"), &manifest);

    let output = run_rollcast(
        dir.path(),
        &["render", "scene.yaml", "-o", "out.mp4", "--no-gpu"],
    );
    assert!(!output.status.success(), "render should refuse the hardware codec");
    assert!(String::from_utf8_lossy(&output.stderr).contains("capability error"));

    assert!(!dir.path().join("out.mp4").exists());
    assert!(!dir.path().join("out_content.png").exists());
    assert!(!dir.path().join("out_background.png").exists());
}

#[test]
fn render_writes_a_video_and_cleans_its_temp_files() {
    if !command_available("ffmpeg", "-version") {
        return;
    }

    let dir = tempdir().expect("tempdir should create");
    write_source_png(&dir.path().join("text.png"), 32, 80);
    write_manifest(&dir.path().join("scene.yaml"), VALID_MANIFEST);

    let output = run_rollcast(
        dir.path(),
        &["render", "scene.yaml", "-o", "out.mp4", "--no-gpu"],
    );
    assert!(
        output.status.success(),
        "render should succeed. stdout={} stderr={}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    let video = dir.path().join("out.mp4");
    assert!(video.is_file(), "render output should exist");
    let metadata = fs::metadata(&video).expect("output metadata should load");
    assert!(metadata.len() > 0, "render output should not be empty");

    assert!(String::from_utf8_lossy(&output.stdout).contains("Wrote out.mp4"));
    assert!(
        !dir.path().join("out_content.png").exists(),
        "scroll content temp should be cleaned up"
    );
}
