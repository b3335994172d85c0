//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// Frame rate used when the container does not report one.
pub const DEFAULT_FPS: u32 = 30;

/// Video file information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps), 0.0 if unknown
    pub fps: f64,
    /// Frame count reported by the container
    pub frame_count: Option<u64>,
    /// Video codec
    pub codec: String,
    /// File size in bytes
    pub size: u64,
    /// Display rotation in degrees from stream metadata, 0 if none
    #[serde(default)]
    pub rotation: i32,
}

impl VideoInfo {
    /// Whole frames per second, falling back to [`DEFAULT_FPS`].
    pub fn frame_rate(&self) -> u32 {
        let fps = self.fps.trunc();
        if fps.is_finite() && fps >= 1.0 {
            fps as u32
        } else {
            DEFAULT_FPS
        }
    }

    /// Frame size after applying the display rotation, as FFmpeg decodes it
    /// with autorotation on.
    pub fn display_dimensions(&self) -> (u32, u32) {
        if self.rotation.rem_euclid(180) == 90 {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    /// Total frame count; estimated from duration when missing, never 0.
    pub fn total_frames(&self) -> u64 {
        if let Some(count) = self.frame_count.filter(|c| *c > 0) {
            return count;
        }
        let estimate = (self.duration * self.fps).round();
        if estimate.is_finite() && estimate >= 1.0 {
            estimate as u64
        } else {
            1
        }
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: FfprobeTags,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

impl FfprobeStream {
    /// Display matrix rotation takes precedence over the legacy `rotate` tag.
    fn rotation(&self) -> i32 {
        self.side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
            .filter(|r: &f64| r.is_finite())
            .map(|r| r.round() as i32)
            .unwrap_or(0)
    }
}

/// Probe a video file for information.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "Failed to open video".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(stdout: &[u8]) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::invalid_video("No video stream found"))?;

    let duration = video_stream
        .duration
        .as_ref()
        .or(probe.format.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let size = probe
        .format
        .size
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let fps = video_stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video_stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    let frame_count = video_stream
        .nb_frames
        .as_ref()
        .and_then(|n| n.parse::<u64>().ok());

    Ok(VideoInfo {
        duration,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        fps,
        frame_count,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        size,
        rotation: video_stream.rotation(),
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97"). "0/0" yields None.
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|v: &f64| *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(fps: f64, frame_count: Option<u64>, duration: f64) -> VideoInfo {
        VideoInfo {
            duration,
            width: 640,
            height: 360,
            fps,
            frame_count,
            codec: "h264".to_string(),
            size: 0,
            rotation: 0,
        }
    }

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_frame_rate_truncates_and_falls_back() {
        assert_eq!(info(29.97, None, 0.0).frame_rate(), 29);
        assert_eq!(info(0.0, None, 0.0).frame_rate(), DEFAULT_FPS);
        assert_eq!(info(f64::NAN, None, 0.0).frame_rate(), DEFAULT_FPS);
    }

    #[test]
    fn test_total_frames_never_zero() {
        assert_eq!(info(30.0, Some(300), 10.0).total_frames(), 300);
        assert_eq!(info(25.0, None, 4.0).total_frames(), 100);
        assert_eq!(info(25.0, Some(0), 0.0).total_frames(), 1);
        assert_eq!(info(0.0, None, 0.0).total_frames(), 1);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "format": {"duration": "3.000000", "size": "2048"},
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720,
                 "r_frame_rate": "1/1", "avg_frame_rate": "1/1", "nb_frames": "3"}
            ]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert_eq!(info.frame_rate(), 1);
        assert_eq!(info.total_frames(), 3);
        assert_eq!(info.size, 2048);
        assert_eq!(info.codec, "h264");
    }

    #[test]
    fn test_parse_rotation_from_side_data() {
        let json = br#"{
            "format": {"duration": "2.0"},
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
                 "avg_frame_rate": "30/1",
                 "side_data_list": [
                    {"side_data_type": "Display Matrix", "rotation": -90}
                 ]}
            ]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.rotation, -90);
        assert_eq!(info.display_dimensions(), (1080, 1920));
    }

    #[test]
    fn test_parse_rotation_from_tag() {
        let json = br#"{
            "format": {},
            "streams": [
                {"codec_type": "video", "width": 640, "height": 360,
                 "tags": {"rotate": "270", "language": "und"}}
            ]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.rotation, 270);
        assert_eq!(info.display_dimensions(), (360, 640));
    }

    #[test]
    fn test_display_dimensions_keep_upright_and_flipped() {
        let mut video = info(30.0, None, 1.0);
        assert_eq!(video.display_dimensions(), (640, 360));
        video.rotation = 180;
        assert_eq!(video.display_dimensions(), (640, 360));
        video.rotation = 90;
        assert_eq!(video.display_dimensions(), (360, 640));
    }

    #[test]
    fn test_parse_probe_output_without_video_stream() {
        let json = br#"{"format": {}, "streams": [{"codec_type": "audio"}]}"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(MediaError::InvalidVideo(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        assert!(matches!(
            probe_video(&missing).await,
            Err(MediaError::FileNotFound(_))
        ));
    }
}
