//! Sequential video frame sources.
//!
//! Frames are decoded by an FFmpeg child process writing `rgb24` rawvideo to
//! its stdout; each [`FrameSource::next_frame`] call reads exactly one frame.
//! There is no seeking or sampling: every frame in the stream is visited.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use image::RgbImage;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};

/// Outcome of a single read from a frame source.
#[derive(Debug)]
pub enum FrameRead {
    /// A decoded frame.
    Frame(RgbImage),
    /// The frame at this position could not be decoded; the cursor moved past it.
    Skipped,
    /// No more frames.
    EndOfStream,
}

/// A sequential cursor over the decoded frames of one video.
#[async_trait]
pub trait FrameSource: Send {
    /// Whole frames per second (never 0).
    fn frame_rate(&self) -> u32;

    /// Total frames reported for the stream (never 0).
    fn total_frames(&self) -> u64;

    /// Read the next frame.
    async fn next_frame(&mut self) -> MediaResult<FrameRead>;

    /// Release the underlying decoder. Safe to call more than once.
    async fn close(&mut self);
}

/// Opens frame sources for video files.
#[async_trait]
pub trait VideoOpener: Send + Sync {
    async fn open(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>>;
}

/// [`VideoOpener`] backed by FFprobe and FFmpeg.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegVideoOpener;

#[async_trait]
impl VideoOpener for FfmpegVideoOpener {
    async fn open(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>> {
        let source = FfmpegFrameSource::open(path).await?;
        Ok(Box::new(source))
    }
}

/// Frame source reading rawvideo from an FFmpeg child process.
///
/// The child is spawned with `kill_on_drop`, so dropping the source on any
/// path releases the decoder.
pub struct FfmpegFrameSource {
    info: VideoInfo,
    reader: RawFrameReader<ChildStdout>,
    child: Option<Child>,
    stderr_task: Option<JoinHandle<Vec<u8>>>,
    frames_read: u64,
}

impl FfmpegFrameSource {
    /// Probe `path` and start decoding it.
    pub async fn open(path: &Path) -> MediaResult<Self> {
        let info = probe_video(path).await?;
        let (width, height) = info.display_dimensions();
        if width == 0 || height == 0 {
            return Err(MediaError::invalid_video("Video stream has no dimensions"));
        }

        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(path)
            .args([
                "-map",
                "0:v:0",
                "-an",
                "-sn",
                "-fps_mode",
                "passthrough",
                "-pix_fmt",
                "rgb24",
                "-f",
                "rawvideo",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            MediaError::ffmpeg_failed(format!("Failed to spawn FFmpeg: {}", e), None, None)
        })?;

        debug!(
            path = %path.display(),
            width,
            height,
            rotation = info.rotation,
            fps = info.frame_rate(),
            total_frames = info.total_frames(),
            "Opened video frame source"
        );

        Self::from_child(info, child)
    }

    /// Read frames of `info`'s display size from an already spawned decoder.
    fn from_child(info: VideoInfo, mut child: Child) -> MediaResult<Self> {
        let stdout = child.stdout.take().ok_or_else(|| {
            MediaError::ffmpeg_failed("Failed to capture FFmpeg stdout", None, None)
        })?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        let (width, height) = info.display_dimensions();
        Ok(Self {
            reader: RawFrameReader::new(stdout, width, height),
            info,
            child: Some(child),
            stderr_task,
            frames_read: 0,
        })
    }

    /// Reap the decoder after it closed stdout without producing a frame.
    async fn check_empty_exit(&mut self) -> MediaResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let status = child.wait().await?;
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if status.success() {
            return Ok(());
        }
        Err(MediaError::ffmpeg_failed(
            "FFmpeg produced no frames",
            Some(String::from_utf8_lossy(&stderr).trim().to_string()),
            status.code(),
        ))
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    fn frame_rate(&self) -> u32 {
        self.info.frame_rate()
    }

    fn total_frames(&self) -> u64 {
        self.info.total_frames()
    }

    async fn next_frame(&mut self) -> MediaResult<FrameRead> {
        let read = self.reader.read_frame().await;
        match read {
            FrameRead::EndOfStream if self.frames_read == 0 => self.check_empty_exit().await?,
            FrameRead::EndOfStream => {}
            FrameRead::Frame(_) | FrameRead::Skipped => self.frames_read += 1,
        }
        Ok(read)
    }

    async fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if !self.reader.is_exhausted() {
            // Stopped early; the decoder may be blocked on a full pipe.
            let _ = child.start_kill();
        }

        let status = child.wait().await;
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        match status {
            Ok(status) if status.success() => {}
            Ok(status) if self.reader.is_exhausted() => {
                warn!(
                    exit_code = ?status.code(),
                    stderr = %String::from_utf8_lossy(&stderr).trim(),
                    "FFmpeg exited with non-zero status"
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to reap FFmpeg process: {}", e),
        }
    }
}

/// Splits a rawvideo `rgb24` byte stream into frames.
pub(crate) struct RawFrameReader<R> {
    inner: R,
    width: u32,
    height: u32,
    frame_bytes: usize,
    exhausted: bool,
}

impl<R: AsyncRead + Unpin + Send> RawFrameReader<R> {
    pub(crate) fn new(inner: R, width: u32, height: u32) -> Self {
        Self {
            inner,
            width,
            height,
            frame_bytes: width as usize * height as usize * 3,
            exhausted: false,
        }
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Read one frame. A read error ends the stream; a truncated trailing
    /// frame is reported as skipped.
    pub(crate) async fn read_frame(&mut self) -> FrameRead {
        if self.exhausted {
            return FrameRead::EndOfStream;
        }

        let mut buf = vec![0u8; self.frame_bytes];
        let mut filled = 0;
        while filled < self.frame_bytes {
            match self.inner.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Frame read failed, ending stream: {}", e);
                    self.exhausted = true;
                    return FrameRead::EndOfStream;
                }
            }
        }

        if filled == 0 {
            self.exhausted = true;
            return FrameRead::EndOfStream;
        }
        if filled < self.frame_bytes {
            debug!(
                expected = self.frame_bytes,
                got = filled,
                "Truncated trailing frame"
            );
            self.exhausted = true;
            return FrameRead::Skipped;
        }

        match RgbImage::from_raw(self.width, self.height, buf) {
            Some(frame) => FrameRead::Frame(frame),
            None => FrameRead::Skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_splits_frames() {
        // Two 2x1 frames.
        let data: Vec<u8> = (0u8..12).collect();
        let mut reader = RawFrameReader::new(&data[..], 2, 1);

        match reader.read_frame().await {
            FrameRead::Frame(f) => assert_eq!(f.get_pixel(1, 0).0, [3, 4, 5]),
            other => panic!("expected frame, got {:?}", other),
        }
        match reader.read_frame().await {
            FrameRead::Frame(f) => assert_eq!(f.get_pixel(0, 0).0, [6, 7, 8]),
            other => panic!("expected frame, got {:?}", other),
        }
        assert!(matches!(reader.read_frame().await, FrameRead::EndOfStream));
        assert!(reader.is_exhausted());
    }

    #[tokio::test]
    async fn test_reader_skips_truncated_frame() {
        let data = vec![0u8; 6 + 4];
        let mut reader = RawFrameReader::new(&data[..], 2, 1);

        assert!(matches!(reader.read_frame().await, FrameRead::Frame(_)));
        assert!(matches!(reader.read_frame().await, FrameRead::Skipped));
        assert!(matches!(reader.read_frame().await, FrameRead::EndOfStream));
    }

    #[tokio::test]
    async fn test_reader_empty_stream() {
        let data: Vec<u8> = Vec::new();
        let mut reader = RawFrameReader::new(&data[..], 4, 4);
        assert!(matches!(reader.read_frame().await, FrameRead::EndOfStream));
    }

    #[cfg(unix)]
    fn shell_source(script: &str, width: u32, height: u32) -> FfmpegFrameSource {
        let child = Command::new("sh")
            .args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let info = VideoInfo {
            duration: 1.0,
            width,
            height,
            fps: 1.0,
            frame_count: Some(1),
            codec: "rawvideo".to_string(),
            size: 0,
            rotation: 0,
        };
        FfmpegFrameSource::from_child(info, child).unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decoder_failure_before_first_frame() {
        let mut source = shell_source("echo 'Invalid data found' >&2; exit 1", 2, 2);
        match source.next_frame().await {
            Err(MediaError::FfmpegFailed {
                stderr, exit_code, ..
            }) => {
                assert_eq!(exit_code, Some(1));
                assert_eq!(stderr.as_deref(), Some("Invalid data found"));
            }
            other => panic!("expected FFmpeg failure, got {:?}", other),
        }
        source.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_empty_decode_is_end_of_stream() {
        let mut source = shell_source("exit 0", 2, 2);
        assert!(matches!(source.next_frame().await, Ok(FrameRead::EndOfStream)));
        source.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decoder_failure_after_frames_ends_stream() {
        // One whole 2x2 rgb24 frame, then a crash.
        let mut source = shell_source("head -c 12 /dev/zero; exit 1", 2, 2);
        assert!(matches!(source.next_frame().await, Ok(FrameRead::Frame(_))));
        assert!(matches!(source.next_frame().await, Ok(FrameRead::EndOfStream)));
        source.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rotated_video_reads_display_sized_frames() {
        let child = Command::new("sh")
            .args(["-c", "head -c 24 /dev/zero"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let info = VideoInfo {
            duration: 1.0,
            width: 4,
            height: 2,
            fps: 1.0,
            frame_count: Some(1),
            codec: "h264".to_string(),
            size: 0,
            rotation: 90,
        };
        let mut source = FfmpegFrameSource::from_child(info, child).unwrap();
        match source.next_frame().await {
            Ok(FrameRead::Frame(frame)) => assert_eq!(frame.dimensions(), (2, 4)),
            other => panic!("expected frame, got {:?}", other),
        }
        source.close().await;
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = FfmpegVideoOpener.open(&dir.path().join("nope.mp4")).await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
