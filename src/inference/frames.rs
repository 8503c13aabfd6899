//! Sequential video frame decoding
//!
//! Frames are pulled one at a time from an `ffmpeg` subprocess that emits
//! raw RGB24 at the video's native resolution. Resizing and normalization
//! happen in-process with the `image` crate.

use image::{ImageBuffer, Rgb, imageops};
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use super::InferenceError;

/// Channel layout the classifier was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    /// OpenCV-style blue, green, red
    #[default]
    Bgr,
    Rgb,
}

impl std::str::FromStr for ChannelOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bgr" => Ok(ChannelOrder::Bgr),
            "rgb" => Ok(ChannelOrder::Rgb),
            other => Err(format!("unknown channel order: {}", other)),
        }
    }
}

/// A decoded frame at native resolution, packed RGB24.
pub struct RawFrame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawFrame {
    /// Resize to `size`x`size` and scale every channel to [0,1], laid out
    /// HWC in the requested channel order.
    pub fn preprocess(self, size: u32, order: ChannelOrder) -> Result<Frame, InferenceError> {
        let (width, height) = (self.width, self.height);
        let img: ImageBuffer<Rgb<u8>, _> = ImageBuffer::from_raw(width, height, self.rgb)
            .ok_or_else(|| {
                InferenceError::UnreadableMedia(format!(
                    "Frame buffer does not match {}x{} RGB",
                    width, height
                ))
            })?;

        let resized = imageops::resize(&img, size, size, imageops::FilterType::Triangle);

        let mut data = Vec::with_capacity((size * size * 3) as usize);
        for pixel in resized.pixels() {
            let [r, g, b] = pixel.0;
            let ordered = match order {
                ChannelOrder::Bgr => [b, g, r],
                ChannelOrder::Rgb => [r, g, b],
            };
            data.extend(ordered.iter().map(|&c| c as f32 / 255.0));
        }

        Ok(Frame { size, data })
    }
}

/// A model-ready frame: `size * size * 3` floats in [0,1].
#[derive(Debug, Clone)]
pub struct Frame {
    size: u32,
    data: Vec<f32>,
}

impl Frame {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Anything that yields frames in stream order.
pub trait FrameSource {
    /// `Ok(None)` marks end of stream.
    fn next_frame(&mut self) -> Result<Option<RawFrame>, InferenceError>;
}

/// Opens a [`FrameSource`] for a file on disk.
pub trait VideoDecoder: Send + Sync {
    /// `max_frames` is a hint; callers still stop pulling on their own.
    fn open(&self, path: &Path, max_frames: usize)
    -> Result<Box<dyn FrameSource>, InferenceError>;
}

/// Decoder backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn probe_dimensions(&self, path: &Path) -> Result<(u32, u32), InferenceError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error"])
            .args(["-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height"])
            .args(["-of", "csv=s=x:p=0"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| spawn_error(&self.ffprobe, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InferenceError::UnreadableMedia(format!(
                "ffprobe failed: {}",
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_dimensions(&stdout).ok_or_else(|| {
            InferenceError::UnreadableMedia("No video stream found".to_string())
        })
    }
}

/// A decoder binary that cannot be started is a server fault, not a bad upload.
fn spawn_error(binary: &str, err: std::io::Error) -> InferenceError {
    log::error!("Failed to start {}: {}", binary, err);
    InferenceError::InferenceFailure(format!("{} not available: {}", binary, err))
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn open(
        &self,
        path: &Path,
        max_frames: usize,
    ) -> Result<Box<dyn FrameSource>, InferenceError> {
        if !path.is_file() {
            return Err(InferenceError::UnreadableMedia(format!(
                "Video file not found: {}",
                path.display()
            )));
        }

        let (width, height) = self.probe_dimensions(path)?;

        // Decode the same stream ffprobe measured, unrotated, so every frame
        // is exactly width*height*3 bytes.
        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .arg("-noautorotate")
            .arg("-i")
            .arg(path)
            .args(["-map", "0:v:0"])
            .args(["-an", "-sn"])
            .args(["-frames:v", &max_frames.to_string()])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| spawn_error(&self.ffmpeg, e))?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(InferenceError::UnreadableMedia(
                    "ffmpeg stdout unavailable".to_string(),
                ));
            }
        };

        log::debug!(
            "Opened {} ({}x{}) for decoding, cap {} frames",
            path.display(),
            width,
            height,
            max_frames
        );

        Ok(Box::new(FfmpegFrameSource {
            child,
            stdout,
            width,
            height,
            finished: false,
        }))
    }
}

/// Live ffmpeg process. The child is killed and reaped on drop.
pub struct FfmpegFrameSource {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    finished: bool,
}

impl FfmpegFrameSource {
    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl FrameSource for FfmpegFrameSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, InferenceError> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_len()];
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(InferenceError::UnreadableMedia(format!(
                        "Failed reading decoded frame: {}",
                        e
                    )));
                }
            }
        }

        if filled < buf.len() {
            if filled > 0 {
                log::warn!(
                    "Discarding truncated frame ({} of {} bytes)",
                    filled,
                    buf.len()
                );
            }
            self.finished = true;
            return Ok(None);
        }

        Ok(Some(RawFrame {
            rgb: buf,
            width: self.width,
            height: self.height,
        }))
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Parse ffprobe's `WIDTHxHEIGHT` csv line.
pub fn parse_dimensions(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut parts = line.split('x').filter(|p| !p.is_empty());
    let width: u32 = parts.next()?.trim().parse().ok()?;
    let height: u32 = parts.next()?.trim().parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> RawFrame {
        let data = (0..width * height).flat_map(|_| rgb).collect();
        RawFrame {
            rgb: data,
            width,
            height,
        }
    }

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("1920x1080\n"), Some((1920, 1080)));
        assert_eq!(parse_dimensions("\n640x360x\n"), Some((640, 360)));
        assert_eq!(parse_dimensions(""), None);
        assert_eq!(parse_dimensions("0x0"), None);
        assert_eq!(parse_dimensions("N/AxN/A"), None);
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let frame = solid_frame(64, 32, [255, 128, 0])
            .preprocess(128, ChannelOrder::Rgb)
            .unwrap();

        assert_eq!(frame.size(), 128);
        assert_eq!(frame.as_slice().len(), 128 * 128 * 3);
        assert!(frame.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_preprocess_channel_order() {
        let rgb = solid_frame(10, 10, [255, 0, 0])
            .preprocess(128, ChannelOrder::Rgb)
            .unwrap();
        assert_eq!(&rgb.as_slice()[..3], &[1.0, 0.0, 0.0]);

        let bgr = solid_frame(10, 10, [255, 0, 0])
            .preprocess(128, ChannelOrder::Bgr)
            .unwrap();
        assert_eq!(&bgr.as_slice()[..3], &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let frame = solid_frame(100, 100, [128, 128, 128])
            .preprocess(128, ChannelOrder::Bgr)
            .unwrap();
        let expected = 128.0 / 255.0;
        assert!((frame.as_slice()[0] - expected).abs() < 0.0001);
    }

    #[test]
    fn test_preprocess_rejects_short_buffer() {
        let raw = RawFrame {
            rgb: vec![0; 10],
            width: 4,
            height: 4,
        };
        assert!(matches!(
            raw.preprocess(128, ChannelOrder::Rgb),
            Err(InferenceError::UnreadableMedia(_))
        ));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let decoder = FfmpegDecoder::default();
        let result = decoder.open(Path::new("/nonexistent/clip.mp4"), 30);
        assert!(matches!(result, Err(InferenceError::UnreadableMedia(_))));
    }

    #[test]
    fn test_missing_binary_is_server_fault() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"video").unwrap();

        let decoder = FfmpegDecoder::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let result = decoder.open(&video, 30);
        assert!(matches!(result, Err(InferenceError::InferenceFailure(_))));
    }

    #[test]
    fn test_channel_order_from_str() {
        assert_eq!("BGR".parse::<ChannelOrder>(), Ok(ChannelOrder::Bgr));
        assert_eq!("rgb".parse::<ChannelOrder>(), Ok(ChannelOrder::Rgb));
        assert!("hsv".parse::<ChannelOrder>().is_err());
    }

    /// Shell-script stand-ins for ffprobe/ffmpeg on a 4x2 video (24 bytes per frame).
    #[cfg(unix)]
    mod stand_in {
        use super::*;
        use crate::inference::testing::StubClassifier;
        use crate::inference::{PipelineOptions, classify_source};
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;
        use std::sync::Mutex;
        use std::time::{Duration, Instant};
        use tempfile::TempDir;

        const FRAME_BYTES: usize = 4 * 2 * 3;

        // Scripts are written then executed; a concurrent fork holding the
        // write fd would make exec fail with ETXTBSY.
        static SCRIPTS: Mutex<()> = Mutex::new(());

        struct StandIn {
            dir: TempDir,
            decoder: FfmpegDecoder,
            video: PathBuf,
        }

        impl StandIn {
            /// `ffmpeg_body` runs after the argv is recorded to `args.txt`.
            fn new(ffmpeg_body: &str) -> Self {
                let dir = tempfile::tempdir().unwrap();
                let ffprobe = script(&dir, "ffprobe", "echo 4x2");
                let args = dir.path().join("args.txt");
                let ffmpeg = script(
                    &dir,
                    "ffmpeg",
                    &format!("echo \"$@\" > '{}'\n{}", args.display(), ffmpeg_body),
                );
                let video = dir.path().join("clip.mp4");
                std::fs::write(&video, b"video").unwrap();

                Self {
                    decoder: FfmpegDecoder::new(ffmpeg, ffprobe),
                    video,
                    dir,
                }
            }

            fn open(&self, max_frames: usize) -> Box<dyn FrameSource> {
                self.decoder.open(&self.video, max_frames).unwrap()
            }

            fn recorded_args(&self) -> String {
                std::fs::read_to_string(self.dir.path().join("args.txt")).unwrap()
            }
        }

        fn script(dir: &TempDir, name: &str, body: &str) -> String {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.display().to_string()
        }

        fn emit(bytes: usize) -> String {
            format!("head -c {} /dev/zero", bytes)
        }

        fn lock() -> std::sync::MutexGuard<'static, ()> {
            SCRIPTS.lock().unwrap_or_else(|e| e.into_inner())
        }

        #[test]
        fn test_stream_is_cut_into_whole_frames() {
            let _guard = lock();
            let stand_in = StandIn::new(&emit(2 * FRAME_BYTES));
            let mut source = stand_in.open(30);

            for _ in 0..2 {
                let frame = source.next_frame().unwrap().unwrap();
                assert_eq!((frame.width, frame.height), (4, 2));
                assert_eq!(frame.rgb.len(), FRAME_BYTES);
            }
            assert!(source.next_frame().unwrap().is_none());
            // Stays finished once the stream has ended
            assert!(source.next_frame().unwrap().is_none());
        }

        #[test]
        fn test_truncated_trailing_frame_is_dropped() {
            let _guard = lock();
            let stand_in = StandIn::new(&emit(FRAME_BYTES + 16));
            let mut source = stand_in.open(30);

            assert!(source.next_frame().unwrap().is_some());
            assert!(source.next_frame().unwrap().is_none());
        }

        #[test]
        fn test_empty_output_has_no_frames() {
            let _guard = lock();
            let stand_in = StandIn::new(&emit(0));
            let mut source = stand_in.open(30);
            let classifier = StubClassifier::returning(&[0.7]);

            let result = classify_source(
                source.as_mut(),
                &classifier,
                &PipelineOptions::default(),
                Instant::now(),
            );
            match result {
                Err(InferenceError::UnreadableMedia(msg)) => assert_eq!(msg, "No frames extracted"),
                other => panic!("expected UnreadableMedia, got {:?}", other),
            }
        }

        #[test]
        fn test_decodes_first_video_stream_with_cap() {
            let _guard = lock();
            let stand_in = StandIn::new(&emit(FRAME_BYTES));
            let mut source = stand_in.open(7);
            source.next_frame().unwrap();
            drop(source);

            let args = stand_in.recorded_args();
            assert!(args.contains("-map 0:v:0"), "args: {}", args);
            assert!(args.contains("-frames:v 7"), "args: {}", args);
            assert!(args.contains("-pix_fmt rgb24"), "args: {}", args);
        }

        #[test]
        fn test_drop_kills_running_decoder() {
            let _guard = lock();
            let stand_in = StandIn::new(&format!("{}\nexec sleep 30", emit(FRAME_BYTES)));
            let mut source = stand_in.open(30);
            assert!(source.next_frame().unwrap().is_some());

            let started = Instant::now();
            drop(source);
            assert!(started.elapsed() < Duration::from_secs(10));
        }
    }
}
