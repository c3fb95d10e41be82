//! Batch annotation of uploaded images and videos (`POST /detect`)
//!
//! Images are decoded in memory, annotated once and returned as JPEG.
//! Videos are spooled to a temporary directory, inspected for their size
//! and frame rate, decoded at that geometry, annotated frame by frame with the
//! FPS overlay and re-encoded to H.264 MP4 by an ffmpeg process fed raw
//! frames on stdin. The output clip keeps the upload's size and rate.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

use crate::annotate::{AnnotationQueue, FpsCounter};
use crate::error::BatchError;
use crate::media::overlay::{self, OverlayStyle};
use crate::media::{Frame, ImageEncoder, PixelFormat};
use crate::source::{CaptureGeometry, FileSource, FrameSource, ReaderOpener};

/// Upload extensions treated as video
pub const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "avi", "mkv", "webm"];

/// Name of the annotated video in the response
pub const OUTPUT_FILENAME: &str = "annotated.mp4";

/// How an upload is processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Image,
    Video,
}

impl UploadKind {
    /// Classify an upload; anything declared as an image or without a video
    /// extension is an image
    pub fn classify(filename: &str, content_type: Option<&str>) -> Self {
        if content_type.is_some_and(|ct| ct.starts_with("image/")) {
            return UploadKind::Image;
        }
        match extension(filename) {
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => UploadKind::Video,
            _ => UploadKind::Image,
        }
    }
}

fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Sink for an encoded output clip
#[async_trait]
pub trait ClipWriter: Send {
    async fn write(&mut self, frame: &Frame) -> Result<(), BatchError>;

    /// Flush and wait for the output file to be complete
    async fn finish(self: Box<Self>) -> Result<(), BatchError>;
}

/// Starts clip writers
#[async_trait]
pub trait ClipEncoder: Send + Sync {
    async fn start(
        &self,
        width: u32,
        height: u32,
        fps: u32,
        output: &Path,
    ) -> Result<Box<dyn ClipWriter>, BatchError>;
}

/// Build the ffmpeg command that encodes raw rgb24 frames from stdin
pub fn encode_command(ffmpeg: &Path, width: u32, height: u32, fps: u32, output: &Path) -> Command {
    let mut cmd = Command::new(ffmpeg);
    cmd.arg("-y")
        .arg("-nostdin")
        .arg("-v")
        .arg("error")
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg("rgb24")
        .arg("-s")
        .arg(format!("{}x{}", width, height))
        .arg("-r")
        .arg(fps.to_string())
        .arg("-i")
        .arg("-")
        .arg("-c:v")
        .arg("libx264")
        .arg("-profile:v")
        .arg("baseline")
        .arg("-preset")
        .arg("veryfast")
        .arg("-pix_fmt")
        .arg("yuv420p")
        .arg("-movflags")
        .arg("+faststart")
        .arg(output);
    cmd
}

/// H.264 MP4 output through an ffmpeg subprocess
#[derive(Debug, Clone)]
pub struct FfmpegClipEncoder {
    ffmpeg: PathBuf,
}

impl FfmpegClipEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

#[async_trait]
impl ClipEncoder for FfmpegClipEncoder {
    async fn start(
        &self,
        width: u32,
        height: u32,
        fps: u32,
        output: &Path,
    ) -> Result<Box<dyn ClipWriter>, BatchError> {
        let mut child = encode_command(&self.ffmpeg, width, height, fps, output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BatchError::Encode("encoder stdin unavailable".to_string()))?;

        Ok(Box::new(FfmpegClipWriter {
            child,
            stdin: Some(stdin),
        }))
    }
}

struct FfmpegClipWriter {
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl ClipWriter for FfmpegClipWriter {
    async fn write(&mut self, frame: &Frame) -> Result<(), BatchError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| BatchError::Encode("encoder already finished".to_string()))?;
        stdin.write_all(&frame.to_rgb()).await?;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<(), BatchError> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
        }
        let status = self.child.wait().await?;
        if !status.success() {
            return Err(BatchError::Encode(format!("ffmpeg exited with {}", status)));
        }
        Ok(())
    }
}

/// Finds the size and frame rate of an uploaded clip
#[async_trait]
pub trait ClipInspector: Send + Sync {
    async fn inspect(&self, path: &Path) -> Result<CaptureGeometry, BatchError>;
}

/// Build the ffprobe command that reports the first video stream as JSON
pub fn stream_info_command(ffprobe: &Path, path: &Path) -> Command {
    let mut cmd = Command::new(ffprobe);
    cmd.arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,avg_frame_rate,r_frame_rate")
        .arg("-of")
        .arg("json")
        .arg(path);
    cmd
}

#[derive(Debug, Deserialize)]
struct StreamReport {
    #[serde(default)]
    streams: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize)]
struct StreamEntry {
    width: u32,
    height: u32,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
}

/// Parse ffprobe's JSON into a geometry; the rate is rounded to whole frames
pub fn parse_stream_info(json: &[u8]) -> Result<CaptureGeometry, BatchError> {
    let output: StreamReport =
        serde_json::from_slice(json).map_err(|e| BatchError::Decode(format!("stream info: {}", e)))?;
    let stream = output
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| BatchError::Decode("no video stream".to_string()))?;
    if stream.width == 0 || stream.height == 0 {
        return Err(BatchError::Decode("video stream has no size".to_string()));
    }

    let fps = [stream.avg_frame_rate, stream.r_frame_rate]
        .iter()
        .flatten()
        .find_map(|rate| frame_rate(rate))
        .ok_or_else(|| BatchError::Decode("video stream has no frame rate".to_string()))?;

    Ok(CaptureGeometry {
        width: stream.width,
        height: stream.height,
        fps: (fps.round() as u32).max(1),
    })
}

/// `"30000/1001"` or `"25"`; `"0/0"` is unknown
fn frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Reads clip geometry with an ffprobe subprocess
#[derive(Debug, Clone)]
pub struct FfprobeInspector {
    ffprobe: PathBuf,
}

impl FfprobeInspector {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }
}

#[async_trait]
impl ClipInspector for FfprobeInspector {
    async fn inspect(&self, path: &Path) -> Result<CaptureGeometry, BatchError> {
        let output = stream_info_command(&self.ffprobe, path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(BatchError::Decode(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_stream_info(&output.stdout)
    }
}

/// Runs uploads through the annotator
pub struct BatchAnnotator {
    queue: AnnotationQueue,
    overlay: OverlayStyle,
    opener: Arc<dyn ReaderOpener>,
    clips: Arc<dyn ClipEncoder>,
    inspector: Option<Arc<dyn ClipInspector>>,
    encoder: ImageEncoder,
    fps: u32,
}

impl BatchAnnotator {
    pub fn new(
        queue: AnnotationQueue,
        opener: Arc<dyn ReaderOpener>,
        clips: Arc<dyn ClipEncoder>,
        fps: u32,
    ) -> Self {
        Self {
            queue,
            overlay: OverlayStyle::default(),
            opener,
            clips,
            inspector: None,
            encoder: ImageEncoder::default(),
            fps: fps.max(1),
        }
    }

    /// Read videos at the size and rate `inspector` reports
    ///
    /// Without an inspector, videos are decoded at the capture geometry.
    pub fn inspector(mut self, inspector: Arc<dyn ClipInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Encoder for annotated images
    pub fn image_encoder(mut self, encoder: ImageEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    /// Annotate one image, returning JPEG
    pub async fn annotate_image(&self, data: Bytes) -> Result<Bytes, BatchError> {
        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&data))
            .await
            .map_err(|e| BatchError::Decode(e.to_string()))?
            .map_err(|e| BatchError::Decode(e.to_string()))?
            .to_rgb8();

        let (width, height) = decoded.dimensions();
        let frame = Frame::new(
            Bytes::from(decoded.into_raw()),
            width,
            height,
            PixelFormat::Rgb24,
            0,
            Duration::ZERO,
        )?;

        let annotated = self.queue.annotate(frame).await?;
        let encoded = self
            .encoder
            .encode_blocking(&annotated)
            .await
            .map_err(|e| BatchError::Encode(e.to_string()))?;

        tracing::debug!(width, height, bytes = encoded.len(), "Image annotated");
        Ok(encoded)
    }

    /// Annotate every frame of a video, returning H.264 MP4
    pub async fn annotate_video(&self, data: Bytes, filename: &str) -> Result<Bytes, BatchError> {
        let spool = tempfile::Builder::new().prefix("framecast-").tempdir()?;
        let ext = extension(filename).unwrap_or_else(|| "mp4".to_string());
        let input = spool.path().join(format!("input.{}", ext));
        let output = spool.path().join(OUTPUT_FILENAME);
        tokio::fs::write(&input, &data).await?;

        let (reader, fps) = match &self.inspector {
            Some(inspector) => {
                let native = inspector.inspect(&input).await?;
                tracing::debug!(
                    upload = %filename,
                    width = native.width,
                    height = native.height,
                    fps = native.fps,
                    "Upload inspected"
                );
                (self.opener.clip(&input, native), native.fps)
            }
            None => (self.opener.file(&input), self.fps),
        };

        let mut source = FileSource::new(reader, false, false, fps);
        source.open().await?;
        let result = self.transcode(&mut source, fps, &output).await;
        source.close().await;
        let frames = result?;

        let encoded = tokio::fs::read(&output).await?;
        tracing::info!(
            upload = %filename,
            frames = frames,
            bytes = encoded.len(),
            "Video annotated"
        );
        Ok(Bytes::from(encoded))
    }

    async fn transcode(&self, source: &mut FileSource, fps_out: u32, output: &Path) -> Result<u64, BatchError> {
        let mut fps = FpsCounter::new();
        let mut writer: Option<Box<dyn ClipWriter>> = None;
        let mut frames: u64 = 0;

        while let Some(frame) = source.next_frame().await? {
            let annotated = self.queue.annotate(frame).await?;
            let frame = overlay::draw_fps(&annotated, fps.tick(), &self.overlay);

            // The output size is only known once the first frame is decoded
            if writer.is_none() {
                let clip = self
                    .clips
                    .start(frame.width, frame.height, fps_out, output)
                    .await?;
                writer = Some(clip);
            }
            if let Some(clip) = writer.as_mut() {
                clip.write(&frame).await?;
                frames += 1;
            }
        }

        writer.ok_or(BatchError::Empty)?.finish().await?;
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use parking_lot::Mutex;

    use super::*;
    use crate::annotate::Passthrough;
    use crate::source::testing::{ScriptedFactory, Step};
    use crate::source::{DeviceSpec, ReaderFactory};

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into())
            .collect()
    }

    /// Files hold `frames` images
    #[derive(Default)]
    struct Clip {
        frames: usize,
        native: Mutex<Vec<CaptureGeometry>>,
    }

    impl ReaderOpener for Clip {
        fn file(&self, _path: &Path) -> Arc<dyn ReaderFactory> {
            Arc::new(ScriptedFactory::repeating(vec![Step::Image(3); self.frames], 1))
        }

        fn device(&self, _device: &DeviceSpec) -> Arc<dyn ReaderFactory> {
            Arc::new(ScriptedFactory::new(vec![]))
        }

        fn clip(&self, path: &Path, native: CaptureGeometry) -> Arc<dyn ReaderFactory> {
            self.native.lock().push(native);
            self.file(path)
        }
    }

    struct FixedInspector(CaptureGeometry);

    #[async_trait]
    impl ClipInspector for FixedInspector {
        async fn inspect(&self, _path: &Path) -> Result<CaptureGeometry, BatchError> {
            Ok(self.0)
        }
    }

    /// Writes the first byte of every frame to the output file
    #[derive(Default)]
    struct Bytewise {
        started: Mutex<Vec<(u32, u32, u32)>>,
    }

    struct BytewiseWriter {
        output: PathBuf,
        written: Vec<u8>,
    }

    #[async_trait]
    impl ClipWriter for BytewiseWriter {
        async fn write(&mut self, frame: &Frame) -> Result<(), BatchError> {
            self.written.push(frame.data[frame.data.len() - 1]);
            Ok(())
        }

        async fn finish(self: Box<Self>) -> Result<(), BatchError> {
            tokio::fs::write(&self.output, &self.written).await?;
            Ok(())
        }
    }

    #[async_trait]
    impl ClipEncoder for Bytewise {
        async fn start(
            &self,
            width: u32,
            height: u32,
            fps: u32,
            output: &Path,
        ) -> Result<Box<dyn ClipWriter>, BatchError> {
            self.started.lock().push((width, height, fps));
            Ok(Box::new(BytewiseWriter {
                output: output.to_path_buf(),
                written: Vec::new(),
            }))
        }
    }

    fn annotator(frames: usize, clips: Arc<Bytewise>) -> BatchAnnotator {
        let queue = AnnotationQueue::start(Arc::new(Passthrough), 1, 2).unwrap();
        let opener = Arc::new(Clip {
            frames,
            ..Default::default()
        });
        BatchAnnotator::new(queue, opener, clips, 25)
    }

    #[test]
    fn test_classify_uploads() {
        assert_eq!(UploadKind::classify("clip.MP4", None), UploadKind::Video);
        assert_eq!(UploadKind::classify("clip.webm", Some("video/webm")), UploadKind::Video);
        assert_eq!(UploadKind::classify("photo.png", None), UploadKind::Image);
        assert_eq!(UploadKind::classify("noext", None), UploadKind::Image);
        // Declared images win over the extension
        assert_eq!(UploadKind::classify("odd.mov", Some("image/jpeg")), UploadKind::Image);
    }

    #[test]
    fn test_encode_command() {
        let cmd = encode_command(Path::new("ffmpeg"), 640, 480, 25, Path::new("/tmp/out.mp4"));
        let args = args(&cmd);

        assert!(args.windows(2).any(|w| w == ["-s", "640x480"]));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-profile:v", "baseline"]));
        assert!(args.windows(2).any(|w| w == ["-movflags", "+faststart"]));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
    }

    #[tokio::test]
    async fn test_annotate_image_returns_jpeg() {
        let mut png = Vec::new();
        image::RgbImage::from_pixel(20, 10, image::Rgb([10, 20, 30]))
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let annotator = annotator(0, Arc::new(Bytewise::default()));
        let jpeg = annotator.annotate_image(Bytes::from(png)).await.unwrap();

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!((decoded.width(), decoded.height()), (20, 10));
    }

    #[tokio::test]
    async fn test_undecodable_image() {
        let annotator = annotator(0, Arc::new(Bytewise::default()));
        let result = annotator.annotate_image(Bytes::from_static(b"not an image")).await;
        assert!(matches!(result, Err(BatchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_annotate_video_writes_every_frame() {
        let clips = Arc::new(Bytewise::default());
        let annotator = annotator(7, Arc::clone(&clips));

        let out = annotator
            .annotate_video(Bytes::from_static(b"container"), "clip.mp4")
            .await
            .unwrap();

        assert_eq!(out.len(), 7);
        assert_eq!(clips.started.lock().as_slice(), &[(2, 2, 25)]);
    }

    #[tokio::test]
    async fn test_video_keeps_native_rate() {
        let native = CaptureGeometry {
            width: 1920,
            height: 1080,
            fps: 60,
        };
        let opener = Arc::new(Clip {
            frames: 4,
            ..Default::default()
        });
        let clips = Arc::new(Bytewise::default());
        let queue = AnnotationQueue::start(Arc::new(Passthrough), 1, 2).unwrap();
        let annotator = BatchAnnotator::new(queue, Arc::clone(&opener) as _, Arc::clone(&clips) as _, 30)
            .inspector(Arc::new(FixedInspector(native)));

        let out = annotator
            .annotate_video(Bytes::from_static(b"container"), "clip.mov")
            .await
            .unwrap();

        assert_eq!(out.len(), 4);
        assert_eq!(opener.native.lock().as_slice(), &[native]);
        // Encoded at the upload's rate, not the capture rate
        assert_eq!(clips.started.lock()[0].2, 60);
    }

    #[test]
    fn test_parse_stream_info() {
        let json = br#"{"streams":[{"width":1920,"height":1080,"avg_frame_rate":"60/1","r_frame_rate":"60/1"}]}"#;
        assert_eq!(
            parse_stream_info(json).unwrap(),
            CaptureGeometry {
                width: 1920,
                height: 1080,
                fps: 60
            }
        );

        // NTSC rate rounds; unknown average falls back to the base rate
        let json = br#"{"streams":[{"width":720,"height":480,"avg_frame_rate":"0/0","r_frame_rate":"30000/1001"}]}"#;
        assert_eq!(parse_stream_info(json).unwrap().fps, 30);

        assert!(matches!(parse_stream_info(br#"{"streams":[]}"#), Err(BatchError::Decode(_))));
        assert!(matches!(parse_stream_info(b"garbage"), Err(BatchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_empty_video() {
        let annotator = annotator(0, Arc::new(Bytewise::default()));
        let result = annotator
            .annotate_video(Bytes::from_static(b"container"), "clip.mp4")
            .await;
        assert!(matches!(result, Err(BatchError::Empty)));
    }
}
