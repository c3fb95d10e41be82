//! Subprocess frame readers
//!
//! Files and cameras are decoded by an external process that writes packed
//! `rgb24` frames of a fixed size to stdout:
//!
//! - files and V4L2 devices: `ffmpeg ... -f rawvideo -pix_fmt rgb24 -`
//! - pipeline descriptors: `gst-launch-1.0 -q <pipeline> ! ... ! fdsink fd=1`
//!
//! Scaling happens in the subprocess, so every frame read here has exactly
//! the configured geometry. Uploaded clips are the exception: they are read
//! at the size and rate ffprobe reports for the file.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};

use super::{DeviceSpec, FrameReader, RawImage, ReaderFactory};
use crate::error::SourceError;
use crate::media::PixelFormat;

/// Output size and rate of capture processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureGeometry {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureGeometry {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

impl CaptureGeometry {
    /// Bytes per raw frame
    pub fn frame_size(&self) -> usize {
        PixelFormat::Rgb24.frame_size(self.width, self.height)
    }
}

/// Paths of the external decoder binaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Binaries {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub gst_launch: PathBuf,
}

impl Default for Binaries {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            gst_launch: PathBuf::from("gst-launch-1.0"),
        }
    }
}

/// Build the ffmpeg command that decodes a file to raw frames
pub fn file_command(ffmpeg: &Path, path: &Path, geometry: &CaptureGeometry) -> Command {
    let mut cmd = Command::new(ffmpeg);
    cmd.arg("-nostdin").arg("-v").arg("error");
    cmd.arg("-i").arg(path);
    raw_output_args(&mut cmd, geometry, true);
    cmd
}

/// Build the ffmpeg command that decodes a file without scaling or resampling
pub fn clip_command(ffmpeg: &Path, path: &Path) -> Command {
    let mut cmd = Command::new(ffmpeg);
    cmd.arg("-nostdin").arg("-v").arg("error");
    cmd.arg("-i").arg(path);
    cmd.arg("-vsync").arg("passthrough");
    cmd.arg("-f").arg("rawvideo");
    cmd.arg("-pix_fmt").arg("rgb24");
    cmd.arg("-");
    cmd
}

/// Build the command that captures a device to raw frames
pub fn device_command(binaries: &Binaries, device: &DeviceSpec, geometry: &CaptureGeometry) -> Command {
    match device {
        DeviceSpec::Index(index) => {
            let mut cmd = Command::new(&binaries.ffmpeg);
            cmd.arg("-nostdin").arg("-v").arg("error");
            cmd.arg("-f").arg("v4l2");
            cmd.arg("-framerate").arg(geometry.fps.to_string());
            cmd.arg("-video_size")
                .arg(format!("{}x{}", geometry.width, geometry.height));
            cmd.arg("-i").arg(format!("/dev/video{}", index));
            raw_output_args(&mut cmd, geometry, false);
            cmd
        }
        DeviceSpec::Pipeline(pipeline) => {
            let mut cmd = Command::new(&binaries.gst_launch);
            cmd.arg("-q");
            cmd.args(strip_appsink(pipeline).split_whitespace());
            cmd.args(["!", "videoconvert", "!", "videoscale", "!"]);
            cmd.arg(format!(
                "video/x-raw,format=RGB,width={},height={}",
                geometry.width, geometry.height
            ));
            cmd.args(["!", "fdsink", "fd=1"]);
            cmd
        }
    }
}

fn raw_output_args(cmd: &mut Command, geometry: &CaptureGeometry, force_rate: bool) {
    cmd.arg("-vf")
        .arg(format!("scale={}:{}", geometry.width, geometry.height));
    if force_rate {
        cmd.arg("-r").arg(geometry.fps.to_string());
    }
    cmd.arg("-f").arg("rawvideo");
    cmd.arg("-pix_fmt").arg("rgb24");
    cmd.arg("-");
}

/// Drop a trailing `! appsink ...` element so the descriptor can be extended
fn strip_appsink(pipeline: &str) -> &str {
    let trimmed = pipeline.trim();
    match trimmed.rfind('!') {
        Some(pos) if trimmed[pos + 1..].trim_start().starts_with("appsink") => {
            trimmed[..pos].trim_end()
        }
        _ => trimmed,
    }
}

/// What a process reader decodes
#[derive(Debug, Clone)]
enum Input {
    File(PathBuf),
    /// A file read at its own geometry
    Clip(PathBuf),
    Device(DeviceSpec),
}

/// Spawns a capture process per `open`
#[derive(Debug, Clone)]
pub struct ProcessReaderFactory {
    input: Input,
    geometry: CaptureGeometry,
    binaries: Binaries,
}

impl ProcessReaderFactory {
    /// Reader factory for a video file
    pub fn file(path: impl Into<PathBuf>, geometry: CaptureGeometry, binaries: Binaries) -> Self {
        Self {
            input: Input::File(path.into()),
            geometry,
            binaries,
        }
    }

    /// Reader factory for a file whose native geometry is already known
    pub fn clip(path: impl Into<PathBuf>, native: CaptureGeometry, binaries: Binaries) -> Self {
        Self {
            input: Input::Clip(path.into()),
            geometry: native,
            binaries,
        }
    }

    /// Reader factory for a capture device
    pub fn device(device: DeviceSpec, geometry: CaptureGeometry, binaries: Binaries) -> Self {
        Self {
            input: Input::Device(device),
            geometry,
            binaries,
        }
    }

    fn command(&self) -> Command {
        match &self.input {
            Input::File(path) => file_command(&self.binaries.ffmpeg, path, &self.geometry),
            Input::Clip(path) => clip_command(&self.binaries.ffmpeg, path),
            Input::Device(device) => device_command(&self.binaries, device, &self.geometry),
        }
    }
}

#[async_trait]
impl ReaderFactory for ProcessReaderFactory {
    fn label(&self) -> String {
        match &self.input {
            Input::File(path) | Input::Clip(path) => format!("file:{}", path.display()),
            Input::Device(device) => device.to_string(),
        }
    }

    async fn open(&self) -> Result<Box<dyn FrameReader>, SourceError> {
        let label = self.label();

        if let Input::File(path) | Input::Clip(path) = &self.input {
            if tokio::fs::metadata(path).await.is_err() {
                return Err(SourceError::open(label, "file not found"));
            }
        }

        let mut cmd = tokio::process::Command::from(self.command());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SourceError::open(label.clone(), e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::open(label.clone(), "capture process has no stdout"))?;

        tracing::debug!(source = %label, pid = ?child.id(), "Capture process started");

        Ok(Box::new(ProcessReader {
            label,
            child,
            stdout,
            geometry: self.geometry,
        }))
    }
}

/// Reads fixed-size raw frames from a child's stdout
pub struct ProcessReader {
    label: String,
    child: Child,
    stdout: ChildStdout,
    geometry: CaptureGeometry,
}

#[async_trait]
impl FrameReader for ProcessReader {
    async fn read_frame(&mut self) -> Result<Option<RawImage>, SourceError> {
        let mut buf = vec![0u8; self.geometry.frame_size()];
        let mut filled = 0;

        while filled < buf.len() {
            let n = self
                .stdout
                .read(&mut buf[filled..])
                .await
                .map_err(|e| SourceError::read(self.label.clone(), e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < buf.len() {
            return Err(SourceError::read(
                self.label.clone(),
                format!("truncated frame ({} of {} bytes)", filled, buf.len()),
            ));
        }

        Ok(Some(RawImage::rgb(
            buf,
            self.geometry.width,
            self.geometry.height,
        )))
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(source = %self.label, error = %e, "Capture process already gone");
        }
        let _ = self.child.wait().await;
    }
}

/// Picks the reader factory for files and devices
pub trait ReaderOpener: Send + Sync {
    fn file(&self, path: &Path) -> Arc<dyn ReaderFactory>;
    fn device(&self, device: &DeviceSpec) -> Arc<dyn ReaderFactory>;

    /// Reader that keeps a file's `native` size instead of the capture geometry
    fn clip(&self, path: &Path, native: CaptureGeometry) -> Arc<dyn ReaderFactory> {
        let _ = native;
        self.file(path)
    }
}

/// Subprocess readers with a shared geometry
#[derive(Debug, Clone, Default)]
pub struct ProcessReaderOpener {
    pub geometry: CaptureGeometry,
    pub binaries: Binaries,
}

impl ReaderOpener for ProcessReaderOpener {
    fn file(&self, path: &Path) -> Arc<dyn ReaderFactory> {
        Arc::new(ProcessReaderFactory::file(
            path,
            self.geometry,
            self.binaries.clone(),
        ))
    }

    fn device(&self, device: &DeviceSpec) -> Arc<dyn ReaderFactory> {
        Arc::new(ProcessReaderFactory::device(
            device.clone(),
            self.geometry,
            self.binaries.clone(),
        ))
    }

    fn clip(&self, path: &Path, native: CaptureGeometry) -> Arc<dyn ReaderFactory> {
        Arc::new(ProcessReaderFactory::clip(path, native, self.binaries.clone()))
    }
}
