use std::{
    fmt,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::mpsc::Sender,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Result};
use image::{codecs::jpeg::JpegEncoder, ColorType, DynamicImage, RgbaImage};
use log::warn;

#[cfg(target_os = "android")]
use self::camera2::Camera2Source;
#[cfg(not(target_os = "android"))]
use self::desktop::KameraSource;
pub use self::viewfinder::{FrameResult, FrameSource, Pump, StartError, Viewfinder, WARMUP_FRAMES};

#[cfg(target_os = "android")]
mod camera2;

#[cfg(not(target_os = "android"))]
mod desktop;

mod frame;
mod viewfinder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facing {
    Front,
    Back,
}

impl Facing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Back => "back",
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    pub media_kind: MediaKind,
    pub facing: Facing,
    /// jpeg quality, 1..=100
    pub quality: u8,
    pub save_to_photos: bool,
}

impl LaunchOptions {
    pub fn photo(facing: Facing, quality: u8) -> Self {
        Self {
            media_kind: MediaKind::Photo,
            facing,
            quality: quality.clamp(1, 100),
            save_to_photos: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    CameraUnavailable,
    Permission,
    Others,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CameraUnavailable => "camera_unavailable",
            ErrorCode::Permission => "permission",
            ErrorCode::Others => "others",
        }
    }
}

/// One captured item handed back by a launcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Asset {
    pub uri: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_size: Option<u64>,
}

impl Asset {
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }
}

/// Raw answer of a launcher. Several fields may be set at once, the
/// controller decides which one wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchResponse {
    pub did_cancel: bool,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub assets: Option<Vec<Asset>>,
}

impl LaunchResponse {
    pub fn cancelled() -> Self {
        Self {
            did_cancel: true,
            ..Default::default()
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn assets(assets: Vec<Asset>) -> Self {
        Self {
            assets: Some(assets),
            ..Default::default()
        }
    }
}

pub type LaunchCallback = Box<dyn FnOnce(LaunchResponse) + Send + 'static>;

/// Opens a camera and reports exactly one response through `callback`.
/// The callback may run on any thread.
pub trait CameraLauncher {
    fn launch(&self, options: &LaunchOptions, callback: LaunchCallback);
}

/// Frame source backing the current target.
pub struct Camera {
    #[cfg(target_os = "android")]
    inner: Camera2Source,
    #[cfg(not(target_os = "android"))]
    inner: KameraSource,
}

impl Camera {
    pub fn new(#[cfg(target_os = "android")] app: slint::android::AndroidApp) -> Self {
        Camera {
            #[cfg(target_os = "android")]
            inner: Camera2Source::new(app),
            #[cfg(not(target_os = "android"))]
            inner: KameraSource::new(),
        }
    }

    /// Where captured photos are written.
    pub fn photo_dir(&self) -> Result<PathBuf> {
        #[cfg(target_os = "android")]
        return self.inner.photo_dir();
        #[cfg(not(target_os = "android"))]
        Ok(std::env::temp_dir().join("slint_camera_capture"))
    }
}

impl FrameSource for Camera {
    fn start(&mut self, facing: Facing, frames: Sender<FrameResult>) -> Result<(), StartError> {
        self.inner.start(facing, frames)
    }

    fn stop(&mut self) {
        self.inner.stop()
    }
}

fn photo_path(dir: &Path) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    dir.join(format!("photo_{millis}.jpg"))
}

fn is_photo_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("photo_") && n.ends_with(".jpg"))
        .unwrap_or(false)
}

/// Encodes `image` as jpeg. The writer is flushed so a short write is an error.
pub fn encode_jpeg<W: Write>(image: &RgbaImage, writer: W, quality: u8) -> Result<()> {
    let (width, height) = image.dimensions();
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut writer = BufWriter::new(writer);
    JpegEncoder::new_with_quality(&mut writer, quality).encode(
        rgb.as_raw(),
        width,
        height,
        ColorType::Rgb8,
    )?;
    writer.flush()?;
    Ok(())
}

/// Captured photos on disk. Only the one on screen is kept.
pub struct PhotoStore {
    dir: PathBuf,
    current: Option<PathBuf>,
}

impl PhotoStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, current: None }
    }

    /// Removes photos left behind by earlier runs.
    pub fn clear(&mut self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if is_photo_file(&path) {
                std::fs::remove_file(&path)?;
            }
        }
        self.current = None;
        Ok(())
    }

    /// Writes `image` as a jpeg and deletes the photo it replaces.
    pub fn save(&mut self, image: &RgbaImage, quality: u8) -> Result<Asset> {
        std::fs::create_dir_all(&self.dir)?;
        let path = photo_path(&self.dir);
        encode_jpeg(image, File::create(&path)?, quality)?;

        let (width, height) = image.dimensions();
        let file_size = std::fs::metadata(&path).ok().map(|m| m.len());
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("photo path is not utf-8: {:?}", path))?;
        let asset = Asset {
            uri: format!("file://{path_str}"),
            file_name,
            mime_type: Some("image/jpeg".into()),
            width: Some(width),
            height: Some(height),
            file_size,
        };

        if let Some(previous) = self.current.replace(path.clone()) {
            if previous != path {
                if let Err(err) = std::fs::remove_file(&previous) {
                    warn!("failed to remove {:?}: {err}", previous);
                }
            }
        }
        Ok(asset)
    }
}
