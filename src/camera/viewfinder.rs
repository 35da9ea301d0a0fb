//! Live preview shown while a launch is open. Frames arrive over a channel
//! from a [`FrameSource`]; the shutter keeps the newest one.

use std::sync::mpsc::{Receiver, Sender, TryRecvError};

use image::RgbaImage;
use log::{debug, error, info};
use thiserror::Error;

use super::{ErrorCode, Facing, LaunchCallback, LaunchResponse, PhotoStore};

/// Frames dropped before the shutter is enabled, while auto exposure settles.
pub const WARMUP_FRAMES: usize = 5;

pub type FrameResult = Result<RgbaImage, String>;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("Camera permission not granted")]
    Permission,
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

impl StartError {
    pub fn into_response(self) -> LaunchResponse {
        match self {
            StartError::Permission => {
                LaunchResponse::error(ErrorCode::Permission, StartError::Permission.to_string())
            }
            StartError::Unavailable(err) => {
                LaunchResponse::error(ErrorCode::CameraUnavailable, err.to_string())
            }
        }
    }
}

/// A camera that streams oriented RGBA frames until stopped.
pub trait FrameSource {
    fn start(&mut self, facing: Facing, frames: Sender<FrameResult>) -> Result<(), StartError>;
    fn stop(&mut self);
}

/// Outcome of draining the frame channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    Idle,
    Frame,
    Closed,
}

/// One open launch. The callback is answered exactly once: by the shutter,
/// by a cancel, by a stream failure, or by drop.
pub struct Viewfinder {
    callback: Option<LaunchCallback>,
    quality: u8,
    latest: Option<RgbaImage>,
    frames_seen: usize,
}

impl Viewfinder {
    pub fn new(callback: LaunchCallback, quality: u8) -> Self {
        Self {
            callback: Some(callback),
            quality,
            latest: None,
            frames_seen: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.callback.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.latest.is_some() && self.frames_seen >= WARMUP_FRAMES
    }

    pub fn latest(&self) -> Option<&RgbaImage> {
        self.latest.as_ref()
    }

    pub fn pump(&mut self, frames: &Receiver<FrameResult>) -> Pump {
        if !self.is_open() {
            return Pump::Closed;
        }
        let mut fresh = false;
        loop {
            match frames.try_recv() {
                Ok(Ok(image)) => {
                    self.latest = Some(image);
                    self.frames_seen += 1;
                    fresh = true;
                }
                Ok(Err(message)) => {
                    error!("camera stream failed: {message}");
                    self.fail(ErrorCode::Others, message);
                    return Pump::Closed;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.fail(ErrorCode::CameraUnavailable, "camera stopped");
                    return Pump::Closed;
                }
            }
        }
        if fresh {
            Pump::Frame
        } else {
            Pump::Idle
        }
    }

    /// Saves the newest frame and answers with it. Returns false, leaving the
    /// launch open, while the camera is still warming up.
    pub fn shutter(&mut self, store: &mut PhotoStore) -> bool {
        if !self.is_open() || !self.is_ready() {
            debug!("shutter ignored, {} frames seen", self.frames_seen);
            return false;
        }
        let response = {
            let Some(image) = self.latest.as_ref() else {
                return false;
            };
            match store.save(image, self.quality) {
                Ok(asset) => {
                    info!("photo saved: {}", asset.uri);
                    LaunchResponse::assets(vec![asset])
                }
                Err(err) => {
                    error!("failed to save photo: {err:?}");
                    LaunchResponse::error(ErrorCode::Others, err.to_string())
                }
            }
        };
        self.answer(response);
        true
    }

    pub fn cancel(&mut self) {
        self.answer(LaunchResponse::cancelled());
    }

    pub fn fail(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.answer(LaunchResponse::error(code, message));
    }

    fn answer(&mut self, response: LaunchResponse) {
        if let Some(callback) = self.callback.take() {
            callback(response);
        }
    }
}

impl Drop for Viewfinder {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::{mpsc::channel, Arc, Mutex},
    };

    use super::*;

    type Answers = Arc<Mutex<Vec<LaunchResponse>>>;

    fn recording() -> (Answers, LaunchCallback) {
        let answers: Answers = Arc::default();
        let sink = answers.clone();
        let callback: LaunchCallback = Box::new(move |response| {
            sink.lock().unwrap().push(response);
        });
        (answers, callback)
    }

    fn frame() -> FrameResult {
        Ok(RgbaImage::from_pixel(4, 4, image::Rgba([200, 10, 10, 255])))
    }

    fn scratch_store(name: &str) -> (PathBuf, PhotoStore) {
        let dir = std::env::temp_dir().join(format!(
            "viewfinder_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        (dir.clone(), PhotoStore::new(dir))
    }

    #[test]
    fn test_cancel_answers_cancelled() {
        let (answers, callback) = recording();
        let mut viewfinder = Viewfinder::new(callback, 90);
        viewfinder.cancel();

        assert!(!viewfinder.is_open());
        assert_eq!(*answers.lock().unwrap(), vec![LaunchResponse::cancelled()]);
    }

    #[test]
    fn test_shutter_waits_for_warmup() {
        let (answers, callback) = recording();
        let (dir, mut store) = scratch_store("warmup");
        let (sender, receiver) = channel();
        let mut viewfinder = Viewfinder::new(callback, 90);

        for _ in 0..WARMUP_FRAMES - 1 {
            sender.send(frame()).unwrap();
        }
        assert_eq!(viewfinder.pump(&receiver), Pump::Frame);
        assert!(!viewfinder.is_ready());
        assert!(!viewfinder.shutter(&mut store));
        assert!(viewfinder.is_open());
        assert!(answers.lock().unwrap().is_empty());

        assert_eq!(viewfinder.pump(&receiver), Pump::Idle);
        sender.send(frame()).unwrap();
        assert_eq!(viewfinder.pump(&receiver), Pump::Frame);
        assert!(viewfinder.is_ready());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_shutter_saves_latest_frame() {
        let (answers, callback) = recording();
        let (dir, mut store) = scratch_store("shutter");
        let (sender, receiver) = channel();
        let mut viewfinder = Viewfinder::new(callback, 90);

        for _ in 0..WARMUP_FRAMES {
            sender.send(frame()).unwrap();
        }
        sender
            .send(Ok(RgbaImage::from_pixel(6, 2, image::Rgba([0, 0, 0, 255]))))
            .unwrap();
        viewfinder.pump(&receiver);
        assert!(viewfinder.shutter(&mut store));
        assert!(!viewfinder.is_open());

        let answers = answers.lock().unwrap();
        assert_eq!(answers.len(), 1);
        let assets = answers[0].assets.as_ref().unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].width, Some(6));
        assert_eq!(assets[0].height, Some(2));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_stream_error_fails_launch() {
        let (answers, callback) = recording();
        let (sender, receiver) = channel();
        let mut viewfinder = Viewfinder::new(callback, 90);

        sender.send(frame()).unwrap();
        sender.send(Err("sensor lost".to_string())).unwrap();
        assert_eq!(viewfinder.pump(&receiver), Pump::Closed);

        let answers = answers.lock().unwrap();
        assert_eq!(
            *answers,
            vec![LaunchResponse::error(ErrorCode::Others, "sensor lost")]
        );
    }

    #[test]
    fn test_disconnect_reports_unavailable() {
        let (answers, callback) = recording();
        let (sender, receiver) = channel::<FrameResult>();
        let mut viewfinder = Viewfinder::new(callback, 90);
        drop(sender);

        assert_eq!(viewfinder.pump(&receiver), Pump::Closed);
        assert_eq!(
            answers.lock().unwrap()[0].error_code,
            Some(ErrorCode::CameraUnavailable)
        );
    }

    #[test]
    fn test_answers_once() {
        let (answers, callback) = recording();
        let (_sender, receiver) = channel::<FrameResult>();
        let mut viewfinder = Viewfinder::new(callback, 90);

        viewfinder.cancel();
        viewfinder.fail(ErrorCode::Others, "late");
        assert_eq!(viewfinder.pump(&receiver), Pump::Closed);
        drop(viewfinder);

        assert_eq!(*answers.lock().unwrap(), vec![LaunchResponse::cancelled()]);
    }

    #[test]
    fn test_drop_cancels_open_launch() {
        let (answers, callback) = recording();
        drop(Viewfinder::new(callback, 90));
        assert_eq!(*answers.lock().unwrap(), vec![LaunchResponse::cancelled()]);
    }

    #[test]
    fn test_start_error_responses() {
        let response = StartError::Permission.into_response();
        assert_eq!(response.error_code, Some(ErrorCode::Permission));
        assert_eq!(
            response.error_message.as_deref(),
            Some("Camera permission not granted")
        );

        let response = StartError::from(anyhow::anyhow!("No front camera detected.")).into_response();
        assert_eq!(response.error_code, Some(ErrorCode::CameraUnavailable));
        assert_eq!(
            response.error_message.as_deref(),
            Some("No front camera detected.")
        );
    }
}
