use std::{
    sync::{mpsc::Sender, Arc, Mutex},
    thread::JoinHandle,
    time::Duration,
};

use image::RgbaImage;
use kamera::Camera as KCamera;
use log::{info, warn};

use super::{Facing, FrameResult, FrameSource, StartError};

/// Desktop preview: streams a webcam on a worker thread.
pub struct KameraSource {
    running: Option<Arc<Mutex<bool>>>,
    task: Option<JoinHandle<()>>,
}

impl KameraSource {
    pub fn new() -> Self {
        Self {
            running: None,
            task: None,
        }
    }

    fn device_indices(facing: Facing) -> &'static [usize] {
        // laptops usually expose the user-facing webcam first
        match facing {
            Facing::Front => &[0],
            Facing::Back => &[1, 0],
        }
    }

    fn stream(facing: Facing, running: Arc<Mutex<bool>>, frames: Sender<FrameResult>) {
        let Some(camera) = Self::device_indices(facing)
            .iter()
            .find_map(|index| KCamera::new_device(*index))
        else {
            let _ = frames.send(Err("camera id not exist".to_string()));
            return;
        };
        camera.start();
        info!("{facing} preview started");

        let mut rgba_buffer = vec![];
        loop {
            if let Ok(running) = running.lock() {
                if !*running {
                    break;
                }
            }

            let frame = match camera.wait_for_frame() {
                Some(f) => f,
                None => {
                    warn!("no frame from {facing} camera, retrying");
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
            };

            let (width, height) = frame.size_u32();
            let pixels = (width * height) as usize;
            if rgba_buffer.len() != pixels * 4 {
                rgba_buffer = vec![0; pixels * 4];
            }
            let frame_data = frame.data();
            let data_u8 = frame_data.data_u8();
            for (idx, bgra) in data_u8.chunks(4).take(pixels).enumerate() {
                rgba_buffer[idx * 4] = bgra[2];
                rgba_buffer[idx * 4 + 1] = bgra[1];
                rgba_buffer[idx * 4 + 2] = bgra[0];
                rgba_buffer[idx * 4 + 3] = 255;
            }
            let Some(image) = RgbaImage::from_raw(width, height, rgba_buffer.clone()) else {
                continue;
            };
            if frames.send(Ok(image)).is_err() {
                break;
            }
        }
        camera.stop();
        info!("{facing} preview stopped");
    }
}

impl FrameSource for KameraSource {
    fn start(&mut self, facing: Facing, frames: Sender<FrameResult>) -> Result<(), StartError> {
        self.stop();
        let running = Arc::new(Mutex::new(true));
        self.running = Some(running.clone());
        let task = std::thread::Builder::new()
            .name("camera-preview".into())
            .spawn(move || Self::stream(facing, running, frames))
            .map_err(|err| StartError::Unavailable(err.into()))?;
        self.task = Some(task);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            if let Ok(mut running) = running.lock() {
                *running = false;
            }
        }
        if let Some(task) = self.task.take() {
            if task.join().is_err() {
                warn!("camera preview thread panicked");
            }
        }
    }
}

impl Drop for KameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}
