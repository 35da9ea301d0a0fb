use anyhow::{anyhow, Result};
use core::slice;
use image::RgbaImage;
use log::{error, info, warn};
use ndk_sys::{
    acamera_metadata_tag, camera_status_t, media_status_t, ACameraCaptureSession,
    ACameraCaptureSession_close, ACameraCaptureSession_setRepeatingRequest,
    ACameraCaptureSession_stopRepeating,
    ACameraCaptureSession_stateCallbacks, ACameraDevice, ACameraDevice_StateCallbacks,
    ACameraDevice_close, ACameraDevice_createCaptureRequest, ACameraDevice_createCaptureSession,
    ACameraDevice_getId, ACameraDevice_request_template, ACameraManager,
    ACameraManager_create, ACameraManager_delete, ACameraManager_deleteCameraIdList,
    ACameraManager_getCameraCharacteristics, ACameraManager_getCameraIdList,
    ACameraManager_openCamera, ACameraMetadata, ACameraMetadata_const_entry, ACameraMetadata_free,
    ACameraMetadata_getConstEntry, ACameraOutputTarget, ACameraOutputTarget_create,
    ACameraOutputTarget_free, ACaptureRequest, ACaptureRequest_addTarget, ACaptureRequest_free,
    ACaptureSessionOutput, ACaptureSessionOutputContainer, ACaptureSessionOutputContainer_add,
    ACaptureSessionOutputContainer_create, ACaptureSessionOutputContainer_free,
    ACaptureSessionOutput_create, ACaptureSessionOutput_free, AImage, AImageReader,
    AImageReader_ImageListener, AImageReader_acquireLatestImage, AImageReader_delete,
    AImageReader_getWindow, AImageReader_new, AImageReader_setImageListener, AImage_delete,
    AImage_getHeight, AImage_getPlaneData, AImage_getPlanePixelStride, AImage_getPlaneRowStride,
    AImage_getWidth, ANativeWindow, AIMAGE_FORMATS,
};
use std::{
    ffi::{c_int, c_void, CStr, CString},
    mem::zeroed,
    path::PathBuf,
    ptr::null_mut,
    sync::mpsc::Sender,
};

use super::{
    frame::{decode_yuv420sp, orient, YuvPlanes},
    Facing, FrameResult, FrameSource, StartError,
};
use crate::android::{check_self_permission, get_cache_dir};
use crate::config::CAMERA_PERMISSION;

#[link(name = "camera2ndk")]
extern "C" {}

#[link(name = "mediandk")]
extern "C" {}

const LENS_FACING_FRONT: u8 = 0;
const LENS_FACING_BACK: u8 = 1;
/// Largest preview we stream; every frame is decoded on the cpu.
const MAX_PIXELS: i64 = 1280 * 720;

/// Android preview through the camera2 NDK.
pub struct Camera2Source {
    app: slint::android::AndroidApp,
    stream: Option<PreviewStream>,
}

impl Camera2Source {
    pub fn new(app: slint::android::AndroidApp) -> Self {
        Self { app, stream: None }
    }

    pub fn photo_dir(&self) -> Result<PathBuf> {
        let dir = PathBuf::from(get_cache_dir(&self.app)?).join("captures");
        info!("photos go to {:?}", dir);
        Ok(dir)
    }
}

impl FrameSource for Camera2Source {
    fn start(&mut self, facing: Facing, frames: Sender<FrameResult>) -> Result<(), StartError> {
        self.stop();
        match check_self_permission(&self.app, CAMERA_PERMISSION) {
            Ok(true) => {}
            Ok(false) => return Err(StartError::Permission),
            Err(err) => {
                error!("permission check failed: {err:?}");
                return Err(StartError::Permission);
            }
        }
        let stream = PreviewStream::open(facing, frames).map_err(|err| {
            error!("failed to open {facing} camera: {err:?}");
            StartError::Unavailable(err)
        })?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        self.stream.take();
    }
}

/// Boxed so the pointer handed to the NDK listener stays put.
struct FrameSink {
    sender: Sender<FrameResult>,
    image_reader: *mut AImageReader,
    sensor_orientation: i32,
    mirror: bool,
}

impl FrameSink {
    unsafe fn deliver(&self) {
        let frame = acquire_frame(self.image_reader).and_then(|frame| {
            let rgba = decode_yuv420sp(&frame.nv21, frame.width, frame.height);
            RgbaImage::from_raw(frame.width as u32, frame.height as u32, rgba).ok_or_else(|| {
                anyhow!("decoded buffer does not match {}x{}", frame.width, frame.height)
            })
        });
        let frame = match frame {
            Ok(image) => Ok(orient(image, self.sensor_orientation, self.mirror)),
            Err(err) => {
                // a dropped frame is not fatal, the next one replaces it
                warn!("{err}");
                return;
            }
        };
        let _ = self.sender.send(frame);
    }
}

/// A camera device streaming a repeating preview request into an image
/// reader. Every NDK handle is released in `Drop`.
struct PreviewStream {
    camera_manager: *mut ACameraManager,
    camera_device: *mut ACameraDevice,
    capture_request: *mut ACaptureRequest,
    camera_output_target: *mut ACameraOutputTarget,
    session_output: *mut ACaptureSessionOutput,
    capture_session_output_container: *mut ACaptureSessionOutputContainer,
    capture_session: *mut ACameraCaptureSession,
    image_reader: *mut AImageReader,
    image_listener: Box<AImageReader_ImageListener>,
    device_state_callbacks: Box<ACameraDevice_StateCallbacks>,
    capture_session_state_callbacks: Box<ACameraCaptureSession_stateCallbacks>,
    sink: Option<Box<FrameSink>>,
    repeating: bool,
    lens_facing: u8,
    sensor_orientation: i32,
    size: (i32, i32),
}

impl PreviewStream {
    fn open(facing: Facing, frames: Sender<FrameResult>) -> Result<Self> {
        let mut this = PreviewStream {
            camera_manager: null_mut(),
            camera_device: null_mut(),
            capture_request: null_mut(),
            camera_output_target: null_mut(),
            session_output: null_mut(),
            capture_session_output_container: null_mut(),
            capture_session: null_mut(),
            image_reader: null_mut(),
            image_listener: Box::new(AImageReader_ImageListener {
                context: null_mut(),
                onImageAvailable: None,
            }),
            device_state_callbacks: Box::new(unsafe { zeroed() }),
            capture_session_state_callbacks: Box::new(unsafe { zeroed() }),
            sink: None,
            repeating: false,
            lens_facing: 0,
            sensor_orientation: 0,
            size: (0, 0),
        };
        this.open_device(facing)?;
        this.create_image_reader(frames)?;
        this.create_session()?;
        this.start_repeating()?;
        Ok(this)
    }

    fn open_device(&mut self, facing: Facing) -> Result<()> {
        let wanted = match facing {
            Facing::Front => LENS_FACING_FRONT,
            Facing::Back => LENS_FACING_BACK,
        };
        unsafe {
            self.camera_manager = ACameraManager_create();
            let mut camera_id_list_raw = null_mut();
            let camera_status =
                ACameraManager_getCameraIdList(self.camera_manager, &mut camera_id_list_raw);
            if camera_status != camera_status_t::ACAMERA_OK || camera_id_list_raw.is_null() {
                return Err(anyhow!(
                    "Failed to get camera id list (reason: {:?})",
                    camera_status
                ));
            }

            let camera_id_list = &*camera_id_list_raw;
            let camera_ids: Vec<CString> = if camera_id_list.numCameras < 1 {
                vec![]
            } else {
                slice::from_raw_parts(camera_id_list.cameraIds, camera_id_list.numCameras as usize)
                    .iter()
                    .map(|v| CStr::from_ptr(*v).to_owned())
                    .collect()
            };
            ACameraManager_deleteCameraIdList(camera_id_list_raw);
            info!("camera_ids: {:?}", camera_ids);

            let mut selected = None;
            for cid in &camera_ids {
                let mut camera_metadata = null_mut();
                let camera_status = ACameraManager_getCameraCharacteristics(
                    self.camera_manager,
                    cid.as_ptr(),
                    &mut camera_metadata,
                );
                if camera_status != camera_status_t::ACAMERA_OK {
                    warn!("Failed to get camera meta data of {:?}", cid);
                    continue;
                }
                let (lens_facing, sensor_orientation) = get_sensor_orientation(camera_metadata);
                let sizes = if lens_facing == wanted {
                    get_yuv_sizes(camera_metadata)
                } else {
                    Ok(vec![])
                };
                ACameraMetadata_free(camera_metadata);
                let size = pick_preview_size(&sizes?);

                if let Some(size) = size {
                    self.lens_facing = lens_facing;
                    self.sensor_orientation = sensor_orientation;
                    self.size = size;
                    selected = Some(cid);
                    break;
                }
            }

            let camera_id = selected.ok_or_else(|| anyhow!("No {facing} camera detected."))?;
            info!(
                "opening camera {:?} lens_facing={} sensor_orientation={} size={:?}",
                camera_id, self.lens_facing, self.sensor_orientation, self.size
            );

            unsafe extern "C" fn on_disconnected(_data: *mut c_void, device: *mut ACameraDevice) {
                info!("Camera(id: {:?}) is disconnected.", get_cstr(ACameraDevice_getId(device)));
            }

            unsafe extern "C" fn on_error(
                _data: *mut c_void,
                device: *mut ACameraDevice,
                error: c_int,
            ) {
                error!(
                    "Error(code: {}) on Camera(id: {:?}).",
                    error,
                    get_cstr(ACameraDevice_getId(device))
                );
            }

            self.device_state_callbacks.onDisconnected = Some(on_disconnected);
            self.device_state_callbacks.onError = Some(on_error);

            let camera_status = ACameraManager_openCamera(
                self.camera_manager,
                camera_id.as_ptr(),
                &mut *self.device_state_callbacks,
                &mut self.camera_device,
            );
            if camera_status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!(
                    "Failed to open camera device {:?} (reason: {:?})",
                    camera_id,
                    camera_status
                ));
            }
        }
        Ok(())
    }

    fn create_image_reader(&mut self, frames: Sender<FrameResult>) -> Result<()> {
        let (width, height) = self.size;
        unsafe {
            let res = AImageReader_new(
                width,
                height,
                AIMAGE_FORMATS::AIMAGE_FORMAT_YUV_420_888.0 as i32,
                2,
                &mut self.image_reader,
            );
            if res != media_status_t::AMEDIA_OK {
                return Err(anyhow!("create Image Reader error res={:?}.", res));
            }

            unsafe extern "C" fn on_image_available(
                context: *mut c_void,
                _image_reader: *mut AImageReader,
            ) {
                let sink = &*(context as *const FrameSink);
                sink.deliver();
            }

            let mut sink = Box::new(FrameSink {
                sender: frames,
                image_reader: self.image_reader,
                sensor_orientation: self.sensor_orientation,
                mirror: self.lens_facing == LENS_FACING_FRONT,
            });
            self.image_listener.context = (&mut *sink as *mut FrameSink) as *mut c_void;
            self.image_listener.onImageAvailable = Some(on_image_available);
            self.sink = Some(sink);

            let res = AImageReader_setImageListener(self.image_reader, &mut *self.image_listener);
            if res != media_status_t::AMEDIA_OK {
                return Err(anyhow!("set Image Listener error res={:?}.", res));
            }
        }
        Ok(())
    }

    fn create_session(&mut self) -> Result<()> {
        unsafe {
            let camera_status = ACameraDevice_createCaptureRequest(
                self.camera_device,
                ACameraDevice_request_template::TEMPLATE_PREVIEW,
                &mut self.capture_request,
            );
            if camera_status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!(
                    "Failed to create preview capture request (reason: {:?})",
                    camera_status
                ));
            }

            let mut native_window: *mut ANativeWindow = null_mut();
            let res = AImageReader_getWindow(self.image_reader, &mut native_window);
            if res != media_status_t::AMEDIA_OK {
                return Err(anyhow!("AImageReader_getWindow error res={:?}.", res));
            }

            ACameraOutputTarget_create(native_window, &mut self.camera_output_target);
            ACaptureRequest_addTarget(self.capture_request, self.camera_output_target);
            ACaptureSessionOutput_create(native_window, &mut self.session_output);

            let camera_status =
                ACaptureSessionOutputContainer_create(&mut self.capture_session_output_container);
            if camera_status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!(
                    "Failed to create capture session output container (reason: {:?})",
                    camera_status
                ));
            }
            ACaptureSessionOutputContainer_add(
                self.capture_session_output_container,
                self.session_output,
            );

            unsafe extern "C" fn capture_session_on_ready(
                _context: *mut c_void,
                session: *mut ACameraCaptureSession,
            ) {
                info!("Session is ready. {:?}", session);
            }

            unsafe extern "C" fn capture_session_on_active(
                _context: *mut c_void,
                session: *mut ACameraCaptureSession,
            ) {
                info!("Session is activated. {:?}", session);
            }

            unsafe extern "C" fn capture_session_on_closed(
                _context: *mut c_void,
                session: *mut ACameraCaptureSession,
            ) {
                info!("Session is closed. {:?}", session);
            }

            self.capture_session_state_callbacks.onReady = Some(capture_session_on_ready);
            self.capture_session_state_callbacks.onActive = Some(capture_session_on_active);
            self.capture_session_state_callbacks.onClosed = Some(capture_session_on_closed);

            let camera_status = ACameraDevice_createCaptureSession(
                self.camera_device,
                self.capture_session_output_container,
                &*self.capture_session_state_callbacks,
                &mut self.capture_session,
            );
            if camera_status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!(
                    "Failed to create capture session (reason: {:?})",
                    camera_status
                ));
            }
        }
        Ok(())
    }

    /// Auto exposure and focus converge while this runs, so the frame the
    /// shutter keeps is a settled one.
    fn start_repeating(&mut self) -> Result<()> {
        unsafe {
            let camera_status = ACameraCaptureSession_setRepeatingRequest(
                self.capture_session,
                null_mut(),
                1,
                &mut self.capture_request,
                null_mut(),
            );
            if camera_status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!(
                    "Failed to start repeating request (reason: {:?})",
                    camera_status
                ));
            }
        }
        self.repeating = true;
        Ok(())
    }
}

impl Drop for PreviewStream { {
    fn drop(&mut self) {
        unsafe {
            if self.repeating && !self.capture_session.is_null() {
                ACameraCaptureSession_stopRepeating(self.capture_session);
                self.repeating = false;
            }
            if !self.capture_session.is_null() {
                ACameraCaptureSession_close(self.capture_session);
                self.capture_session = null_mut();
            }
            if !self.capture_request.is_null() {
                ACaptureRequest_free(self.capture_request);
                self.capture_request = null_mut();
            }
            if !self.camera_output_target.is_null() {
                ACameraOutputTarget_free(self.camera_output_target);
                self.camera_output_target = null_mut();
            }
            if !self.camera_device.is_null() {
                let camera_status = ACameraDevice_close(self.camera_device);
                if camera_status != camera_status_t::ACAMERA_OK {
                    error!("Failed to close CameraDevice.");
                }
                self.camera_device = null_mut();
            }
            if !self.session_output.is_null() {
                ACaptureSessionOutput_free(self.session_output);
                self.session_output = null_mut();
            }
            if !self.capture_session_output_container.is_null() {
                ACaptureSessionOutputContainer_free(self.capture_session_output_container);
                self.capture_session_output_container = null_mut();
            }
            if !self.image_reader.is_null() {
                AImageReader_delete(self.image_reader);
                self.image_reader = null_mut();
            }
            if !self.camera_manager.is_null() {
                ACameraManager_delete(self.camera_manager);
                self.camera_manager = null_mut();
            }
        }
        info!("Close Camera");
    }
}

unsafe fn acquire_frame(image_reader: *mut AImageReader) -> Result<RawFrame> {
    let mut image: *mut AImage = null_mut();
    let media_status = AImageReader_acquireLatestImage(image_reader, &mut image);
    if media_status != media_status_t::AMEDIA_OK {
        return Err(anyhow!(
            "Failed to acquire latest image from image reader, error: {:?}.",
            media_status
        ));
    }
    let frame = read_planes(image);
    AImage_delete(image);
    frame
}

unsafe fn read_planes(image: *mut AImage) -> Result<RawFrame> {
    let mut width = 0;
    let mut height = 0;
    AImage_getWidth(image, &mut width);
    AImage_getHeight(image, &mut height);

    let mut y_stride = 0;
    let mut uv_stride = 0;
    let mut uv_pixel_stride = 0;
    let mut y_pixel = null_mut();
    let mut u_pixel = null_mut();
    let mut v_pixel = null_mut();
    let mut y_len = 0;
    let mut u_len = 0;
    let mut v_len = 0;

    AImage_getPlaneRowStride(image, 0, &mut y_stride);
    AImage_getPlaneRowStride(image, 1, &mut uv_stride);
    AImage_getPlanePixelStride(image, 1, &mut uv_pixel_stride);
    AImage_getPlaneData(image, 0, &mut y_pixel, &mut y_len);
    AImage_getPlaneData(image, 1, &mut u_pixel, &mut u_len);
    AImage_getPlaneData(image, 2, &mut v_pixel, &mut v_len);

    if y_pixel.is_null() || u_pixel.is_null() || v_pixel.is_null() || width <= 0 || height <= 0 {
        return Err(anyhow!("image planes are not readable"));
    }

    let planes = YuvPlanes {
        width: width as usize,
        height: height as usize,
        y: slice::from_raw_parts(y_pixel, y_len as usize),
        y_row_stride: y_stride as usize,
        u: slice::from_raw_parts(u_pixel, u_len as usize),
        v: slice::from_raw_parts(v_pixel, v_len as usize),
        uv_row_stride: uv_stride as usize,
        uv_pixel_stride: uv_pixel_stride as usize,
    };
    Ok(RawFrame {
        width: planes.width,
        height: planes.height,
        nv21: planes.to_nv21(),
    })
}

fn get_sensor_orientation(camera_metadata: *mut ACameraMetadata) -> (u8, i32) {
    unsafe {
        let mut lens_facing: ACameraMetadata_const_entry = zeroed();
        let mut sensor_orientation: ACameraMetadata_const_entry = zeroed();

        ACameraMetadata_getConstEntry(
            camera_metadata,
            acamera_metadata_tag::ACAMERA_LENS_FACING.0,
            &mut lens_facing,
        );
        ACameraMetadata_getConstEntry(
            camera_metadata,
            acamera_metadata_tag::ACAMERA_SENSOR_ORIENTATION.0,
            &mut sensor_orientation,
        );

        let lens_facing = if lens_facing.count > 0 {
            *lens_facing.data.u8_
        } else {
            u8::MAX
        };
        let sensor_orientation = if sensor_orientation.count > 0 {
            *sensor_orientation.data.i32_
        } else {
            0
        };
        (lens_facing, sensor_orientation)
    }
}

/// YUV_420_888 output sizes the sensor supports.
fn get_yuv_sizes(camera_metadata: *mut ACameraMetadata) -> Result<Vec<(i32, i32)>> {
    unsafe {
        let mut available_configs: ACameraMetadata_const_entry = zeroed();
        let camera_status = ACameraMetadata_getConstEntry(
            camera_metadata,
            acamera_metadata_tag::ACAMERA_SCALER_AVAILABLE_STREAM_CONFIGURATIONS.0,
            &mut available_configs,
        );
        if camera_status != camera_status_t::ACAMERA_OK {
            return Err(anyhow!(
                "Failed to get ACameraMetadata_const_entry res={:?}",
                camera_status
            ));
        }

        // format, width, height, input
        let data_i32_list: &[i32] = slice::from_raw_parts(
            available_configs.data.i32_,
            available_configs.count as usize,
        );
        Ok(data_i32_list
            .chunks_exact(4)
            .filter(|c| {
                c[3] == 0 && c[0] == AIMAGE_FORMATS::AIMAGE_FORMAT_YUV_420_888.0 as i32
            })
            .map(|c| (c[1], c[2]))
            .collect())
    }
}

fn pick_preview_size(sizes: &[(i32, i32)]) -> Option<(i32, i32)> {
    sizes
        .iter()
        .copied()
        .filter(|(w, h)| (*w as i64) * (*h as i64) <= MAX_PIXELS)
        .max_by_key(|(w, h)| (*w as i64) * (*h as i64))
        .or_else(|| sizes.iter().copied().min_by_key(|(w, h)| (*w as i64) * (*h as i64)))
}

unsafe fn get_cstr<'a>(s: *const ::std::os::raw::c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}
