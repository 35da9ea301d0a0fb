//! Pixel helpers for turning one raw sensor frame into an upright RGBA photo.
#![cfg_attr(not(target_os = "android"), allow(dead_code))]

use image::{
    imageops::{flip_horizontal, rotate180, rotate270, rotate90},
    RgbaImage,
};

/// One YUV_420_888 image copied out of the NDK buffers.
pub struct YuvPlanes<'a> {
    pub width: usize,
    pub height: usize,
    pub y: &'a [u8],
    pub y_row_stride: usize,
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub uv_row_stride: usize,
    pub uv_pixel_stride: usize,
}

impl YuvPlanes<'_> {
    /// Repacks the planes as NV21 (Y plane followed by interleaved V/U),
    /// whatever strides the device used.
    pub fn to_nv21(&self) -> Vec<u8> {
        let (w, h) = (self.width, self.height);
        let mut out = Vec::with_capacity(w * h + w * h / 2);
        for row in 0..h {
            let start = row * self.y_row_stride;
            out.extend_from_slice(&self.y[start..start + w]);
        }
        for row in 0..h / 2 {
            for col in 0..w / 2 {
                let idx = row * self.uv_row_stride + col * self.uv_pixel_stride;
                out.push(self.v.get(idx).copied().unwrap_or(128));
                out.push(self.u.get(idx).copied().unwrap_or(128));
            }
        }
        out
    }
}

/// android: YUV420SP (NV21) to rgba
pub fn decode_yuv420sp(data: &[u8], width: usize, height: usize) -> Vec<u8> {
    let frame_size = width * height;
    let mut rgba_data = Vec::with_capacity(frame_size * 4);
    let mut yp = 0;
    for j in 0..height {
        let mut uvp = frame_size + (j >> 1) * width;
        let (mut u, mut v) = (0i32, 0i32);
        for i in 0..width {
            let y = (data[yp] as i32 - 16).max(0);
            if i & 1 == 0 {
                v = data[uvp] as i32 - 128;
                u = data[uvp + 1] as i32 - 128;
                uvp += 2;
            }

            let y1192 = 1192 * y;
            let r = (y1192 + 1634 * v).clamp(0, 262143);
            let g = (y1192 - 833 * v - 400 * u).clamp(0, 262143);
            let b = (y1192 + 2066 * u).clamp(0, 262143);

            rgba_data.extend_from_slice(&[(r >> 10) as u8, (g >> 10) as u8, (b >> 10) as u8, 255]);
            yp += 1;
        }
    }
    rgba_data
}

/// Rotates a sensor image upright. Front sensors are mirrored so the photo
/// matches what the user saw.
pub fn orient(image: RgbaImage, rotate_degree: i32, mirror: bool) -> RgbaImage {
    let rotated = match rotate_degree.rem_euclid(360) {
        90 => rotate90(&image),
        180 => rotate180(&image),
        270 => rotate270(&image),
        _ => image,
    };
    if mirror {
        flip_horizontal(&rotated)
    } else {
        rotated
    }
}
