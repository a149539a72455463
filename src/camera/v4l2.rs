use crate::camera::{VideoSource, VideoStream};
use crate::common::config::CameraConfig;
use crate::common::{IdCaptureError, Result};
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
use std::fs;
use std::io;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

pub struct V4lCamera {
    config: CameraConfig,
}

pub struct V4lStream {
    stream: v4l::io::mmap::Stream<'static>,
    format: v4l::Format,
}

/// One entry of `list_all_cameras`.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub formats: Vec<String>,
    pub can_capture: bool,
}

impl V4lCamera {
    pub fn new(config: &CameraConfig) -> Self {
        Self { config: config.clone() }
    }

    /// List all available cameras with their capabilities
    pub fn list_all_cameras() -> Result<Vec<CameraInfo>> {
        let mut cameras = Vec::new();

        for entry in fs::read_dir("/dev")? {
            let path = entry?.path();
            let Some(index) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("video"))
                .and_then(|i| i.parse::<u32>().ok())
            else {
                continue;
            };

            let Ok(device) = Device::new(index as usize) else { continue };
            let Ok(caps) = device.query_caps() else { continue };

            let formats = device
                .enum_formats()
                .unwrap_or_default()
                .iter()
                .map(|fmt| fmt.fourcc.str().unwrap_or("????").to_string())
                .collect();

            cameras.push(CameraInfo {
                index,
                name: caps.card.clone(),
                formats,
                can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            });
        }

        cameras.sort_by_key(|c| c.index);
        Ok(cameras)
    }

    fn open_device(&self) -> Result<Device> {
        let index = self.config.device_index;
        Device::new(index as usize).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => IdCaptureError::CaptureDeviceDenied(format!(
                "Permission denied for /dev/video{}", index
            )),
            _ => IdCaptureError::Camera(format!("Failed to open camera {}: {}", index, e)),
        })
    }
}

impl VideoSource for V4lCamera {
    fn open(&self) -> Result<Box<dyn VideoStream>> {
        let device = self.open_device()?;

        let mut fmt = device
            .format()
            .map_err(|e| IdCaptureError::Camera(format!("Failed to get format: {}", e)))?;

        fmt.width = self.config.width;
        fmt.height = self.config.height;
        // Keep native grayscale sensors as they are, otherwise ask for MJPG
        if fmt.fourcc.str().unwrap_or("") != "GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let format = device
            .format()
            .map_err(|e| IdCaptureError::Camera(format!("Failed to get final format: {}", e)))?;

        if format.width != self.config.width || format.height != self.config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                format.width, format.height, self.config.width, self.config.height
            );
        }

        let mut stream = v4l::io::mmap::Stream::with_buffers(&device, Type::VideoCapture, 4)
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => {
                    IdCaptureError::CaptureDeviceDenied(format!("Stream refused: {}", e))
                }
                _ => IdCaptureError::Camera(format!("Failed to create stream: {}", e)),
            })?;

        for i in 0..self.config.warmup_frames {
            stream.next().map_err(|e| {
                IdCaptureError::Camera(format!("Failed to capture warmup frame {}: {}", i, e))
            })?;
            std::thread::sleep(std::time::Duration::from_millis(self.config.warmup_delay_ms));
        }

        tracing::info!(
            "Camera {} streaming {}x{} {}",
            self.config.device_index,
            format.width,
            format.height,
            format.fourcc.str().unwrap_or("????")
        );

        Ok(Box::new(V4lStream { stream, format }))
    }
}

impl VideoStream for V4lStream {
    fn next_frame(&mut self) -> Result<DynamicImage> {
        let (buf, _meta) = self
            .stream
            .next()
            .map_err(|e| IdCaptureError::Camera(format!("Failed to capture: {}", e)))?;

        let (width, height) = (self.format.width, self.format.height);
        match self.format.fourcc.str().unwrap_or("") {
            "GREY" => grey_to_image(buf, width, height),
            "MJPG" => image::load_from_memory_with_format(buf, ImageFormat::Jpeg)
                .map_err(|e| IdCaptureError::Camera(format!("Bad MJPG frame: {}", e))),
            "YUYV" => yuyv_to_image(buf, width, height),
            other => Err(IdCaptureError::Camera(format!("Unsupported format {}", other))),
        }
    }
}

fn grey_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let expected = (width * height) as usize;
    let img_buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data[..expected.min(data.len())].to_vec())
        .ok_or_else(|| IdCaptureError::Camera("Failed to create grayscale image buffer".into()))?;

    Ok(DynamicImage::ImageLuma8(img_buffer))
}

/// Packed 4:2:2 (Y0 U Y1 V) to RGB.
fn yuyv_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        return Err(IdCaptureError::Camera(format!(
            "Short YUYV frame: {} of {} bytes", data.len(), expected
        )));
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0] as f32, chunk[1] as f32 - 128.0, chunk[2] as f32, chunk[3] as f32 - 128.0);
        for y in [y0, y1] {
            rgb.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
        }
    }

    let img = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, rgb)
        .ok_or_else(|| IdCaptureError::Camera("Failed to create RGB image buffer".into()))?;
    Ok(DynamicImage::ImageRgb8(img))
}
