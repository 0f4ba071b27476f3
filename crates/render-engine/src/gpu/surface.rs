use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use veneer_common::{VeneerError, VeneerResult};
use veneer_media_model::OutputGeometry;

use super::{GpuContext, SURFACE_FORMAT};
use crate::signal::FrameSignal;
use crate::stage::GpuFrame;

/// Upper bound on waiting for the previous frame's readback before the
/// next one can be presented.
const READBACK_TIMEOUT: Duration = Duration::from_secs(5);

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// Texture that decoded frames are uploaded into, at the decoder's
/// coded size and orientation.
pub struct VideoSurface {
    context: Arc<GpuContext>,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    signal: Arc<FrameSignal>,
    sequence: AtomicU64,
}

impl VideoSurface {
    pub fn new(context: &Arc<GpuContext>, width: u32, height: u32) -> Self {
        let texture = context.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("veneer-video-surface"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SURFACE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            context: Arc::clone(context),
            texture,
            view,
            width,
            height,
            signal: Arc::new(FrameSignal::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raised once a published frame's upload has completed on the GPU.
    pub fn signal(&self) -> Arc<FrameSignal> {
        Arc::clone(&self.signal)
    }

    pub(crate) fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Upload one RGBA frame whose rows are `stride` bytes apart and hand
    /// back its token. The frame signal fires when the upload lands.
    pub fn publish(&self, rgba: &[u8], stride: usize, pts_micros: i64) -> VeneerResult<GpuFrame> {
        let row_bytes = self.width as usize * 4;
        let needed = stride * (self.height as usize).saturating_sub(1) + row_bytes;
        if stride < row_bytes || stride % 4 != 0 || rgba.len() < needed {
            return Err(VeneerError::decode(format!(
                "frame buffer of {} bytes with stride {stride} does not cover {}x{}",
                rgba.len(),
                self.width,
                self.height
            )));
        }

        let queue = self.context.queue();
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &rgba[..needed],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(stride as u32),
                rows_per_image: Some(self.height),
            },
            extent(self.width, self.height),
        );
        // Staged writes are flushed by the next submission.
        queue.submit(std::iter::empty());

        let signal = Arc::clone(&self.signal);
        queue.on_submitted_work_done(move || signal.notify());
        self.context.kick();

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(GpuFrame::new(pts_micros, sequence))
    }
}

/// A composited frame read back for the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedFrame {
    /// Tightly packed RGBA rows.
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pts_micros: i64,
}

#[derive(Default)]
struct Readback {
    signal: FrameSignal,
    status: Mutex<Option<Result<(), wgpu::BufferAsyncError>>>,
}

#[derive(Default)]
struct PresentQueue {
    in_flight: Option<i64>,
    ready: VecDeque<PresentedFrame>,
}

/// Render target the compositor presents into and the encoder consumes.
///
/// One readback is in flight at a time; finished frames queue on the CPU
/// side until the encoder acquires them.
pub struct EncoderSurface {
    context: Arc<GpuContext>,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    padded_row_bytes: u32,
    geometry: OutputGeometry,
    done: Arc<Readback>,
    queue: Mutex<PresentQueue>,
}

impl EncoderSurface {
    pub fn new(context: &Arc<GpuContext>, geometry: OutputGeometry) -> Self {
        let device = context.device();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("veneer-encoder-surface"),
            size: extent(geometry.width, geometry.height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SURFACE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let padded_row_bytes = padded_row_bytes(geometry.width);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("veneer-encoder-readback"),
            size: padded_row_bytes as u64 * geometry.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            context: Arc::clone(context),
            texture,
            view,
            readback,
            padded_row_bytes,
            geometry,
            done: Arc::new(Readback::default()),
            queue: Mutex::new(PresentQueue::default()),
        }
    }

    pub fn geometry(&self) -> OutputGeometry {
        self.geometry
    }

    pub(crate) fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Submit the compositor's commands plus a copy into the readback
    /// buffer, tagged with `pts_micros`.
    pub fn present(&self, mut encoder: wgpu::CommandEncoder, pts_micros: i64) -> VeneerResult<()> {
        let mut queue = self.queue.lock();
        if queue.in_flight.is_some() && !self.collect(&mut queue, READBACK_TIMEOUT)? {
            return Err(VeneerError::encode(format!(
                "readback of the previous frame did not finish within {}s",
                READBACK_TIMEOUT.as_secs()
            )));
        }

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row_bytes),
                    rows_per_image: Some(self.geometry.height),
                },
            },
            extent(self.geometry.width, self.geometry.height),
        );
        self.context.queue().submit(Some(encoder.finish()));

        let done = Arc::clone(&self.done);
        self.readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                *done.status.lock() = Some(result);
                done.signal.notify();
            });
        queue.in_flight = Some(pts_micros);
        self.context.kick();
        Ok(())
    }

    /// Next presented frame, waiting up to `timeout` for an in-flight
    /// readback. `None` when nothing is ready.
    pub fn acquire(&self, timeout: Duration) -> VeneerResult<Option<PresentedFrame>> {
        let mut queue = self.queue.lock();
        if queue.ready.is_empty() {
            self.collect(&mut queue, timeout)?;
        }
        Ok(queue.ready.pop_front())
    }

    /// Frames presented but not yet acquired, including one in flight.
    pub fn pending(&self) -> usize {
        let queue = self.queue.lock();
        queue.ready.len() + usize::from(queue.in_flight.is_some())
    }

    fn collect(&self, queue: &mut PresentQueue, timeout: Duration) -> VeneerResult<bool> {
        let Some(pts_micros) = queue.in_flight else {
            return Ok(false);
        };
        if !self.done.signal.wait(timeout) {
            return Ok(false);
        }
        let status = self.done.status.lock().take();
        match status {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                return Err(VeneerError::encode(format!("frame readback failed: {err}")));
            }
            None => return Ok(false),
        }

        let rgba = {
            let mapped = self.readback.slice(..).get_mapped_range();
            unpad_rows(
                &mapped,
                self.padded_row_bytes as usize,
                self.geometry.width as usize * 4,
                self.geometry.height as usize,
            )
        };
        self.readback.unmap();

        queue.in_flight = None;
        queue.ready.push_back(PresentedFrame {
            rgba,
            width: self.geometry.width,
            height: self.geometry.height,
            pts_micros,
        });
        Ok(true)
    }
}

/// Row pitch for texture-to-buffer copies, rounded up to wgpu's alignment.
fn padded_row_bytes(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

fn unpad_rows(data: &[u8], padded: usize, row: usize, height: usize) -> Vec<u8> {
    if padded == row {
        return data[..row * height].to_vec();
    }
    let mut out = Vec::with_capacity(row * height);
    for chunk in data.chunks(padded).take(height) {
        out.extend_from_slice(&chunk[..row]);
    }
    out
}
