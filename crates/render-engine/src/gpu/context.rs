use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use veneer_common::{VeneerError, VeneerResult};

/// How long the poll thread sleeps when nobody kicks it.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Device, queue and the thread that drives their callbacks.
///
/// wgpu only fires `on_submitted_work_done` and `map_async` callbacks from
/// `Device::poll`. The pipeline thread spends its time blocked on those
/// callbacks, so a dedicated thread polls on its behalf.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: wgpu::AdapterInfo,
    poller: DevicePoller,
}

impl GpuContext {
    /// Open the default high-performance adapter.
    pub fn new() -> VeneerResult<Arc<Self>> {
        pollster::block_on(Self::request())
    }

    /// Whether any adapter can be opened on this machine.
    pub fn is_available() -> bool {
        pollster::block_on(request_adapter()).is_ok()
    }

    async fn request() -> VeneerResult<Arc<Self>> {
        let adapter = request_adapter().await?;
        let info = adapter.get_info();
        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "Using GPU adapter"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("veneer-export"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| VeneerError::compositor_init(format!("failed to create GPU device: {e}")))?;

        // The default handler panics; errors surface through error scopes
        // and failed submissions instead.
        device.on_uncaptured_error(Box::new(|error| {
            tracing::error!(error = %error, "Uncaptured GPU error");
        }));

        let poller = DevicePoller::spawn(device.clone())?;
        Ok(Arc::new(Self {
            device,
            queue,
            adapter: info,
            poller,
        }))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter
    }

    /// Wake the poll thread after submitting work that has a callback.
    pub fn kick(&self) {
        self.poller.kick();
    }
}

async fn request_adapter() -> VeneerResult<wgpu::Adapter> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| VeneerError::compositor_init(format!("no GPU adapter available: {e}")))
}

struct DevicePoller {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DevicePoller {
    fn spawn(device: wgpu::Device) -> VeneerResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("veneer-gpu-poll".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    if let Err(err) = device.poll(wgpu::PollType::Poll) {
                        tracing::warn!(error = %err, "GPU device poll failed");
                    }
                    thread::park_timeout(POLL_INTERVAL);
                }
                tracing::debug!("GPU poll thread stopped");
            })
            .map_err(|e| {
                VeneerError::compositor_init(format!("failed to start GPU poll thread: {e}"))
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    fn kick(&self) {
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }
}

impl Drop for DevicePoller {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                tracing::warn!("GPU poll thread panicked");
            }
        }
    }
}
