//! A thin wrapper over `wgpu::Device`/`wgpu::Queue`, mirroring
//! `blade-graphics::Context`/`create_context` (`blade-graphics/src/webgpu/
//! platform.rs`), minus the full resource-key hub -- `conduit-gpu`'s task
//! bodies hold their `wgpu::Buffer`/`wgpu::Texture` handles directly inside
//! pipeline tokens instead of through a `SlotMap`-backed indirection, since
//! there's no cross-stage resource aliasing to track here.

use crate::error::GpuError;

pub struct GpuContext {
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuContext {
    /// Requests an adapter and opens a device, blocking the calling thread
    /// via `pollster` (the teacher's native-platform path does the same,
    /// since `conduit-cli` has no async runtime of its own).
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| GpuError(format!("adapter request failed: {e}")))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("conduit GPU device"),
            required_features: wgpu::Features::TIMESTAMP_QUERY,
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| GpuError(format!("device request failed: {e}")))?;

        device.set_device_lost_callback(Box::new(|reason, message| {
            log::error!("GPU device lost: {reason:?} - {message}");
        }));

        let info = adapter.get_info();
        log::info!(
            "opened GPU device '{}' ({:?}, driver '{}')",
            info.name,
            info.backend,
            info.driver
        );

        Ok(GpuContext {
            instance,
            adapter,
            device,
            queue,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    /// Blocks the calling thread until every submission up to and including
    /// `device`'s current queue has been processed. Task bodies use this
    /// instead of carrying real fences end to end (spec.md §9: "GPU client
    /// wait inside task bodies uses a large effectively-infinite timeout and
    /// logs on expiry").
    pub fn wait_idle(&self) {
        let _ = self.device.poll(wgpu::PollType::Wait);
    }
}
