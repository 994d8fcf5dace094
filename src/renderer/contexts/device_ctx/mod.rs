pub mod instance;
pub mod device;
pub mod queue;

use std::sync::Arc;
use color_eyre::Result;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;

/// Responsibilities:
/// - Manage the Vulkan instance and a headless compute device
/// - Route validation messages to the log
pub struct RenderDeviceContext {
    pub device: RenderDevice,
    pub instance: Arc<RenderInstance>,
}

impl RenderDeviceContext {
    pub fn new(config: &RenderConfig) -> Result<Self> {
        let instance = Arc::new(RenderInstance::new(config)?);
        let device = RenderDevice::new(&instance)?;

        log::info!(
            "Compute queue family {} ({})",
            device.compute_queue.family.index,
            if device.compute_queue.family.is_dedicated_compute() { "dedicated" } else { "shared" },
        );

        Ok(Self {
            device,
            instance,
        })
    }
}
