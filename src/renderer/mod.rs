pub mod config;
pub mod contexts;
pub mod resources;

use color_eyre::Result;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::pipeline_ctx::RenderPipelineContext;

/// Headless compute renderer
pub struct Renderer {
    pub pip: RenderPipelineContext,
    pub dev: RenderDeviceContext,
}

impl Renderer {
    pub fn new(config: &RenderConfig) -> Result<Self> {
        let dev = RenderDeviceContext::new(config)?;
        let pip = RenderPipelineContext::new(&dev, &config.pipeline_cache)?;

        Ok(Self { pip, dev })
    }
}
