pub mod backend;
pub mod binding_mask;
pub mod compute;
pub mod descriptor_set_layout_builder;
pub mod layout;
pub mod reflection;
pub mod state_cache;
pub mod stats;

use std::sync::Arc;
use color_eyre::Result;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use crate::renderer::config::PipelineCacheConfig;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::pipeline_ctx::backend::{AshPipelineBackend, PipelineBackend};
use crate::renderer::contexts::pipeline_ctx::compute::ComputePipeline;
use crate::renderer::contexts::pipeline_ctx::state_cache::PipelineStateCache;
use crate::renderer::contexts::pipeline_ctx::stats::PipelineStatsSnapshot;
use crate::renderer::resources::shader::{ComputeShader, ShaderId};

/// Responsibilities:
/// - Manage compute pipelines, one per shader
/// - Shader reflection and pipeline layouts
/// - Pipeline state management and caching
pub struct RenderPipelineContext {
    compute_pipelines: Mutex<FxHashMap<ShaderId, Arc<ComputePipeline>>>,
    state_cache: Option<Arc<PipelineStateCache>>,
    backend: Arc<dyn PipelineBackend>,
}

impl RenderPipelineContext {
    pub fn new(
        dev_ctx: &RenderDeviceContext,
        config: &PipelineCacheConfig,
    ) -> Result<Self> {
        let backend = Arc::new(
            AshPipelineBackend::new(Arc::clone(&dev_ctx.device.logical))
                .with_spec_constant_base(config.spec_constant_base),
        );
        Ok(Self::with_backend(backend, PipelineStateCache::from_config(config)))
    }

    pub fn with_backend(
        backend: Arc<dyn PipelineBackend>,
        state_cache: Option<Arc<PipelineStateCache>>,
    ) -> Self {
        Self {
            compute_pipelines: Mutex::new(FxHashMap::default()),
            state_cache,
            backend,
        }
    }

    /// Returns the compute pipeline for `shader`, creating it on first use.
    ///
    /// Fails if the shader's layout cannot be built; nothing is cached in
    /// that case.
    pub fn compute_pipeline(&self, shader: &Arc<ComputeShader>) -> Result<Arc<ComputePipeline>> {
        if let Some(pipeline) = self.compute_pipelines.lock().get(&shader.id()) {
            return Ok(Arc::clone(pipeline));
        }

        // The layout is created without holding the lock. If another thread
        // inserted the same shader meanwhile, its pipeline wins.
        let pipeline = Arc::new(ComputePipeline::new(
            Arc::clone(shader),
            Arc::clone(&self.backend),
            self.state_cache.clone(),
        )?);
        let mut pipelines = self.compute_pipelines.lock();
        if let Some(existing) = pipelines.get(&shader.id()) {
            let existing = Arc::clone(existing);
            drop(pipelines);
            log::trace!("Discarding duplicate compute pipeline for {}", shader.name());
            return Ok(existing);
        }
        pipelines.insert(shader.id(), Arc::clone(&pipeline));
        Ok(pipeline)
    }

    /// Forgets the compute pipeline of a retired shader.
    ///
    /// Its variants are destroyed once the last outstanding reference is
    /// dropped.
    pub fn retire(&self, shader: ShaderId) -> bool {
        self.compute_pipelines.lock().remove(&shader).is_some()
    }

    pub fn len(&self) -> usize {
        self.compute_pipelines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.compute_pipelines.lock().is_empty()
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.compute_pipelines
            .lock()
            .values()
            .map(|pipeline| pipeline.stats())
            .fold(PipelineStatsSnapshot::default(), |acc, stats| acc + stats)
    }

    /// Blocks until pending state cache writes are persisted
    pub fn flush_state_cache(&self) {
        if let Some(cache) = self.state_cache.as_ref() {
            cache.flush();
        }
    }
}

impl Drop for RenderPipelineContext {
    fn drop(&mut self) {
        self.compute_pipelines.get_mut().clear();
        self.flush_state_cache();
    }
}
