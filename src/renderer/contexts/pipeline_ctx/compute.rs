use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use parking_lot::Mutex;
use crate::renderer::contexts::pipeline_ctx::backend::{CompiledPipeline, PipelineBackend, PipelineCompileInfo};
use crate::renderer::contexts::pipeline_ctx::binding_mask::ComputePipelineStateInfo;
use crate::renderer::contexts::pipeline_ctx::layout::PipelineLayout;
use crate::renderer::contexts::pipeline_ctx::state_cache::PipelineStateCache;
use crate::renderer::contexts::pipeline_ctx::stats::{PipelineStats, PipelineStatsSnapshot};
use crate::renderer::resources::shader::ComputeShader;

/// One compiled variant of a compute pipeline.
///
/// Owns its pipeline handle and destroys it on drop.
pub struct ComputePipelineInstance {
    state: ComputePipelineStateInfo,
    pipeline: vk::Pipeline,
    layout: Arc<PipelineLayout>,
    backend: Arc<dyn PipelineBackend>,
}

impl ComputePipelineInstance {
    fn new(
        state: ComputePipelineStateInfo,
        pipeline: vk::Pipeline,
        layout: Arc<PipelineLayout>,
        backend: Arc<dyn PipelineBackend>,
    ) -> Self {
        Self {
            state,
            pipeline,
            layout,
            backend,
        }
    }

    pub fn is_compatible(&self, state: &ComputePipelineStateInfo) -> bool {
        self.state == *state
    }

    pub fn state(&self) -> &ComputePipelineStateInfo {
        &self.state
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

impl Drop for ComputePipelineInstance {
    fn drop(&mut self) {
        self.backend.destroy_pipeline(self.pipeline);
    }
}

/// Compute pipeline
///
/// Stores the pipeline layout of one compute shader and lazily compiles a
/// pipeline variant for every binding state it is dispatched with. Variants
/// are kept until the compute pipeline itself is dropped.
pub struct ComputePipeline {
    backend: Arc<dyn PipelineBackend>,
    state_cache: Option<Arc<PipelineStateCache>>,

    shader: Arc<ComputeShader>,
    layout: Arc<PipelineLayout>,

    pipelines: Mutex<Vec<ComputePipelineInstance>>,
    stats: PipelineStats,
}

impl ComputePipeline {
    /// Fails if the shader's resource usage cannot be turned into a layout.
    pub fn new(
        shader: Arc<ComputeShader>,
        backend: Arc<dyn PipelineBackend>,
        state_cache: Option<Arc<PipelineStateCache>>,
    ) -> Result<Self> {
        let layout = Arc::new(PipelineLayout::new(
            shader.reflection(),
            Arc::clone(&backend),
        )?);

        log::debug!(
            "Created compute pipeline layout for {} ({} slots)",
            shader.name(),
            layout.slot_mapping().len()
        );

        Ok(Self {
            backend,
            state_cache,
            shader,
            layout,
            pipelines: Mutex::new(Vec::new()),
            stats: PipelineStats::default(),
        })
    }

    pub fn shader(&self) -> &Arc<ComputeShader> {
        &self.shader
    }

    /// Layout shared by every variant, stable for the lifetime of `self`
    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }

    /// Returns the pipeline variant for `state`, compiling it on first use.
    ///
    /// Returns `vk::Pipeline::null()` if compilation failed. Failures are
    /// not cached; the next call with the same state compiles again.
    pub fn get_pipeline_handle(&self, state: &ComputePipelineStateInfo) -> vk::Pipeline {
        if let Some(pipeline) = Self::find_instance(&self.pipelines.lock(), state) {
            self.stats.inc_hits();
            log::trace!("Found compute pipeline {} [{}]", self.shader.name(), state.binding_mask);
            return pipeline;
        }

        // Compile without holding the lock. Threads racing on the same state
        // may each compile a pipeline; only the first one is published.
        let Some(compiled) = self.create_pipeline(state) else {
            return vk::Pipeline::null();
        };
        let instance = ComputePipelineInstance::new(
            *state,
            compiled.pipeline,
            Arc::clone(&self.layout),
            Arc::clone(&self.backend),
        );

        let mut pipelines = self.pipelines.lock();
        if let Some(pipeline) = Self::find_instance(&pipelines, state) {
            drop(pipelines);
            log::trace!(
                "Discarding duplicate pipeline for {} [{}]",
                self.shader.name(),
                state.binding_mask
            );
            self.stats.inc_discarded();
            drop(instance);
            return pipeline;
        }

        let pipeline = instance.pipeline();
        pipelines.push(instance);
        drop(pipelines);

        if let Some(cache_data) = compiled.cache_data {
            self.write_pipeline_state_to_cache(state, cache_data);
        }
        pipeline
    }

    /// Number of published variants
    pub fn instance_count(&self) -> usize {
        self.pipelines.lock().len()
    }

    /// States of all published variants, in publication order
    pub fn instance_states(&self) -> Vec<ComputePipelineStateInfo> {
        self.pipelines
            .lock()
            .iter()
            .map(|instance| *instance.state())
            .collect()
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot(self.instance_count() as u64)
    }

    fn find_instance(
        pipelines: &[ComputePipelineInstance],
        state: &ComputePipelineStateInfo,
    ) -> Option<vk::Pipeline> {
        pipelines
            .iter()
            .find(|instance| instance.is_compatible(state))
            .map(|instance| instance.pipeline())
    }

    fn create_pipeline(&self, state: &ComputePipelineStateInfo) -> Option<CompiledPipeline> {
        let cache_data = self
            .state_cache
            .as_ref()
            .and_then(|cache| cache.lookup(self.shader.id(), state));
        if cache_data.is_some() {
            self.stats.inc_store_hits();
        }

        let info = PipelineCompileInfo {
            shader: &self.shader,
            layout: &self.layout,
            state,
            cache_data: cache_data.as_deref(),
        };

        match self.backend.create_compute_pipeline(&info) {
            Ok(compiled) if compiled.pipeline != vk::Pipeline::null() => {
                self.stats.inc_compiled();
                log::debug!(
                    "Compiled compute pipeline {} [{}]",
                    self.shader.name(),
                    state.binding_mask
                );
                Some(compiled)
            }
            Ok(_) => {
                self.stats.inc_failed();
                log::warn!(
                    "Failed to compile compute pipeline {} [{}]: driver returned a null handle",
                    self.shader.name(),
                    state.binding_mask
                );
                None
            }
            Err(err) => {
                self.stats.inc_failed();
                log::warn!(
                    "Failed to compile compute pipeline {} [{}]: {}",
                    self.shader.name(),
                    state.binding_mask,
                    err
                );
                None
            }
        }
    }

    fn write_pipeline_state_to_cache(
        &self,
        state: &ComputePipelineStateInfo,
        cache_data: Vec<u8>,
    ) {
        if let Some(cache) = self.state_cache.as_ref() {
            cache.record(self.shader.id(), state, cache_data);
        }
    }
}
