pub mod renderer;

pub use renderer::Renderer;
pub use renderer::config::{PipelineCacheConfig, RenderConfig};
pub use renderer::contexts::pipeline_ctx::RenderPipelineContext;
pub use renderer::contexts::device_ctx::device::LogicalDevice;
pub use renderer::contexts::pipeline_ctx::backend::{
    AshPipelineBackend, BindingSpecConstants, CompiledPipeline, NativePipelineLayout, PipelineBackend, PipelineCompileInfo,
};
pub use renderer::contexts::pipeline_ctx::binding_mask::{BindingMask, ComputePipelineStateInfo, MAX_BINDINGS};
pub use renderer::contexts::pipeline_ctx::compute::{ComputePipeline, ComputePipelineInstance};
pub use renderer::contexts::pipeline_ctx::layout::{DescriptorSlotMapping, PipelineLayout, PipelineLayoutDesc};
pub use renderer::contexts::pipeline_ctx::reflection::{ReflectionError, ResourceKind, ShaderReflection, ShaderResource};
pub use renderer::contexts::pipeline_ctx::state_cache::{
    DiskStateStore, MemoryStateStore, PipelineStateCache, PipelineStateStore,
};
pub use renderer::contexts::pipeline_ctx::stats::PipelineStatsSnapshot;
pub use renderer::resources::shader::{ComputeShader, ShaderId};
