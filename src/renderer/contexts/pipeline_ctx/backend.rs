use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use smallvec::SmallVec;
use crate::renderer::contexts::device_ctx::device::LogicalDevice;
use crate::renderer::contexts::pipeline_ctx::binding_mask::{BindingMask, ComputePipelineStateInfo};
use crate::renderer::contexts::pipeline_ctx::descriptor_set_layout_builder::DescriptorSetLayoutBuilder;
use crate::renderer::contexts::pipeline_ctx::layout::{PipelineLayout, PipelineLayoutDesc};
use crate::renderer::resources::shader::{create_shader_module, ComputeShader};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativePipelineLayout {
    pub set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
}

/// Everything needed to compile one pipeline variant
pub struct PipelineCompileInfo<'a> {
    pub shader: &'a ComputeShader,
    pub layout: &'a PipelineLayout,
    pub state: &'a ComputePipelineStateInfo,
    /// Pipeline cache data persisted by an earlier run, if any
    pub cache_data: Option<&'a [u8]>,
}

pub struct CompiledPipeline {
    pub pipeline: vk::Pipeline,
    /// Pipeline cache data to persist for the next run
    pub cache_data: Option<Vec<u8>>,
}

/// Driver-facing half of the compute pipeline cache.
///
/// Implementations must be callable from several threads at once: pipelines
/// are compiled without holding any cache lock.
pub trait PipelineBackend: Send + Sync {
    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> Result<NativePipelineLayout>;

    fn destroy_pipeline_layout(&self, layout: NativePipelineLayout);

    fn create_compute_pipeline(&self, info: &PipelineCompileInfo<'_>) -> Result<CompiledPipeline>;

    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
}

/// Specialization constants describing which slots are bound.
///
/// Slot `i` is a `VkBool32` constant with `constant_id = base + i`, so shaders
/// must not declare constants of their own in `base..base + slot_count`.
pub struct BindingSpecConstants {
    pub entries: SmallVec<[vk::SpecializationMapEntry; 16]>,
    pub data: SmallVec<[vk::Bool32; 16]>,
}

impl BindingSpecConstants {
    pub fn new(mask: &BindingMask, slot_count: u32, base: u32) -> Self {
        let entries = (0..slot_count)
            .map(|slot| vk::SpecializationMapEntry {
                constant_id: base + slot,
                offset: slot * size_of::<vk::Bool32>() as u32,
                size: size_of::<vk::Bool32>(),
            })
            .collect();
        let data = (0..slot_count)
            .map(|slot| if mask.test(slot) { vk::TRUE } else { vk::FALSE })
            .collect();

        Self { entries, data }
    }
}

pub struct AshPipelineBackend {
    device: Arc<LogicalDevice>,
    spec_constant_base: u32,
}

impl AshPipelineBackend {
    pub fn new(device: Arc<LogicalDevice>) -> Self {
        Self {
            device,
            spec_constant_base: 0,
        }
    }

    /// First specialization constant id used for binding slots
    pub fn with_spec_constant_base(mut self, base: u32) -> Self {
        self.spec_constant_base = base;
        self
    }

    fn compile(
        &self,
        module: vk::ShaderModule,
        pipeline_cache: vk::PipelineCache,
        info: &PipelineCompileInfo<'_>,
    ) -> Result<vk::Pipeline> {
        let spec_constants = BindingSpecConstants::new(
            &info.state.binding_mask,
            info.layout.slot_mapping().len() as u32,
            self.spec_constant_base,
        );
        let specialization_info = vk::SpecializationInfo::default()
            .map_entries(&spec_constants.entries)
            .data(bytemuck::cast_slice(&spec_constants.data));

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(info.shader.entry_point())
            .specialization_info(&specialization_info);
        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(info.layout.pipeline_layout());

        let pipelines = unsafe {
            self.device.create_compute_pipelines(
                pipeline_cache,
                std::slice::from_ref(&pipeline_info),
                None,
            )
        }.map_err(|(_, err)| eyre!("vkCreateComputePipelines failed: {}", err))?;

        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| eyre!("vkCreateComputePipelines returned no pipeline"))
    }
}

impl PipelineBackend for AshPipelineBackend {
    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> Result<NativePipelineLayout> {
        let set_layout = desc
            .bindings
            .iter()
            .fold(DescriptorSetLayoutBuilder::new(), |builder, binding| {
                builder.add_compute_binding(binding)
            })
            .build(vk::DescriptorSetLayoutCreateFlags::empty(), &self.device)?;

        let set_layouts = [set_layout];
        let push_constant_range = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: desc.push_constant_size,
        }];
        let push_constant_ranges: &[vk::PushConstantRange] = if desc.push_constant_size > 0 {
            &push_constant_range
        } else {
            &[]
        };
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let pipeline_layout = match unsafe { self.device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(err) => {
                unsafe { self.device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(err.into());
            }
        };

        Ok(NativePipelineLayout {
            set_layout,
            pipeline_layout,
        })
    }

    fn destroy_pipeline_layout(&self, layout: NativePipelineLayout) {
        unsafe {
            self.device.destroy_pipeline_layout(layout.pipeline_layout, None);
            self.device.destroy_descriptor_set_layout(layout.set_layout, None);
        }
    }

    fn create_compute_pipeline(&self, info: &PipelineCompileInfo<'_>) -> Result<CompiledPipeline> {
        let module = create_shader_module(info.shader.code(), &self.device)?;

        // A transient cache seeded with the data from the last run. Drivers
        // ignore data written by a different driver or device.
        let cache_info = vk::PipelineCacheCreateInfo::default()
            .initial_data(info.cache_data.unwrap_or(&[]));
        let pipeline_cache = match unsafe { self.device.create_pipeline_cache(&cache_info, None) } {
            Ok(cache) => cache,
            Err(err) => {
                log::debug!("Failed to create pipeline cache: {}", err);
                vk::PipelineCache::null()
            }
        };

        let result = self.compile(module, pipeline_cache, info);

        let cache_data = if pipeline_cache != vk::PipelineCache::null() && result.is_ok() {
            unsafe { self.device.get_pipeline_cache_data(pipeline_cache) }.ok()
        } else {
            None
        };

        unsafe {
            self.device.destroy_pipeline_cache(pipeline_cache, None);
            self.device.destroy_shader_module(module, None);
        }

        Ok(CompiledPipeline {
            pipeline: result?,
            cache_data,
        })
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.destroy_pipeline(pipeline, None);
        }
    }
}
