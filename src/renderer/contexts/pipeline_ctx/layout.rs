use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use smallvec::SmallVec;
use crate::renderer::contexts::pipeline_ctx::backend::{NativePipelineLayout, PipelineBackend};
use crate::renderer::contexts::pipeline_ctx::binding_mask::BindingMask;
use crate::renderer::contexts::pipeline_ctx::reflection::{ResourceKind, ShaderReflection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub kind: ResourceKind,
    pub count: u32,
}

/// Descriptor set layout and push constant range of a compute pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineLayoutDesc {
    pub bindings: SmallVec<[LayoutBinding; 16]>,
    pub push_constant_size: u32,
}

/// Maps logical resource slots to descriptor binding numbers.
///
/// Slot `i` is bit `i` of a [`BindingMask`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorSlotMapping {
    bindings: SmallVec<[u32; 16]>,
}

impl DescriptorSlotMapping {
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn binding_for_slot(&self, slot: u32) -> Option<u32> {
        self.bindings.get(slot as usize).copied()
    }

    pub fn slot_for_binding(&self, binding: u32) -> Option<u32> {
        self.bindings
            .iter()
            .position(|b| *b == binding)
            .map(|slot| slot as u32)
    }

    /// Builds the mask for a dispatch that has `bound` bindings populated.
    /// Binding numbers the shader does not declare are ignored.
    pub fn binding_mask(&self, bound: impl IntoIterator<Item = u32>) -> BindingMask {
        BindingMask::from_slots(
            bound
                .into_iter()
                .filter_map(|binding| self.slot_for_binding(binding)),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.bindings
            .iter()
            .enumerate()
            .map(|(slot, binding)| (slot as u32, *binding))
    }
}

/// Derives the layout description and slot mapping from reflection data.
pub fn describe_layout(
    reflection: &ShaderReflection,
) -> (PipelineLayoutDesc, DescriptorSlotMapping) {
    let bindings = reflection
        .resources
        .iter()
        .map(|resource| LayoutBinding {
            binding: resource.binding,
            kind: resource.kind,
            count: resource.count,
        })
        .collect::<SmallVec<[LayoutBinding; 16]>>();
    let slot_mapping = DescriptorSlotMapping {
        bindings: bindings.iter().map(|b| b.binding).collect(),
    };

    (
        PipelineLayoutDesc {
            bindings,
            push_constant_size: reflection.push_constant_size,
        },
        slot_mapping,
    )
}

/// Pipeline layout shared by every variant of one compute shader
pub struct PipelineLayout {
    desc: PipelineLayoutDesc,
    slot_mapping: DescriptorSlotMapping,
    native: NativePipelineLayout,
    backend: Arc<dyn PipelineBackend>,
}

impl PipelineLayout {
    pub fn new(
        reflection: &ShaderReflection,
        backend: Arc<dyn PipelineBackend>,
    ) -> Result<Self> {
        let (desc, slot_mapping) = describe_layout(reflection);
        let native = backend.create_pipeline_layout(&desc)?;

        Ok(Self {
            desc,
            slot_mapping,
            native,
            backend,
        })
    }

    pub fn desc(&self) -> &PipelineLayoutDesc {
        &self.desc
    }

    pub fn slot_mapping(&self) -> &DescriptorSlotMapping {
        &self.slot_mapping
    }

    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.native.set_layout
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.native.pipeline_layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        self.backend.destroy_pipeline_layout(self.native);
    }
}
