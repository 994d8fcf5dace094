use ash::vk;
use naga::{AddressSpace, ArraySize, ImageClass, ShaderStage, TypeInner};
use thiserror::Error;
use crate::renderer::contexts::pipeline_ctx::binding_mask::MAX_BINDINGS;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReflectionError {
    #[error("Entry point \"{0}\" not found")]
    MissingEntryPoint(String),

    #[error("Entry point \"{0}\" is not a compute shader")]
    NotCompute(String),

    #[error("Resource \"{0}\" has no binding decoration")]
    MissingBinding(String),

    #[error("Resource \"{name}\" uses descriptor set {set}, only set 0 is supported")]
    UnsupportedSet { name: String, set: u32 },

    #[error("Binding {0} is declared more than once")]
    DuplicateBinding(u32),

    #[error("Resource \"{0}\" has an unsupported type")]
    UnsupportedResource(String),

    #[error("Resource \"{0}\" is a runtime-sized binding array")]
    UnboundedArray(String),

    #[error("Shader declares {0} resources, at most {MAX_BINDINGS} are supported")]
    TooManyResources(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    UniformBuffer,
    StorageBuffer,
    SampledImage,
    StorageImage,
    Sampler,
}

impl ResourceKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            ResourceKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            ResourceKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            ResourceKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            ResourceKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            ResourceKind::Sampler => vk::DescriptorType::SAMPLER,
        }
    }
}

/// A descriptor the shader reads or writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderResource {
    pub name: String,
    pub binding: u32,
    pub kind: ResourceKind,
    pub count: u32,
}

/// Resource usage of one compute entry point.
///
/// Resources are sorted by binding number so that the resulting slot order
/// is the same every time the shader is reflected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderReflection {
    pub entry_point: String,
    pub workgroup_size: [u32; 3],
    pub resources: Vec<ShaderResource>,
    pub push_constant_size: u32,
}

impl ShaderReflection {
    pub fn from_module(
        module: &naga::Module,
        entry_point: &str,
    ) -> Result<Self, ReflectionError> {
        let entry = module
            .entry_points
            .iter()
            .find(|ep| ep.name == entry_point)
            .ok_or_else(|| ReflectionError::MissingEntryPoint(entry_point.to_string()))?;
        if entry.stage != ShaderStage::Compute {
            return Err(ReflectionError::NotCompute(entry_point.to_string()));
        }

        let mut resources = Vec::new();
        let mut push_constant_size = 0;

        for (handle, var) in module.global_variables.iter() {
            let name = var
                .name
                .clone()
                .unwrap_or_else(|| format!("global{}", handle.index()));

            let kind = match var.space {
                AddressSpace::PushConstant => {
                    let size = module.types[var.ty].inner.size(module.to_ctx());
                    push_constant_size = push_constant_size.max(size);
                    continue;
                }
                AddressSpace::Uniform => ResourceKind::UniformBuffer,
                AddressSpace::Storage { .. } => ResourceKind::StorageBuffer,
                AddressSpace::Handle => {
                    let inner = match module.types[var.ty].inner {
                        TypeInner::BindingArray { base, .. } => &module.types[base].inner,
                        ref inner => inner,
                    };
                    match *inner {
                        TypeInner::Image { class: ImageClass::Storage { .. }, .. } => ResourceKind::StorageImage,
                        TypeInner::Image { .. } => ResourceKind::SampledImage,
                        TypeInner::Sampler { .. } => ResourceKind::Sampler,
                        _ => return Err(ReflectionError::UnsupportedResource(name)),
                    }
                }
                // Function-local, private and workgroup memory take no descriptors
                _ => continue,
            };

            let count = match module.types[var.ty].inner {
                TypeInner::BindingArray { size: ArraySize::Constant(size), .. } => size.get(),
                TypeInner::BindingArray { .. } => return Err(ReflectionError::UnboundedArray(name)),
                _ => 1,
            };

            let binding = var
                .binding
                .as_ref()
                .ok_or_else(|| ReflectionError::MissingBinding(name.clone()))?;
            if binding.group != 0 {
                return Err(ReflectionError::UnsupportedSet { name, set: binding.group });
            }

            resources.push(ShaderResource {
                name,
                binding: binding.binding,
                kind,
                count,
            });
        }

        resources.sort_by_key(|resource| resource.binding);
        if let Some(pair) = resources.windows(2).find(|pair| pair[0].binding == pair[1].binding) {
            return Err(ReflectionError::DuplicateBinding(pair[0].binding));
        }
        if resources.len() > MAX_BINDINGS {
            return Err(ReflectionError::TooManyResources(resources.len()));
        }

        Ok(Self {
            entry_point: entry_point.to_string(),
            workgroup_size: entry.workgroup_size,
            resources,
            push_constant_size,
        })
    }
}
