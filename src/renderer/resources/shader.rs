use std::ffi::{CStr, CString};
use std::fmt;
use std::path::Path;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use naga::{
    back::spv, front::glsl::{Frontend, Options},
    valid::{Capabilities, ValidationFlags, Validator},
    ShaderStage
};
use crate::renderer::contexts::pipeline_ctx::reflection::ShaderReflection;

const SHADERS_DIR: &str = "shaders-built";
const ENTRY_POINT: &str = "main";

/// Stable identity of a shader: the xxh3 hash of its SPIR-V
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u64);

impl ShaderId {
    pub fn from_spirv(code: &[u32]) -> Self {
        Self(xxhash_rust::xxh3::xxh3_64(bytemuck::cast_slice(code)))
    }
}

impl fmt::Display for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShaderId({:016x})", self.0)
    }
}

/// A validated compute shader together with its reflected resource usage.
///
/// No Vulkan objects are held here: the shader module is created by the
/// pipeline backend for the duration of a compile.
pub struct ComputeShader {
    name: String,
    id: ShaderId,
    code: Vec<u32>,
    entry_point: CString,
    reflection: ShaderReflection,
}

impl ComputeShader {
    /// Loads `shaders-built/{shader_name}.comp.spv` produced by the build script
    pub fn load(shader_name: &str) -> Result<Self> {
        let path = format!("{}/{}.comp.spv", SHADERS_DIR, shader_name);
        Self::from_spirv_file(shader_name, path.as_ref())
    }

    pub fn from_spirv_file(shader_name: &str, filepath: &Path) -> Result<Self> {
        let code = std::fs::read(filepath)?;
        Self::from_spirv(shader_name, &code)
    }

    pub fn from_spirv(shader_name: &str, code: &[u8]) -> Result<Self> {
        if code.len() % 4 != 0 {
            return Err(eyre!(
                "SPIR-V for shader {} is not a whole number of words ({} bytes)",
                shader_name,
                code.len()
            ));
        }

        let module = naga::front::spv::parse_u8_slice(code, &naga::front::spv::Options::default())?;
        let reflection = ShaderReflection::from_module(&module, ENTRY_POINT)?;

        Self::from_parts(shader_name, bytemuck::pod_collect_to_vec(code), reflection)
    }

    pub fn from_glsl(shader_name: &str, source: &str) -> Result<Self> {
        let mut frontend = Frontend::default();
        let module = frontend.parse(&Options::from(ShaderStage::Compute), source)?;

        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        let validation_info = validator.validate(&module)?;
        let code = spv::write_vec(&module, &validation_info, &spv::Options::default(), None)?;

        let reflection = ShaderReflection::from_module(&module, ENTRY_POINT)?;

        Self::from_parts(shader_name, code, reflection)
    }

    pub fn from_parts(
        shader_name: &str,
        code: Vec<u32>,
        reflection: ShaderReflection,
    ) -> Result<Self> {
        let entry_point = CString::new(reflection.entry_point.as_str())?;
        Ok(Self {
            name: shader_name.to_string(),
            id: ShaderId::from_spirv(&code),
            code,
            entry_point,
            reflection,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ShaderId {
        self.id
    }

    pub fn code(&self) -> &[u32] {
        &self.code
    }

    pub fn entry_point(&self) -> &CStr {
        &self.entry_point
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }
}

pub fn create_shader_module(code: &[u32], device: &ash::Device) -> Result<vk::ShaderModule> {
    let shader_module_info = vk::ShaderModuleCreateInfo::default()
        .code(code);

    let shader_module = unsafe {
        device.create_shader_module(&shader_module_info, None)?
    };

    Ok(shader_module)
}
