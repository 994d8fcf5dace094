use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use raxa_compute::{BindingMask, ComputePipelineStateInfo, ComputeShader, RenderConfig, Renderer};

const DEMO_SHADER: &str = "scale";
const WORKER_THREADS: usize = 4;
// Shaders with more slots only get their first slots toggled
const MAX_DEMO_SLOTS: u32 = 8;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let config = RenderConfig::from_env();
    let renderer = Renderer::new(&config)?;

    let shader = Arc::new(ComputeShader::load(DEMO_SHADER)?);
    let pipeline = renderer.pip.compute_pipeline(&shader)?;
    let slot_count = pipeline.layout().slot_mapping().len() as u32;

    // Every recording thread walks all binding combinations of the shader
    std::thread::scope(|scope| {
        for thread in 0..WORKER_THREADS {
            let pipeline = &pipeline;
            scope.spawn(move || {
                for state in binding_states(slot_count) {
                    let handle = pipeline.get_pipeline_handle(&state);
                    if handle == vk::Pipeline::null() {
                        log::warn!("Thread {}: no pipeline for [{}]", thread, state.binding_mask);
                    }
                }
            });
        }
    });

    log::info!(
        "{} variants of {} published: {:?}",
        pipeline.instance_count(),
        shader.name(),
        renderer.pip.stats()
    );

    renderer.pip.flush_state_cache();

    Ok(())
}

/// Every combination of bound slots among the first `slot_count` slots
fn binding_states(slot_count: u32) -> impl Iterator<Item = ComputePipelineStateInfo> {
    let slot_count = slot_count.min(MAX_DEMO_SLOTS);
    (0..1u128 << slot_count)
        .map(|bits| ComputePipelineStateInfo::new(BindingMask::from_bits(bits)))
}
