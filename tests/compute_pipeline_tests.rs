//! Compute pipeline cache tests
//!
//! Tests for:
//! - Variant lookup, compilation and failure handling
//! - Concurrent first use of the same binding state
//! - Handle and layout cleanup
//! - Persistent state store seeding and failure tolerance
//! - Pipeline context lifecycle

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use ash::vk::{self, Handle};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use parking_lot::Mutex;
use proptest::prelude::*;
use raxa_compute::*;

// ============================================================================
// Helpers
// ============================================================================

/// Holds layout creation for shaders with `slots` resources until released
struct LayoutGate {
    slots: usize,
    entered: flume::Sender<()>,
    release: flume::Receiver<()>,
    timed_out: AtomicBool,
}

#[derive(Default)]
struct FakeBackend {
    next_handle: AtomicU64,
    created: Mutex<Vec<vk::Pipeline>>,
    destroyed: Mutex<Vec<vk::Pipeline>>,
    layouts_created: AtomicUsize,
    layouts_destroyed: AtomicUsize,
    fail_layout: bool,
    fail_masks: Mutex<HashSet<u128>>,
    null_masks: Mutex<HashSet<u128>>,
    layout_gate: Option<LayoutGate>,
    compile_delay: Option<Duration>,
    seeded_with: Mutex<Vec<Option<Vec<u8>>>>,
}

impl FakeBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_compile_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            compile_delay: Some(delay),
            ..Default::default()
        })
    }

    fn failing_layout() -> Arc<Self> {
        Arc::new(Self {
            fail_layout: true,
            ..Default::default()
        })
    }

    fn gated(gate: LayoutGate) -> Arc<Self> {
        Arc::new(Self {
            layout_gate: Some(gate),
            ..Default::default()
        })
    }

    fn fail_mask(&self, bits: u128, fail: bool) {
        let mut masks = self.fail_masks.lock();
        if fail {
            masks.insert(bits);
        } else {
            masks.remove(&bits);
        }
    }

    fn compile_count(&self) -> usize {
        self.created.lock().len()
    }

    fn is_destroyed(&self, pipeline: vk::Pipeline) -> bool {
        self.destroyed.lock().contains(&pipeline)
    }

    fn live_count(&self) -> usize {
        self.created.lock().len() - self.destroyed.lock().len()
    }
}

impl PipelineBackend for FakeBackend {
    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> Result<NativePipelineLayout> {
        if self.fail_layout {
            return Err(eyre!("layout rejected"));
        }
        if let Some(gate) = self.layout_gate.as_ref().filter(|g| g.slots == desc.bindings.len()) {
            let _ = gate.entered.send(());
            if gate.release.recv_timeout(Duration::from_secs(5)).is_err() {
                gate.timed_out.store(true, Ordering::SeqCst);
            }
        }
        self.layouts_created.fetch_add(1, Ordering::SeqCst);
        Ok(NativePipelineLayout {
            set_layout: vk::DescriptorSetLayout::from_raw(1),
            pipeline_layout: vk::PipelineLayout::from_raw(1),
        })
    }

    fn destroy_pipeline_layout(&self, _layout: NativePipelineLayout) {
        self.layouts_destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn create_compute_pipeline(&self, info: &PipelineCompileInfo<'_>) -> Result<CompiledPipeline> {
        self.seeded_with.lock().push(info.cache_data.map(|data| data.to_vec()));
        if let Some(delay) = self.compile_delay {
            std::thread::sleep(delay);
        }

        let bits = info.state.binding_mask.bits();
        if self.fail_masks.lock().contains(&bits) {
            return Err(eyre!("driver rejected pipeline"));
        }
        if self.null_masks.lock().contains(&bits) {
            return Ok(CompiledPipeline {
                pipeline: vk::Pipeline::null(),
                cache_data: None,
            });
        }

        let pipeline = vk::Pipeline::from_raw(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        self.created.lock().push(pipeline);
        Ok(CompiledPipeline {
            pipeline,
            cache_data: Some(format!("blob-{:x}", bits).into_bytes()),
        })
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroyed.lock().push(pipeline);
    }
}

fn shader(slots: u32) -> Arc<ComputeShader> {
    let resources = (0..slots)
        .map(|binding| ShaderResource {
            name: format!("buffer{}", binding),
            binding,
            kind: ResourceKind::StorageBuffer,
            count: 1,
        })
        .collect();
    let reflection = ShaderReflection {
        entry_point: "main".into(),
        workgroup_size: [64, 1, 1],
        resources,
        push_constant_size: 0,
    };
    // Vary the code so the shader id depends on the slot count
    let code = vec![0x0723_0203, 0x0001_0000, 0, slots];
    Arc::new(ComputeShader::from_parts("test", code, reflection).unwrap())
}

fn state(bits: u128) -> ComputePipelineStateInfo {
    ComputePipelineStateInfo::new(BindingMask::from_bits(bits))
}

fn pipeline(backend: &Arc<FakeBackend>) -> ComputePipeline {
    ComputePipeline::new(shader(2), backend.clone(), None).unwrap()
}

// ============================================================================
// Lookup and compilation
// ============================================================================

#[test]
fn repeated_lookup_returns_cached_handle() {
    let backend = FakeBackend::new();
    let pipeline = pipeline(&backend);

    let h1 = pipeline.get_pipeline_handle(&state(0b00));
    assert_ne!(h1, vk::Pipeline::null());
    assert_eq!(backend.compile_count(), 1);

    for _ in 0..10 {
        assert_eq!(pipeline.get_pipeline_handle(&state(0b00)), h1);
    }
    assert_eq!(backend.compile_count(), 1);

    let stats = pipeline.stats();
    assert_eq!(stats.hits, 10);
    assert_eq!(stats.compiled, 1);
    assert_eq!(stats.live, 1);
}

#[test]
fn distinct_states_get_distinct_handles() {
    let backend = FakeBackend::new();
    let pipeline = pipeline(&backend);

    let h1 = pipeline.get_pipeline_handle(&state(0b00));
    let h2 = pipeline.get_pipeline_handle(&state(0b01));
    assert_ne!(h2, vk::Pipeline::null());
    assert_ne!(h1, h2);

    assert_eq!(pipeline.get_pipeline_handle(&state(0b00)), h1);
    assert_eq!(pipeline.get_pipeline_handle(&state(0b01)), h2);
    assert_eq!(pipeline.instance_count(), 2);
    assert_eq!(backend.compile_count(), 2);
}

#[test]
fn failed_compilation_is_not_cached() {
    let backend = FakeBackend::new();
    let pipeline = pipeline(&backend);

    backend.fail_mask(0b10, true);
    assert_eq!(pipeline.get_pipeline_handle(&state(0b10)), vk::Pipeline::null());
    assert_eq!(pipeline.instance_count(), 0);

    // Other states are unaffected
    assert_ne!(pipeline.get_pipeline_handle(&state(0b01)), vk::Pipeline::null());

    backend.fail_mask(0b10, false);
    let handle = pipeline.get_pipeline_handle(&state(0b10));
    assert_ne!(handle, vk::Pipeline::null());
    assert_eq!(pipeline.get_pipeline_handle(&state(0b10)), handle);

    let stats = pipeline.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.compiled, 2);
    assert_eq!(stats.live, 2);
}

#[test]
fn null_handle_from_driver_counts_as_failure() {
    let backend = FakeBackend::new();
    let pipeline = pipeline(&backend);

    backend.null_masks.lock().insert(0b01);
    assert_eq!(pipeline.get_pipeline_handle(&state(0b01)), vk::Pipeline::null());
    assert_eq!(pipeline.instance_count(), 0);

    backend.null_masks.lock().clear();
    assert_ne!(pipeline.get_pipeline_handle(&state(0b01)), vk::Pipeline::null());

    let stats = pipeline.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.compiled, 1);
    // Null handles are never handed to the driver for destruction
    drop(pipeline);
    assert!(!backend.destroyed.lock().contains(&vk::Pipeline::null()));
}

#[test]
fn layout_is_shared_by_all_variants() {
    let backend = FakeBackend::new();
    let pipeline = pipeline(&backend);
    let layout = Arc::clone(pipeline.layout());

    pipeline.get_pipeline_handle(&state(0b00));
    pipeline.get_pipeline_handle(&state(0b11));

    assert!(Arc::ptr_eq(&layout, pipeline.layout()));
    assert_eq!(layout.slot_mapping().len(), 2);
    assert_eq!(layout.pipeline_layout(), vk::PipelineLayout::from_raw(1));
    assert_eq!(backend.layouts_created.load(Ordering::SeqCst), 1);
}

#[test]
fn layout_failure_is_fatal() {
    let backend = FakeBackend::failing_layout();
    assert!(ComputePipeline::new(shader(2), backend.clone(), None).is_err());
    assert_eq!(backend.compile_count(), 0);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn racing_first_use_publishes_one_instance() {
    const THREADS: usize = 8;

    let backend = FakeBackend::with_compile_delay(Duration::from_millis(20));
    let pipeline = pipeline(&backend);
    let barrier = Barrier::new(THREADS);

    let handles: Vec<vk::Pipeline> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    pipeline.get_pipeline_handle(&state(0b11))
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let winner = handles[0];
    assert_ne!(winner, vk::Pipeline::null());
    assert!(handles.iter().all(|h| *h == winner));
    assert!(!backend.is_destroyed(winner));

    assert_eq!(pipeline.instance_count(), 1);
    assert_eq!(backend.live_count(), 1);

    let stats = pipeline.stats();
    assert!(stats.discarded <= (THREADS - 1) as u64);
    assert_eq!(stats.compiled, 1 + stats.discarded);
    assert_eq!(backend.compile_count() as u64, stats.compiled);
}

#[test]
fn concurrent_mixed_states_stay_unique() {
    let backend = FakeBackend::with_compile_delay(Duration::from_millis(2));
    let pipeline = ComputePipeline::new(shader(3), backend.clone(), None).unwrap();

    let results: Vec<(u128, vk::Pipeline)> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..6)
            .map(|t| {
                let pipeline = &pipeline;
                scope.spawn(move || {
                    (0..32)
                        .map(|i| {
                            let bits = ((i + t) % 8) as u128;
                            (bits, pipeline.get_pipeline_handle(&state(bits)))
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
    });

    let mut by_state: HashMap<u128, vk::Pipeline> = HashMap::new();
    for (bits, handle) in results {
        assert_ne!(handle, vk::Pipeline::null());
        assert_eq!(*by_state.entry(bits).or_insert(handle), handle);
    }
    assert_eq!(by_state.len(), 8);

    let states = pipeline.instance_states();
    let unique: HashSet<_> = states.iter().copied().collect();
    assert_eq!(states.len(), 8);
    assert_eq!(unique.len(), 8);
    assert_eq!(backend.live_count(), 8);
}

// ============================================================================
// Cleanup
// ============================================================================

#[test]
fn dropping_cache_releases_every_handle_once() {
    let backend = FakeBackend::new();
    let published = {
        let pipeline = pipeline(&backend);
        (0..4u128)
            .map(|bits| pipeline.get_pipeline_handle(&state(bits)))
            .collect::<HashSet<_>>()
    };

    let destroyed = backend.destroyed.lock().clone();
    let unique: HashSet<_> = destroyed.iter().copied().collect();
    assert_eq!(destroyed.len(), 4);
    assert_eq!(unique, published);
    assert_eq!(backend.layouts_created.load(Ordering::SeqCst), 1);
    assert_eq!(backend.layouts_destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn layout_outlives_cache_while_referenced() {
    let backend = FakeBackend::new();
    let pipeline = pipeline(&backend);
    pipeline.get_pipeline_handle(&state(0b01));
    let layout = Arc::clone(pipeline.layout());

    drop(pipeline);
    assert_eq!(backend.live_count(), 0);
    assert_eq!(backend.layouts_destroyed.load(Ordering::SeqCst), 0);

    drop(layout);
    assert_eq!(backend.layouts_destroyed.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Persistent state store
// ============================================================================

#[test]
fn published_state_seeds_later_compilations() {
    let backend = FakeBackend::new();
    let store = Arc::new(MemoryStateStore::new());
    let state_cache = Arc::new(PipelineStateCache::new(store.clone()));
    let shader = shader(2);

    {
        let pipeline = ComputePipeline::new(shader.clone(), backend.clone(), Some(state_cache.clone())).unwrap();
        pipeline.get_pipeline_handle(&state(0b01));
        assert_eq!(pipeline.stats().store_hits, 0);
    }
    assert_eq!(store.len(), 1);
    assert_eq!(
        store.lookup(shader.id(), &state(0b01)).unwrap(),
        Some(b"blob-1".to_vec()),
    );

    // A fresh cache for the same shader, as on the next run
    let pipeline = ComputePipeline::new(shader, backend.clone(), Some(state_cache)).unwrap();
    assert_ne!(pipeline.get_pipeline_handle(&state(0b01)), vk::Pipeline::null());
    assert_eq!(pipeline.stats().store_hits, 1);

    let seeded = backend.seeded_with.lock().clone();
    assert_eq!(seeded, vec![None, Some(b"blob-1".to_vec())]);
}

#[test]
fn async_store_writes_arrive_after_flush() {
    let backend = FakeBackend::new();
    let store = Arc::new(MemoryStateStore::new());
    let state_cache = Arc::new(PipelineStateCache::with_async_writes(store.clone()).unwrap());
    let pipeline = ComputePipeline::new(shader(2), backend, Some(state_cache.clone())).unwrap();

    for bits in 0..4u128 {
        pipeline.get_pipeline_handle(&state(bits));
    }
    state_cache.flush();
    assert_eq!(store.len(), 4);
}

#[test]
fn disk_store_seeds_compilation_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new();
    let shader = shader(2);

    {
        let store = Arc::new(DiskStateStore::new(dir.path()).unwrap());
        let state_cache = Arc::new(PipelineStateCache::with_async_writes(store).unwrap());
        let pipeline = ComputePipeline::new(shader.clone(), backend.clone(), Some(state_cache.clone())).unwrap();
        pipeline.get_pipeline_handle(&state(0b11));
        pipeline.get_pipeline_handle(&state(0b00));
        state_cache.flush();
    }

    let store = Arc::new(DiskStateStore::new(dir.path()).unwrap());
    let state_cache = Arc::new(PipelineStateCache::new(store));
    let pipeline = ComputePipeline::new(shader, backend.clone(), Some(state_cache)).unwrap();
    assert_ne!(pipeline.get_pipeline_handle(&state(0b11)), vk::Pipeline::null());
    assert_ne!(pipeline.get_pipeline_handle(&state(0b01)), vk::Pipeline::null());

    assert_eq!(pipeline.stats().store_hits, 1);
    let seeded = backend.seeded_with.lock().clone();
    assert_eq!(seeded[2], Some(b"blob-3".to_vec()));
    assert_eq!(seeded[3], None);
}

struct BrokenStore;

impl PipelineStateStore for BrokenStore {
    fn lookup(&self, _: ShaderId, _: &ComputePipelineStateInfo) -> Result<Option<Vec<u8>>> {
        Err(eyre!("disk unavailable"))
    }

    fn store(&self, _: ShaderId, _: &ComputePipelineStateInfo, _: &[u8]) -> Result<()> {
        Err(eyre!("disk full"))
    }
}

#[test]
fn store_failures_do_not_affect_handles() {
    let backend = FakeBackend::new();
    let state_cache = Arc::new(PipelineStateCache::new(Arc::new(BrokenStore)));
    let pipeline = ComputePipeline::new(shader(2), backend, Some(state_cache)).unwrap();

    let handle = pipeline.get_pipeline_handle(&state(0b10));
    assert_ne!(handle, vk::Pipeline::null());
    assert_eq!(pipeline.get_pipeline_handle(&state(0b10)), handle);
    assert_eq!(pipeline.stats().store_hits, 0);
}

// ============================================================================
// Pipeline context
// ============================================================================

#[test]
fn context_creates_one_cache_per_shader() {
    let backend = FakeBackend::new();
    let ctx = RenderPipelineContext::with_backend(backend.clone(), None);
    let a = shader(2);
    let b = shader(3);

    let pa = ctx.compute_pipeline(&a).unwrap();
    assert!(Arc::ptr_eq(&pa, &ctx.compute_pipeline(&a).unwrap()));
    let pb = ctx.compute_pipeline(&b).unwrap();
    assert!(!Arc::ptr_eq(&pa, &pb));
    assert_eq!(ctx.len(), 2);

    pa.get_pipeline_handle(&state(0));
    pb.get_pipeline_handle(&state(0));
    pb.get_pipeline_handle(&state(0));
    let stats = ctx.stats();
    assert_eq!(stats.compiled, 2);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.live, 2);
}

#[test]
fn context_retire_releases_handles() {
    let backend = FakeBackend::new();
    let ctx = RenderPipelineContext::with_backend(backend.clone(), None);
    let shader = shader(2);

    let pipeline = ctx.compute_pipeline(&shader).unwrap();
    pipeline.get_pipeline_handle(&state(0b01));
    drop(pipeline);

    assert!(ctx.retire(shader.id()));
    assert!(!ctx.retire(shader.id()));
    assert!(ctx.is_empty());
    assert_eq!(backend.live_count(), 0);
    assert_eq!(backend.layouts_destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn context_does_not_cache_failed_construction() {
    let backend = FakeBackend::failing_layout();
    let ctx = RenderPipelineContext::with_backend(backend, None);

    assert!(ctx.compute_pipeline(&shader(2)).is_err());
    assert!(ctx.is_empty());
}

#[test]
fn context_lookups_proceed_while_a_layout_is_built() {
    let (entered_tx, entered_rx) = flume::bounded(1);
    let (release_tx, release_rx) = flume::bounded(1);
    let backend = FakeBackend::gated(LayoutGate {
        slots: 3,
        entered: entered_tx,
        release: release_rx,
        timed_out: AtomicBool::new(false),
    });
    let ctx = RenderPipelineContext::with_backend(backend.clone(), None);
    let slow = shader(3);
    let fast = shader(2);

    std::thread::scope(|scope| {
        let worker = scope.spawn(|| ctx.compute_pipeline(&slow).unwrap());
        entered_rx.recv().unwrap();

        // Another shader is served while the first layout is still pending
        ctx.compute_pipeline(&fast).unwrap();
        release_tx.send(()).unwrap();
        worker.join().unwrap();
    });

    let gate = backend.layout_gate.as_ref().unwrap();
    assert!(!gate.timed_out.load(Ordering::SeqCst));
    assert_eq!(ctx.len(), 2);
}

#[test]
fn context_racing_creation_keeps_one_pipeline_per_shader() {
    const THREADS: usize = 8;

    let backend = FakeBackend::new();
    let ctx = RenderPipelineContext::with_backend(backend.clone(), None);
    let shader = shader(2);
    let barrier = Barrier::new(THREADS);

    let pipelines: Vec<Arc<ComputePipeline>> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    ctx.compute_pipeline(&shader).unwrap()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert!(pipelines.iter().all(|p| Arc::ptr_eq(p, &pipelines[0])));
    assert_eq!(ctx.len(), 1);
    // Layouts of losing pipelines are released right away
    let created = backend.layouts_created.load(Ordering::SeqCst);
    let destroyed = backend.layouts_destroyed.load(Ordering::SeqCst);
    assert_eq!(created - destroyed, 1);
}

// ============================================================================
// Property tests
// ============================================================================

proptest! {
    #[test]
    fn arbitrary_request_sequences_keep_one_instance_per_state(
        requests in proptest::collection::vec(0u128..16, 1..64)
    ) {
        let backend = FakeBackend::new();
        let pipeline = ComputePipeline::new(shader(4), backend.clone(), None).unwrap();
        let mut seen: HashMap<u128, vk::Pipeline> = HashMap::new();

        for bits in &requests {
            let handle = pipeline.get_pipeline_handle(&state(*bits));
            prop_assert_ne!(handle, vk::Pipeline::null());
            prop_assert_eq!(*seen.entry(*bits).or_insert(handle), handle);
        }

        let distinct: HashSet<_> = requests.iter().copied().collect();
        prop_assert_eq!(pipeline.instance_count(), distinct.len());
        prop_assert_eq!(backend.compile_count(), distinct.len());
        let handles: HashSet<_> = seen.values().copied().collect();
        prop_assert_eq!(handles.len(), distinct.len());
    }
}
