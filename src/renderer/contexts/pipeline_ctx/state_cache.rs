//! Persistent pipeline state cache.
//!
//! Compiled variants are recorded per `(shader, binding mask)` together with
//! the driver's pipeline cache data, so that the next run can seed
//! compilation of the same variant. Everything here is advisory: a miss, a
//! corrupted entry or a failed write only costs compile time.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use bytemuck::{Pod, Zeroable};
use color_eyre::Result;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use crate::renderer::config::PipelineCacheConfig;
use crate::renderer::contexts::pipeline_ctx::binding_mask::{BindingMask, ComputePipelineStateInfo};
use crate::renderer::resources::shader::ShaderId;

pub trait PipelineStateStore: Send + Sync {
    fn lookup(
        &self,
        shader: ShaderId,
        state: &ComputePipelineStateInfo,
    ) -> Result<Option<Vec<u8>>>;

    fn store(
        &self,
        shader: ShaderId,
        state: &ComputePipelineStateInfo,
        blob: &[u8],
    ) -> Result<()>;
}

/// Keeps entries for the lifetime of the process only
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<FxHashMap<(ShaderId, ComputePipelineStateInfo), Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl PipelineStateStore for MemoryStateStore {
    fn lookup(
        &self,
        shader: ShaderId,
        state: &ComputePipelineStateInfo,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(&(shader, *state)).cloned())
    }

    fn store(
        &self,
        shader: ShaderId,
        state: &ComputePipelineStateInfo,
        blob: &[u8],
    ) -> Result<()> {
        self.entries.lock().insert((shader, *state), blob.to_vec());
        Ok(())
    }
}

const ENTRY_MAGIC: [u8; 4] = *b"RXSC";
const ENTRY_VERSION: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct EntryHeader {
    magic: [u8; 4],
    version: u32,
    shader: u64,
    mask: [u32; 4],
    len: u64,
    checksum: u64,
}

const HEADER_SIZE: usize = size_of::<EntryHeader>();

/// Stores one file per variant in a directory
pub struct DiskStateStore {
    dir: PathBuf,
}

impl DiskStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, shader: ShaderId, state: &ComputePipelineStateInfo) -> PathBuf {
        self.dir.join(format!("{}-{}.bin", shader, state.binding_mask))
    }

    fn decode(
        data: &[u8],
        shader: ShaderId,
        mask: &BindingMask,
    ) -> Option<Vec<u8>> {
        if data.len() < HEADER_SIZE {
            return None;
        }
        let header: EntryHeader = bytemuck::pod_read_unaligned(&data[..HEADER_SIZE]);
        let blob = &data[HEADER_SIZE..];

        let valid = header.magic == ENTRY_MAGIC
            && header.version == ENTRY_VERSION
            && header.shader == shader.0
            && header.mask == mask.words()
            && header.len == blob.len() as u64
            && header.checksum == xxhash_rust::xxh3::xxh3_64(blob);
        valid.then(|| blob.to_vec())
    }
}

impl PipelineStateStore for DiskStateStore {
    fn lookup(
        &self,
        shader: ShaderId,
        state: &ComputePipelineStateInfo,
    ) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(shader, state);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let blob = Self::decode(&data, shader, &state.binding_mask);
        if blob.is_none() {
            log::warn!("Ignoring corrupted pipeline state cache entry: {}", path.display());
        }
        Ok(blob)
    }

    fn store(
        &self,
        shader: ShaderId,
        state: &ComputePipelineStateInfo,
        blob: &[u8],
    ) -> Result<()> {
        let header = EntryHeader {
            magic: ENTRY_MAGIC,
            version: ENTRY_VERSION,
            shader: shader.0,
            mask: state.binding_mask.words(),
            len: blob.len() as u64,
            checksum: xxhash_rust::xxh3::xxh3_64(blob),
        };

        // Each writer gets its own temporary file, renamed into place once
        // complete, so readers never observe a partial entry
        let path = self.entry_path(shader, state);
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(bytemuck::bytes_of(&header))?;
        file.write_all(blob)?;
        file.as_file().sync_all()?;
        file.persist(&path)?;
        Ok(())
    }
}

enum WriterMessage {
    Write {
        shader: ShaderId,
        state: ComputePipelineStateInfo,
        blob: Vec<u8>,
    },
    Flush(flume::Sender<()>),
}

struct StateCacheWriter {
    sender: Option<flume::Sender<WriterMessage>>,
    worker: Option<JoinHandle<()>>,
}

impl StateCacheWriter {
    fn new(store: Arc<dyn PipelineStateStore>) -> Result<Self> {
        let (sender, receiver) = flume::unbounded::<WriterMessage>();
        let worker = std::thread::Builder::new()
            .name("raxa-state-cache".into())
            .spawn(move || {
                for message in receiver.iter() {
                    match message {
                        WriterMessage::Write { shader, state, blob } => {
                            write_entry(store.as_ref(), shader, &state, &blob);
                        }
                        WriterMessage::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    fn send(&self, message: WriterMessage) -> bool {
        self.sender
            .as_ref()
            .is_some_and(|sender| sender.send(message).is_ok())
    }
}

impl Drop for StateCacheWriter {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain pending writes and exit
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Pipeline state cache writer panicked");
            }
        }
    }
}

fn write_entry(
    store: &dyn PipelineStateStore,
    shader: ShaderId,
    state: &ComputePipelineStateInfo,
    blob: &[u8],
) {
    if let Err(err) = store.store(shader, state, blob) {
        log::warn!(
            "Failed to write pipeline state for shader {} [{}]: {}",
            shader,
            state.binding_mask,
            err
        );
    }
}

/// Best-effort front end over a [`PipelineStateStore`]
pub struct PipelineStateCache {
    store: Arc<dyn PipelineStateStore>,
    writer: Option<StateCacheWriter>,
}

impl PipelineStateCache {
    /// Writes are performed on the calling thread
    pub fn new(store: Arc<dyn PipelineStateStore>) -> Self {
        Self {
            store,
            writer: None,
        }
    }

    /// Writes are queued onto a dedicated thread
    pub fn with_async_writes(store: Arc<dyn PipelineStateStore>) -> Result<Self> {
        let writer = StateCacheWriter::new(Arc::clone(&store))?;
        Ok(Self {
            store,
            writer: Some(writer),
        })
    }

    /// Opens the on-disk cache described by `config`.
    ///
    /// Returns `None` when the cache is disabled or its directory cannot be
    /// used; pipelines are then compiled without persistence.
    pub fn from_config(config: &PipelineCacheConfig) -> Option<Arc<Self>> {
        let dir = config.resolve_state_cache_dir()?;
        let store = match DiskStateStore::new(&dir) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                log::warn!("Pipeline state cache disabled, cannot use {}: {}", dir.display(), err);
                return None;
            }
        };
        log::info!("Using pipeline state cache at {}", dir.display());

        let cache = if config.async_state_writes {
            match Self::with_async_writes(store.clone()) {
                Ok(cache) => cache,
                Err(err) => {
                    log::warn!("Falling back to synchronous state cache writes: {}", err);
                    Self::new(store)
                }
            }
        } else {
            Self::new(store)
        };
        Some(Arc::new(cache))
    }

    pub fn lookup(
        &self,
        shader: ShaderId,
        state: &ComputePipelineStateInfo,
    ) -> Option<Vec<u8>> {
        match self.store.lookup(shader, state) {
            Ok(blob) => blob,
            Err(err) => {
                log::debug!(
                    "Failed to read pipeline state for shader {} [{}]: {}",
                    shader,
                    state.binding_mask,
                    err
                );
                None
            }
        }
    }

    pub fn record(
        &self,
        shader: ShaderId,
        state: &ComputePipelineStateInfo,
        blob: Vec<u8>,
    ) {
        if let Some(writer) = self.writer.as_ref() {
            let message = WriterMessage::Write {
                shader,
                state: *state,
                blob,
            };
            if !writer.send(message) {
                log::debug!("Pipeline state cache writer is gone, dropping entry");
            }
        } else {
            write_entry(self.store.as_ref(), shader, state, &blob);
        }
    }

    /// Blocks until every queued write has reached the store
    pub fn flush(&self) {
        let Some(writer) = self.writer.as_ref() else {
            return;
        };
        let (done_tx, done_rx) = flume::bounded(1);
        if writer.send(WriterMessage::Flush(done_tx)) {
            let _ = done_rx.recv();
        }
    }
}
