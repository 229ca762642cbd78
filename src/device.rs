//! Host-side device: block worker pool, resource limits and streams.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{BackendError, BackendResult};
use crate::kernels::THREADS_PER_WARP;

/// Environment override for the worker-thread count.
pub const ENV_NUM_THREADS: &str = "FP8_KERNELS_NUM_THREADS";

/// Device limits and worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Worker threads executing blocks; 0 lets rayon pick.
    pub num_threads: usize,
    pub max_threads_per_block: u32,
    /// Shared memory a kernel may use without opting in.
    pub max_shared_memory_per_block: usize,
    /// Shared memory a kernel may use after raising its dynamic limit.
    pub max_shared_memory_per_block_optin: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            max_threads_per_block: 1024,
            max_shared_memory_per_block: 48 * 1024,
            max_shared_memory_per_block_optin: 227 * 1024,
        }
    }
}

impl DeviceConfig {
    /// Defaults, with `FP8_KERNELS_NUM_THREADS` applied when set.
    pub fn from_env() -> BackendResult<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(ENV_NUM_THREADS) {
            config.num_threads = raw.trim().parse().map_err(|_| {
                BackendError::InvalidConfig(format!("{ENV_NUM_THREADS}={raw:?} is not a thread count"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BackendResult<()> {
        if self.max_threads_per_block == 0
            || self.max_threads_per_block as usize % THREADS_PER_WARP != 0
        {
            return Err(BackendError::InvalidConfig(format!(
                "max_threads_per_block {} must be a positive multiple of {}",
                self.max_threads_per_block, THREADS_PER_WARP
            )));
        }
        if self.max_shared_memory_per_block_optin < self.max_shared_memory_per_block {
            return Err(BackendError::InvalidConfig(format!(
                "opt-in shared memory {} below the default limit {}",
                self.max_shared_memory_per_block_optin, self.max_shared_memory_per_block
            )));
        }
        Ok(())
    }
}

struct DeviceInner {
    config: DeviceConfig,
    pool: rayon::ThreadPool,
}

/// Executes thread blocks on a dedicated rayon pool. Cheap to clone.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("config", &self.inner.config)
            .field("workers", &self.inner.pool.current_num_threads())
            .finish()
    }
}

impl Device {
    pub fn new(config: DeviceConfig) -> BackendResult<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|idx| format!("fp8-block-worker{idx}"))
            .build()?;
        log::debug!(
            "device ready: {} block workers, {} threads/block, {} B shared ({} B opt-in)",
            pool.current_num_threads(),
            config.max_threads_per_block,
            config.max_shared_memory_per_block,
            config.max_shared_memory_per_block_optin
        );
        Ok(Self {
            inner: Arc::new(DeviceInner { config, pool }),
        })
    }

    /// Device configured from the environment.
    pub fn from_env() -> BackendResult<Self> {
        Self::new(DeviceConfig::from_env()?)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    pub fn num_workers(&self) -> usize {
        self.inner.pool.current_num_threads()
    }

    pub fn new_stream(&self) -> Stream {
        static NEXT_STREAM_ID: AtomicUsize = AtomicUsize::new(0);
        Stream {
            device: self.clone(),
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            launch_lock: Arc::new(Mutex::new(())),
        }
    }

    pub(crate) fn install<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.inner.pool.install(f)
    }
}

/// In-order launch queue.
///
/// A launch holds the stream lock until every block has finished, so a
/// kernel observes all global writes of the kernels queued before it.
#[derive(Clone)]
pub struct Stream {
    device: Device,
    id: usize,
    launch_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("id", &self.id).finish()
    }
}

impl Stream {
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Wait for all queued launches.
    pub fn synchronize(&self) -> BackendResult<()> {
        drop(self.lock()?);
        Ok(())
    }

    pub(crate) fn lock(&self) -> BackendResult<MutexGuard<'_, ()>> {
        self.launch_lock
            .lock()
            .map_err(|_| BackendError::Device(format!("stream {} poisoned by a panicked launch", self.id)))
    }
}
