use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::processor::BlockProcessor;
use crate::rpc::retry::pause;
use crate::rpc::{RpcClient, Transport};
use crate::types::RawBlock;

pub const MIB: usize = 1024 * 1024;

// ==============================================================================
// Configuration
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Target ceiling for the total size of blocks waiting to be processed.
    pub limit_bytes: usize,
    /// Fewest blocks requested per round, whatever the size estimate says.
    pub min_batch: u64,
    /// Most blocks requested per round, to keep batch requests reasonable.
    pub max_batch: u64,
    /// Number of recent block sizes averaged for the estimate.
    pub size_window: usize,
    /// Pause between producer rounds and between consumer drains.
    pub poll_interval: Duration,
    /// Minimum spacing of producer progress log lines.
    pub progress_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            limit_bytes: 10 * MIB,
            min_batch: 10,
            max_batch: 4000,
            size_window: 50,
            poll_interval: Duration::from_secs(1),
            progress_interval: Duration::from_secs(15),
        }
    }
}

impl CacheConfig {
    pub fn with_limit_mib(limit_mib: usize) -> Self {
        Self {
            limit_bytes: limit_mib.saturating_mul(MIB),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.limit_bytes == 0 {
            return Err(CoreError::Config("cache limit must be non-zero".into()));
        }
        if self.min_batch == 0 || self.max_batch == 0 {
            return Err(CoreError::Config("batch bounds must be non-zero".into()));
        }
        if self.min_batch > self.max_batch {
            return Err(CoreError::Config(format!(
                "min batch {} exceeds max batch {}",
                self.min_batch, self.max_batch
            )));
        }
        if self.size_window == 0 {
            return Err(CoreError::Config("size window must be non-zero".into()));
        }
        Ok(())
    }
}

// ==============================================================================
// Size Tracker
// ==============================================================================

/// Rolling window of recently fetched block sizes.
///
/// Only feeds the batch size estimate; nothing depends on it for
/// correctness.
#[derive(Debug, Clone)]
pub struct SizeTracker {
    recent: VecDeque<usize>,
    capacity: usize,
    average: usize,
}

impl SizeTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(capacity),
            capacity,
            average: 0,
        }
    }

    pub fn record(&mut self, sizes: impl IntoIterator<Item = usize>) {
        self.recent.extend(sizes);
        while self.recent.len() > self.capacity {
            self.recent.pop_front();
        }
        if !self.recent.is_empty() {
            self.average = self.recent.iter().sum::<usize>() / self.recent.len();
        }
    }

    /// Truncated mean of the window, or 0 before any block was seen.
    pub fn average(&self) -> usize {
        self.average
    }

    /// How many blocks of average size fit in `room` bytes, never less than
    /// `floor`. With no history the floor is all there is to go on.
    pub fn prefill_count(&self, room: usize, floor: u64) -> u64 {
        let estimate = match self.average {
            0 => 0,
            average => (room / average) as u64,
        };
        estimate.max(floor)
    }
}

// ==============================================================================
// Buffer
// ==============================================================================

/// Fetched blocks awaiting processing, highest height at the front.
///
/// The producer pushes whole batches onto the front; the consumer pops the
/// lowest pending height off the back. Every batch is strictly above what is
/// already buffered, so the back always holds the next block in sequence.
#[derive(Debug, Default)]
struct Buffer {
    blocks: VecDeque<RawBlock>,
    used: usize,
}

impl Buffer {
    /// `batch` is height-ascending, as fetched.
    fn prepend(&mut self, batch: Vec<RawBlock>) {
        self.blocks.reserve(batch.len());
        for block in batch {
            self.used += block.len();
            self.blocks.push_front(block);
        }
    }

    fn pop_oldest(&mut self) -> Option<RawBlock> {
        let block = self.blocks.pop_back()?;
        self.used -= block.len();
        Some(block)
    }

    fn clear(&mut self) {
        self.blocks.clear();
        self.used = 0;
    }
}

#[derive(Debug)]
struct CacheState {
    buffer: Buffer,
    sizes: SizeTracker,
}

/// Spaces producer progress lines at least `interval` apart.
struct ProgressLog {
    interval: Duration,
    last: Option<Instant>,
    reported_height: u64,
}

impl ProgressLog {
    fn new(interval: Duration, start_height: u64) -> Self {
        Self {
            interval,
            last: None,
            reported_height: start_height,
        }
    }

    /// Blocks fetched since the previous line, if a line is due now.
    fn due(&mut self, fetched: u64) -> Option<u64> {
        let count = fetched.saturating_sub(self.reported_height);
        let ready = self.last.map_or(true, |at| at.elapsed() >= self.interval);
        if !ready || count == 0 {
            return None;
        }
        self.last = Some(Instant::now());
        self.reported_height = fetched;
        Some(count)
    }
}

// ==============================================================================
// Block Cache
// ==============================================================================

/// Outcome of one producer round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefill {
    /// Cache is over its limit; check again after a pause.
    Wait,
    /// A batch was added; go again after a pause.
    Continue,
    /// Caught up with the daemon, or shutting down.
    Done,
}

/// Prefetches blocks from the daemon ahead of the processor.
///
/// Shared behind `Arc` by two long-running tasks: [`catch_up`] fills the
/// buffer up to [`CacheConfig::limit_bytes`], and [`process_cache`] drains it
/// into a [`BlockProcessor`] in ascending height order. Both stop once the
/// shutdown token carried by the RPC client fires.
///
/// [`catch_up`]: BlockCache::catch_up
/// [`process_cache`]: BlockCache::process_cache
pub struct BlockCache<T> {
    rpc: Arc<RpcClient<T>>,
    config: CacheConfig,
    shutdown: CancellationToken,
    state: Mutex<CacheState>,
    fetched_height: AtomicU64,
    daemon_height: AtomicU64,
}

impl<T: Transport> BlockCache<T> {
    /// `start_height` is the processor's persisted height; fetching resumes
    /// right above it.
    pub fn new(
        rpc: Arc<RpcClient<T>>,
        config: CacheConfig,
        start_height: u64,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let shutdown = rpc.shutdown_token().clone();
        let sizes = SizeTracker::new(config.size_window);
        Ok(Self {
            rpc,
            config,
            shutdown,
            state: Mutex::new(CacheState {
                buffer: Buffer::default(),
                sizes,
            }),
            fetched_height: AtomicU64::new(start_height),
            daemon_height: AtomicU64::new(0),
        })
    }

    /// Highest height claimed by the producer so far.
    pub fn fetched_height(&self) -> u64 {
        self.fetched_height.load(Ordering::Acquire)
    }

    /// Daemon tip as of the last producer round.
    pub fn daemon_height(&self) -> u64 {
        self.daemon_height.load(Ordering::Acquire)
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Total bytes of buffered blocks.
    pub async fn cache_used(&self) -> usize {
        self.state.lock().await.buffer.used
    }

    pub async fn cached_blocks(&self) -> usize {
        self.state.lock().await.buffer.blocks.len()
    }

    /// Stop both loops and drop every block not yet handed over. The dropped
    /// range is fetched again on the next start, from the processor's
    /// persisted height.
    pub async fn shutdown(&self, reason: &str) {
        warn!(reason, "received stop request, preparing to shut down");
        self.shutdown.cancel();
        self.state.lock().await.buffer.clear();
    }

    // ==========================================================================
    // Producer
    // ==========================================================================

    /// Keep the buffer topped up until the daemon tip is reached or shutdown
    /// is requested.
    pub async fn catch_up(&self) {
        info!(
            cache_limit_mib = self.config.limit_bytes / MIB,
            "catching up, block cache limit {}MB...",
            self.config.limit_bytes / MIB
        );

        let mut progress = ProgressLog::new(self.config.progress_interval, self.fetched_height());
        loop {
            if self.prefill_round().await == Prefill::Done {
                break;
            }

            let fetched = self.fetched_height();
            if let Some(count) = progress.due(fetched) {
                info!(
                    blocks = count,
                    fetched_height = fetched,
                    daemon_height = self.daemon_height(),
                    "prefilled blocks"
                );
            }

            if pause(&self.shutdown, self.config.poll_interval).await.is_err() {
                break;
            }
        }

        if !self.is_stopping() {
            info!(
                daemon_height = self.daemon_height(),
                "caught up to height {}",
                self.daemon_height()
            );
        }
    }

    /// One producer step: check backpressure, refresh the tip, then fetch
    /// and buffer the next batch.
    pub async fn prefill_round(&self) -> Prefill {
        if self.is_stopping() {
            return Prefill::Done;
        }

        let (used, prefill) = {
            let state = self.state.lock().await;
            let used = state.buffer.used;
            let room = self.config.limit_bytes.saturating_sub(used);
            (used, state.sizes.prefill_count(room, self.config.min_batch))
        };
        if used > self.config.limit_bytes {
            return Prefill::Wait;
        }

        // RPC calls only fail once shutdown has been requested.
        let Ok(daemon_height) = self.rpc.get_block_count().await else {
            return Prefill::Done;
        };
        self.daemon_height.store(daemon_height, Ordering::Release);

        let fetched = self.fetched_height();
        let count = daemon_height
            .saturating_sub(fetched)
            .min(self.config.max_batch)
            .min(prefill);
        if count == 0 || self.is_stopping() {
            return Prefill::Done;
        }

        let first = fetched + 1;
        let Ok(hashes) = self.rpc.get_block_hashes(first, count).await else {
            return Prefill::Done;
        };
        self.fetched_height.store(fetched + count, Ordering::Release);
        if self.is_stopping() {
            return Prefill::Done;
        }

        let Ok(blocks) = self.rpc.get_raw_blocks(&hashes).await else {
            return Prefill::Done;
        };
        let sizes: Vec<usize> = blocks.iter().map(RawBlock::len).collect();

        let mut state = self.state.lock().await;
        // Checked under the lock so a concurrent `shutdown` cannot clear the
        // buffer before this batch lands in it.
        if self.is_stopping() {
            debug!(first, count, "discarding fetched batch on shutdown");
            return Prefill::Done;
        }
        state.buffer.prepend(blocks);
        state.sizes.record(sizes);
        debug!(
            first,
            count,
            cache_used = state.buffer.used,
            average_size = state.sizes.average(),
            "buffered batch"
        );
        Prefill::Continue
    }

    // ==========================================================================
    // Consumer
    // ==========================================================================

    /// Hand buffered blocks to `processor` in height order until shutdown,
    /// then flush it once.
    pub async fn process_cache<P: BlockProcessor + ?Sized>(&self, processor: &mut P) {
        while !self.is_stopping() {
            if pause(&self.shutdown, self.config.poll_interval).await.is_err() {
                break;
            }
            while let Some(block) = self.pop_next().await {
                processor.process_block(block).await;
                // Let the producer in between blocks.
                tokio::task::yield_now().await;
            }
        }

        self.state.lock().await.buffer.clear();
        processor.flush().await;
        info!(height = processor.height(), "block processor flushed");
    }

    async fn pop_next(&self) -> Option<RawBlock> {
        if self.is_stopping() {
            return None;
        }
        self.state.lock().await.buffer.pop_oldest()
    }
}
