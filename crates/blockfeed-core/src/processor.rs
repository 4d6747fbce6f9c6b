//! Contract for the downstream consumer of fetched blocks.

use async_trait::async_trait;

use crate::types::RawBlock;

/// Applies blocks handed over by the cache, strictly in ascending height
/// order, and owns whatever durable state results.
///
/// Validation, reorg handling and persistence format are entirely the
/// implementation's business; the cache only needs the two heights to seed
/// and report its own progress.
#[async_trait]
pub trait BlockProcessor: Send {
    /// Height of the last block applied, including unflushed work.
    fn height(&self) -> u64;

    /// Height of the last block durably persisted.
    fn db_height(&self) -> u64;

    /// Apply the block following [`height`](Self::height).
    async fn process_block(&mut self, block: RawBlock);

    /// Persist everything applied so far.
    async fn flush(&mut self);
}
