//! Shared test helpers for `blockfeed-core` unit tests.
//!
//! The mock chain encodes each block's height in the first eight bytes of
//! both its hash and its body, so tests can check delivery order without
//! parsing real blocks.

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::BlockHash;

use crate::processor::BlockProcessor;
use crate::types::RawBlock;

// ==============================================================================
// Mock Chain
// ==============================================================================

pub fn mock_block_hash(height: u64) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_le_bytes());
    bytes[31] = 0xbf;
    BlockHash::from_byte_array(bytes)
}

pub fn height_from_hash(hash: &BlockHash) -> u64 {
    let bytes = hash.to_byte_array();
    u64::from_le_bytes(bytes[..8].try_into().expect("slice is eight bytes"))
}

/// A block body of `size` bytes (at least eight) tagged with `height`.
pub fn mock_block(height: u64, size: usize) -> RawBlock {
    let mut bytes = vec![0u8; size.max(8)];
    bytes[..8].copy_from_slice(&height.to_le_bytes());
    RawBlock::new(bytes)
}

pub fn block_height(block: &RawBlock) -> u64 {
    let bytes = block.as_bytes();
    u64::from_le_bytes(bytes[..8].try_into().expect("mock blocks are tagged"))
}

// ==============================================================================
// Recording Processor
// ==============================================================================

/// Processor double that remembers the height of every block it was handed
/// and how often it was flushed.
pub struct RecordingProcessor {
    pub height: u64,
    pub db_height: u64,
    pub processed: Vec<u64>,
    pub flushes: usize,
}

impl RecordingProcessor {
    pub fn at_height(height: u64) -> Self {
        Self {
            height,
            db_height: height,
            processed: Vec::new(),
            flushes: 0,
        }
    }
}

#[async_trait]
impl BlockProcessor for RecordingProcessor {
    fn height(&self) -> u64 {
        self.height
    }

    fn db_height(&self) -> u64 {
        self.db_height
    }

    async fn process_block(&mut self, block: RawBlock) {
        let height = block_height(&block);
        assert_eq!(height, self.height + 1, "blocks must arrive in order");
        self.height = height;
        self.processed.push(height);
    }

    async fn flush(&mut self) {
        self.db_height = self.height;
        self.flushes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_hash_survives_display_round_trip() {
        let hash = mock_block_hash(123_456);
        let parsed: BlockHash = hash.to_string().parse().expect("display form parses");
        assert_eq!(height_from_hash(&parsed), 123_456);
    }
}
