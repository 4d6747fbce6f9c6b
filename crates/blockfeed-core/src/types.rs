use std::fmt;

// ==============================================================================
// Raw Block
// ==============================================================================

/// A serialized block exactly as the daemon returned it.
///
/// The cache never looks inside; only [`RawBlock::len`] matters to it, for
/// occupancy accounting and batch size estimation. Ownership passes to the
/// [`BlockProcessor`](crate::processor::BlockProcessor) when the block is
/// popped.
#[derive(Clone, PartialEq, Eq)]
pub struct RawBlock(Vec<u8>);

impl RawBlock {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// Blocks run to megabytes; print the size rather than the payload.
impl fmt::Debug for RawBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawBlock").field(&self.0.len()).finish()
    }
}
