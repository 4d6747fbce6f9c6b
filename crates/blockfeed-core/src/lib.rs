pub mod cache;
pub mod error;
pub mod processor;
pub mod rpc;
#[cfg(test)]
mod test_util;
pub mod types;

pub use cache::{BlockCache, CacheConfig};
pub use error::{CoreError, RpcError};
pub use processor::BlockProcessor;
pub use types::RawBlock;
