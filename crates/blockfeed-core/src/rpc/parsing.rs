//! Decoders for the `result` payloads of the daemon methods the cache uses.
//!
//! Failures are plain strings: the client treats an undecodable result like
//! any other daemon error and resends the call.

use bitcoin::hex::FromHex;
use bitcoin::BlockHash;

use crate::types::RawBlock;

pub(super) fn parse_block_count(raw: serde_json::Value) -> Result<u64, String> {
    raw.as_u64()
        .ok_or_else(|| format!("invalid getblockcount result: {raw}"))
}

pub(super) fn parse_block_hash(raw: serde_json::Value) -> Result<BlockHash, String> {
    let hex = raw
        .as_str()
        .ok_or_else(|| format!("invalid getblockhash result: {raw}"))?;
    hex.parse()
        .map_err(|e| format!("invalid blockhash `{hex}`: {e}"))
}

pub(super) fn parse_raw_block(raw: serde_json::Value) -> Result<RawBlock, String> {
    let hex = raw
        .as_str()
        .ok_or_else(|| "invalid getblock result: expected hex string".to_owned())?;
    Vec::<u8>::from_hex(hex)
        .map(RawBlock::new)
        .map_err(|e| format!("invalid raw block hex: {e}"))
}
