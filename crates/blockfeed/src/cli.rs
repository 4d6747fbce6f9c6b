use std::path::PathBuf;

use clap::Parser;

use blockfeed_core::rpc::{RpcAuth, RpcEndpoint};
use blockfeed_core::CoreError;

/// Blockfeed — prefetch raw blocks from Bitcoin Core and feed them to a
/// processor in height order.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Bitcoin Core RPC URL.
    #[arg(long, default_value = "http://127.0.0.1:8332", env = "BLOCKFEED_RPC_URL")]
    pub rpc_url: String,

    /// RPC username (must be paired with --rpc-pass).
    #[arg(long, env = "BLOCKFEED_RPC_USER")]
    pub rpc_user: Option<String>,

    /// RPC password (must be paired with --rpc-user).
    #[arg(long, env = "BLOCKFEED_RPC_PASS")]
    pub rpc_pass: Option<String>,

    /// Bitcoin Core cookie file, used when no user/pass is given.
    #[arg(long, env = "BLOCKFEED_RPC_COOKIE_FILE")]
    pub rpc_cookie_file: Option<PathBuf>,

    /// Maximum outbound RPC requests per second (a batch counts as one).
    #[arg(long, env = "BLOCKFEED_RPC_REQUESTS_PER_SECOND")]
    pub rpc_requests_per_second: Option<u32>,

    /// Target size of the block prefetch cache, in MiB.
    #[arg(long, default_value = "10", env = "BLOCKFEED_CACHE_LIMIT_MB")]
    pub cache_limit_mb: usize,

    /// File holding the last processed height; read at startup and
    /// rewritten on shutdown. If omitted, syncing starts from genesis.
    #[arg(long, env = "BLOCKFEED_STATE_FILE")]
    pub state_file: Option<PathBuf>,
}

impl Cli {
    /// Daemon endpoint described by the RPC flags.
    pub fn rpc_endpoint(&self) -> Result<RpcEndpoint, CoreError> {
        let auth = RpcAuth::from_parts(
            self.rpc_user.clone(),
            self.rpc_pass.clone(),
            self.rpc_cookie_file.clone(),
        )?;
        Ok(RpcEndpoint {
            url: self.rpc_url.clone(),
            auth,
            requests_per_second: self.rpc_requests_per_second,
        })
    }
}
