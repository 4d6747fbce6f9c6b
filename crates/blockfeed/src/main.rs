mod cli;
mod processor;

use std::sync::Arc;

use clap::Parser;
use eyre::WrapErr;
use tokio_util::sync::CancellationToken;

use blockfeed_core::rpc::{HttpTransport, RetryPolicy, RpcClient};
use blockfeed_core::{BlockCache, BlockProcessor, CacheConfig};

use crate::processor::TallyProcessor;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let endpoint = args.rpc_endpoint().context("read RPC settings")?;
    let transport = HttpTransport::new(endpoint).context("configure RPC transport")?;

    let shutdown = CancellationToken::new();
    let rpc = Arc::new(RpcClient::new(
        transport,
        RetryPolicy::default(),
        shutdown.clone(),
    ));

    let mut processor = TallyProcessor::open(args.state_file.clone())
        .await
        .context("open block processor")?;
    tracing::info!(
        height = processor.height(),
        db_height = processor.db_height(),
        "block processor ready"
    );

    let cache = Arc::new(
        BlockCache::new(
            rpc,
            CacheConfig::with_limit_mib(args.cache_limit_mb),
            processor.db_height(),
        )
        .context("configure block cache")?,
    );

    let signals = tokio::spawn(watch_signals(cache.clone()));

    tokio::join!(cache.catch_up(), cache.process_cache(&mut processor));

    signals.abort();
    tracing::info!(height = processor.height(), "stopped");
    Ok(())
}

/// Request a cache shutdown on the first SIGINT or SIGTERM.
async fn watch_signals(cache: Arc<BlockCache<HttpTransport>>) {
    let signame = wait_for_signal().await;
    cache.shutdown(signame).await;
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(error = %err, "cannot listen for SIGTERM; only SIGINT will stop");
            return ctrl_c().await;
        }
    };
    tokio::select! {
        name = ctrl_c() => name,
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for SIGINT");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
