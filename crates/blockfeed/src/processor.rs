use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eyre::WrapErr;
use tracing::{error, info, trace};

use blockfeed_core::{BlockProcessor, RawBlock};

/// Reference processor: tallies what it receives and checkpoints its height.
///
/// Blocks are counted, not parsed. The height is written to the state file on
/// flush so the next run resumes from where this one stopped.
pub struct TallyProcessor {
    height: u64,
    db_height: u64,
    blocks: u64,
    bytes: u64,
    state_file: Option<PathBuf>,
}

impl TallyProcessor {
    /// Resume from `state_file` if it exists, otherwise start right after
    /// genesis.
    pub async fn open(state_file: Option<PathBuf>) -> eyre::Result<Self> {
        let height = match &state_file {
            Some(path) => read_height(path).await?,
            None => 0,
        };
        Ok(Self {
            height,
            db_height: height,
            blocks: 0,
            bytes: 0,
            state_file,
        })
    }
}

#[async_trait]
impl BlockProcessor for TallyProcessor {
    fn height(&self) -> u64 {
        self.height
    }

    fn db_height(&self) -> u64 {
        self.db_height
    }

    async fn process_block(&mut self, block: RawBlock) {
        self.height += 1;
        self.blocks += 1;
        self.bytes += block.len() as u64;
        trace!(height = self.height, size = block.len(), "processed block");
    }

    async fn flush(&mut self) {
        info!(
            height = self.height,
            blocks = self.blocks,
            bytes = self.bytes,
            "flushing processed state"
        );
        if let Some(path) = &self.state_file {
            if let Err(err) = write_height(path, self.height).await {
                error!(path = %path.display(), error = %err, "failed to write state file");
                return;
            }
        }
        self.db_height = self.height;
    }
}

async fn read_height(path: &Path) -> eyre::Result<u64> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => content
            .trim()
            .parse()
            .wrap_err_with(|| format!("state file {} must hold a block height", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
        Err(err) => {
            Err(err).wrap_err_with(|| format!("read state file {}", path.display()))
        }
    }
}

/// Replace the state file atomically so a crash mid-write never leaves a
/// truncated height behind.
async fn write_height(path: &Path, height: u64) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, format!("{height}\n")).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time must be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("blockfeed-{tag}-{unique}.height"))
    }

    #[tokio::test]
    async fn missing_state_file_starts_from_zero() {
        let processor = TallyProcessor::open(Some(temp_path("missing")))
            .await
            .expect("missing file is fine");
        assert_eq!(processor.height(), 0);
        assert_eq!(processor.db_height(), 0);
    }

    #[tokio::test]
    async fn flush_checkpoints_height_for_next_run() {
        let path = temp_path("checkpoint");
        let mut processor = TallyProcessor::open(Some(path.clone())).await.expect("open");

        for _ in 0..3 {
            processor.process_block(RawBlock::new(vec![0; 285])).await;
        }
        assert_eq!(processor.height(), 3);
        assert_eq!(processor.db_height(), 0);

        processor.flush().await;
        assert_eq!(processor.db_height(), 3);

        let resumed = TallyProcessor::open(Some(path.clone())).await.expect("reopen");
        assert_eq!(resumed.height(), 3);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn corrupt_state_file_is_rejected() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "not a height").expect("state file must be writable");

        let err = TallyProcessor::open(Some(path.clone()))
            .await
            .err()
            .expect("garbage must not parse");
        assert!(err.to_string().contains("must hold a block height"));

        let _ = std::fs::remove_file(path);
    }
}
