//! Download completion polling.
//!
//! The portal gives no download-finished signal, so the only success
//! indicator is the expected file materializing in the download directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FetchError;

/// Polling bounds for the expected artifact.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

/// Wait for the artifact to exist at `path`.
///
/// Checks at a fixed interval up to the attempt budget; succeeds as soon as
/// the file exists and no in-progress marker sits next to it. Exhausting the
/// budget yields `ArtifactMissing`. Content is not validated here.
pub async fn await_artifact(path: &Path, config: &PollConfig) -> Result<PathBuf, FetchError> {
    let partial = partial_marker(path);

    for attempt in 1..=config.max_attempts {
        if path.exists() && !partial.exists() {
            log::debug!("artifact present after {} checks", attempt);
            return Ok(path.to_path_buf());
        }
        if attempt < config.max_attempts {
            tokio::time::sleep(config.interval).await;
        }
    }

    Err(FetchError::ArtifactMissing {
        path: path.to_path_buf(),
        attempts: config.max_attempts,
    })
}

/// Chromium writes `<name>.crdownload` next to an in-flight download;
/// treating its presence as "not done yet" avoids grabbing a torso.
fn partial_marker(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".crdownload");
    path.with_file_name(name)
}
