//! Environment-sourced run configuration.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::FetchError;

/// Portal login pair. Never logged; the `Debug` impl redacts both fields so
/// an accidental `{:?}` in an error chain cannot leak them.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"***")
            .field("password", &"***")
            .finish()
    }
}

/// Everything a retrieval run needs, resolved up front so a missing secret
/// fails before the browser is ever launched.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    /// Landing page of the portal.
    pub portal_url: String,
    /// Directory the browser drops downloads into; the artifact is expected
    /// here under `artifact_name`.
    pub download_dir: PathBuf,
    /// Directory receiving failure snapshots.
    pub debug_dir: PathBuf,
    /// Fixed filename the portal gives the exported spreadsheet.
    pub artifact_name: String,
    pub headless: bool,
    /// Containerized execution (selects the sandboxless launch profile).
    pub in_container: bool,
    /// Bound on total run time, seconds.
    pub overall_deadline_secs: u64,
}

impl Config {
    /// Read configuration from the environment (a `.env` file is honored in
    /// development). Missing secrets surface as a configuration error here,
    /// not as a cryptic mid-workflow timeout.
    pub fn from_env() -> Result<Self, FetchError> {
        dotenvy::dotenv().ok();

        let username = require_env("ESCREEN_USERNAME")?;
        let password = require_env("ESCREEN_PASSWORD")?;

        let download_dir = std::env::var("DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./downloads"));
        let debug_dir = std::env::var("DEBUG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./debug"));

        let headless = std::env::var("ESCREEN_HEADLESS")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Ok(Self {
            credentials: Credentials { username, password },
            portal_url: "https://www.myescreen.com/".to_string(),
            download_dir,
            debug_dir,
            artifact_name: "DrugTestSummaryReport_Total.xlsx".to_string(),
            headless,
            in_container: detect_container(),
            overall_deadline_secs: 600,
        })
    }

    /// Absolute path the artifact is expected at once the portal finishes
    /// the download.
    pub fn artifact_path(&self) -> PathBuf {
        self.download_dir.join(&self.artifact_name)
    }
}

fn require_env(name: &str) -> Result<String, FetchError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(FetchError::Configuration(name.to_string())),
    }
}

fn detect_container() -> bool {
    Path::new("/.dockerenv").exists()
        || std::env::var("RUNNING_IN_DOCKER")
            .map(|v| v == "true")
            .unwrap_or(false)
}
