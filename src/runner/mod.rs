pub mod banner;
pub mod diagnostics;
pub mod download;
pub mod executor;
pub mod state;

use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use crate::driver::traits::PortalDriver;
use crate::driver::web::{WebDriver, WebDriverConfig};
use crate::error::FetchError;
use crate::utils::config::Config;
use executor::StepExecutor;

/// Run the whole retrieval job against the live portal.
pub async fn run(config: &Config) -> Result<PathBuf> {
    let driver_config = WebDriverConfig {
        headless: config.headless,
        in_container: config.in_container,
        download_dir: config.download_dir.clone(),
        ..Default::default()
    };

    println!("{} Launching browser…", "🌐".blue());
    let driver = WebDriver::launch(driver_config).await?;
    println!("{} Browser launched", "✅".green());

    run_with_driver(&driver, config).await
}

/// Drive the workflow with an already-launched driver.
///
/// Owns the run lifecycle: the sequence executes under the overall deadline,
/// failure triggers diagnostic capture, and the driver is released exactly
/// once on every exit path (success, step failure, or deadline).
pub async fn run_with_driver(driver: &dyn PortalDriver, config: &Config) -> Result<PathBuf> {
    let mut executor = StepExecutor::new(driver, config);
    let outcome = run_bounded(&mut executor, config).await;

    if let Err(err) = &outcome {
        println!("{} Retrieval failed: {}", "❌".red().bold(), err);
        diagnostics::capture_failure(driver, &config.debug_dir, &executor.state).await;
    }

    if let Err(close_err) = driver.close().await {
        // Cleanup noise must not replace the run's real outcome.
        log::warn!("browser close failed: {:#}", close_err);
    }

    outcome.map_err(Into::into)
}

/// Overall runtime bound around the whole sequence. Per-step timeouts are
/// the primary guard; this catches a run that wedges between them.
async fn run_bounded(
    executor: &mut StepExecutor<'_>,
    config: &Config,
) -> Result<PathBuf, FetchError> {
    let deadline = Duration::from_secs(config.overall_deadline_secs);
    match tokio::time::timeout(deadline, executor.run()).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::DeadlineExceeded(config.overall_deadline_secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use crate::driver::traits::DocScope;
    use crate::runner::executor::selectors;
    use crate::runner::executor::test_support::{script_happy_portal, test_config};
    use std::path::Path;
    use tempfile::TempDir;

    fn snapshot_counts(debug_dir: &Path) -> (usize, usize, usize) {
        let mut html = 0;
        let mut png = 0;
        let mut frame = 0;
        for entry in std::fs::read_dir(debug_dir).unwrap().filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".html") {
                html += 1;
            }
            if name.ends_with(".png") {
                png += 1;
            }
            if name.contains("-frame") {
                frame += 1;
            }
        }
        (html, png, frame)
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_success() {
        let downloads = TempDir::new().unwrap();
        let debug = TempDir::new().unwrap();
        let config = test_config(downloads.path(), debug.path());
        let driver = FakeDriver::new();
        script_happy_portal(&driver, &config.artifact_path());

        let artifact = run_with_driver(&driver, &config).await.unwrap();

        assert_eq!(artifact, config.artifact_path());
        assert!(artifact.exists());
        assert_eq!(driver.close_count(), 1);
        // No failure, no snapshots.
        assert_eq!(std::fs::read_dir(debug.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_password_timeout() {
        let downloads = TempDir::new().unwrap();
        let debug = TempDir::new().unwrap();
        let config = test_config(downloads.path(), debug.path());
        // Portal renders the sign-in field and nothing else.
        let driver = FakeDriver::new();
        driver.add_present(DocScope::Page, selectors::SIGN_IN_INPUT);

        let err = run_with_driver(&driver, &config).await.unwrap_err();
        let fetch_err = err.downcast::<FetchError>().unwrap();
        assert!(matches!(fetch_err, FetchError::StepTimeout { .. }));

        // Exactly one markup+image pair, primary document only; the frame
        // was never acquired.
        let (html, png, frame) = snapshot_counts(debug.path());
        assert_eq!(html, 1);
        assert_eq!(png, 1);
        assert_eq!(frame, 0);
        assert_eq!(driver.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_snapshots_once_frame_acquired() {
        let downloads = TempDir::new().unwrap();
        let debug = TempDir::new().unwrap();
        let config = test_config(downloads.path(), debug.path());
        // Everything works until the run button, which never renders.
        let variant = FakeDriver::new();
        variant.add_present(DocScope::Page, selectors::SIGN_IN_INPUT);
        variant.add_present(DocScope::Page, selectors::PASSWORD_INPUT);
        variant.add_present(DocScope::Page, selectors::NAV_LINK);
        variant.set_texts(DocScope::Page, selectors::NAV_LINK, &["Reports"]);
        variant.add_present(DocScope::Page, selectors::REPORT_LINK);
        variant.set_texts(
            DocScope::Page,
            selectors::REPORT_LINK,
            &["Drug Test Summary Report"],
        );
        variant.set_frame_present(true);
        variant.add_present(DocScope::ReportFrame, selectors::VIEW_ALL);
        variant.add_present(DocScope::ReportFrame, selectors::DATE_START);

        let err = run_with_driver(&variant, &config).await.unwrap_err();
        assert!(err.downcast_ref::<FetchError>().is_some());

        // Both contexts snapshotted: two pairs, two of them frame files.
        let (html, png, frame) = snapshot_counts(debug.path());
        assert_eq!(html, 2);
        assert_eq!(png, 2);
        assert_eq!(frame, 2);
        assert_eq!(variant.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_once_even_when_capture_fails() {
        let downloads = TempDir::new().unwrap();
        let debug = TempDir::new().unwrap();
        let config = test_config(downloads.path(), debug.path());
        let driver = FakeDriver::new();
        driver.fail_markup();
        driver.fail_screenshot();
        // Nothing renders; the first wait fails and capture can save nothing.

        let err = run_with_driver(&driver, &config).await.unwrap_err();
        assert!(err.downcast_ref::<FetchError>().is_some());
        assert_eq!(driver.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_deadline_bounds_the_run() {
        let downloads = TempDir::new().unwrap();
        let debug = TempDir::new().unwrap();
        let mut config = test_config(downloads.path(), debug.path());
        // Shorter than the first fixed settle pause in the sequence.
        config.overall_deadline_secs = 1;
        let driver = FakeDriver::new();
        script_happy_portal(&driver, &config.artifact_path());

        let err = run_with_driver(&driver, &config).await.unwrap_err();
        let fetch_err = err.downcast::<FetchError>().unwrap();
        assert!(matches!(fetch_err, FetchError::DeadlineExceeded(1)));
        assert_eq!(driver.close_count(), 1);
    }
}
