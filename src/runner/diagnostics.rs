//! Forensic capture on step failure.
//!
//! Best effort only: each capture (markup, image, state report) is attempted
//! independently, failures are logged, and nothing raised here may replace
//! the error that triggered the capture.

use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::driver::traits::{DocScope, PortalDriver};
use crate::runner::state::RunState;

/// Snapshot the primary document (and the report frame, if it was ever
/// acquired) into `debug_dir`, plus a JSON report of step results. File
/// names carry the failing step so the post-mortem starts from the right
/// place.
pub async fn capture_failure(driver: &dyn PortalDriver, debug_dir: &Path, state: &RunState) {
    if let Err(e) = std::fs::create_dir_all(debug_dir) {
        log::warn!("cannot create debug dir {}: {}", debug_dir.display(), e);
        return;
    }

    let stamp = chrono::Utc::now().timestamp_millis();
    let slug = state
        .failed_step()
        .map(slugify)
        .unwrap_or_else(|| "run".to_string());
    let base = format!("err-{}-{}", slug, stamp);

    capture_context(driver, DocScope::Page, debug_dir, &base).await;
    if driver.report_frame_acquired() {
        capture_context(driver, DocScope::ReportFrame, debug_dir, &format!("{}-frame", base)).await;
    }

    let report_path = debug_dir.join(format!("run-{}.json", stamp));
    match serde_json::to_string_pretty(&state.to_report()) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&report_path, json) {
                log::warn!("state report write failed: {}", e);
            }
        }
        Err(e) => log::warn!("state report serialization failed: {}", e),
    }

    println!(
        "{} Saved debug snapshots under {}",
        "🧪".yellow(),
        debug_dir.display()
    );
}

/// Markup and image for one context, attempted independently.
async fn capture_context(driver: &dyn PortalDriver, scope: DocScope, dir: &Path, base: &str) {
    let html_path = dir.join(format!("{}.html", base));
    match driver.content(scope).await {
        Ok(markup) => {
            if let Err(e) = std::fs::write(&html_path, markup) {
                log::warn!("{} markup write failed: {}", scope.label(), e);
            }
        }
        Err(e) => log::warn!("{} markup capture failed: {:#}", scope.label(), e),
    }

    let png_path = image_path(dir, base);
    if let Err(e) = driver.screenshot(scope, &png_path, true).await {
        log::warn!("{} image capture failed: {:#}", scope.label(), e);
    }
}

fn image_path(dir: &Path, base: &str) -> PathBuf {
    dir.join(format!("{}.png", base))
}

fn slugify(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use tempfile::TempDir;

    fn failed_state() -> RunState {
        let mut state = RunState::new(&["enter password"]);
        state.start();
        state.current_step().unwrap().start();
        state.current_step().unwrap().fail("timed out".to_string());
        state.finish(Some("timed out".to_string()));
        state
    }

    fn files_with_ext(dir: &Path, ext: &str) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == ext).unwrap_or(false))
            .collect();
        found.sort();
        found
    }

    #[tokio::test]
    async fn test_markup_failure_still_writes_image() {
        let dir = TempDir::new().unwrap();
        let driver = FakeDriver::new();
        driver.fail_markup();

        capture_failure(&driver, dir.path(), &failed_state()).await;

        assert!(files_with_ext(dir.path(), "html").is_empty());
        assert_eq!(files_with_ext(dir.path(), "png").len(), 1);
        assert_eq!(files_with_ext(dir.path(), "json").len(), 1);
    }

    #[tokio::test]
    async fn test_total_capture_failure_completes() {
        let dir = TempDir::new().unwrap();
        let driver = FakeDriver::new();
        driver.fail_markup();
        driver.fail_screenshot();

        // Must not panic or error; the state report is still attempted.
        capture_failure(&driver, dir.path(), &failed_state()).await;
        assert_eq!(files_with_ext(dir.path(), "json").len(), 1);
    }

    #[tokio::test]
    async fn test_frame_captured_only_when_acquired() {
        let dir = TempDir::new().unwrap();
        let driver = FakeDriver::new();
        capture_failure(&driver, dir.path(), &failed_state()).await;
        assert_eq!(files_with_ext(dir.path(), "html").len(), 1);
        assert_eq!(files_with_ext(dir.path(), "png").len(), 1);

        let dir2 = TempDir::new().unwrap();
        let driver2 = FakeDriver::new();
        driver2.set_frame_present(true);
        driver2.acquire_report_frame(0).await.unwrap();
        capture_failure(&driver2, dir2.path(), &failed_state()).await;
        assert_eq!(files_with_ext(dir2.path(), "html").len(), 2);
        assert_eq!(files_with_ext(dir2.path(), "png").len(), 2);
    }

    #[tokio::test]
    async fn test_filenames_carry_failing_step() {
        let dir = TempDir::new().unwrap();
        let driver = FakeDriver::new();
        capture_failure(&driver, dir.path(), &failed_state()).await;

        let htmls = files_with_ext(dir.path(), "html");
        let name = htmls[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.contains("enter-password"), "got {}", name);
    }
}
