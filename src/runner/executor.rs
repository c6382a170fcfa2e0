//! The ordered retrieval sequence.
//!
//! One canonical pass over the portal: login, navigate to the summary
//! report, configure the date window inside the embedded report document,
//! run the report, trigger the download, and wait for the file. Steps run
//! strictly in order; the first unrecoverable failure aborts the run (the
//! portal holds server-side state mid-sequence, so replaying a step is not
//! safe).

use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;

use crate::driver::traits::{DocScope, PortalDriver, TextMatch};
use crate::error::FetchError;
use crate::runner::banner::{self, OverlayConfig};
use crate::runner::download::{self, PollConfig};
use crate::runner::state::RunState;
use crate::utils::config::Config;
use crate::utils::dates;

/// Selectors pinned to the current portal markup.
pub(crate) mod selectors {
    pub const SIGN_IN_INPUT: &str = "input#signInName";
    pub const PASSWORD_INPUT: &str = "input[type=\"password\"]";
    pub const NAV_LINK: &str = "div.mainNavLink";
    pub const REPORT_LINK: &str = "a[target=\"mainFrame\"]";
    pub const VIEW_ALL: &str = "input#btnViewAll";
    pub const DATE_START: &str = "input#txtStart";
    pub const RUN_BUTTON: &str = "input#cmdRun";
    /// Older portal builds render the download trigger as an inbox icon…
    pub const DOWNLOAD_ICON: &str = "i.abt-icon.icon-Inbox";
    /// …newer ones as a titled link. Both are probed.
    pub const DOWNLOAD_TITLE: &str = ".download-title";
}

pub const REPORTS_MENU_LABEL: &str = "Reports";
pub const SUMMARY_REPORT_LABEL: &str = "Drug Test Summary Report";
pub const DOWNLOAD_LINK_LABEL: &str = "Download";

/// Per-step bounds. The waits are hard limits that fail the step; the
/// settle values are deliberate fixed pauses where the portal exposes no
/// completion signal, and are never skipped even on fast networks.
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub navigation_ms: u64,
    pub login_field_ms: u64,
    pub element_ms: u64,
    /// Budget for each of the two download-control probes.
    pub download_probe_ms: u64,
    pub menu_settle_ms: u64,
    pub report_settle_ms: u64,
    pub view_all_settle_ms: u64,
    pub date_settle_ms: u64,
    /// Longest pause in the sequence: server-side report generation.
    pub generation_settle_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_ms: 60_000,
            login_field_ms: 30_000,
            element_ms: 30_000,
            download_probe_ms: 15_000,
            menu_settle_ms: 3_000,
            report_settle_ms: 5_000,
            view_all_settle_ms: 5_000,
            date_settle_ms: 2_000,
            generation_settle_ms: 10_000,
        }
    }
}

impl Timeouts {
    /// All settle pauses collapsed; used by tests that exercise the
    /// sequence against a scripted driver.
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            navigation_ms: 100,
            login_field_ms: 100,
            element_ms: 100,
            download_probe_ms: 100,
            menu_settle_ms: 0,
            report_settle_ms: 0,
            view_all_settle_ms: 0,
            date_settle_ms: 0,
            generation_settle_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepAction {
    Navigate,
    DismissOverlay,
    SubmitUsername,
    SubmitPassword,
    OpenReportsMenu,
    OpenSummaryReport,
    AcquireFrame,
    ShowAllRows,
    SetStartDate,
    RunReport,
    TriggerDownload,
    AwaitArtifact,
}

/// One ordered unit of work: a label for operators and diagnostics, the
/// document it targets, what it does, and how long it may wait. Steps have
/// no identity beyond their position.
struct Step {
    label: &'static str,
    scope: DocScope,
    action: StepAction,
    timeout_ms: u64,
    settle_ms: u64,
}

fn step_plan(t: &Timeouts, overlay: &OverlayConfig) -> Vec<Step> {
    use StepAction::*;
    vec![
        Step {
            label: "open landing page",
            scope: DocScope::Page,
            action: Navigate,
            timeout_ms: t.navigation_ms,
            settle_ms: 0,
        },
        Step {
            label: "dismiss consent overlay",
            scope: DocScope::Page,
            action: DismissOverlay,
            timeout_ms: overlay.trigger_timeout_ms,
            settle_ms: 0,
        },
        Step {
            label: "enter username",
            scope: DocScope::Page,
            action: SubmitUsername,
            timeout_ms: t.login_field_ms,
            settle_ms: 0,
        },
        Step {
            label: "enter password",
            scope: DocScope::Page,
            action: SubmitPassword,
            timeout_ms: t.navigation_ms,
            settle_ms: 0,
        },
        Step {
            label: "open reports menu",
            scope: DocScope::Page,
            action: OpenReportsMenu,
            timeout_ms: t.element_ms,
            settle_ms: t.menu_settle_ms,
        },
        Step {
            label: "dismiss consent overlay",
            scope: DocScope::Page,
            action: DismissOverlay,
            timeout_ms: overlay.trigger_timeout_ms,
            settle_ms: 0,
        },
        Step {
            label: "open summary report",
            scope: DocScope::Page,
            action: OpenSummaryReport,
            timeout_ms: t.element_ms,
            settle_ms: t.report_settle_ms,
        },
        Step {
            label: "dismiss consent overlay",
            scope: DocScope::Page,
            action: DismissOverlay,
            timeout_ms: overlay.trigger_timeout_ms,
            settle_ms: 0,
        },
        Step {
            label: "acquire report frame",
            scope: DocScope::ReportFrame,
            action: AcquireFrame,
            timeout_ms: t.element_ms,
            settle_ms: 0,
        },
        Step {
            label: "show all report rows",
            scope: DocScope::ReportFrame,
            action: ShowAllRows,
            timeout_ms: t.element_ms,
            settle_ms: t.view_all_settle_ms,
        },
        // The View-All click reloads the embedded document; the previous
        // frame context is invalid from here on and must be re-resolved
        // before any further frame work.
        Step {
            label: "reacquire report frame",
            scope: DocScope::ReportFrame,
            action: AcquireFrame,
            timeout_ms: t.element_ms,
            settle_ms: 0,
        },
        Step {
            label: "set report start date",
            scope: DocScope::ReportFrame,
            action: SetStartDate,
            timeout_ms: t.element_ms,
            settle_ms: t.date_settle_ms,
        },
        Step {
            label: "run report",
            scope: DocScope::ReportFrame,
            action: RunReport,
            timeout_ms: t.element_ms,
            settle_ms: t.generation_settle_ms,
        },
        Step {
            label: "trigger download",
            scope: DocScope::ReportFrame,
            action: TriggerDownload,
            timeout_ms: t.download_probe_ms,
            settle_ms: 0,
        },
        Step {
            label: "await report file",
            scope: DocScope::Page,
            action: AwaitArtifact,
            timeout_ms: 0,
            settle_ms: 0,
        },
    ]
}

/// Deliberate fixed pause. The portal gives no completion signal at these
/// points; if it ever grows one, this is the only place to swap it in.
async fn settle(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

pub struct StepExecutor<'a> {
    driver: &'a dyn PortalDriver,
    config: &'a Config,
    timeouts: Timeouts,
    overlay: OverlayConfig,
    poll: PollConfig,
    pub state: RunState,
}

impl<'a> StepExecutor<'a> {
    pub fn new(driver: &'a dyn PortalDriver, config: &'a Config) -> Self {
        Self::with_tuning(
            driver,
            config,
            Timeouts::default(),
            OverlayConfig::default(),
            PollConfig::default(),
        )
    }

    pub fn with_tuning(
        driver: &'a dyn PortalDriver,
        config: &'a Config,
        timeouts: Timeouts,
        overlay: OverlayConfig,
        poll: PollConfig,
    ) -> Self {
        let labels: Vec<&str> = step_plan(&timeouts, &overlay)
            .iter()
            .map(|s| s.label)
            .collect();
        Self {
            driver,
            config,
            timeouts,
            overlay,
            poll,
            state: RunState::new(&labels),
        }
    }

    /// Run the sequence to completion. Returns the artifact path on success;
    /// the first failing step aborts the run.
    pub async fn run(&mut self) -> Result<PathBuf, FetchError> {
        let plan = step_plan(&self.timeouts, &self.overlay);
        self.state.start();

        for step in &plan {
            if let Some(s) = self.state.current_step() {
                s.start();
            }
            println!("{} {}", "▶".green().bold(), step.label);

            match self.execute(step).await {
                Ok(()) => {
                    if let Some(s) = self.state.current_step() {
                        s.pass();
                    }
                    settle(step.settle_ms).await;
                    self.state.advance();
                }
                Err(err) => {
                    let message = err.to_string();
                    if let Some(s) = self.state.current_step() {
                        s.fail(message.clone());
                    }
                    self.state.finish(Some(message));
                    return Err(err);
                }
            }
        }

        self.state.finish(None);
        Ok(self.config.artifact_path())
    }

    async fn execute(&self, step: &Step) -> Result<(), FetchError> {
        use StepAction::*;
        match step.action {
            Navigate => {
                self.driver
                    .goto(&self.config.portal_url, step.timeout_ms)
                    .await?;
                Ok(())
            }

            DismissOverlay => {
                banner::dismiss_overlay(self.driver, &self.overlay).await?;
                Ok(())
            }

            SubmitUsername => {
                self.require(step, selectors::SIGN_IN_INPUT).await?;
                self.driver
                    .type_text(
                        step.scope,
                        selectors::SIGN_IN_INPUT,
                        &self.config.credentials.username,
                    )
                    .await?;
                // The auth flow is JS-driven; a synthetic Enter advances it
                // where a form submit would not.
                self.driver.press_key("Enter").await?;
                Ok(())
            }

            SubmitPassword => {
                // The password field appears only after the username round
                // trip, so it gets the login-field bound, while the settle
                // after submission gets the longer navigation bound.
                if !self
                    .driver
                    .wait_for(
                        step.scope,
                        selectors::PASSWORD_INPUT,
                        self.timeouts.login_field_ms,
                    )
                    .await?
                {
                    return Err(FetchError::StepTimeout {
                        step: step.label.to_string(),
                        what: format!("'{}' in {}", selectors::PASSWORD_INPUT, step.scope.label()),
                        timeout_ms: self.timeouts.login_field_ms,
                    });
                }
                self.driver
                    .type_text(
                        step.scope,
                        selectors::PASSWORD_INPUT,
                        &self.config.credentials.password,
                    )
                    .await?;
                self.driver.press_key("Enter").await?;

                if !self.driver.wait_for_settle(step.timeout_ms).await? {
                    return Err(FetchError::StepTimeout {
                        step: step.label.to_string(),
                        what: "post-login navigation".to_string(),
                        timeout_ms: step.timeout_ms,
                    });
                }
                println!("{} Logged in", "✅".green());
                Ok(())
            }

            OpenReportsMenu => {
                self.require(step, selectors::NAV_LINK).await?;
                self.click_by_text(
                    step,
                    selectors::NAV_LINK,
                    &TextMatch::exact(REPORTS_MENU_LABEL),
                )
                .await
            }

            OpenSummaryReport => {
                self.require(step, selectors::REPORT_LINK).await?;
                self.click_by_text(
                    step,
                    selectors::REPORT_LINK,
                    &TextMatch::contains(SUMMARY_REPORT_LABEL),
                )
                .await
            }

            AcquireFrame => {
                if !self.driver.acquire_report_frame(step.timeout_ms).await? {
                    return Err(FetchError::StepTimeout {
                        step: step.label.to_string(),
                        what: "report frame".to_string(),
                        timeout_ms: step.timeout_ms,
                    });
                }
                Ok(())
            }

            ShowAllRows => {
                self.require(step, selectors::VIEW_ALL).await?;
                self.driver.click(step.scope, selectors::VIEW_ALL).await?;
                Ok(())
            }

            SetStartDate => {
                self.require(step, selectors::DATE_START).await?;
                let start = dates::report_start_date_today();
                println!("{} Report window starts {}", "📅".blue(), start);
                if !self
                    .driver
                    .set_value(step.scope, selectors::DATE_START, &start)
                    .await?
                {
                    return Err(FetchError::ElementNotFound {
                        step: step.label.to_string(),
                        what: format!("'{}'", selectors::DATE_START),
                    });
                }
                Ok(())
            }

            RunReport => {
                self.require(step, selectors::RUN_BUTTON).await?;
                self.driver.click(step.scope, selectors::RUN_BUTTON).await?;
                Ok(())
            }

            TriggerDownload => {
                // The portal has rendered this control two ways across UI
                // revisions; probe the icon first, then the titled link.
                if self
                    .driver
                    .wait_for(step.scope, selectors::DOWNLOAD_ICON, step.timeout_ms)
                    .await?
                {
                    self.driver
                        .click(step.scope, selectors::DOWNLOAD_ICON)
                        .await?;
                    return Ok(());
                }
                if !self
                    .driver
                    .wait_for(step.scope, selectors::DOWNLOAD_TITLE, step.timeout_ms)
                    .await?
                {
                    return Err(FetchError::StepTimeout {
                        step: step.label.to_string(),
                        what: format!(
                            "download control ('{}' or '{}')",
                            selectors::DOWNLOAD_ICON,
                            selectors::DOWNLOAD_TITLE
                        ),
                        timeout_ms: step.timeout_ms * 2,
                    });
                }
                self.click_by_text(
                    step,
                    selectors::DOWNLOAD_TITLE,
                    &TextMatch::exact(DOWNLOAD_LINK_LABEL),
                )
                .await
            }

            AwaitArtifact => {
                let path = self.config.artifact_path();
                println!("{} Waiting for {}", "⌛".blue(), path.display());
                download::await_artifact(&path, &self.poll).await?;
                println!("{} Download complete → {}", "✅".green(), path.display());
                Ok(())
            }
        }
    }

    /// Bounded wait for a selector; timing out fails the step.
    async fn require(&self, step: &Step, selector: &str) -> Result<(), FetchError> {
        if self
            .driver
            .wait_for(step.scope, selector, step.timeout_ms)
            .await?
        {
            Ok(())
        } else {
            Err(FetchError::StepTimeout {
                step: step.label.to_string(),
                what: format!("'{}' in {}", selector, step.scope.label()),
                timeout_ms: step.timeout_ms,
            })
        }
    }

    /// Text-predicate click; an empty match over present candidates is an
    /// ElementNotFound, distinct from a timeout.
    async fn click_by_text(
        &self,
        step: &Step,
        selector: &str,
        text: &TextMatch,
    ) -> Result<(), FetchError> {
        if self.driver.click_by_text(step.scope, selector, text).await? {
            Ok(())
        } else {
            Err(FetchError::ElementNotFound {
                step: step.label.to_string(),
                what: format!("'{}' with {}", selector, text.describe()),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::selectors;
    use crate::driver::fake::FakeDriver;
    use crate::driver::traits::DocScope;
    use crate::utils::config::{Config, Credentials};
    use std::path::Path;

    pub fn test_config(download_dir: &Path, debug_dir: &Path) -> Config {
        Config {
            credentials: Credentials {
                username: "ops-user".to_string(),
                password: "ops-pass".to_string(),
            },
            portal_url: "https://portal.test/".to_string(),
            download_dir: download_dir.to_path_buf(),
            debug_dir: debug_dir.to_path_buf(),
            artifact_name: "DrugTestSummaryReport_Total.xlsx".to_string(),
            headless: true,
            in_container: false,
            overall_deadline_secs: 30,
        }
    }

    /// Script a portal up to (but not including) the download trigger.
    pub fn script_portal_base(driver: &FakeDriver) {
        driver.add_present(DocScope::Page, selectors::SIGN_IN_INPUT);
        driver.add_present(DocScope::Page, selectors::PASSWORD_INPUT);
        driver.add_present(DocScope::Page, selectors::NAV_LINK);
        driver.set_texts(
            DocScope::Page,
            selectors::NAV_LINK,
            &["Orders", "Reports", "Admin"],
        );
        driver.add_present(DocScope::Page, selectors::REPORT_LINK);
        driver.set_texts(
            DocScope::Page,
            selectors::REPORT_LINK,
            &["  Random Pool Report", " Drug Test Summary Report \u{f0a9}"],
        );
        driver.set_frame_present(true);
        driver.add_present(DocScope::ReportFrame, selectors::VIEW_ALL);
        driver.add_present(DocScope::ReportFrame, selectors::DATE_START);
        driver.add_present(DocScope::ReportFrame, selectors::RUN_BUTTON);
    }

    /// Script a portal that satisfies every step, dropping the artifact the
    /// moment the download icon is clicked.
    pub fn script_happy_portal(driver: &FakeDriver, artifact: &Path) {
        script_portal_base(driver);
        driver.add_present(DocScope::ReportFrame, selectors::DOWNLOAD_ICON);
        driver.create_on_click(selectors::DOWNLOAD_ICON, artifact);
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::driver::fake::FakeDriver;
    use tempfile::TempDir;

    fn fast_poll() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(10),
            max_attempts: 5,
        }
    }

    fn executor<'a>(driver: &'a FakeDriver, config: &'a Config) -> StepExecutor<'a> {
        StepExecutor::with_tuning(
            driver,
            config,
            Timeouts::instant(),
            OverlayConfig::default(),
            fast_poll(),
        )
    }

    #[tokio::test]
    async fn test_full_sequence_returns_artifact_path() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), dir.path());
        let driver = FakeDriver::new();
        script_happy_portal(&driver, &config.artifact_path());

        let mut exec = executor(&driver, &config);
        let path = exec.run().await.unwrap();

        assert_eq!(path, config.artifact_path());
        assert!(path.exists());
        assert_eq!(driver.navigations(), vec![config.portal_url.clone()]);
        // Username then password submitted by keyboard.
        assert_eq!(driver.keys_pressed(), vec!["Enter", "Enter"]);
        let typed = driver.typed();
        assert_eq!(typed[0].2, "ops-user");
        assert_eq!(typed[1].2, "ops-pass");
    }

    #[tokio::test]
    async fn test_start_date_written_into_frame() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), dir.path());
        let driver = FakeDriver::new();
        script_happy_portal(&driver, &config.artifact_path());

        executor(&driver, &config).run().await.unwrap();

        let values = driver.values_set();
        assert_eq!(values.len(), 1);
        let (scope, selector, value) = &values[0];
        assert_eq!(*scope, DocScope::ReportFrame);
        assert_eq!(selector, selectors::DATE_START);
        assert_eq!(value, &dates::report_start_date_today());
        // MM/DD/YYYY shape with zero padding.
        assert_eq!(value.len(), 10);
        assert_eq!(&value[2..3], "/");
        assert_eq!(&value[5..6], "/");
    }

    #[tokio::test]
    async fn test_password_timeout_aborts_with_step_label() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), dir.path());
        // Only the sign-in field renders; the password wait must time out.
        let driver = FakeDriver::new();
        driver.add_present(DocScope::Page, selectors::SIGN_IN_INPUT);

        let mut exec = executor(&driver, &config);
        let err = exec.run().await.unwrap_err();
        match err {
            FetchError::StepTimeout { step, .. } => assert_eq!(step, "enter password"),
            other => panic!("expected StepTimeout, got {:?}", other),
        }
        assert_eq!(exec.state.failed_step(), Some("enter password"));
        assert!(!driver.report_frame_acquired());
    }

    #[tokio::test]
    async fn test_missing_menu_text_is_element_not_found() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), dir.path());
        let driver = FakeDriver::new();
        script_happy_portal(&driver, &config.artifact_path());
        // Candidates exist but none reads exactly "Reports".
        driver.set_texts(
            DocScope::Page,
            selectors::NAV_LINK,
            &["Orders", "All Reports", "Admin"],
        );

        let err = executor(&driver, &config).run().await.unwrap_err();
        assert!(matches!(err, FetchError::ElementNotFound { .. }));
    }

    #[tokio::test]
    async fn test_download_falls_back_to_titled_link() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), dir.path());
        // Newer portal build: no icon, titled link instead.
        let driver = FakeDriver::new();
        script_portal_base(&driver);
        driver.add_present(DocScope::ReportFrame, selectors::DOWNLOAD_TITLE);
        driver.set_texts(
            DocScope::ReportFrame,
            selectors::DOWNLOAD_TITLE,
            &["Download"],
        );
        driver.create_on_click(selectors::DOWNLOAD_TITLE, &config.artifact_path());

        let path = executor(&driver, &config).run().await.unwrap();
        assert!(path.exists());
        assert_eq!(driver.click_count(selectors::DOWNLOAD_TITLE), 1);
        assert_eq!(driver.click_count(selectors::DOWNLOAD_ICON), 0);
    }

    #[tokio::test]
    async fn test_download_control_absent_times_out() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), dir.path());
        // Neither download control renders.
        let driver = FakeDriver::new();
        script_portal_base(&driver);

        let err = executor(&driver, &config).run().await.unwrap_err();
        match err {
            FetchError::StepTimeout { step, .. } => assert_eq!(step, "trigger download"),
            other => panic!("expected StepTimeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_artifact_never_landing_is_missing() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), dir.path());
        // The click registers but no file ever appears.
        let driver = FakeDriver::new();
        script_portal_base(&driver);
        driver.add_present(DocScope::ReportFrame, selectors::DOWNLOAD_ICON);

        let err = executor(&driver, &config).run().await.unwrap_err();
        assert!(matches!(err, FetchError::ArtifactMissing { .. }));
    }
}
