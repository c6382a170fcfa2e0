//! Portal driver implementation using Playwright
//!
//! Drives the live portal through a Chromium instance. All frame-scoped
//! operations re-resolve the report iframe from the primary document, so a
//! frame reload can never leave the workflow holding a stale handle.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use playwright::api::{Browser, BrowserContext, DocumentLoadState, Frame, Page, Viewport};
use playwright::Playwright;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::driver::traits::{DocScope, PortalDriver, TextMatch};
use colored::Colorize;

/// Scans elements matching `selector` in document order and clicks the first
/// whose rendered text satisfies the predicate. In-page projection of
/// `TextMatch`; the Rust side stays the source of truth for the semantics.
const CLICK_BY_TEXT_JS: &str = r#"
    (args) => {
        const els = Array.from(document.querySelectorAll(args.selector));
        for (const el of els) {
            const text = el.innerText || el.textContent || '';
            const hit = args.exact ? text.trim() === args.needle
                                   : text.includes(args.needle);
            if (hit) {
                el.click();
                return true;
            }
        }
        return false;
    }
"#;

/// Overwrites an input's value and dispatches the synthetic events the
/// portal's client-side validation observes.
const SET_VALUE_JS: &str = r#"
    (args) => {
        const el = document.querySelector(args.selector);
        if (!el) return false;
        el.focus();
        el.value = args.value;
        el.dispatchEvent(new Event('input', { bubbles: true }));
        el.dispatchEvent(new Event('change', { bubbles: true }));
        return true;
    }
"#;

const SELECTOR_PRESENT_JS: &str = "sel => document.querySelector(sel) !== null";

/// Web driver configuration
#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    pub headless: bool,
    /// Containerized execution: sandboxless launch args plus a fixed
    /// executable path (overridable via `PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH`).
    pub in_container: bool,
    /// Name of the iframe hosting the report UI.
    pub frame_name: String,
    /// Directory downloads are routed into.
    pub download_dir: PathBuf,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            headless: true,
            in_container: false,
            frame_name: "mainFrame".to_string(),
            download_dir: PathBuf::from("./downloads"),
            viewport_width: 1280,
            viewport_height: 720,
        }
    }
}

/// Portal driver using Playwright
pub struct WebDriver {
    #[allow(dead_code)]
    playwright: Playwright,
    browser: Mutex<Browser>,
    #[allow(dead_code)]
    context: BrowserContext,
    page: Mutex<Page>,
    config: WebDriverConfig,
    frame_acquired: AtomicBool,
}

impl WebDriver {
    /// Launch a browser with the profile selected by the configuration.
    pub async fn launch(config: WebDriverConfig) -> Result<Self> {
        let playwright = Playwright::initialize()
            .await
            .context("Failed to initialize Playwright")?;

        let chromium = playwright.chromium();
        let mut launcher = chromium.launcher();
        launcher = launcher.headless(config.headless);
        // Downloads land here under the portal's own filename; completion
        // detection belongs to the filesystem poller.
        launcher = launcher.downloads(&config.download_dir);

        if config.in_container {
            let exe = std::env::var("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH")
                .unwrap_or_else(|_| "/usr/bin/chromium".to_string());
            let exe_path = PathBuf::from(&exe);
            println!(
                "{} Using container browser: {}",
                "🌐".blue(),
                exe_path.display()
            );
            let args: Vec<String> = [
                "--no-sandbox",
                "--disable-setuid-sandbox",
                "--disable-dev-shm-usage",
                "--disable-gpu",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect();
            launcher = launcher.executable(&exe_path).args(&args);
            let browser = launcher.launch().await.context("Failed to launch browser")?;
            return Self::attach(playwright, browser, config).await;
        }

        // Bind the chosen executable path in this function's scope so the
        // borrow handed to `executable` outlives the later `launch()` call.
        let selected_exe: Option<PathBuf>;
        if let Ok(env_exe) = std::env::var("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH") {
            let path = PathBuf::from(env_exe);
            println!("{} Using browser from env: {}", "🌐".blue(), path.display());
            selected_exe = Some(path);
        } else if let Some(path) = find_system_browser() {
            println!(
                "{} Using discovered browser: {}",
                "🌐".blue(),
                path.display()
            );
            selected_exe = Some(path);
        } else {
            selected_exe = None;
        }
        if let Some(path) = &selected_exe {
            launcher = launcher.executable(path);
        }

        let browser = launcher.launch().await.context("Failed to launch browser")?;
        Self::attach(playwright, browser, config).await
    }

    async fn attach(
        playwright: Playwright,
        browser: Browser,
        config: WebDriverConfig,
    ) -> Result<Self> {
        let context = browser
            .context_builder()
            .accept_downloads(true)
            .build()
            .await
            .context("Failed to create browser context")?;

        let page = context.new_page().await.context("Failed to open page")?;
        page.set_viewport_size(Viewport {
            width: config.viewport_width as i32,
            height: config.viewport_height as i32,
        })
        .await?;

        Ok(Self {
            playwright,
            browser: Mutex::new(browser),
            context,
            page: Mutex::new(page),
            config,
            frame_acquired: AtomicBool::new(false),
        })
    }

    /// Resolve the report frame from the primary document. Called for every
    /// frame-scoped operation rather than once, because the portal reloads
    /// the frame after certain clicks.
    async fn report_frame(&self) -> Result<Frame> {
        let page = self.page.lock().await;
        let selector = format!("iframe[name=\"{}\"]", self.config.frame_name);
        let container = page
            .query_selector(&selector)
            .await?
            .ok_or_else(|| anyhow!("report frame '{}' is not present", self.config.frame_name))?;
        let frame = container
            .content_frame()
            .await?
            .ok_or_else(|| anyhow!("report frame '{}' has no content", self.config.frame_name))?;
        Ok(frame)
    }
}

#[async_trait]
impl PortalDriver for WebDriver {
    async fn goto(&self, url: &str, timeout_ms: u64) -> Result<()> {
        let page = self.page.lock().await;
        page.goto_builder(url)
            .wait_until(DocumentLoadState::NetworkIdle)
            .timeout(timeout_ms as f64)
            .goto()
            .await
            .with_context(|| format!("Failed to navigate to {}", url))?;
        Ok(())
    }

    async fn wait_for_settle(&self, timeout_ms: u64) -> Result<bool> {
        let start = Instant::now();
        loop {
            // An evaluate failure mid-navigation (context torn down) just
            // means the document has not settled yet.
            let ready = {
                let page = self.page.lock().await;
                let state: String = page
                    .evaluate("() => document.readyState", ())
                    .await
                    .unwrap_or_default();
                state == "complete"
            };
            if ready {
                // Grace period for late XHR-driven repaints; the portal
                // exposes no quiescence signal of its own.
                tokio::time::sleep(Duration::from_millis(500)).await;
                return Ok(true);
            }
            if start.elapsed().as_millis() >= timeout_ms as u128 {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn wait_for(&self, scope: DocScope, selector: &str, timeout_ms: u64) -> Result<bool> {
        match scope {
            DocScope::Page => {
                let page = self.page.lock().await;
                let result = page
                    .wait_for_selector_builder(selector)
                    .timeout(timeout_ms as f64)
                    .wait_for_selector()
                    .await;
                Ok(result.is_ok())
            }
            DocScope::ReportFrame => {
                let frame = self.report_frame().await?;
                let result = frame
                    .wait_for_selector_builder(selector)
                    .timeout(timeout_ms as f64)
                    .wait_for_selector()
                    .await;
                Ok(result.is_ok())
            }
        }
    }

    async fn wait_for_gone(
        &self,
        scope: DocScope,
        selector: &str,
        timeout_ms: u64,
    ) -> Result<bool> {
        let start = Instant::now();
        while start.elapsed().as_millis() < timeout_ms as u128 {
            let present: bool = match scope {
                DocScope::Page => {
                    let page = self.page.lock().await;
                    page.evaluate(SELECTOR_PRESENT_JS, selector).await?
                }
                DocScope::ReportFrame => {
                    let frame = self.report_frame().await?;
                    frame.evaluate(SELECTOR_PRESENT_JS, selector).await?
                }
            };
            if !present {
                return Ok(true);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(false)
    }

    async fn click(&self, scope: DocScope, selector: &str) -> Result<()> {
        match scope {
            DocScope::Page => {
                let page = self.page.lock().await;
                page.click_builder(selector)
                    .click()
                    .await
                    .with_context(|| format!("Failed to click '{}'", selector))?;
            }
            DocScope::ReportFrame => {
                let frame = self.report_frame().await?;
                frame
                    .click_builder(selector)
                    .click()
                    .await
                    .with_context(|| format!("Failed to click '{}' in report frame", selector))?;
            }
        }
        Ok(())
    }

    async fn click_by_text(
        &self,
        scope: DocScope,
        selector: &str,
        text: &TextMatch,
    ) -> Result<bool> {
        let (exact, needle) = match text {
            TextMatch::Exact(n) => (true, n.as_str()),
            TextMatch::Contains(n) => (false, n.as_str()),
        };
        let args = serde_json::json!({
            "selector": selector,
            "needle": needle,
            "exact": exact,
        });

        let clicked: bool = match scope {
            DocScope::Page => {
                let page = self.page.lock().await;
                page.evaluate(CLICK_BY_TEXT_JS, args).await?
            }
            DocScope::ReportFrame => {
                let frame = self.report_frame().await?;
                frame.evaluate(CLICK_BY_TEXT_JS, args).await?
            }
        };
        log::debug!(
            "click_by_text {} over '{}': clicked={}",
            text.describe(),
            selector,
            clicked
        );
        Ok(clicked)
    }

    async fn type_text(&self, scope: DocScope, selector: &str, text: &str) -> Result<()> {
        // Focus the target, then type through the shared keyboard so the
        // portal sees real key events.
        match scope {
            DocScope::Page => {
                let page = self.page.lock().await;
                page.click_builder(selector).click().await?;
                page.keyboard.input_text(text).await?;
            }
            DocScope::ReportFrame => {
                let frame = self.report_frame().await?;
                frame.click_builder(selector).click().await?;
                let page = self.page.lock().await;
                page.keyboard.input_text(text).await?;
            }
        }
        Ok(())
    }

    async fn set_value(&self, scope: DocScope, selector: &str, value: &str) -> Result<bool> {
        let args = serde_json::json!({ "selector": selector, "value": value });
        let set: bool = match scope {
            DocScope::Page => {
                let page = self.page.lock().await;
                page.evaluate(SET_VALUE_JS, args).await?
            }
            DocScope::ReportFrame => {
                let frame = self.report_frame().await?;
                frame.evaluate(SET_VALUE_JS, args).await?
            }
        };
        Ok(set)
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let page = self.page.lock().await;
        page.keyboard.down(key).await?;
        page.keyboard.up(key).await?;
        Ok(())
    }

    async fn acquire_report_frame(&self, timeout_ms: u64) -> Result<bool> {
        let selector = format!("iframe[name=\"{}\"]", self.config.frame_name);
        let appeared = {
            let page = self.page.lock().await;
            page.wait_for_selector_builder(&selector)
                .timeout(timeout_ms as f64)
                .wait_for_selector()
                .await
                .is_ok()
        };
        if !appeared {
            return Ok(false);
        }
        // The iframe element can exist before its content is reachable;
        // resolving proves the embedded document is actually there.
        self.report_frame().await?;
        self.frame_acquired.store(true, Ordering::SeqCst);
        Ok(true)
    }

    fn report_frame_acquired(&self) -> bool {
        self.frame_acquired.load(Ordering::SeqCst)
    }

    async fn content(&self, scope: DocScope) -> Result<String> {
        match scope {
            DocScope::Page => {
                let page = self.page.lock().await;
                Ok(page.content().await?)
            }
            DocScope::ReportFrame => {
                let frame = self.report_frame().await?;
                Ok(frame.content().await?)
            }
        }
    }

    async fn screenshot(&self, scope: DocScope, path: &Path, full_page: bool) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match scope {
            DocScope::Page => {
                let page = self.page.lock().await;
                page.screenshot_builder()
                    .path(path.to_path_buf())
                    .full_page(full_page)
                    .screenshot()
                    .await?;
            }
            DocScope::ReportFrame => {
                // Capture the iframe's host element so the image covers
                // exactly the embedded document.
                let page = self.page.lock().await;
                let selector = format!("iframe[name=\"{}\"]", self.config.frame_name);
                let container = page.query_selector(&selector).await?.ok_or_else(|| {
                    anyhow!("report frame '{}' is not present", self.config.frame_name)
                })?;
                container
                    .screenshot_builder()
                    .await
                    .path(path)
                    .screenshot()
                    .await?;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let browser = self.browser.lock().await;
        browser.close().await.context("Failed to close browser")?;
        Ok(())
    }
}

fn find_system_browser() -> Option<PathBuf> {
    let common_paths = [
        // macOS - prioritize Google Chrome first
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        // Fallback to Chromium
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    for path in common_paths {
        let p = Path::new(path);
        if p.exists() {
            return Some(p.to_path_buf());
        }
    }
    None
}
