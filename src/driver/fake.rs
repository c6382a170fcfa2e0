//! Scripted in-memory portal driver for tests.
//!
//! Behavior is declared up front: which selectors resolve, what text the
//! candidate elements render, and which clicks have side effects (removing
//! an overlay, materializing the downloaded file). Waits resolve
//! immediately, so timeout scenarios run without real sleeping.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::driver::traits::{DocScope, PortalDriver, TextMatch};

#[derive(Default)]
struct Inner {
    /// Selectors `wait_for` finds (per scope).
    present: HashSet<(DocScope, String)>,
    /// Rendered texts of the candidate elements a `click_by_text` scan sees.
    texts: HashMap<(DocScope, String), Vec<String>>,
    /// Every click performed, in order.
    clicks: Vec<(DocScope, String)>,
    typed: Vec<(DocScope, String, String)>,
    values: Vec<(DocScope, String, String)>,
    keys: Vec<String>,
    navigations: Vec<String>,
    /// Clicking `selector` creates the file at the path (the "download").
    create_on_click: HashMap<String, PathBuf>,
    /// Clicking the first selector removes the second from `present`.
    remove_on_click: Vec<(String, String)>,
    frame_present: bool,
    markup_fails: bool,
    screenshot_fails: bool,
}

#[derive(Default)]
pub struct FakeDriver {
    inner: Mutex<Inner>,
    closed: AtomicUsize,
    frame_acquired: AtomicBool,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_present(&self, scope: DocScope, selector: &str) {
        self.inner
            .lock()
            .unwrap()
            .present
            .insert((scope, selector.to_string()));
    }

    pub fn set_texts(&self, scope: DocScope, selector: &str, texts: &[&str]) {
        self.inner.lock().unwrap().texts.insert(
            (scope, selector.to_string()),
            texts.iter().map(|t| t.to_string()).collect(),
        );
    }

    /// Clicking `selector` materializes a file at `path`.
    pub fn create_on_click(&self, selector: &str, path: &Path) {
        self.inner
            .lock()
            .unwrap()
            .create_on_click
            .insert(selector.to_string(), path.to_path_buf());
    }

    /// Clicking `clicked` removes `removed` from the present set.
    pub fn remove_on_click(&self, clicked: &str, removed: &str) {
        self.inner
            .lock()
            .unwrap()
            .remove_on_click
            .push((clicked.to_string(), removed.to_string()));
    }

    pub fn set_frame_present(&self, present: bool) {
        self.inner.lock().unwrap().frame_present = present;
    }

    pub fn fail_markup(&self) {
        self.inner.lock().unwrap().markup_fails = true;
    }

    pub fn fail_screenshot(&self) {
        self.inner.lock().unwrap().screenshot_fails = true;
    }

    pub fn clicks(&self) -> Vec<(DocScope, String)> {
        self.inner.lock().unwrap().clicks.clone()
    }

    pub fn click_count(&self, selector: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .clicks
            .iter()
            .filter(|(_, s)| s == selector)
            .count()
    }

    pub fn typed(&self) -> Vec<(DocScope, String, String)> {
        self.inner.lock().unwrap().typed.clone()
    }

    pub fn values_set(&self) -> Vec<(DocScope, String, String)> {
        self.inner.lock().unwrap().values.clone()
    }

    pub fn keys_pressed(&self) -> Vec<String> {
        self.inner.lock().unwrap().keys.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.inner.lock().unwrap().navigations.clone()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn record_click(&self, scope: DocScope, selector: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.clicks.push((scope, selector.to_string()));

        if let Some(path) = inner.create_on_click.get(selector).cloned() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            std::fs::write(&path, b"fake artifact").unwrap();
        }

        let removals: Vec<String> = inner
            .remove_on_click
            .iter()
            .filter(|(clicked, _)| clicked == selector)
            .map(|(_, removed)| removed.clone())
            .collect();
        for removed in removals {
            inner.present.retain(|(_, s)| s != &removed);
        }
    }
}

#[async_trait]
impl PortalDriver for FakeDriver {
    async fn goto(&self, url: &str, _timeout_ms: u64) -> Result<()> {
        self.inner.lock().unwrap().navigations.push(url.to_string());
        Ok(())
    }

    async fn wait_for_settle(&self, _timeout_ms: u64) -> Result<bool> {
        Ok(true)
    }

    async fn wait_for(&self, scope: DocScope, selector: &str, _timeout_ms: u64) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .present
            .contains(&(scope, selector.to_string())))
    }

    async fn wait_for_gone(
        &self,
        scope: DocScope,
        selector: &str,
        _timeout_ms: u64,
    ) -> Result<bool> {
        Ok(!self
            .inner
            .lock()
            .unwrap()
            .present
            .contains(&(scope, selector.to_string())))
    }

    async fn click(&self, scope: DocScope, selector: &str) -> Result<()> {
        self.record_click(scope, selector);
        Ok(())
    }

    async fn click_by_text(
        &self,
        scope: DocScope,
        selector: &str,
        text: &TextMatch,
    ) -> Result<bool> {
        let hit = {
            let inner = self.inner.lock().unwrap();
            inner
                .texts
                .get(&(scope, selector.to_string()))
                .map(|candidates| candidates.iter().any(|t| text.matches(t)))
                .unwrap_or(false)
        };
        if hit {
            self.record_click(scope, selector);
        }
        Ok(hit)
    }

    async fn type_text(&self, scope: DocScope, selector: &str, text: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .typed
            .push((scope, selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn set_value(&self, scope: DocScope, selector: &str, value: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.present.contains(&(scope, selector.to_string())) {
            return Ok(false);
        }
        inner
            .values
            .push((scope, selector.to_string(), value.to_string()));
        Ok(true)
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.inner.lock().unwrap().keys.push(key.to_string());
        Ok(())
    }

    async fn acquire_report_frame(&self, _timeout_ms: u64) -> Result<bool> {
        let present = self.inner.lock().unwrap().frame_present;
        if present {
            self.frame_acquired.store(true, Ordering::SeqCst);
        }
        Ok(present)
    }

    fn report_frame_acquired(&self) -> bool {
        self.frame_acquired.load(Ordering::SeqCst)
    }

    async fn content(&self, scope: DocScope) -> Result<String> {
        if self.inner.lock().unwrap().markup_fails {
            return Err(anyhow!("markup serialization refused"));
        }
        Ok(format!("<html><!-- {} --></html>", scope.label()))
    }

    async fn screenshot(&self, _scope: DocScope, path: &Path, _full_page: bool) -> Result<()> {
        if self.inner.lock().unwrap().screenshot_fails {
            return Err(anyhow!("image capture refused"));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"fake png")?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
