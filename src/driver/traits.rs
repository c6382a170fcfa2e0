use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Which document a driver operation targets.
///
/// The report UI lives inside a named iframe; everything up to and including
/// login happens in the primary document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocScope {
    /// The primary page document.
    Page,
    /// The embedded report document. Implementations must resolve this
    /// context freshly for every operation; the portal reloads the frame
    /// after certain clicks, and a cached handle would go stale.
    ReportFrame,
}

impl DocScope {
    pub fn label(&self) -> &'static str {
        match self {
            DocScope::Page => "page",
            DocScope::ReportFrame => "report frame",
        }
    }
}

/// Predicate over an element's rendered text.
///
/// The portal's navigation controls have no stable selectors, so steps match
/// on visible text instead. Kept as a pure function so the matching rules are
/// testable without a live document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextMatch {
    /// Rendered text equals the needle after trimming surrounding whitespace.
    Exact(String),
    /// Rendered text contains the needle anywhere (the portal pads some
    /// labels with whitespace and icon glyphs).
    Contains(String),
}

impl TextMatch {
    pub fn exact(needle: &str) -> Self {
        TextMatch::Exact(needle.to_string())
    }

    pub fn contains(needle: &str) -> Self {
        TextMatch::Contains(needle.to_string())
    }

    /// Apply the predicate to one element's rendered text.
    pub fn matches(&self, rendered: &str) -> bool {
        match self {
            TextMatch::Exact(needle) => rendered.trim() == needle,
            TextMatch::Contains(needle) => rendered.contains(needle.as_str()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TextMatch::Exact(needle) => format!("text == \"{}\"", needle),
            TextMatch::Contains(needle) => format!("text contains \"{}\"", needle),
        }
    }
}

/// Remote-controlled browser capability the workflow consumes.
///
/// This trait abstracts the handful of primitives the retrieval sequence
/// needs (navigation with a settle policy, bounded element waits, clicks,
/// typing, text-predicate searches, frame resolution, and forensic capture)
/// so the workflow can be exercised against a scripted fake in tests.
#[async_trait]
pub trait PortalDriver: Send + Sync {
    /// Navigate the primary document and wait for the load to settle,
    /// bounded by `timeout_ms`.
    async fn goto(&self, url: &str, timeout_ms: u64) -> Result<()>;

    /// Wait for the navigation triggered by a previous action (a submitted
    /// login, for instance) to settle, bounded by `timeout_ms`.
    ///
    /// # Returns
    /// True if the document settled, false if the bound elapsed first.
    async fn wait_for_settle(&self, timeout_ms: u64) -> Result<bool>;

    /// Wait for a selector to be present in the given scope.
    ///
    /// # Returns
    /// True if the element appeared, false on timeout.
    async fn wait_for(&self, scope: DocScope, selector: &str, timeout_ms: u64) -> Result<bool>;

    /// Wait for a selector to be gone from the given scope.
    async fn wait_for_gone(&self, scope: DocScope, selector: &str, timeout_ms: u64)
        -> Result<bool>;

    /// Click the first element matching the selector.
    async fn click(&self, scope: DocScope, selector: &str) -> Result<()>;

    /// Scan all elements matching `selector` in document order and click the
    /// first whose rendered text satisfies `text`.
    ///
    /// # Returns
    /// True if something was clicked, false if the scan matched nothing.
    async fn click_by_text(
        &self,
        scope: DocScope,
        selector: &str,
        text: &TextMatch,
    ) -> Result<bool>;

    /// Focus the element and type text into it via keystrokes.
    async fn type_text(&self, scope: DocScope, selector: &str, text: &str) -> Result<()>;

    /// Replace an input's value wholesale and dispatch the synthetic
    /// `input`/`change` events the portal's client-side validation listens
    /// for.
    ///
    /// # Returns
    /// False if the input was not present.
    async fn set_value(&self, scope: DocScope, selector: &str, value: &str) -> Result<bool>;

    /// Press a single key (e.g. "Enter") at the current focus.
    async fn press_key(&self, key: &str) -> Result<()>;

    /// Resolve the embedded report document from the primary page, waiting
    /// up to `timeout_ms` for its host iframe. Must be called again after
    /// any action that reloads the frame.
    ///
    /// # Returns
    /// True once the frame content is reachable, false on timeout.
    async fn acquire_report_frame(&self, timeout_ms: u64) -> Result<bool>;

    /// Whether the report frame was ever successfully acquired this run.
    /// Diagnostics use this to decide which contexts to snapshot.
    fn report_frame_acquired(&self) -> bool;

    /// Serialize the current markup of the given scope.
    async fn content(&self, scope: DocScope) -> Result<String>;

    /// Capture an image of the given scope to `path`.
    async fn screenshot(&self, scope: DocScope, path: &Path, full_page: bool) -> Result<()>;

    /// Release the browser. The orchestrator guarantees this runs exactly
    /// once per run.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_trims_whitespace() {
        let m = TextMatch::exact("Reports");
        assert!(m.matches("Reports"));
        assert!(m.matches("  Reports \n"));
        assert!(!m.matches("All Reports"));
        assert!(!m.matches("reports"));
    }

    #[test]
    fn test_contains_match_ignores_padding() {
        let m = TextMatch::contains("Drug Test Summary Report");
        assert!(m.matches("\u{f07c} Drug Test Summary Report \n"));
        assert!(m.matches("Drug Test Summary Report"));
        assert!(!m.matches("Drug Test Detail Report"));
    }

    #[test]
    fn test_contains_is_not_trimmed_exact() {
        // Substring semantics must not accidentally require full equality.
        let m = TextMatch::contains("Download");
        assert!(m.matches("  Download report  "));
    }
}
