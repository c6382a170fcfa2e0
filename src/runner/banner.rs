//! Best-effort dismissal of the consent overlay.
//!
//! The portal intermittently shows a TrustArc consent banner that intercepts
//! clicks until dismissed. It can reappear after any navigation, so the
//! workflow invokes this handler at several points. Absence of the banner is
//! the routine outcome, not an error; this is the only wait in the whole
//! sequence whose timeout is expected.

use anyhow::Result;
use colored::Colorize;

use crate::driver::traits::{DocScope, PortalDriver};

/// Overlay selectors and bounds. The trigger wait is deliberately short:
/// most runs never see the banner and should not stall on it.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// The dismiss control to click if the overlay is up.
    pub trigger: String,
    /// The overlay container whose removal confirms dismissal.
    pub container: String,
    pub trigger_timeout_ms: u64,
    pub dismiss_timeout_ms: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            trigger: "#truste-consent-required".to_string(),
            container: "#truste-consent-track".to_string(),
            trigger_timeout_ms: 3_000,
            dismiss_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayOutcome {
    /// Overlay was present and the dismiss control was clicked once.
    Dismissed,
    /// Overlay never appeared within the short wait.
    NotPresent,
}

/// Dismiss the consent overlay if present. Never fails the run over the
/// overlay itself; driver transport errors still propagate.
pub async fn dismiss_overlay(
    driver: &dyn PortalDriver,
    config: &OverlayConfig,
) -> Result<OverlayOutcome> {
    let appeared = driver
        .wait_for(DocScope::Page, &config.trigger, config.trigger_timeout_ms)
        .await?;
    if !appeared {
        log::debug!("consent overlay not present");
        return Ok(OverlayOutcome::NotPresent);
    }

    println!("{} Consent overlay up, dismissing…", "🛡".yellow());
    driver.click(DocScope::Page, &config.trigger).await?;

    let gone = driver
        .wait_for_gone(DocScope::Page, &config.container, config.dismiss_timeout_ms)
        .await?;
    if gone {
        println!("{} Consent overlay dismissed", "✅".green());
    } else {
        // Dismissal is best effort; a lingering container is worth noting
        // but must not abort the run.
        println!("{} Consent overlay still present after click", "⚠".yellow());
    }
    Ok(OverlayOutcome::Dismissed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;

    #[tokio::test]
    async fn test_absent_overlay_is_routine() {
        let driver = FakeDriver::new();
        let outcome = dismiss_overlay(&driver, &OverlayConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome, OverlayOutcome::NotPresent);
        assert!(driver.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_present_overlay_clicked_exactly_once() {
        let driver = FakeDriver::new();
        let config = OverlayConfig::default();
        driver.add_present(DocScope::Page, &config.trigger);
        driver.add_present(DocScope::Page, &config.container);
        // Clicking the trigger takes the container down with it.
        driver.remove_on_click(&config.trigger, &config.container);
        driver.remove_on_click(&config.trigger, &config.trigger);

        let outcome = dismiss_overlay(&driver, &config).await.unwrap();
        assert_eq!(outcome, OverlayOutcome::Dismissed);
        assert_eq!(driver.click_count(&config.trigger), 1);
    }

    #[tokio::test]
    async fn test_sticky_overlay_does_not_fail() {
        let driver = FakeDriver::new();
        let config = OverlayConfig::default();
        driver.add_present(DocScope::Page, &config.trigger);
        driver.add_present(DocScope::Page, &config.container);

        // Container never goes away; the handler still returns normally.
        let outcome = dismiss_overlay(&driver, &config).await.unwrap();
        assert_eq!(outcome, OverlayOutcome::Dismissed);
    }
}
