//! Per-stage percentage windows.

use crate::core::StageKind;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};

/// The `[low, high]` share of the 0-100 range owned by one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageWindow {
    /// Percent reported when the stage starts.
    pub low: u8,
    /// Percent reported when the stage completes.
    pub high: u8,
}

impl StageWindow {
    /// Creates a window.
    #[must_use]
    pub const fn new(low: u8, high: u8) -> Self {
        Self { low, high }
    }

    /// Computes `low + floor(idx / count * (high - low))`.
    ///
    /// `idx` is clamped to `count`; an empty stage reports `high`.
    #[must_use]
    pub fn percent(&self, idx: usize, count: usize) -> u8 {
        if count == 0 {
            return self.high;
        }
        let span = usize::from(self.high.saturating_sub(self.low));
        let step = idx.min(count) * span / count;
        // step <= span <= 100
        self.low + u8::try_from(step).unwrap_or(0)
    }
}

/// Windows for every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressWindows {
    /// Discovery window, default 5-70.
    #[serde(default = "default_discovery")]
    pub discovery: StageWindow,
    /// Revision window, default 70-85.
    #[serde(default = "default_revision")]
    pub revision: StageWindow,
    /// Report window, default 85-100.
    #[serde(default = "default_report")]
    pub report: StageWindow,
}

fn default_discovery() -> StageWindow {
    StageWindow::new(5, 70)
}

fn default_revision() -> StageWindow {
    StageWindow::new(70, 85)
}

fn default_report() -> StageWindow {
    StageWindow::new(85, 100)
}

impl Default for ProgressWindows {
    fn default() -> Self {
        Self {
            discovery: default_discovery(),
            revision: default_revision(),
            report: default_report(),
        }
    }
}

impl ProgressWindows {
    /// Returns the window for a stage.
    #[must_use]
    pub fn get(&self, stage: StageKind) -> StageWindow {
        match stage {
            StageKind::Discovery => self.discovery,
            StageKind::Revision => self.revision,
            StageKind::Report => self.report,
        }
    }

    /// Checks that every window is ordered and within 0-100.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the offending stage.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for stage in StageKind::ALL {
            let w = self.get(stage);
            if w.low > w.high || w.high > 100 {
                return Err(ConfigError::Invalid(format!(
                    "progress window for {stage} must satisfy low <= high <= 100 (got {}-{})",
                    w.low, w.high
                )));
            }
        }
        Ok(())
    }
}
