//! Boundary settings

use crate::error::{BoundaryError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tracing target of everything the module itself reports.
pub const MODULE_LOG_TARGET: &str = "ascbind::module";

/// Tunables for one module instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Number of UTF-16 units copied per window when lifting a string.
    pub lift_window_units: usize,
    /// Run the module's `__collect` after every marshalled call.
    pub collect_after_call: bool,
    /// Name attached to every event the module logs or aborts with.
    pub module_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            lift_window_units: 1024,
            collect_after_call: false,
            module_name: "module".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BoundaryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| BoundaryError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lift_window_units == 0 {
            return Err(BoundaryError::Config(
                "lift_window_units must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
