//! Service configuration
//!
//! Resolved once at startup and injected into the pipeline. Platform
//! differences (where the office suite lives) are settled here by the
//! defaults, never inside the render code.

use crate::error::{ReportError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Calculation template (never modified in place)
    pub template_path: PathBuf,
    /// Root under which per-request scratch directories are created
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Sheet that visibility and page-break edits apply to.
    /// Defaults to the template's active sheet.
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub converter: ConverterConfig,
}

impl ServiceConfig {
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            work_dir: default_work_dir(),
            sheet: None,
            converter: ConverterConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// Relative `template_path` and `work_dir` entries are taken relative to
    /// the directory holding the file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut config: ServiceConfig = toml::from_str(&content)
            .map_err(|e| ReportError::Config(format!("{}: {}", path.display(), e)))?;

        if let Some(base) = path.parent() {
            if config.template_path.is_relative() {
                config.template_path = base.join(&config.template_path);
            }
            if config.work_dir.is_relative() {
                config.work_dir = base.join(&config.work_dir);
            }
        }

        Ok(config)
    }

    /// Check the configuration before serving requests
    pub fn validate(&self) -> Result<()> {
        if !self.template_path.is_file() {
            return Err(ReportError::Config(format!(
                "template not found: {}",
                self.template_path.display()
            )));
        }
        if self.converter.timeout_secs == 0 {
            return Err(ReportError::Config(
                "converter.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.converter.program.as_os_str().is_empty() {
            return Err(ReportError::Config(
                "converter.program must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// External office converter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    #[serde(default = "default_program")]
    pub program: PathBuf,
    /// Arguments placed before the conversion arguments
    #[serde(default = "default_extra_args")]
    pub extra_args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Give every invocation its own office user profile
    #[serde(default = "default_isolated_profile")]
    pub isolated_profile: bool,
}

impl ConverterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            extra_args: default_extra_args(),
            timeout_secs: default_timeout_secs(),
            isolated_profile: default_isolated_profile(),
        }
    }
}

fn default_program() -> PathBuf {
    if cfg!(target_os = "windows") {
        PathBuf::from(r"C:\Program Files\LibreOffice\program\soffice.exe")
    } else if cfg!(target_os = "macos") {
        PathBuf::from("/Applications/LibreOffice.app/Contents/MacOS/soffice")
    } else {
        PathBuf::from("libreoffice")
    }
}

fn default_extra_args() -> Vec<String> {
    vec!["--norestore".to_string()]
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_isolated_profile() -> bool {
    true
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("sheetfill")
}
