//! Error taxonomy of the report pipeline

use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = ReportError> = std::result::Result<T, E>;

/// Which converter invocation a render error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStep {
    Recalculate,
    Export,
}

impl std::fmt::Display for ConversionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversionStep::Recalculate => f.write_str("recalculate"),
            ConversionStep::Export => f.write_str("export"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("symbol '{0}' not found in template")]
    SymbolNotFound(String),

    #[error("{step} conversion failed: {reason}")]
    ConversionFailed {
        step: ConversionStep,
        reason: String,
    },

    #[error("{step} conversion timed out after {timeout:?}")]
    ConversionTimedOut {
        step: ConversionStep,
        timeout: Duration,
    },

    #[error("failed to write report archive")]
    Packaging(#[source] zip::result::ZipError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Template(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReportError {
    pub(crate) fn conversion(step: ConversionStep, reason: impl Into<String>) -> Self {
        ReportError::ConversionFailed {
            step,
            reason: reason.into(),
        }
    }
}
