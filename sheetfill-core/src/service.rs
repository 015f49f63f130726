//! End-to-end report generation

use std::fs;
use std::io;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::input::{CalculationInput, base_name};
use crate::packager::{ReportArchive, ScratchDir, package};
use crate::projector::project;
use crate::render::{DocumentConverter, OfficeConverter, RenderPipeline};
use crate::workbook::XlsxTemplate;

/// Generates report archives from calculation inputs.
///
/// A service is immutable once built and may be shared between threads;
/// every call to [`ReportService::generate`] works in its own scratch
/// directory.
#[derive(Debug)]
pub struct ReportService<C = OfficeConverter> {
    config: ServiceConfig,
    converter: C,
}

impl ReportService<OfficeConverter> {
    /// Validate `config` and drive the configured office converter
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let converter = OfficeConverter::new(config.converter.clone());
        Ok(Self { config, converter })
    }
}

impl<C: DocumentConverter> ReportService<C> {
    pub fn with_converter(config: ServiceConfig, converter: C) -> Self {
        Self { config, converter }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Fill the template, recalculate, export and package one report.
    ///
    /// `name_hint` is sanitized; without a usable hint the archive is named
    /// after the current time.
    pub fn generate(&self, input: &CalculationInput, name_hint: Option<&str>) -> Result<ReportArchive> {
        input.validate()?;

        let base = base_name(name_hint);
        let started = Instant::now();
        info!(base = %base, "generating report");

        let scratch = ScratchDir::new(&self.config.work_dir, &base)?;
        let result = self.generate_in(input, &base, &scratch);

        match &result {
            Ok(archive) => {
                scratch.release();
                info!(
                    base = %base,
                    bytes = archive.bytes.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "report generated"
                );
            }
            Err(e) => warn!(base = %base, error = %e, "report generation failed"),
        }
        result
    }

    fn generate_in(&self, input: &CalculationInput, base: &str, scratch: &ScratchDir) -> Result<ReportArchive> {
        let mut template = XlsxTemplate::open(&self.config.template_path)?;
        if let Some(sheet) = &self.config.sheet {
            template.set_active_sheet(sheet)?;
        }

        let workbook_path = scratch.path().join(format!("{}.xlsx", base));
        project(&mut template, input, &workbook_path)?;

        let json_path = scratch.path().join(format!("{}.json", base));
        let json = serde_json::to_vec_pretty(input).map_err(io::Error::from)?;
        fs::write(&json_path, json)?;

        let rendered = RenderPipeline::new(&self.converter).render(&workbook_path, scratch.path())?;

        let entries = [
            (format!("{}.json", base), json_path),
            (format!("{}.xlsx", base), rendered.workbook),
            (format!("{}.pdf", base), rendered.pdf),
        ];
        package(base, &entries)
    }
}
