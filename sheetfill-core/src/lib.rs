//! sheetfill: template-bound calculation reports
//!
//! Fills the named fields of an Excel calculation template from a
//! structured input, recalculates and exports it through a headless office
//! suite, and bundles the input JSON, the workbook and the PDF into one ZIP
//! archive.

pub mod binder;
pub mod config;
pub mod error;
pub mod input;
pub mod packager;
pub mod projector;
pub mod reference;
pub mod render;
pub mod resolver;
pub mod service;
pub mod template;
pub mod visibility;
pub mod workbook;

pub use config::{ConverterConfig, ServiceConfig};
pub use error::{ConversionStep, ReportError, Result};
pub use input::{CalculationInput, CalculationParams, FieldValue, Group, MachineParams};
pub use packager::ReportArchive;
pub use projector::{Projection, project};
pub use render::{DocumentConverter, OfficeConverter, RenderPipeline, RenderedReport, TargetFormat};
pub use resolver::{Destination, resolve};
pub use service::ReportService;
pub use template::TemplateWorkbook;
pub use workbook::XlsxTemplate;
