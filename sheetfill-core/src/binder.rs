//! Writing field values to their destinations

use anyhow::anyhow;
use tracing::debug;

use crate::error::{ReportError, Result};
use crate::input::FieldValue;
use crate::resolver::{Destination, resolve};
use crate::template::TemplateWorkbook;

/// Write `value` to every cell `symbol` points to, or replace its constant.
///
/// Returns the resolved destination.
pub fn bind<T: TemplateWorkbook + ?Sized>(
    template: &mut T,
    symbol: &str,
    value: &FieldValue,
) -> Result<Destination> {
    let destination = resolve(template, symbol)?;

    match &destination {
        Destination::Cells(areas) => {
            if let Some(area) = areas.iter().find(|area| area.range.is_unbounded()) {
                return Err(ReportError::Template(anyhow!(
                    "symbol '{}' covers whole rows or columns ({}), cannot write a value to it",
                    symbol,
                    area
                )));
            }
            for area in areas {
                for cell in area.range.cells() {
                    template.set_cell(&area.sheet, cell, value)?;
                }
            }
        }
        Destination::Constant { .. } => {
            template.set_constant(symbol, &constant_text(value))?;
        }
    }

    debug!(symbol, destination = %destination, value = %value, "bound");
    Ok(destination)
}

/// Definition text of a constant holding `value`
pub fn constant_text(value: &FieldValue) -> String {
    match value {
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Text(t) => format!("\"{}\"", t.replace('"', "\"\"")),
    }
}
