//! Row visibility driven by symbols

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::error::{ReportError, Result};
use crate::resolver::{Destination, resolve};
use crate::template::TemplateWorkbook;

/// Hide or show every row spanned by `symbol` on `sheet`.
///
/// Returns the number of rows touched. Unknown symbols and constants are
/// skipped with a warning.
pub fn set_row_visibility<T: TemplateWorkbook + ?Sized>(
    template: &mut T,
    sheet: &str,
    symbol: &str,
    hidden: bool,
) -> Result<usize> {
    let destination = match resolve(template, symbol) {
        Ok(destination) => destination,
        Err(ReportError::SymbolNotFound(_)) => {
            warn!(symbol, sheet, "visibility symbol not found, skipping");
            return Ok(0);
        }
        Err(e) => return Err(e),
    };

    if let Destination::Constant { .. } = destination {
        warn!(symbol, "visibility symbol is not a cell reference, skipping");
        return Ok(0);
    }

    let mut rows = BTreeSet::new();
    for area in destination.areas_on(sheet) {
        if area.range.spans_all_rows() {
            warn!(symbol, area = %area, "visibility area covers whole columns, skipping");
            continue;
        }
        rows.extend(area.range.rows());
    }

    for row in &rows {
        template.set_row_hidden(sheet, *row, hidden)?;
    }

    debug!(symbol, sheet, rows = rows.len(), hidden, "row visibility set");
    Ok(rows.len())
}
