//! The seam between the report pipeline and the workbook container

use anyhow::Result;
use std::path::Path;

use crate::input::FieldValue;
use crate::reference::CellRef;
use crate::workbook::XlsxTemplate;

/// Operations the projector needs from a loaded template.
///
/// Symbol lookups use the same scoping rule everywhere: a workbook-scoped
/// name first, then a name local to the active sheet.
pub trait TemplateWorkbook {
    /// Definition text of a defined name, `None` if the template lacks it
    fn symbol_definition(&self, symbol: &str) -> Option<String>;

    /// The sheet being edited
    fn active_sheet(&self) -> &str;

    fn set_cell(&mut self, sheet: &str, cell: CellRef, value: &FieldValue) -> Result<()>;

    /// Replace the definition of a non-positional defined name
    fn set_constant(&mut self, symbol: &str, definition: &str) -> Result<()>;

    fn set_row_hidden(&mut self, sheet: &str, row: u32, hidden: bool) -> Result<()>;

    /// Remove manual row and column page breaks
    fn clear_manual_breaks(&mut self, sheet: &str) -> Result<()>;

    fn save(&self, path: &Path) -> Result<()>;
}

impl TemplateWorkbook for XlsxTemplate {
    fn symbol_definition(&self, symbol: &str) -> Option<String> {
        self.defined_name(symbol, Some(XlsxTemplate::active_sheet(self)))
            .map(|d| d.formula.clone())
    }

    fn active_sheet(&self) -> &str {
        XlsxTemplate::active_sheet(self)
    }

    fn set_cell(&mut self, sheet: &str, cell: CellRef, value: &FieldValue) -> Result<()> {
        XlsxTemplate::set_cell(self, sheet, cell, value.clone())
    }

    fn set_constant(&mut self, symbol: &str, definition: &str) -> Result<()> {
        let scope = XlsxTemplate::active_sheet(self).to_string();
        self.set_defined_name(symbol, Some(&scope), definition)
    }

    fn set_row_hidden(&mut self, sheet: &str, row: u32, hidden: bool) -> Result<()> {
        XlsxTemplate::set_row_hidden(self, sheet, row, hidden)
    }

    fn clear_manual_breaks(&mut self, sheet: &str) -> Result<()> {
        self.clear_page_breaks(sheet)
    }

    fn save(&self, path: &Path) -> Result<()> {
        XlsxTemplate::save(self, path)
    }
}
