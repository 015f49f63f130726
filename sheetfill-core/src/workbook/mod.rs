//! XLSX template container
//!
//! The package is read fully into memory, edits are recorded against it and
//! applied when the workbook is saved to a new path. Parts that are not
//! touched are copied byte for byte.

mod sheet_xml;
mod workbook_xml;

pub use sheet_xml::SheetLayout;

use anyhow::{Context, Result, bail};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use self::sheet_xml::{SheetEdits, read_sheet_layout, rewrite_sheet_xml};
use self::workbook_xml::{
    NameKey, name_key, parse_relationships, parse_workbook_xml, part_name_from_target,
    remove_content_type_override, remove_relationship_to, rewrite_workbook_xml,
};
use crate::input::FieldValue;
use crate::reference::{CellRef, MAX_COL, MAX_ROW};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const CALC_CHAIN_PART: &str = "xl/calcChain.xml";

/// An entry of the workbook's defined-name table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedName {
    pub name: String,
    /// Index of the owning sheet for sheet-scoped names
    pub local_sheet: Option<usize>,
    /// Definition text without the leading `=`
    pub formula: String,
}

#[derive(Debug, Clone)]
struct SheetEntry {
    name: String,
    part: String,
}

/// An XLSX workbook opened for editing
#[derive(Debug)]
pub struct XlsxTemplate {
    source: PathBuf,
    parts: Vec<(String, Vec<u8>)>,
    sheets: Vec<SheetEntry>,
    active_tab: usize,
    defined_names: Vec<DefinedName>,
    sheet_edits: HashMap<usize, SheetEdits>,
    name_edits: HashMap<NameKey, String>,
}

impl XlsxTemplate {
    /// Open an XLSX file and read its sheet and defined-name tables
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
        let mut archive =
            ZipArchive::new(BufReader::new(file)).context("Failed to open zip archive")?;

        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            parts.push((entry.name().to_string(), data));
        }

        let find = |name: &str| {
            parts
                .iter()
                .find(|(part, _)| part == name)
                .map(|(_, data)| data.as_slice())
                .with_context(|| format!("Failed to find {} in {}", name, path.display()))
        };

        let info = parse_workbook_xml(find(WORKBOOK_PART)?)?;
        let rels = parse_relationships(find(WORKBOOK_RELS_PART)?)?;

        let sheets = info
            .sheets
            .iter()
            .map(|(name, rel_id)| {
                let target = rels.get(rel_id).with_context(|| {
                    format!("Relationship '{}' not found for sheet '{}'", rel_id, name)
                })?;
                Ok(SheetEntry {
                    name: name.clone(),
                    part: part_name_from_target(target),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if sheets.is_empty() {
            bail!("Workbook {} has no sheets", path.display());
        }

        Ok(Self {
            source: path.to_path_buf(),
            parts,
            sheets,
            active_tab: info.active_tab,
            defined_names: info.defined_names,
            sheet_edits: HashMap::new(),
            name_edits: HashMap::new(),
        })
    }

    /// Path the workbook was read from
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// Sheet selected when the workbook was last saved
    pub fn active_sheet(&self) -> &str {
        &self.sheets[self.active_tab].name
    }

    /// Make `sheet` the one that sheet-scoped lookups refer to.
    ///
    /// Only affects this session; the saved workbook view is unchanged.
    pub fn set_active_sheet(&mut self, sheet: &str) -> Result<()> {
        self.active_tab = self.sheet_index(sheet)?;
        Ok(())
    }

    fn sheet_index(&self, sheet: &str) -> Result<usize> {
        self.sheets
            .iter()
            .position(|s| s.name == sheet)
            .with_context(|| format!("Sheet '{}' not found in workbook", sheet))
    }

    pub fn defined_names(&self) -> &[DefinedName] {
        &self.defined_names
    }

    /// Look up a defined name (case-insensitive).
    ///
    /// A workbook-scoped name wins; otherwise a name local to `scope` is used.
    pub fn defined_name(&self, name: &str, scope: Option<&str>) -> Option<&DefinedName> {
        let scope_index = scope.and_then(|sheet| self.sheet_index(sheet).ok());

        self.defined_names
            .iter()
            .find(|d| d.local_sheet.is_none() && d.name.eq_ignore_ascii_case(name))
            .or_else(|| {
                scope_index.and_then(|index| {
                    self.defined_names
                        .iter()
                        .find(|d| d.local_sheet == Some(index) && d.name.eq_ignore_ascii_case(name))
                })
            })
    }

    /// Overwrite a cell, replacing any formula it held
    pub fn set_cell(&mut self, sheet: &str, cell: CellRef, value: FieldValue) -> Result<()> {
        if cell.row > MAX_ROW || cell.col > MAX_COL {
            bail!("Cell {} is outside the sheet bounds", cell);
        }
        let index = self.sheet_index(sheet)?;
        self.sheet_edits
            .entry(index)
            .or_default()
            .cells
            .insert((cell.row, cell.col), value);
        Ok(())
    }

    /// Replace the definition of an existing defined name
    pub fn set_defined_name(&mut self, name: &str, scope: Option<&str>, formula: &str) -> Result<()> {
        let local_sheet = self
            .defined_name(name, scope)
            .map(|d| d.local_sheet)
            .with_context(|| format!("Defined name '{}' not found in workbook", name))?;

        for defined in self.defined_names.iter_mut() {
            if defined.local_sheet == local_sheet && defined.name.eq_ignore_ascii_case(name) {
                defined.formula = formula.to_string();
            }
        }
        self.name_edits
            .insert(name_key(name, local_sheet), formula.to_string());
        Ok(())
    }

    pub fn set_row_hidden(&mut self, sheet: &str, row: u32, hidden: bool) -> Result<()> {
        if row > MAX_ROW {
            bail!("Row {} is outside the sheet bounds", row + 1);
        }
        let index = self.sheet_index(sheet)?;
        self.sheet_edits
            .entry(index)
            .or_default()
            .rows
            .insert(row, hidden);
        Ok(())
    }

    /// Remove all manual row and column page breaks of a sheet
    pub fn clear_page_breaks(&mut self, sheet: &str) -> Result<()> {
        let index = self.sheet_index(sheet)?;
        self.sheet_edits.entry(index).or_default().clear_breaks = true;
        Ok(())
    }

    /// Whether any edit is pending
    pub fn is_modified(&self) -> bool {
        !self.name_edits.is_empty() || self.sheet_edits.values().any(|e| !e.is_empty())
    }

    /// Hidden rows and manual breaks as stored in the package (pending edits excluded)
    pub fn sheet_layout(&self, sheet: &str) -> Result<SheetLayout> {
        let part = &self.sheets[self.sheet_index(sheet)?].part;
        read_sheet_layout(self.part(part)?)
    }

    fn part(&self, name: &str) -> Result<&[u8]> {
        self.parts
            .iter()
            .find(|(part, _)| part == name)
            .map(|(_, data)| data.as_slice())
            .with_context(|| format!("Part {} missing from workbook", name))
    }

    /// Write the edited workbook to `path`; the source file is never overwritten
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if is_same_file(&self.source, path) {
            bail!(
                "Refusing to overwrite template {}; save to a new path",
                self.source.display()
            );
        }

        let cells_changed = self.sheet_edits.values().any(|e| !e.cells.is_empty());
        let has_calc_chain = self.parts.iter().any(|(name, _)| name == CALC_CHAIN_PART);
        let drop_calc_chain = cells_changed && has_calc_chain;

        let edits_by_part: HashMap<&str, &SheetEdits> = self
            .sheet_edits
            .iter()
            .filter(|(_, edits)| !edits.is_empty())
            .map(|(index, edits)| (self.sheets[*index].part.as_str(), edits))
            .collect();

        // Rewrite everything first so a failed edit never leaves a file behind
        let mut contents: Vec<(&str, Cow<[u8]>)> = Vec::with_capacity(self.parts.len());
        for (name, data) in &self.parts {
            let content: Cow<[u8]> = if name == WORKBOOK_PART
                && (!self.name_edits.is_empty() || cells_changed)
            {
                Cow::Owned(rewrite_workbook_xml(data, &self.name_edits, cells_changed)?)
            } else if let Some(edits) = edits_by_part.get(name.as_str()) {
                Cow::Owned(
                    rewrite_sheet_xml(data, edits)
                        .with_context(|| format!("Failed to rewrite {}", name))?,
                )
            } else if drop_calc_chain && name == CALC_CHAIN_PART {
                continue;
            } else if drop_calc_chain && name == CONTENT_TYPES_PART {
                Cow::Owned(remove_content_type_override(data, &format!("/{}", CALC_CHAIN_PART))?)
            } else if drop_calc_chain && name == WORKBOOK_RELS_PART {
                Cow::Owned(remove_relationship_to(data, CALC_CHAIN_PART)?)
            } else {
                Cow::Borrowed(data.as_slice())
            };
            contents.push((name.as_str(), content));
        }

        let file = File::create(path)
            .with_context(|| format!("Failed to create file: {}", path.display()))?;
        let mut zip_writer = ZipWriter::new(BufWriter::new(file));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, content) in &contents {
            zip_writer.start_file(*name, options)?;
            zip_writer.write_all(content)?;
        }

        zip_writer.finish()?.flush()?;
        Ok(())
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
