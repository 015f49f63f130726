//! Worksheet XML rewriting
//!
//! Edits are applied in one streaming pass: untouched content is copied event
//! by event, pending cells are merged into `sheetData` in row/column order and
//! row attributes are adjusted on the way.

use anyhow::{Context, Result, bail};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, Cursor, Write};

use crate::input::FieldValue;
use crate::reference::{CellRange, CellRef};

/// Pending modifications of one worksheet
#[derive(Debug, Default, Clone)]
pub(crate) struct SheetEdits {
    /// Keyed by (row, col), 0-based
    pub cells: BTreeMap<(u32, u32), FieldValue>,
    /// Row (0-based) to hidden flag
    pub rows: BTreeMap<u32, bool>,
    pub clear_breaks: bool,
}

impl SheetEdits {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.rows.is_empty() && !self.clear_breaks
    }

    fn touched_rows(&self) -> BTreeSet<u32> {
        self.cells
            .keys()
            .map(|(row, _)| *row)
            .chain(self.rows.keys().copied())
            .collect()
    }

    fn cells_in_row(&self, row: u32) -> impl Iterator<Item = (u32, &FieldValue)> {
        self.cells
            .range((row, 0)..=(row, u32::MAX))
            .map(|((_, col), value)| (*col, value))
    }
}

/// Visibility and page-break state read back from a worksheet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetLayout {
    /// Hidden rows, 0-based, ascending
    pub hidden_rows: Vec<u32>,
    /// Number of manual row and column breaks
    pub manual_breaks: usize,
}

/// Tracks the row currently being copied
struct OpenRow {
    row: u32,
    /// Pending cells at or after this column still need to be written
    next_col: u32,
    last_col: Option<u32>,
}

pub(crate) fn rewrite_sheet_xml(xml: &[u8], edits: &SheetEdits) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();
    let mut skip_buf = Vec::new();
    let mut cell_buf = Vec::new();

    let mut pending_rows = edits.touched_rows();
    let mut in_sheet_data = false;
    let mut open_row: Option<OpenRow> = None;
    let mut last_row: Option<u32> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"sheetData" => {
                in_sheet_data = true;
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                if pending_rows.is_empty() {
                    writer.write_event(Event::Empty(e))?;
                } else {
                    let end = BytesEnd::new(String::from_utf8(e.name().as_ref().to_vec())?);
                    writer.write_event(Event::Start(e))?;
                    write_new_rows(&mut writer, edits, &mut pending_rows, u32::MAX)?;
                    writer.write_event(Event::End(end))?;
                }
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"sheetData" => {
                write_new_rows(&mut writer, edits, &mut pending_rows, u32::MAX)?;
                in_sheet_data = false;
                writer.write_event(Event::End(e))?;
            }
            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                let row = row_index(&e)?.unwrap_or(last_row.map_or(0, |r| r + 1));
                write_new_rows(&mut writer, edits, &mut pending_rows, row)?;
                pending_rows.remove(&row);

                writer.write_event(Event::Start(row_start(&e, row, edits)?))?;
                last_row = Some(row);
                open_row = Some(OpenRow {
                    row,
                    next_col: 0,
                    last_col: None,
                });
            }
            Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                let row = row_index(&e)?.unwrap_or(last_row.map_or(0, |r| r + 1));
                write_new_rows(&mut writer, edits, &mut pending_rows, row)?;
                pending_rows.remove(&row);

                let start = row_start(&e, row, edits)?;
                if edits.cells_in_row(row).next().is_none() {
                    writer.write_event(Event::Empty(start))?;
                } else {
                    let end = BytesEnd::new(String::from_utf8(e.name().as_ref().to_vec())?);
                    writer.write_event(Event::Start(start))?;
                    for (col, value) in edits.cells_in_row(row) {
                        write_cell(&mut writer, CellRef::new(row, col), value, None)?;
                    }
                    writer.write_event(Event::End(end))?;
                }
                last_row = Some(row);
            }
            Event::End(e) if open_row.is_some() && e.local_name().as_ref() == b"row" => {
                if let Some(open) = open_row.take() {
                    write_cells_from(&mut writer, edits, open.row, open.next_col, u32::MAX)?;
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => match open_row.as_mut() {
                Some(open) => {
                    let col = advance_to_cell(&mut writer, edits, open, &e)?;
                    match edits.cells.get(&(open.row, col)) {
                        Some(value) => {
                            let style = style_attribute(&e)?;
                            let cell = CellRef::new(open.row, col);
                            skip_replaced_cell(&mut reader, &mut cell_buf, cell)?;
                            write_cell(&mut writer, cell, value, style.as_deref())?;
                        }
                        None => writer.write_event(Event::Start(e))?,
                    }
                }
                None => writer.write_event(Event::Start(e))?,
            },
            Event::Empty(e) if e.local_name().as_ref() == b"c" => match open_row.as_mut() {
                Some(open) => {
                    let col = advance_to_cell(&mut writer, edits, open, &e)?;
                    match edits.cells.get(&(open.row, col)) {
                        Some(value) => {
                            let style = style_attribute(&e)?;
                            write_cell(&mut writer, CellRef::new(open.row, col), value, style.as_deref())?;
                        }
                        None => writer.write_event(Event::Empty(e))?,
                    }
                }
                None => writer.write_event(Event::Empty(e))?,
            },
            Event::Start(e) if edits.clear_breaks && is_break_list(&e) => {
                let qname = e.name().as_ref().to_vec();
                reader.read_to_end_into(QName(&qname), &mut skip_buf)?;
                skip_buf.clear();
            }
            Event::Empty(e) if edits.clear_breaks && is_break_list(&e) => {}
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
        buf.clear();
    }

    Ok(writer.into_inner().into_inner())
}

/// Flush pending cells left of the existing cell `e` and return its column
fn advance_to_cell<W: Write>(
    writer: &mut Writer<W>,
    edits: &SheetEdits,
    open: &mut OpenRow,
    e: &BytesStart,
) -> Result<u32> {
    let col = cell_column(e)?.unwrap_or(open.last_col.map_or(0, |c| c + 1));
    write_cells_from(writer, edits, open.row, open.next_col, col)?;
    open.next_col = col.saturating_add(1);
    open.last_col = Some(col);
    Ok(col)
}

/// Consume the content of a cell that is being replaced.
///
/// Fails if the cell is the anchor of a shared formula spanning other cells:
/// those cells only carry a reference to the anchor's formula text.
fn skip_replaced_cell<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>, cell: CellRef) -> Result<()> {
    let mut depth = 0usize;
    loop {
        let event = reader.read_event_into(buf)?;
        if let Event::Start(e) | Event::Empty(e) = &event {
            if e.local_name().as_ref() == b"f" && anchors_shared_formula(e)? {
                bail!(
                    "Cell {} holds a shared formula used by other cells and cannot be replaced",
                    cell
                );
            }
        }
        match event {
            Event::Start(_) => depth += 1,
            Event::End(_) if depth == 0 => break,
            Event::End(_) => depth -= 1,
            Event::Eof => bail!("Unexpected end of worksheet inside cell {}", cell),
            _ => {}
        }
        buf.clear();
    }
    buf.clear();
    Ok(())
}

/// `<f t="shared" ref="..">` whose range covers more than one cell
fn anchors_shared_formula(e: &BytesStart) -> Result<bool> {
    let shared = match e.try_get_attribute("t")? {
        Some(attr) => attr.unescape_value()? == "shared",
        None => false,
    };
    if !shared {
        return Ok(false);
    }
    Ok(match e.try_get_attribute("ref")? {
        Some(attr) => CellRange::parse(&attr.unescape_value()?).is_none_or(|r| !r.is_single_cell()),
        None => false,
    })
}

fn is_break_list(e: &BytesStart) -> bool {
    matches!(e.local_name().as_ref(), b"rowBreaks" | b"colBreaks")
}

/// 0-based row index from the `r` attribute of a `<row>`
fn row_index(e: &BytesStart) -> Result<Option<u32>> {
    match e.try_get_attribute("r")? {
        Some(attr) => {
            let number: u32 = attr
                .unescape_value()?
                .parse()
                .context("Invalid row number in worksheet")?;
            Ok(number.checked_sub(1))
        }
        None => Ok(None),
    }
}

/// 0-based column index from the `r` attribute of a `<c>`
fn cell_column(e: &BytesStart) -> Result<Option<u32>> {
    match e.try_get_attribute("r")? {
        Some(attr) => {
            let reference = attr.unescape_value()?;
            let cell = CellRef::parse(&reference)
                .with_context(|| format!("Invalid cell reference '{}' in worksheet", reference))?;
            Ok(Some(cell.col))
        }
        None => Ok(None),
    }
}

fn style_attribute(e: &BytesStart) -> Result<Option<String>> {
    Ok(match e.try_get_attribute("s")? {
        Some(attr) => Some(attr.unescape_value()?.to_string()),
        None => None,
    })
}

/// Copy of a `<row>` start tag with the pending visibility applied
fn row_start(e: &BytesStart, row: u32, edits: &SheetEdits) -> Result<BytesStart<'static>> {
    let hidden = edits.rows.get(&row).copied();
    let mut start = BytesStart::new(String::from_utf8(e.name().as_ref().to_vec())?);

    for attr in e.attributes() {
        let attr = attr?;
        if hidden.is_some() && attr.key.as_ref() == b"hidden" {
            continue;
        }
        start.push_attribute(attr);
    }
    if hidden == Some(true) {
        start.push_attribute(("hidden", "1"));
    }

    Ok(start)
}

/// Emit pending rows that do not exist in the sheet yet, up to (excluding) `limit`
fn write_new_rows<W: Write>(
    writer: &mut Writer<W>,
    edits: &SheetEdits,
    pending_rows: &mut BTreeSet<u32>,
    limit: u32,
) -> Result<()> {
    while let Some(&row) = pending_rows.first() {
        if row >= limit {
            break;
        }
        pending_rows.remove(&row);

        let hidden = edits.rows.get(&row).copied().unwrap_or(false);
        let has_cells = edits.cells_in_row(row).next().is_some();
        if !hidden && !has_cells {
            continue;
        }

        let number = (row + 1).to_string();
        let mut start = BytesStart::new("row");
        start.push_attribute(("r", number.as_str()));
        if hidden {
            start.push_attribute(("hidden", "1"));
        }

        if has_cells {
            writer.write_event(Event::Start(start))?;
            for (col, value) in edits.cells_in_row(row) {
                write_cell(writer, CellRef::new(row, col), value, None)?;
            }
            writer.write_event(Event::End(BytesEnd::new("row")))?;
        } else {
            writer.write_event(Event::Empty(start))?;
        }
    }
    Ok(())
}

/// Emit pending cells of `row` in the column window `[from, until)`
fn write_cells_from<W: Write>(
    writer: &mut Writer<W>,
    edits: &SheetEdits,
    row: u32,
    from: u32,
    until: u32,
) -> Result<()> {
    for (col, value) in edits.cells_in_row(row) {
        if col >= from && col < until {
            write_cell(writer, CellRef::new(row, col), value, None)?;
        }
    }
    Ok(())
}

fn write_cell<W: Write>(
    writer: &mut Writer<W>,
    cell: CellRef,
    value: &FieldValue,
    style: Option<&str>,
) -> Result<()> {
    let reference = cell.to_string();
    let mut start = BytesStart::new("c");
    start.push_attribute(("r", reference.as_str()));
    if let Some(style) = style {
        start.push_attribute(("s", style));
    }

    match value {
        FieldValue::Number(n) => {
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Start(BytesStart::new("v")))?;
            writer.write_event(Event::Text(BytesText::new(&n.to_string())))?;
            writer.write_event(Event::End(BytesEnd::new("v")))?;
        }
        FieldValue::Text(text) => {
            start.push_attribute(("t", "inlineStr"));
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Start(BytesStart::new("is")))?;
            writer.write_event(Event::Start(
                BytesStart::new("t").with_attributes([("xml:space", "preserve")]),
            ))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new("t")))?;
            writer.write_event(Event::End(BytesEnd::new("is")))?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new("c")))?;
    Ok(())
}

/// Read hidden rows and manual page breaks of a worksheet
pub(crate) fn read_sheet_layout(xml: &[u8]) -> Result<SheetLayout> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut layout = SheetLayout::default();
    let mut last_row: Option<u32> = None;
    let mut in_breaks = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                let row = row_index(&e)?.unwrap_or(last_row.map_or(0, |r| r + 1));
                last_row = Some(row);
                if let Some(attr) = e.try_get_attribute("hidden")? {
                    if is_true(&attr.unescape_value()?) {
                        layout.hidden_rows.push(row);
                    }
                }
            }
            Event::Start(e) if is_break_list(&e) => in_breaks = true,
            Event::End(e) if matches!(e.local_name().as_ref(), b"rowBreaks" | b"colBreaks") => {
                in_breaks = false
            }
            Event::Start(e) | Event::Empty(e) if in_breaks && e.local_name().as_ref() == b"brk" => {
                if let Some(attr) = e.try_get_attribute("man")? {
                    if is_true(&attr.unescape_value()?) {
                        layout.manual_breaks += 1;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    layout.hidden_rows.sort_unstable();
    layout.hidden_rows.dedup();
    Ok(layout)
}

fn is_true(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="2" spans="1:4"><c r="A2" t="s"><v>0</v></c><c r="C2" s="4"><f>A1*2</f><v>10</v></c></row><row r="5"><c r="B5"/></row><row r="7" hidden="1"/></sheetData><rowBreaks count="1" manualBreakCount="1"><brk id="14" max="16383" man="1"/></rowBreaks></worksheet>"#;

    fn rewrite(edits: &SheetEdits) -> String {
        String::from_utf8(rewrite_sheet_xml(SHEET.as_bytes(), edits).unwrap()).unwrap()
    }

    #[test]
    fn test_replace_formula_cell_keeps_style() {
        let mut edits = SheetEdits::default();
        edits.cells.insert((1, 2), FieldValue::Number(600_000.0));

        let out = rewrite(&edits);
        assert!(out.contains(r#"<c r="C2" s="4"><v>600000</v></c>"#));
        assert!(!out.contains("<f>A1*2</f>"));
        assert!(out.contains(r#"<c r="A2" t="s"><v>0</v></c>"#));
    }

    #[test]
    fn test_insert_cells_in_order() {
        let mut edits = SheetEdits::default();
        edits.cells.insert((1, 1), FieldValue::from("Fräse"));
        edits.cells.insert((1, 3), FieldValue::Number(1.5));
        edits.cells.insert((3, 0), FieldValue::Number(2.0));
        edits.cells.insert((9, 0), FieldValue::Number(3.0));

        let out = rewrite(&edits);
        let a2 = out.find(r#"r="A2""#).unwrap();
        let b2 = out.find(r#"<c r="B2" t="inlineStr"><is><t xml:space="preserve">Fräse</t></is></c>"#).unwrap();
        let c2 = out.find(r#"r="C2""#).unwrap();
        let d2 = out.find(r#"<c r="D2"><v>1.5</v></c>"#).unwrap();
        assert!(a2 < b2 && b2 < c2 && c2 < d2);

        let row4 = out.find(r#"<row r="4"><c r="A4"><v>2</v></c></row>"#).unwrap();
        let row5 = out.find(r#"<row r="5">"#).unwrap();
        let row10 = out.find(r#"<row r="10"><c r="A10"><v>3</v></c></row>"#).unwrap();
        assert!(row4 < row5 && row5 < row10);
        assert!(row10 < out.find("</sheetData>").unwrap());
    }

    #[test]
    fn test_row_visibility() {
        let mut edits = SheetEdits::default();
        edits.rows.insert(1, true);
        edits.rows.insert(2, true);
        edits.rows.insert(6, false);

        let out = rewrite(&edits);
        assert!(out.contains(r#"<row r="2" spans="1:4" hidden="1">"#));
        assert!(out.contains(r#"<row r="3" hidden="1"/>"#));
        assert!(out.contains(r#"<row r="7"/>"#));

        let layout = read_sheet_layout(out.as_bytes()).unwrap();
        assert_eq!(layout.hidden_rows, vec![1, 2]);
    }

    #[test]
    fn test_clear_breaks() {
        let before = read_sheet_layout(SHEET.as_bytes()).unwrap();
        assert_eq!(before.manual_breaks, 1);
        assert_eq!(before.hidden_rows, vec![6]);

        let edits = SheetEdits {
            clear_breaks: true,
            ..Default::default()
        };
        let out = rewrite(&edits);
        assert!(!out.contains("rowBreaks"));
        assert_eq!(read_sheet_layout(out.as_bytes()).unwrap().manual_breaks, 0);
    }

    const SHARED: &str = r#"<worksheet><sheetData><row r="1"><c r="A1"><f t="shared" ref="A1:A3" si="0">B1*2</f><v>2</v></c><c r="C1"><f t="shared" ref="C1" si="1">B1+1</f><v>2</v></c></row><row r="2"><c r="A2"><f t="shared" si="0"/><v>4</v></c></row></sheetData></worksheet>"#;

    #[test]
    fn test_shared_formula_anchor_is_not_replaced() {
        let mut edits = SheetEdits::default();
        edits.cells.insert((0, 0), FieldValue::Number(1.0));

        let err = rewrite_sheet_xml(SHARED.as_bytes(), &edits).unwrap_err();
        assert!(err.to_string().contains("A1"), "{}", err);
    }

    #[test]
    fn test_shared_formula_dependent_and_single_anchor_are_replaced() {
        let mut edits = SheetEdits::default();
        edits.cells.insert((0, 2), FieldValue::Number(5.0));
        edits.cells.insert((1, 0), FieldValue::Number(7.0));

        let out = String::from_utf8(rewrite_sheet_xml(SHARED.as_bytes(), &edits).unwrap()).unwrap();
        assert!(out.contains(r#"<c r="C1"><v>5</v></c></row>"#));
        assert!(out.contains(r#"<row r="2"><c r="A2"><v>7</v></c></row>"#));
        assert!(out.contains(r#"<f t="shared" ref="A1:A3" si="0">B1*2</f>"#));
    }

    #[test]
    fn test_empty_sheet_data_is_expanded() {
        let sheet = r#"<worksheet><sheetData/></worksheet>"#;
        let mut edits = SheetEdits::default();
        edits.cells.insert((0, 0), FieldValue::Number(1.0));

        let out = rewrite_sheet_xml(sheet.as_bytes(), &edits).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<worksheet><sheetData><row r="1"><c r="A1"><v>1</v></c></row></sheetData></worksheet>"#
        );
    }

    #[test]
    fn test_text_is_escaped() {
        let sheet = r#"<worksheet><sheetData/></worksheet>"#;
        let mut edits = SheetEdits::default();
        edits.cells.insert((0, 0), FieldValue::from("A & B <C>"));

        let out = String::from_utf8(rewrite_sheet_xml(sheet.as_bytes(), &edits).unwrap()).unwrap();
        assert!(out.contains("A &amp; B &lt;C&gt;"));
    }
}
