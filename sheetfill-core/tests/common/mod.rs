#![allow(dead_code)]

use sheetfill_core::input::ACTIVE_FLAG;
use sheetfill_core::reference::column_letter;
use sheetfill_core::render::{DocumentConverter, TargetFormat};
use sheetfill_core::{CalculationInput, Group, ReportError};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

pub const SHEET: &str = "Kalkulation";

/// Symbols defined as constants instead of cells
pub const CONSTANT_SYMBOLS: &[(&str, &str)] = &[("GK_Gemeinkostenzuschlag", "0.15")];

pub fn sample_input() -> CalculationInput {
    serde_json::from_value(serde_json::json!({
        "GM": machine(1, "Fräszentrum", 600000.0),
        "M1": machine(0, "Drehmaschine", 250000.0),
        "M2": machine(0, "Schleifmaschine", 180000.0),
        "GK": {
            "Personalkosten": 32.0,
            "Arbeitstage": 220.0,
            "Schichten": 2.0,
            "StundenProSchicht": 8.0,
            "Gemeinkostenzuschlag": 15.0
        }
    }))
    .unwrap()
}

fn machine(aktiv: u8, name: &str, price: f64) -> serde_json::Value {
    serde_json::json!({
        "Aktiv": aktiv,
        "Name": name,
        "Anschaffungspreis": price,
        "Nutzungsdauer": 10.0,
        "Restwert": 0.0,
        "Zinssatz": 5.0,
        "Instandhaltung": 12000.0,
        "Raumbedarf": 25.0,
        "Raumkosten": 8.5,
        "Energieverbrauch": 30.0,
        "Energiekosten": 0.28,
        "Laufzeit": 3600.0
    })
}

fn group_index(group: Group) -> u32 {
    Group::ALL.iter().position(|g| *g == group).unwrap() as u32
}

/// First 0-based row of a group's block; blocks are 14 rows apart
fn block_start(group: Group) -> u32 {
    2 + group_index(group) * 14
}

/// 0-based (row, col) of a field cell: column B, one row per field in
/// declaration order inside the group's block
pub fn field_position(group: Group, field: &str) -> (u32, u32) {
    let row = group
        .field_names()
        .iter()
        .position(|name| *name == field)
        .unwrap() as u32;
    (block_start(group) + row, 1)
}

/// 0-based inclusive row block spanned by `{group}_Aktiv`; it holds every
/// field cell of the group
pub fn active_rows(group: Group) -> std::ops::RangeInclusive<u32> {
    let first = block_start(group);
    first..=first + group.field_names().len() as u32 - 1
}

/// Rows the template itself hides: one inside the M1 block, one note row
/// below all blocks
pub const TEMPLATE_HIDDEN_ROWS: [u32; 2] = [20, 51];

fn definition(group: Group, field: &str) -> String {
    if let Some((_, constant)) = CONSTANT_SYMBOLS
        .iter()
        .find(|(symbol, _)| *symbol == group.symbol(field))
    {
        return constant.to_string();
    }
    if field == ACTIVE_FLAG {
        let rows = active_rows(group);
        // M1 names its block as whole rows
        return match group {
            Group::M1 => format!("{}!${}:${}", SHEET, rows.start() + 1, rows.end() + 1),
            _ => format!("{}!$A${}:$H${}", SHEET, rows.start() + 1, rows.end() + 1),
        };
    }
    let (row, col) = field_position(group, field);
    format!("{}!${}${}", SHEET, column_letter(col), row + 1)
}

/// Write a calculation template with a defined name for every input field,
/// leaving out the symbols in `omit`.
///
/// The sheet carries a styled formula cell on `GM_Anschaffungspreis` (B5), a
/// dependent formula in G1, a unit label in C45 next to `GK_Personalkosten`,
/// the hidden rows of [`TEMPLATE_HIDDEN_ROWS`], two manual row breaks and one
/// column break, and the workbook has a calculation chain.
pub fn create_template(path: &Path, omit: &[&str]) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
<Override PartName="/xl/worksheets/sheet2.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/>
</Types>"#.as_bytes())?;

    zip.start_file("_rels/.rels", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#.as_bytes())?;

    zip.start_file("xl/workbook.xml", options)?;
    let mut workbook_xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<bookViews><workbookView activeTab="0"/></bookViews>
<sheets><sheet name="Kalkulation" sheetId="1" r:id="rId1"/><sheet name="Anhang" sheetId="2" r:id="rId2"/></sheets>
<definedNames>"#,
    );
    let input = sample_input();
    for group in Group::ALL {
        for (field, _) in input.group_fields(group) {
            let symbol = group.symbol(field);
            if omit.contains(&symbol.as_str()) {
                continue;
            }
            workbook_xml.push_str(&format!(
                r#"<definedName name="{}">{}</definedName>"#,
                symbol,
                definition(group, field)
            ));
        }
    }
    workbook_xml.push_str(r#"</definedNames><calcPr calcId="191029"/></workbook>"#);
    zip.write_all(workbook_xml.as_bytes())?;

    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/>
<Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/>
</Relationships>"#.as_bytes())?;

    zip.start_file("xl/worksheets/sheet1.xml", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="G1"><f>B5*2</f><v>1000000</v></c></row><row r="5"><c r="A5" t="inlineStr"><is><t>Anschaffungspreis</t></is></c><c r="B5" s="4"><f>500000</f><v>500000</v></c></row><row r="21" hidden="1"><c r="A21" t="inlineStr"><is><t>Maschine 1</t></is></c></row><row r="45"><c r="A45" t="inlineStr"><is><t>Personalkosten</t></is></c><c r="C45" t="inlineStr"><is><t>EUR/h</t></is></c></row><row r="52" hidden="1"><c r="A52" t="inlineStr"><is><t>Notiz</t></is></c></row></sheetData><rowBreaks count="2" manualBreakCount="2"><brk id="16" max="16383" man="1"/><brk id="30" max="16383" man="1"/></rowBreaks><colBreaks count="1" manualBreakCount="1"><brk id="8" max="1048575" man="1"/></colBreaks></worksheet>"#.as_bytes())?;

    zip.start_file("xl/worksheets/sheet2.xml", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData/><rowBreaks count="1" manualBreakCount="1"><brk id="5" max="16383" man="1"/></rowBreaks></worksheet>"#.as_bytes())?;

    zip.start_file("xl/calcChain.xml", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<calcChain xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><c r="G1" i="1"/><c r="B5" i="1"/></calcChain>"#.as_bytes())?;

    zip.finish()?;
    Ok(())
}

/// Read one part of a ZIP package as text
pub fn read_part(path: &Path, name: &str) -> Option<String> {
    let mut archive = zip::ZipArchive::new(File::open(path).ok()?).ok()?;
    let mut entry = archive.by_name(name).ok()?;
    let mut content = String::new();
    entry.read_to_string(&mut content).ok()?;
    Some(content)
}

/// Converter double: "recalculates" by copying, "exports" a stub PDF
#[derive(Default)]
pub struct FakeConverter {
    pub calls: AtomicUsize,
}

impl DocumentConverter for FakeConverter {
    fn convert(&self, input: &Path, format: TargetFormat, out_dir: &Path) -> sheetfill_core::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stem = input.file_stem().unwrap().to_string_lossy();
        match format {
            TargetFormat::Xlsx => {
                fs::copy(input, out_dir.join(format!("{}.xlsx", stem)))?;
            }
            TargetFormat::Pdf => {
                fs::write(out_dir.join(format!("{}.pdf", stem)), format!("%PDF-1.7 {}", stem))?;
            }
        }
        Ok(())
    }
}

/// Converter double that always fails the export
pub struct BrokenExport;

impl DocumentConverter for BrokenExport {
    fn convert(&self, input: &Path, format: TargetFormat, out_dir: &Path) -> sheetfill_core::Result<()> {
        match format {
            TargetFormat::Xlsx => FakeConverter::default().convert(input, format, out_dir),
            TargetFormat::Pdf => Err(ReportError::ConversionFailed {
                step: format.step(),
                reason: "general input/output error".to_string(),
            }),
        }
    }
}
