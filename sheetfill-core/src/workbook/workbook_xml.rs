//! Parsing and rewriting of workbook-level XML parts
//! (`xl/workbook.xml`, its relationships and `[Content_Types].xml`)

use anyhow::{Context, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::io::Cursor;

use super::DefinedName;

/// Workbook metadata read from `xl/workbook.xml`
#[derive(Debug, Default)]
pub(crate) struct WorkbookInfo {
    /// Sheet name and relationship id, in tab order
    pub sheets: Vec<(String, String)>,
    pub active_tab: usize,
    pub defined_names: Vec<DefinedName>,
}

/// Key of a pending defined-name rewrite: lowercase name and sheet scope
pub(crate) type NameKey = (String, Option<usize>);

pub(crate) fn name_key(name: &str, local_sheet: Option<usize>) -> NameKey {
    (name.to_lowercase(), local_sheet)
}

pub(crate) fn parse_workbook_xml(xml: &[u8]) -> Result<WorkbookInfo> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut info = WorkbookInfo::default();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let mut name = String::new();
                let mut rel_id = String::new();
                for attr in e.attributes() {
                    let attr = attr?;
                    if attr.key.as_ref() == b"name" {
                        name = attr.unescape_value()?.to_string();
                    } else if attr.key.prefix().is_some() && attr.key.local_name().as_ref() == b"id" {
                        // r:id, whatever the relationship prefix is called
                        rel_id = attr.unescape_value()?.to_string();
                    }
                }
                info.sheets.push((name, rel_id));
            }
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"workbookView" => {
                if let Some(attr) = e.try_get_attribute("activeTab")? {
                    info.active_tab = attr.unescape_value()?.parse().unwrap_or(0);
                }
            }
            Event::Start(e) if e.local_name().as_ref() == b"definedName" => {
                let (name, local_sheet) = defined_name_attributes(&e)?;
                let formula = read_text_node(&mut reader)?;
                info.defined_names.push(DefinedName {
                    name,
                    local_sheet,
                    formula,
                });
            }
            Event::Empty(e) if e.local_name().as_ref() == b"definedName" => {
                let (name, local_sheet) = defined_name_attributes(&e)?;
                info.defined_names.push(DefinedName {
                    name,
                    local_sheet,
                    formula: String::new(),
                });
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if info.active_tab >= info.sheets.len() {
        info.active_tab = 0;
    }

    Ok(info)
}

fn defined_name_attributes(e: &BytesStart) -> Result<(String, Option<usize>)> {
    let mut name = String::new();
    let mut local_sheet = None;
    for attr in e.attributes() {
        let attr = attr?;
        match attr.key.as_ref() {
            b"name" => name = attr.unescape_value()?.to_string(),
            b"localSheetId" => {
                local_sheet = Some(
                    attr.unescape_value()?
                        .parse()
                        .context("Invalid localSheetId on definedName")?,
                )
            }
            _ => {}
        }
    }
    Ok((name, local_sheet))
}

/// Read text content up to the end of the current element
fn read_text_node(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(e.unescape()?.as_ref()),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(e.as_ref())),
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}

/// Map relationship ids to their targets
pub(crate) fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rels = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut id = String::new();
                let mut target = String::new();
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"Id" => id = attr.unescape_value()?.to_string(),
                        b"Target" => target = attr.unescape_value()?.to_string(),
                        _ => {}
                    }
                }
                rels.insert(id, target);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(rels)
}

/// Resolve a workbook relationship target to a package part name
pub(crate) fn part_name_from_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

/// Rewrite `workbook.xml`: replace defined-name formulas and, when cells
/// changed, ask the consumer to recalculate everything on load
pub(crate) fn rewrite_workbook_xml(
    xml: &[u8],
    name_edits: &HashMap<NameKey, String>,
    full_calc_on_load: bool,
) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();
    let mut skip_buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"definedName" => {
                let (name, local_sheet) = defined_name_attributes(&e)?;
                match name_edits.get(&name_key(&name, local_sheet)) {
                    Some(formula) => {
                        let qname = e.name().as_ref().to_vec();
                        writer.write_event(Event::Start(e))?;
                        writer.write_event(Event::Text(BytesText::new(formula)))?;
                        reader.read_to_end_into(QName(&qname), &mut skip_buf)?;
                        skip_buf.clear();
                        writer.write_event(Event::End(BytesEnd::new(String::from_utf8(qname)?)))?;
                    }
                    None => writer.write_event(Event::Start(e))?,
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"definedName" => {
                let (name, local_sheet) = defined_name_attributes(&e)?;
                match name_edits.get(&name_key(&name, local_sheet)) {
                    Some(formula) => {
                        let qname = String::from_utf8(e.name().as_ref().to_vec())?;
                        writer.write_event(Event::Start(e))?;
                        writer.write_event(Event::Text(BytesText::new(formula)))?;
                        writer.write_event(Event::End(BytesEnd::new(qname)))?;
                    }
                    None => writer.write_event(Event::Empty(e))?,
                }
            }
            Event::Empty(e) if full_calc_on_load && e.local_name().as_ref() == b"calcPr" => {
                writer.write_event(Event::Empty(with_full_calc(&e)?))?;
            }
            Event::Start(e) if full_calc_on_load && e.local_name().as_ref() == b"calcPr" => {
                writer.write_event(Event::Start(with_full_calc(&e)?))?;
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
        buf.clear();
    }

    Ok(writer.into_inner().into_inner())
}

fn with_full_calc(e: &BytesStart) -> Result<BytesStart<'static>> {
    let mut calc_pr = BytesStart::new(String::from_utf8(e.name().as_ref().to_vec())?);
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != b"fullCalcOnLoad" {
            calc_pr.push_attribute(attr);
        }
    }
    calc_pr.push_attribute(("fullCalcOnLoad", "1"));
    Ok(calc_pr)
}

/// Drop the `<Override>` registering `part_name` (e.g. `/xl/calcChain.xml`)
pub(crate) fn remove_content_type_override(xml: &[u8], part_name: &str) -> Result<Vec<u8>> {
    remove_empty_elements(xml, b"Override", b"PartName", |value| value == part_name)
}

/// Drop relationships whose target points at `part_name` (e.g. `xl/calcChain.xml`)
pub(crate) fn remove_relationship_to(xml: &[u8], part_name: &str) -> Result<Vec<u8>> {
    remove_empty_elements(xml, b"Relationship", b"Target", |value| {
        part_name_from_target(value) == part_name
    })
}

fn remove_empty_elements(
    xml: &[u8],
    element: &[u8],
    attribute: &[u8],
    matches: impl Fn(&str) -> bool,
) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(e) if e.local_name().as_ref() == element => {
                let mut value = String::new();
                for attr in e.attributes() {
                    let attr = attr?;
                    if attr.key.as_ref() == attribute {
                        value = attr.unescape_value()?.to_string();
                        break;
                    }
                }

                if !matches(&value) {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
        buf.clear();
    }

    Ok(writer.into_inner().into_inner())
}
