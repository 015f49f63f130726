//! Symbol resolution against the template's defined-name table

use std::fmt;

use crate::error::{ReportError, Result};
use crate::reference::{SheetArea, parse_areas};
use crate::template::TemplateWorkbook;

/// Where a symbol points to
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    /// One or more rectangular areas; a single cell is a 1x1 area
    Cells(Vec<SheetArea>),
    /// A named value with no cell behind it
    Constant { definition: String },
}

impl Destination {
    /// Areas on `sheet`, empty for constants
    pub fn areas_on<'a>(&'a self, sheet: &'a str) -> impl Iterator<Item = &'a SheetArea> + 'a {
        let areas: &[SheetArea] = match self {
            Destination::Cells(areas) => areas,
            Destination::Constant { .. } => &[],
        };
        areas.iter().filter(move |area| area.sheet == sheet)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Cells(areas) => {
                for (i, area) in areas.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", area)?;
                }
                Ok(())
            }
            Destination::Constant { definition } => write!(f, "= {}", definition),
        }
    }
}

/// Classify a definition text as cell areas or a constant
pub fn classify(definition: &str) -> Destination {
    match parse_areas(definition) {
        Some(areas) => Destination::Cells(areas),
        None => Destination::Constant {
            definition: definition.to_string(),
        },
    }
}

/// Resolve `symbol` to its destination; a missing symbol is an error
pub fn resolve<T: TemplateWorkbook + ?Sized>(template: &T, symbol: &str) -> Result<Destination> {
    template
        .symbol_definition(symbol)
        .map(|definition| classify(&definition))
        .ok_or_else(|| ReportError::SymbolNotFound(symbol.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{CellRange, CellRef};
    use crate::template::memory::MemoryTemplate;

    #[test]
    fn test_resolve_single_cell_and_range() {
        let template = MemoryTemplate::new("Kalkulation")
            .with_name("GM_Name", "Kalkulation!$C$4")
            .with_name("GM_Aktiv", "Kalkulation!$A$10:$H$24");

        let single = resolve(&template, "GM_Name").unwrap();
        assert_eq!(
            single,
            Destination::Cells(vec![SheetArea {
                sheet: "Kalkulation".to_string(),
                range: CellRange::single(CellRef::new(3, 2)),
            }])
        );

        let Destination::Cells(areas) = resolve(&template, "GM_Aktiv").unwrap() else {
            panic!("expected cells");
        };
        assert_eq!(areas[0].range.rows(), 9..=23);
    }

    #[test]
    fn test_whole_rows_are_cells() {
        let template = MemoryTemplate::new("Kalkulation")
            .with_name("M1_Aktiv", "Kalkulation!$30:$34")
            .with_name("M2_Aktiv", "Kalkulation!$C:$D");

        for symbol in ["M1_Aktiv", "M2_Aktiv"] {
            assert!(matches!(
                resolve(&template, symbol).unwrap(),
                Destination::Cells(_)
            ));
        }
    }

    #[test]
    fn test_resolve_constants() {
        let template = MemoryTemplate::new("Kalkulation")
            .with_name("GK_Gemeinkostenzuschlag", "0.15")
            .with_name("GM_Name", "\"Fräse\"")
            .with_name("M2_Name", "#REF!");

        for symbol in ["GK_Gemeinkostenzuschlag", "GM_Name", "M2_Name"] {
            assert!(matches!(
                resolve(&template, symbol).unwrap(),
                Destination::Constant { .. }
            ));
        }
    }

    #[test]
    fn test_missing_symbol() {
        let template = MemoryTemplate::new("Kalkulation");
        assert!(matches!(
            resolve(&template, "M1_Laufzeit"),
            Err(ReportError::SymbolNotFound(s)) if s == "M1_Laufzeit"
        ));
    }

    #[test]
    fn test_areas_on_filters_sheet() {
        let destination = classify("Kalkulation!$A$1,'Anhang B'!$A$1:$A$3");
        assert_eq!(destination.areas_on("Kalkulation").count(), 1);
        assert_eq!(destination.areas_on("Anhang B").count(), 1);
        assert_eq!(destination.areas_on("Sonstiges").count(), 0);
        assert_eq!(
            destination.to_string(),
            "Kalkulation!A1,'Anhang B'!A1:A3"
        );
    }
}
