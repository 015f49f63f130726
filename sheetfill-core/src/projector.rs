//! Projection of a calculation input onto the template

use std::path::Path;
use tracing::{debug, info};

use crate::binder::bind;
use crate::error::Result;
use crate::input::{ACTIVE_FLAG, CalculationInput, Group};
use crate::template::TemplateWorkbook;
use crate::visibility::set_row_visibility;

/// What a projection changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    /// Sheet that visibility and page-break edits went to
    pub sheet: String,
    /// Symbols written, in order
    pub written: Vec<String>,
    /// Inactive groups, whose `Aktiv` rows are hidden
    pub hidden_groups: Vec<Group>,
    pub breaks_cleared: bool,
}

/// Fill the template with `input` and save it to `output_path`.
///
/// Groups are bound in the order GM, M1, M2, GK. Nothing is saved if any
/// symbol is missing.
pub fn project<T: TemplateWorkbook + ?Sized>(
    template: &mut T,
    input: &CalculationInput,
    output_path: &Path,
) -> Result<Projection> {
    let sheet = template.active_sheet().to_string();
    let mut projection = Projection {
        sheet: sheet.clone(),
        ..Default::default()
    };

    for group in Group::ALL {
        for (field, value) in input.group_fields(group) {
            let symbol = group.symbol(field);

            if group.has_active_flag() && field == ACTIVE_FLAG {
                if value.is_inactive() {
                    set_row_visibility(template, &sheet, &symbol, true)?;
                    projection.hidden_groups.push(group);
                }
                continue;
            }

            bind(template, &symbol, &value)?;
            projection.written.push(symbol);
        }
    }

    // Only the optional machines carry their own print pages
    if !input.is_group_active(Group::M1) && !input.is_group_active(Group::M2) {
        template.clear_manual_breaks(&sheet)?;
        projection.breaks_cleared = true;
        debug!(sheet = %sheet, "manual page breaks cleared");
    }

    template.save(output_path)?;

    info!(
        sheet = %sheet,
        written = projection.written.len(),
        hidden = ?projection.hidden_groups,
        breaks_cleared = projection.breaks_cleared,
        "template projected"
    );
    Ok(projection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReportError;
    use crate::input::FieldValue;
    use crate::input::tests::sample_input;
    use crate::resolver::{Destination, resolve};
    use crate::template::memory::MemoryTemplate;
    use std::path::PathBuf;

    /// Template laid out in row blocks: group `g` starts at row `3 + 14 * g`
    /// (1-based) with one field per row in column C, and `{group}_Aktiv`
    /// spans the whole block. M1 names its block as whole rows.
    fn full_template() -> MemoryTemplate {
        let input = sample_input();
        let mut template = MemoryTemplate::new("Kalkulation");

        for (g, group) in Group::ALL.iter().enumerate() {
            let fields = input.group_fields(*group);
            let first = 3 + 14 * g;
            let last = first + fields.len() - 1;
            for (f, (field, _)) in fields.iter().enumerate() {
                let definition = match (*field, group) {
                    (ACTIVE_FLAG, Group::M1) => format!("Kalkulation!${}:${}", first, last),
                    (ACTIVE_FLAG, _) => format!("Kalkulation!$A${}:$H${}", first, last),
                    _ => format!("Kalkulation!$C${}", first + f),
                };
                template = template.with_name(&group.symbol(field), &definition);
            }
        }
        template
    }

    /// 0-based rows of every cell-bound symbol of a group
    fn bound_rows(template: &MemoryTemplate, group: Group) -> Vec<u32> {
        group
            .symbols()
            .iter()
            .flat_map(|symbol| match resolve(template, symbol).unwrap() {
                Destination::Cells(areas) => areas
                    .iter()
                    .flat_map(|area| area.range.rows())
                    .collect::<Vec<_>>(),
                Destination::Constant { .. } => Vec::new(),
            })
            .collect()
    }

    #[test]
    fn test_worked_example() {
        let input = sample_input();
        let mut template = full_template();
        let output = PathBuf::from("/tmp/out.xlsx");

        let projection = project(&mut template, &input, &output).unwrap();

        // GK is the fourth block, starting at row 45
        assert_eq!(
            template.cell("Kalkulation", "C45"),
            Some(&FieldValue::Number(32.0))
        );
        assert_eq!(
            template.cell("Kalkulation", "C4"),
            Some(&FieldValue::from("Fräszentrum"))
        );
        assert_eq!(
            template.cell("Kalkulation", "C5"),
            Some(&FieldValue::Number(600_000.0))
        );

        for group in [Group::M1, Group::M2] {
            let rows = bound_rows(&template, group);
            assert_eq!(rows.len(), 12 + 11);
            for row in rows {
                assert!(template.is_hidden("Kalkulation", row), "{} row {}", group, row + 1);
            }
        }
        for row in bound_rows(&template, Group::Gm) {
            assert!(!template.is_hidden("Kalkulation", row), "GM row {}", row + 1);
        }

        assert_eq!(projection.hidden_groups, vec![Group::M1, Group::M2]);
        assert!(projection.breaks_cleared);
        assert!(template.breaks_cleared.contains("Kalkulation"));
        assert_eq!(template.saved_to(), Some(output));
    }

    #[test]
    fn test_inactive_group_fields_are_still_written() {
        let input = sample_input();
        let mut template = full_template();

        let projection = project(&mut template, &input, Path::new("/tmp/out.xlsx")).unwrap();

        // M1 block starts at row 17; Anschaffungspreis is its third field
        assert_eq!(
            template.cell("Kalkulation", "C19"),
            Some(&FieldValue::Number(250_000.0))
        );
        assert!(template.is_hidden("Kalkulation", 18));
        // 11 fields per machine group without the flag, 5 for GK
        assert_eq!(projection.written.len(), 3 * 11 + 5);
        assert!(!projection.written.iter().any(|s| s.ends_with("_Aktiv")));
    }

    #[test]
    fn test_page_break_rule() {
        let cases = [
            ((1, 1, 1), false),
            ((1, 1, 0), false),
            ((1, 0, 1), false),
            ((1, 0, 0), true),
            ((0, 0, 0), true),
            ((0, 1, 0), false),
        ];

        for ((gm, m1, m2), cleared) in cases {
            let mut input = sample_input();
            input.gm.aktiv = gm;
            input.m1.aktiv = m1;
            input.m2.aktiv = m2;
            let mut template = full_template();

            let projection = project(&mut template, &input, Path::new("/tmp/out.xlsx")).unwrap();
            assert_eq!(projection.breaks_cleared, cleared, "GM={} M1={} M2={}", gm, m1, m2);
            assert_eq!(template.breaks_cleared.is_empty(), !cleared);
        }
    }

    #[test]
    fn test_missing_symbol_aborts_before_save() {
        let input = sample_input();
        let mut template = full_template();
        template.names.remove("GK_Schichten");

        let result = project(&mut template, &input, Path::new("/tmp/out.xlsx"));
        assert!(matches!(result, Err(ReportError::SymbolNotFound(s)) if s == "GK_Schichten"));
        assert!(template.saved_to().is_none());
    }

    #[test]
    fn test_missing_flag_symbol_is_tolerated() {
        let input = sample_input();
        let mut template = full_template();
        template.names.remove("M1_Aktiv");

        let projection = project(&mut template, &input, Path::new("/tmp/out.xlsx")).unwrap();
        assert!(!template.is_hidden("Kalkulation", 16));
        assert!(template.is_hidden("Kalkulation", 30));
        assert!(projection.breaks_cleared);
    }
}
