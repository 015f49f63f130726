//! Human-readable output of the CLI commands

use anyhow::Result;
use colored::*;
use sheetfill_core::resolver::{Destination, classify};
use sheetfill_core::workbook::SheetLayout;
use sheetfill_core::{Group, XlsxTemplate};
use std::path::{Path, PathBuf};

pub fn print_render_results(results: &[(PathBuf, Result<PathBuf>)]) {
    for (input, result) in results {
        match result {
            Ok(archive) => println!(
                "{} {} -> {}",
                "✓".green().bold(),
                input.display(),
                archive.display().to_string().cyan()
            ),
            Err(e) => println!(
                "{} {}: {}",
                "✗".red().bold(),
                input.display(),
                format!("{:#}", e).red()
            ),
        }
    }

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    println!();
    println!("{}", "Summary:".bold().underline());
    println!("  {} {}", "Generated:".green().bold(), results.len() - failed);
    if failed > 0 {
        println!("  {} {}", "Failed:".red().bold(), failed);
    }
}

pub fn print_symbols(template: &XlsxTemplate) {
    println!("{}", format!("Template: {}", template.source().display()).bold());
    println!();

    let sheets = template.sheet_names();
    for defined in template.defined_names() {
        let scope = defined
            .local_sheet
            .and_then(|i| sheets.get(i).copied())
            .unwrap_or("Workbook");
        let destination = match classify(&defined.formula) {
            dest @ Destination::Cells(_) => dest.to_string().yellow(),
            dest @ Destination::Constant { .. } => dest.to_string().bright_black(),
        };
        println!(
            "  {} [{}] {}",
            defined.name.cyan().bold(),
            scope,
            destination
        );
    }
    println!();

    let scope = template.active_sheet();
    let missing: Vec<String> = Group::ALL
        .iter()
        .flat_map(|group| group.symbols())
        .filter(|symbol| template.defined_name(symbol, Some(scope)).is_none())
        .collect();

    if missing.is_empty() {
        println!("{}", "✓ All input symbols are defined!".green().bold());
    } else {
        println!("{}", "Missing symbols:".red().bold().underline());
        for symbol in &missing {
            println!("  {}", symbol);
        }
    }
}

pub fn print_layout(path: &Path, sheet: &str, layout: &SheetLayout) {
    println!("{}", format!("Workbook: {}", path.display()).bold());
    println!("{} {}", "Sheet:".bold(), sheet.cyan().bold());

    if layout.hidden_rows.is_empty() {
        println!("  {} none", "Hidden rows:".bold());
    } else {
        let rows: Vec<String> = layout
            .hidden_rows
            .iter()
            .map(|row| (row + 1).to_string())
            .collect();
        println!("  {} {}", "Hidden rows:".bold(), rows.join(", "));
    }
    println!("  {} {}", "Manual page breaks:".bold(), layout.manual_breaks);
}
