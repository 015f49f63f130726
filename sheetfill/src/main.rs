use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use sheetfill_core::{CalculationInput, ReportService, ServiceConfig, XlsxTemplate};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod output;

#[derive(Parser)]
#[command(name = "sheetfill")]
#[command(about = "Fill calculation templates and render report bundles", long_about = None)]
#[command(version)]
struct Cli {
    /// Log debug events (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate one report archive per input file
    Render {
        /// Path to configuration file (TOML)
        #[arg(short, long, value_name = "CONFIG")]
        config: PathBuf,

        /// Archive base name (single input only; defaults to the input file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Directory the archives are written to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Calculation input files (JSON)
        #[arg(value_name = "INPUT", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
    /// List the defined names of a template and check the expected symbols
    Symbols {
        /// Path to the template workbook
        #[arg(value_name = "TEMPLATE")]
        template: PathBuf,
    },
    /// Show hidden rows and manual page breaks of a workbook sheet
    Inspect {
        /// Path to the workbook
        #[arg(value_name = "WORKBOOK")]
        workbook: PathBuf,

        /// Sheet to inspect (defaults to the active sheet)
        #[arg(short, long)]
        sheet: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Render {
            config,
            name,
            output_dir,
            inputs,
        } => {
            let failed = render(&config, name.as_deref(), &output_dir, &inputs)?;
            if failed > 0 {
                std::process::exit(1);
            }
        }
        Command::Symbols { template } => {
            let template = XlsxTemplate::open(&template)
                .with_context(|| format!("Failed to read template: {}", template.display()))?;
            output::print_symbols(&template);
        }
        Command::Inspect { workbook, sheet } => {
            let template = XlsxTemplate::open(&workbook)
                .with_context(|| format!("Failed to read workbook: {}", workbook.display()))?;
            let sheet = sheet.unwrap_or_else(|| template.active_sheet().to_string());
            let layout = template
                .sheet_layout(&sheet)
                .with_context(|| format!("Failed to read sheet '{}'", sheet))?;
            output::print_layout(&workbook, &sheet, &layout);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "sheetfill=debug" } else { "sheetfill=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Render every input in parallel; returns the number of failures
fn render(config_path: &Path, name: Option<&str>, output_dir: &Path, inputs: &[PathBuf]) -> Result<usize> {
    if name.is_some() && inputs.len() > 1 {
        bail!("--name can only be used with a single input");
    }

    let config = ServiceConfig::from_file(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let service = ReportService::from_config(config).context("Invalid configuration")?;

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let results: Vec<(PathBuf, Result<PathBuf>)> = inputs
        .par_iter()
        .map(|input| {
            let result = render_one(&service, input, name, output_dir);
            if let Err(e) = &result {
                error!(input = %input.display(), error = %format!("{:#}", e), "render failed");
            }
            (input.clone(), result)
        })
        .collect();

    output::print_render_results(&results);
    let failed = results.iter().filter(|(_, result)| result.is_err()).count();
    info!(inputs = results.len(), failed, "render finished");
    Ok(failed)
}

fn render_one(service: &ReportService, input_path: &Path, name: Option<&str>, output_dir: &Path) -> Result<PathBuf> {
    let content = fs::read_to_string(input_path)
        .with_context(|| format!("Failed to read file: {}", input_path.display()))?;
    let input: CalculationInput = serde_json::from_str(&content)
        .with_context(|| format!("Invalid calculation input: {}", input_path.display()))?;

    let stem = input_path.file_stem().map(|s| s.to_string_lossy());
    let hint = name.or(stem.as_deref());
    debug!(input = %input_path.display(), name = ?hint, "rendering");

    let archive = service.generate(&input, hint)?;
    let path = output_dir.join(&archive.file_name);
    fs::write(&path, &archive.bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
