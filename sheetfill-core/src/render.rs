//! Recalculation and PDF export through an external office converter

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ConverterConfig;
use crate::error::{ConversionStep, ReportError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_STDERR_IN_ERROR: usize = 2_000;
/// How long stderr may stay open after the converter process is gone
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Output format requested from the converter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    Xlsx,
    Pdf,
}

impl TargetFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Xlsx => "xlsx",
            TargetFormat::Pdf => "pdf",
        }
    }

    /// Pipeline step this format is produced in
    pub fn step(&self) -> ConversionStep {
        match self {
            TargetFormat::Xlsx => ConversionStep::Recalculate,
            TargetFormat::Pdf => ConversionStep::Export,
        }
    }
}

/// Something that converts a workbook into `out_dir`.
///
/// The output is named after the input stem with the target extension.
pub trait DocumentConverter: Send + Sync {
    fn convert(&self, input: &Path, format: TargetFormat, out_dir: &Path) -> Result<()>;
}

/// Headless LibreOffice (or any CLI with the same arguments)
#[derive(Debug, Clone)]
pub struct OfficeConverter {
    config: ConverterConfig,
}

impl OfficeConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    fn command(&self, input: &Path, format: TargetFormat, out_dir: &Path, profile: Option<&Url>) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.extra_args);
        if let Some(profile) = profile {
            cmd.arg(format!("-env:UserInstallation={}", profile));
        }
        cmd.arg("--headless")
            .arg("--calc")
            .arg("--convert-to")
            .arg(format.extension())
            .arg("--outdir")
            .arg(out_dir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        own_process_group(&mut cmd);
        cmd
    }
}

impl DocumentConverter for OfficeConverter {
    fn convert(&self, input: &Path, format: TargetFormat, out_dir: &Path) -> Result<()> {
        let step = format.step();

        // Concurrent instances sharing one user profile block each other
        let profile_dir = if self.config.isolated_profile {
            Some(tempfile::Builder::new().prefix("sheetfill-profile-").tempdir()?)
        } else {
            None
        };
        let profile_url = profile_dir
            .as_ref()
            .map(|dir| {
                Url::from_directory_path(dir.path()).map_err(|_| {
                    ReportError::conversion(
                        step,
                        format!("cannot express profile path {} as URL", dir.path().display()),
                    )
                })
            })
            .transpose()?;

        let mut cmd = self.command(input, format, out_dir, profile_url.as_ref());
        debug!(step = %step, command = ?cmd, "starting converter");

        let child = cmd.spawn().map_err(|e| {
            ReportError::conversion(
                step,
                format!("failed to start {}: {}", self.config.program.display(), e),
            )
        })?;

        let (status, stderr) = wait_with_timeout(child, self.config.timeout())
            .map_err(|e| ReportError::conversion(step, format!("failed to wait for converter: {}", e)))?
            .ok_or(ReportError::ConversionTimedOut {
                step,
                timeout: self.config.timeout(),
            })?;

        if !status.success() {
            let stderr = stderr.trim();
            let stderr: String = stderr.chars().take(MAX_STDERR_IN_ERROR).collect();
            return Err(ReportError::conversion(
                step,
                format!("converter exited with {}: {}", status, stderr),
            ));
        }
        Ok(())
    }
}

/// Start the converter in a process group of its own, so a timeout can take
/// down the helpers the launcher forks as well
#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// Kill the child and every process it started
fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        // The group id equals the child's pid, see `own_process_group`
        if let Ok(pgid) = i32::try_from(child.id()) {
            if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                warn!(pid = child.id(), error = %e, "failed to kill converter process group");
            }
        }
    }
    #[cfg(windows)]
    {
        let killed = Command::new("taskkill")
            .args(["/T", "/F", "/PID"])
            .arg(child.id().to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = killed {
            warn!(pid = child.id(), error = %e, "failed to kill converter process tree");
        }
    }
    let _ = child.kill();
}

/// Wait for the child; on timeout kill its process tree, reap it and return `None`
fn wait_with_timeout(mut child: Child, timeout: Duration) -> std::io::Result<Option<(ExitStatus, String)>> {
    let stderr = child.stderr.take().map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
        rx
    });

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= timeout {
            kill_process_tree(&mut child);
            child.wait()?;
            // Let the reader see the closed pipe; the output itself is dropped
            if let Some(rx) = stderr {
                let _ = rx.recv_timeout(STDERR_GRACE);
            }
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    };

    // A detached helper may keep stderr open after the launcher has exited
    let stderr = stderr
        .and_then(|rx| rx.recv_timeout(STDERR_GRACE).ok())
        .unwrap_or_default();

    Ok(Some((status, stderr)))
}

/// Paths produced by a render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    /// The recalculated workbook (same path as the input)
    pub workbook: PathBuf,
    pub pdf: PathBuf,
}

/// Runs recalculation then export, strictly in sequence
pub struct RenderPipeline<'a, C: DocumentConverter + ?Sized> {
    converter: &'a C,
}

impl<'a, C: DocumentConverter + ?Sized> RenderPipeline<'a, C> {
    pub fn new(converter: &'a C) -> Self {
        Self { converter }
    }

    /// Recalculate `workbook_path` in place and export it as PDF into `report_dir`
    pub fn render(&self, workbook_path: &Path, report_dir: &Path) -> Result<RenderedReport> {
        self.recalculate(workbook_path, report_dir)?;
        let pdf = self.export(workbook_path, report_dir)?;

        Ok(RenderedReport {
            workbook: workbook_path.to_path_buf(),
            pdf,
        })
    }

    fn recalculate(&self, workbook_path: &Path, report_dir: &Path) -> Result<()> {
        let step = ConversionStep::Recalculate;
        let started = Instant::now();
        let out_dir = tempfile::Builder::new()
            .prefix("recalc-")
            .tempdir_in(report_dir)?;

        self.converter
            .convert(workbook_path, TargetFormat::Xlsx, out_dir.path())?;

        let outputs = files_with_extension(out_dir.path(), TargetFormat::Xlsx.extension())?;
        let recalculated = match outputs.as_slice() {
            [single] => single,
            [] => return Err(ReportError::conversion(step, "converter produced no workbook")),
            many => {
                return Err(ReportError::conversion(
                    step,
                    format!("converter produced {} workbooks, expected one", many.len()),
                ));
            }
        };

        fs::rename(recalculated, workbook_path)?;

        info!(
            step = %step,
            file = %workbook_path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "workbook recalculated"
        );
        Ok(())
    }

    fn export(&self, workbook_path: &Path, report_dir: &Path) -> Result<PathBuf> {
        let step = ConversionStep::Export;
        let started = Instant::now();

        self.converter
            .convert(workbook_path, TargetFormat::Pdf, report_dir)?;

        let stem = workbook_path
            .file_stem()
            .ok_or_else(|| ReportError::conversion(step, "workbook path has no file name"))?;
        let pdf = report_dir.join(format!(
            "{}.{}",
            stem.to_string_lossy(),
            TargetFormat::Pdf.extension()
        ));

        match fs::metadata(&pdf) {
            Ok(meta) if meta.len() > 0 => {}
            Ok(_) => {
                return Err(ReportError::conversion(
                    step,
                    format!("{} is empty", pdf.display()),
                ));
            }
            Err(_) => {
                return Err(ReportError::conversion(
                    step,
                    format!("{} was not produced", pdf.display()),
                ));
            }
        }

        info!(
            step = %step,
            file = %pdf.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pdf exported"
        );
        Ok(pdf)
    }
}

fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    Ok(files)
}
