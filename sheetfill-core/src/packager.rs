//! Report archive assembly and scratch directory handling

use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{ReportError, Result};

const ZIP_CONTENT_TYPE: &str = "application/zip";

/// A finished report archive held in memory
#[derive(Debug, Clone)]
pub struct ReportArchive {
    /// `{base}.zip`
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ReportArchive {
    pub fn content_type(&self) -> &'static str {
        ZIP_CONTENT_TYPE
    }

    pub fn into_reader(self) -> Cursor<Vec<u8>> {
        Cursor::new(self.bytes)
    }
}

/// Zip each `(archive name, path)` entry, in order, then delete the files.
///
/// Deletion is best effort: failures are logged and do not fail the call.
pub fn package(base_name: &str, entries: &[(String, PathBuf)]) -> Result<ReportArchive> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, path) in entries {
        let mut source = File::open(path).map_err(packaging_io)?;
        zip.start_file(name.as_str(), options)
            .map_err(ReportError::Packaging)?;
        io::copy(&mut source, &mut zip).map_err(packaging_io)?;
        debug!(entry = %name, file = %path.display(), "archived");
    }

    let mut cursor = zip.finish().map_err(ReportError::Packaging)?;
    cursor.flush().map_err(packaging_io)?;

    for (_, path) in entries {
        remove_best_effort(path);
    }

    Ok(ReportArchive {
        file_name: format!("{}.zip", base_name),
        bytes: cursor.into_inner(),
    })
}

fn packaging_io(e: io::Error) -> ReportError {
    ReportError::Packaging(zip::result::ZipError::Io(e))
}

fn remove_best_effort(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(file = %path.display(), error = %e, "failed to remove report file");
    }
}

/// Per-request working directory, removed on drop
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create `{work_dir}/{base}-XXXXXX`, creating `work_dir` if needed
    pub fn new(work_dir: &Path, base_name: &str) -> Result<Self> {
        fs::create_dir_all(work_dir)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", base_name))
            .tempdir_in(work_dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, logging instead of failing
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(dir = %path.display(), error = %e, "failed to remove scratch directory");
        }
    }
}
