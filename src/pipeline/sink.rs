use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::GeoEnrichError;
use crate::pipeline::collector::ResultSet;
use crate::types::{CODE_COLUMN, OUTPUT_HEADER};

/// Writes the finished result set as a delimited file with the published
/// header. Consumed by [`CsvSink::write`], so it runs at most once.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    include_code: bool,
}

/// Output staged in a temporary file beside its destination.
///
/// The destination is replaced only by [`OutputFile::commit`]; dropping an
/// uncommitted output removes the temporary file and leaves any existing
/// file at `path` untouched.
#[derive(Debug)]
pub struct OutputFile {
    staged: NamedTempFile,
    path: PathBuf,
}

impl OutputFile {
    /// Stages a new output for `path`. Fails when the destination directory
    /// is missing or not writable.
    pub fn create(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix(".geoenrich-").suffix(".csv.tmp");
        // same mode a plain File::create would get
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o666));
        }

        let staged = builder
            .tempfile_in(dir)
            .map_err(|source| GeoEnrichError::OutputCreate {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Staging output for {} in {}", path.display(), staged.path().display());

        Ok(Self {
            staged,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Moves the staged file over the destination.
    pub fn commit(self) -> crate::Result<()> {
        let path = self.path;
        self.staged
            .persist(&path)
            .map_err(|e| GeoEnrichError::OutputCreate {
                path: path.clone(),
                source: e.error,
            })?;
        info!("Output written to {}", path.display());
        Ok(())
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.staged.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.staged.flush()
    }
}

impl CsvSink<OutputFile> {
    /// Stages the output file up front so an unwritable destination fails
    /// the run before any lookup is made. Nothing at `path` changes until the
    /// returned writer is committed.
    pub fn create(path: impl AsRef<Path>, include_code: bool) -> crate::Result<Self> {
        Ok(Self::from_writer(OutputFile::create(path)?, include_code))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(writer: W, include_code: bool) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            include_code,
        }
    }

    pub fn header(&self) -> Vec<&'static str> {
        let mut header = OUTPUT_HEADER.to_vec();
        if self.include_code {
            header.push(CODE_COLUMN);
        }
        header
    }

    /// Serializes every entry in the set's current order and flushes.
    /// Returns the underlying writer and the number of data rows written.
    pub fn write(mut self, results: &ResultSet) -> crate::Result<(W, u64)> {
        let header = self.header();
        self.writer.write_record(header)?;

        let mut rows: u64 = 0;
        for (_, record) in results.iter() {
            self.writer.write_record(record.to_row(self.include_code))?;
            rows += 1;
        }

        self.writer.flush()?;
        info!("Wrote {} rows", rows);

        let inner = self
            .writer
            .into_inner()
            .map_err(|e| GeoEnrichError::Io(e.into_error()))?;
        Ok((inner, rows))
    }
}
