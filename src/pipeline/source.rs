use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, error, info};

use crate::error::GeoEnrichError;
use crate::types::RawRecord;

/// Forward-only reader of data rows from a delimited input.
///
/// The first row is taken as the header and never yielded. Fields are not
/// required to be UTF-8; invalid sequences are replaced rather than failing
/// the row. After a read error the source yields that error once and then
/// ends.
pub struct RecordSource<R: Read> {
    reader: csv::Reader<R>,
    header: Option<Vec<String>>,
    row: csv::ByteRecord,
    rows_read: u64,
    finished: bool,
}

impl RecordSource<File> {
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        info!("Opening input file {}", path.display());

        let reader = Self::builder()
            .from_path(path)
            .map_err(|source| GeoEnrichError::InputOpen {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self::from_csv(reader))
    }
}

impl<R: Read> RecordSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self::from_csv(Self::builder().from_reader(reader))
    }

    fn builder() -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder.has_headers(false).flexible(true);
        builder
    }

    fn from_csv(reader: csv::Reader<R>) -> Self {
        Self {
            reader,
            header: None,
            row: csv::ByteRecord::new(),
            rows_read: 0,
            finished: false,
        }
    }

    /// Header row, once it has been read.
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Data rows yielded so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read.saturating_sub(u64::from(self.header.is_some()))
    }

    fn read_row(&mut self) -> Option<crate::Result<Vec<String>>> {
        match self.reader.read_byte_record(&mut self.row) {
            Ok(true) => {
                self.rows_read += 1;
                Some(Ok(self
                    .row
                    .iter()
                    .map(|field| String::from_utf8_lossy(field).into_owned())
                    .collect()))
            }
            Ok(false) => None,
            Err(e) => {
                error!("Failed to read input row {}: {}", self.rows_read + 1, e);
                Some(Err(GeoEnrichError::InputRead {
                    row: self.rows_read + 1,
                    message: e.to_string(),
                }))
            }
        }
    }
}

impl<R: Read> Iterator for RecordSource<R> {
    type Item = crate::Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if self.header.is_none() {
            match self.read_row() {
                Some(Ok(header)) => {
                    debug!("Input header: {:?}", header);
                    self.header = Some(header);
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            }
        }

        match self.read_row() {
            Some(Ok(fields)) => Some(Ok(RawRecord::new(fields))),
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}
