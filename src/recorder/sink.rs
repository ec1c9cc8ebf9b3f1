//! Where hits go.
//!
//! Every sink is safe to call from many threads at once. Ordering across threads is not
//! preserved, but a record is never lost or interleaved with another one.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use strum::{Display, EnumIter, EnumString};

use crate::{
    recorder::{HitFormat, HitRecord},
    Result,
};

/// Sink policies selectable by name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum SinkKind {
    /// [`MemorySink`]
    Memory,
    /// [`ConsoleSink`]
    Console,
    /// [`FileSink`]
    #[default]
    File,
}

/// Destination of hit records.
pub trait HitSink: Send + Sync {
    /// Persist or aggregate one record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Sink`] if the record could not be written.
    fn record(&self, record: &HitRecord) -> Result<()>;

    /// Push buffered records to their destination.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Sink`] if the destination refuses the data.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Short name for diagnostics.
    fn kind(&self) -> SinkKind;
}

/// Keeps every record in a lock-free append-only vector.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: boxcar::Vec<HitRecord>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.count()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// A copy of every record, in append order.
    #[must_use]
    pub fn records(&self) -> Vec<HitRecord> {
        self.records
            .iter()
            .map(|(_, record)| record.clone())
            .collect()
    }
}

impl HitSink for MemorySink {
    fn record(&self, record: &HitRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Memory
    }
}

/// Prints one line per record to standard output.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    format: HitFormat,
}

impl ConsoleSink {
    /// Print records in `format`.
    #[must_use]
    pub fn new(format: HitFormat) -> Self {
        ConsoleSink { format }
    }
}

impl HitSink for ConsoleSink {
    fn record(&self, record: &HitRecord) -> Result<()> {
        let line = self.format.format(record);
        std::io::stdout().lock().write_all(line.as_bytes())?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        std::io::stdout().lock().flush()?;
        Ok(())
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Console
    }
}

/// Appends records to a file as they arrive.
///
/// Each record is a single unbuffered `write`, so a process that dies mid-run leaves every
/// completed record on disk.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    format: HitFormat,
    file: Mutex<File>,
}

impl FileSink {
    /// Open `path` for appending, creating it if needed.
    ///
    /// The format's header is written when the file is empty.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Sink`] if the file can not be opened.
    pub fn open(path: impl AsRef<Path>, format: HitFormat) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if let Some(header) = format.header() {
            if file.metadata()?.len() == 0 {
                file.write_all(header.as_bytes())?;
            }
        }
        Ok(FileSink {
            path,
            format,
            file: Mutex::new(file),
        })
    }

    /// The file being appended to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HitSink for FileSink {
    fn record(&self, record: &HitRecord) -> Result<()> {
        let line = self.format.format(record);
        lock!(self.file).write_all(line.as_bytes())?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        lock!(self.file).sync_data()?;
        Ok(())
    }

    fn kind(&self) -> SinkKind {
        SinkKind::File
    }
}
