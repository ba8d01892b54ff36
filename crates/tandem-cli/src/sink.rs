//! JSON Lines output for run records.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tandem_runtime::{RunRecord, RunSink, SuiteSummary};

/// Writes one JSON object per record, flushing after each.
pub struct JsonlSink<W: Write + Send> {
    writer: BufWriter<W>,
    written: usize,
}

impl JsonlSink<File> {
    /// Create (or truncate) `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write + Send> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            written: 0,
        }
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl<W: Write + Send> RunSink for JsonlSink<W> {
    fn record(&mut self, record: &RunRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }

    fn summary(&mut self, _summary: &SuiteSummary) -> io::Result<()> {
        self.writer.flush()
    }
}
