//! Destinations for run records.

use std::io;

use super::record::RunRecord;
use super::summary::SuiteSummary;

/// Receives each record as it finishes and the summary at the end.
///
/// Sink errors are logged by the runner and never stop a suite.
pub trait RunSink: Send {
    /// Store one finished record.
    fn record(&mut self, record: &RunRecord) -> io::Result<()>;

    /// Store the suite summary.
    fn summary(&mut self, summary: &SuiteSummary) -> io::Result<()>;
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<RunRecord>,
    pub summary: Option<SuiteSummary>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunSink for MemorySink {
    fn record(&mut self, record: &RunRecord) -> io::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn summary(&mut self, summary: &SuiteSummary) -> io::Result<()> {
        self.summary = Some(summary.clone());
        Ok(())
    }
}
