//! Run recorder.
//!
//! Creates the run header up front and buffers item lines in memory; the
//! lines are attached in a single write when the run is finished. Finishing
//! consumes the recorder, so a run cannot be closed twice.

use tracing::{debug, warn};

use omnisync_common::{Error, ExecutionMode, RecordId, Result};
use omnisync_store::{Outcome, RunCounts, RunLine, RunStatus, RunSubject, Store, SyncRun};

/// Buffered writer for one run.
pub struct RunRecorder<'a> {
    store: &'a Store,
    run: SyncRun,
    lines: Vec<RunLine>,
    total: u64,
}

impl<'a> RunRecorder<'a> {
    /// Persist an in-progress header.
    pub fn start(
        store: &'a Store,
        config_id: RecordId,
        subject: RunSubject,
        mode: ExecutionMode,
    ) -> Result<Self> {
        let run = store.start_run(SyncRun::start(config_id, subject, mode))?;
        debug!(run = %run.id, subject = %run.subject, "Run started");
        Ok(Self {
            store,
            run,
            lines: Vec::new(),
            total: 0,
        })
    }

    pub fn run_id(&self) -> RecordId {
        self.run.id
    }

    /// Number of items the batch will look at, when known up front.
    pub fn add_total(&mut self, count: u64) {
        self.total += count;
    }

    pub fn record(&mut self, line: RunLine) {
        self.lines.push(line);
    }

    pub fn synced(&mut self, item: impl Into<String>, key: Option<&str>, reason: impl Into<String>) {
        self.record(RunLine::new(item, key, Outcome::Synced, reason));
    }

    pub fn skipped(&mut self, item: impl Into<String>, key: Option<&str>, reason: impl Into<String>) {
        self.record(RunLine::new(item, key, Outcome::Skipped, reason));
    }

    pub fn failed(&mut self, item: impl Into<String>, key: Option<&str>, reason: impl Into<String>) {
        self.record(RunLine::new(item, key, Outcome::Failed, reason));
    }

    pub fn counts(&self) -> RunCounts {
        RunCounts::tally(self.total, &self.lines)
    }

    /// Close the run as completed, or failed when `error` is set.
    pub fn finish(self, error: Option<&Error>) -> Result<SyncRun> {
        let counts = self.counts();
        let (status, message) = match error {
            None => (RunStatus::Completed, None),
            Some(err) => {
                warn!(run = %self.run.id, subject = %self.run.subject, error = %err, "Run failed");
                (RunStatus::Failed, Some(err.to_string()))
            }
        };
        self.store
            .finish_run(self.run.id, status, counts, self.lines, message)
    }

    /// Close the run from a batch result, passing the result through.
    ///
    /// A failure to write the ledger is logged; the batch result wins.
    pub fn conclude<T>(self, result: Result<T>) -> Result<T> {
        let closed = match &result {
            Ok(_) => self.finish(None),
            Err(err) => self.finish(Some(err)),
        };
        if let Err(e) = closed {
            warn!(error = %e, "Failed to close run ledger");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_attached_on_finish() {
        let store = Store::in_memory();
        let mut recorder =
            RunRecorder::start(&store, RecordId::new(1), RunSubject::Products, ExecutionMode::Manual)
                .unwrap();
        let id = recorder.run_id();
        recorder.add_total(3);
        recorder.synced("Drill", Some("D-1"), "created");
        recorder.skipped("Saw", None, "no reference code");

        let pending: SyncRun = store.get(id).unwrap();
        assert_eq!(pending.status, RunStatus::InProgress);
        assert!(pending.lines.is_empty());

        let run = recorder.finish(None).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.lines.len(), 2);
        assert_eq!(run.counts, RunCounts { total: 3, synced: 1, skipped: 1, failed: 0 });
    }

    #[test]
    fn test_conclude_marks_failure() {
        let store = Store::in_memory();
        let recorder =
            RunRecorder::start(&store, RecordId::new(1), RunSubject::Sales, ExecutionMode::Scheduled)
                .unwrap();
        let id = recorder.run_id();

        let result: Result<()> = recorder.conclude(Err(Error::Transport("timed out".into())));
        assert!(result.is_err());

        let run: SyncRun = store.get(id).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.unwrap().contains("timed out"));
    }
}
