//! Run ledger: one header per batch with its per-item outcome lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use omnisync_common::{EntityKind, Error, ExecutionMode, RecordId, Result};

/// What a run processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "subject", rename_all = "snake_case")]
pub enum RunSubject {
    /// Session establishment; only recorded when it fails.
    Connection,
    Products,
    Images { brand: String },
    PriceLists,
    Sales,
    Purchases,
    /// Operator confirmation of pending remote purchase orders.
    PurchaseConfirmation,
}

impl RunSubject {
    /// Subject for an entity kind batch.
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Products => Self::Products,
            EntityKind::Images => Self::Images {
                brand: crate::config::ALL_BRANDS.to_string(),
            },
            EntityKind::PriceLists => Self::PriceLists,
            EntityKind::Sales => Self::Sales,
            EntityKind::Purchases => Self::Purchases,
        }
    }

    /// Entity kind this subject counts towards, if any.
    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            Self::Products => Some(EntityKind::Products),
            Self::Images { .. } => Some(EntityKind::Images),
            Self::PriceLists => Some(EntityKind::PriceLists),
            Self::Sales => Some(EntityKind::Sales),
            Self::Purchases | Self::PurchaseConfirmation => Some(EntityKind::Purchases),
            Self::Connection => None,
        }
    }
}

impl fmt::Display for RunSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::Images { brand } => write!(f, "images [{}]", brand),
            Self::PurchaseConfirmation => f.write_str("purchase confirmation"),
            other => match other.kind() {
                Some(kind) => write!(f, "{}", kind),
                None => Ok(()),
            },
        }
    }
}

/// Header status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

/// Per-item outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Synced,
    Skipped,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synced => f.write_str("synced"),
            Self::Skipped => f.write_str("skipped"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// One processed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLine {
    /// Display name of the item.
    pub item: String,
    /// Key the item was matched on.
    #[serde(default)]
    pub matching_key: Option<String>,
    pub outcome: Outcome,
    pub reason: String,
}

impl RunLine {
    pub fn new(
        item: impl Into<String>,
        matching_key: Option<&str>,
        outcome: Outcome,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            item: item.into(),
            matching_key: matching_key.map(str::to_string),
            outcome,
            reason: reason.into(),
        }
    }
}

/// Outcome counters of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub total: u64,
    pub synced: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl RunCounts {
    /// Tally lines. `total` is at least the number of lines.
    pub fn tally(total: u64, lines: &[RunLine]) -> Self {
        let mut counts = Self {
            total,
            ..Self::default()
        };
        for line in lines {
            match line.outcome {
                Outcome::Synced => counts.synced += 1,
                Outcome::Skipped => counts.skipped += 1,
                Outcome::Failed => counts.failed += 1,
            }
        }
        counts.total = counts.total.max(lines.len() as u64);
        counts
    }
}

impl std::ops::AddAssign for RunCounts {
    fn add_assign(&mut self, other: Self) {
        self.total += other.total;
        self.synced += other.synced;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Run header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    #[serde(default)]
    pub id: RecordId,
    pub config_id: RecordId,
    pub subject: RunSubject,
    pub mode: ExecutionMode,
    pub status: RunStatus,
    #[serde(default)]
    pub counts: RunCounts,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_secs: f64,
    #[serde(default)]
    pub lines: Vec<RunLine>,
}

impl SyncRun {
    /// New in-progress header.
    pub fn start(config_id: RecordId, subject: RunSubject, mode: ExecutionMode) -> Self {
        Self {
            id: RecordId::default(),
            config_id,
            subject,
            mode,
            status: RunStatus::InProgress,
            counts: RunCounts::default(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_secs: 0.0,
            lines: Vec::new(),
        }
    }

    /// Close the run.
    ///
    /// # Errors
    /// - `InvalidInput` if the run already left `InProgress` or `status` is
    ///   `InProgress`
    pub fn finish(
        &mut self,
        status: RunStatus,
        counts: RunCounts,
        lines: Vec<RunLine>,
        error: Option<String>,
    ) -> Result<()> {
        if self.status != RunStatus::InProgress {
            return Err(Error::InvalidInput(format!(
                "Run {} is already {:?}",
                self.id, self.status
            )));
        }
        if status == RunStatus::InProgress {
            return Err(Error::InvalidInput(
                "A run can only finish as completed or failed".to_string(),
            ));
        }

        let now = Utc::now();
        self.status = status;
        self.counts = counts;
        self.lines = lines;
        self.error = error;
        self.finished_at = Some(now);
        self.duration_secs = (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.status != RunStatus::InProgress
    }
}
