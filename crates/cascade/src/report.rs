//! Structured result of a delete batch.
//!
//! The report is pure aggregation: it never touches the store. Reason
//! strings are carried verbatim from the outcomes so callers can display
//! them as they are.

use crate::domain::{DeleteOutcome, ObjectKind, ObjectRef};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Coarse status of one reported object.
///
/// There is no separate not-found status: a requested object that does not
/// exist is reported as [`ReportStatus::Retained`] with reason `not found`,
/// so resubmitting a finished batch reports nothing as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReportStatus {
    /// Deleted with all its edges
    Deleted,
    /// Left in place
    Retained,
    /// Not permitted
    Denied,
    /// Store failure
    Failed,
}

impl From<&DeleteOutcome> for ReportStatus {
    fn from(outcome: &DeleteOutcome) -> Self {
        match outcome {
            DeleteOutcome::Deleted => Self::Deleted,
            DeleteOutcome::Retained(_) => Self::Retained,
            DeleteOutcome::Denied(_) => Self::Denied,
            DeleteOutcome::Failed(_) => Self::Failed,
        }
    }
}

/// One line of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    /// Object type
    #[serde(rename = "type")]
    pub kind: ObjectKind,

    /// Object id
    pub id: i64,

    /// Coarse status
    pub status: ReportStatus,

    /// Reason, empty for deleted objects
    pub reason: String,
}

impl ReportEntry {
    fn new(object: ObjectRef, outcome: &DeleteOutcome) -> Self {
        Self {
            kind: object.kind,
            id: object.id,
            status: ReportStatus::from(outcome),
            reason: outcome.reason(),
        }
    }

    /// Identity of the reported object
    #[must_use]
    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(self.kind, self.id)
    }
}

/// Number of objects per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    /// Deleted objects
    pub deleted: usize,
    /// Retained objects
    pub retained: usize,
    /// Denied objects
    pub denied: usize,
    /// Failed objects
    pub failed: usize,
}

impl ReportSummary {
    fn count(&mut self, status: ReportStatus) {
        match status {
            ReportStatus::Deleted => self.deleted += 1,
            ReportStatus::Retained => self.retained += 1,
            ReportStatus::Denied => self.denied += 1,
            ReportStatus::Failed => self.failed += 1,
        }
    }

    /// Total number of reported objects
    #[must_use]
    pub fn total(&self) -> usize {
        self.deleted + self.retained + self.denied + self.failed
    }
}

/// Final report of a delete batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    entries: Vec<ReportEntry>,
    summary: ReportSummary,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    #[serde(skip)]
    outcomes: BTreeMap<ObjectRef, DeleteOutcome>,
}

impl DeleteReport {
    /// Entries: requested roots in request order, then the remaining
    /// objects in `(type, id)` order
    #[must_use]
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    /// Outcome of one object, `None` if it was not touched
    #[must_use]
    pub fn outcome(&self, object: &ObjectRef) -> Option<&DeleteOutcome> {
        self.outcomes.get(object)
    }

    /// All outcomes keyed by object
    #[must_use]
    pub fn outcomes(&self) -> &BTreeMap<ObjectRef, DeleteOutcome> {
        &self.outcomes
    }

    /// Counts per status
    #[must_use]
    pub fn summary(&self) -> ReportSummary {
        self.summary
    }

    /// When processing started
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When processing finished
    #[must_use]
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Number of reported objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no object was reported
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if every reported object was deleted
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.summary.deleted == self.summary.total()
    }

    /// Serialize the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Collects outcomes while a batch is processed.
#[derive(Debug)]
pub struct ReportBuilder {
    roots: Vec<ObjectRef>,
    outcomes: BTreeMap<ObjectRef, DeleteOutcome>,
    started_at: DateTime<Utc>,
}

impl ReportBuilder {
    /// Start a report for roots in request order
    #[must_use]
    pub fn new(roots: Vec<ObjectRef>) -> Self {
        Self {
            roots,
            outcomes: BTreeMap::new(),
            started_at: Utc::now(),
        }
    }

    /// Replace the requested roots listed first in the report
    pub fn set_roots(&mut self, roots: Vec<ObjectRef>) {
        self.roots = roots;
    }

    /// Record the outcome of one object, replacing any earlier one.
    pub fn record(&mut self, object: ObjectRef, outcome: DeleteOutcome) {
        self.outcomes.insert(object, outcome);
    }

    /// Outcome recorded so far for an object
    #[must_use]
    pub fn get(&self, object: &ObjectRef) -> Option<&DeleteOutcome> {
        self.outcomes.get(object)
    }

    /// Order the entries and stamp the finish time
    #[must_use]
    pub fn finish(self) -> DeleteReport {
        let mut entries = Vec::with_capacity(self.outcomes.len());
        let mut summary = ReportSummary::default();
        let mut listed = std::collections::BTreeSet::new();

        let roots = self.roots.iter().filter(|root| self.outcomes.contains_key(*root));
        let rest = self.outcomes.keys().filter(|object| !self.roots.contains(*object));
        for object in roots.chain(rest) {
            if !listed.insert(*object) {
                continue;
            }
            let entry = ReportEntry::new(*object, &self.outcomes[object]);
            summary.count(entry.status);
            entries.push(entry);
        }

        DeleteReport {
            entries,
            summary,
            started_at: self.started_at,
            finished_at: Utc::now(),
            outcomes: self.outcomes,
        }
    }
}

impl Extend<(ObjectRef, DeleteOutcome)> for ReportBuilder {
    fn extend<T: IntoIterator<Item = (ObjectRef, DeleteOutcome)>>(&mut self, outcomes: T) {
        for (object, outcome) in outcomes {
            self.record(object, outcome);
        }
    }
}
