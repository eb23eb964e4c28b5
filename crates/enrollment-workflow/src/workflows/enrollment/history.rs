use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use super::domain::{HistoryEntry, TimeWindow, WorkflowId};

/// Append-only audit trail of committed transitions, keyed by workflow.
pub trait HistoryLedger: Send + Sync {
    fn append(&self, workflow_id: &WorkflowId, entry: HistoryEntry) -> Result<(), LedgerError>;

    /// Entries whose timestamp falls inside `window`, oldest first.
    fn query(
        &self,
        workflow_id: &WorkflowId,
        window: TimeWindow,
    ) -> Result<Vec<HistoryEntry>, LedgerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("history window start {start} is after end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("history ledger unavailable: {0}")]
    Unavailable(String),
}

/// Process-local ledger used by the service binary and tests.
#[derive(Debug, Default)]
pub struct InMemoryHistoryLedger {
    entries: RwLock<HashMap<WorkflowId, Vec<HistoryEntry>>>,
}

impl InMemoryHistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, workflow_id: &WorkflowId) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl HistoryLedger for InMemoryHistoryLedger {
    fn append(&self, workflow_id: &WorkflowId, entry: HistoryEntry) -> Result<(), LedgerError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(workflow_id.clone())
            .or_default()
            .push(entry);
        Ok(())
    }

    fn query(
        &self,
        workflow_id: &WorkflowId,
        window: TimeWindow,
    ) -> Result<Vec<HistoryEntry>, LedgerError> {
        if !window.is_valid() {
            return Err(LedgerError::InvalidWindow {
                start: window.start,
                end: window.end,
            });
        }

        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<HistoryEntry> = guard
            .get(workflow_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| window.contains(entry.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Stable: entries sharing a timestamp keep their append order.
        entries.sort_by_key(|entry| entry.timestamp);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::enrollment::domain::{ActorRole, Metadata, WorkflowState};
    use chrono::{Duration, TimeZone};

    fn entry(to: WorkflowState, at: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            from_state: Some(WorkflowState::Created),
            to_state: to,
            actor_id: "reviewer-1".to_string(),
            actor_role: ActorRole::Admin,
            metadata: Metadata::new(),
            timestamp: at,
        }
    }

    #[test]
    fn query_filters_window_in_chronological_order() {
        let ledger = InMemoryHistoryLedger::new();
        let id = WorkflowId("wf-000001".to_string());
        let base = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();

        ledger
            .append(&id, entry(WorkflowState::AcademicReview, base + Duration::hours(5)))
            .unwrap();
        ledger
            .append(&id, entry(WorkflowState::DocumentVerification, base))
            .unwrap();
        ledger
            .append(&id, entry(WorkflowState::FinalReview, base + Duration::days(3)))
            .unwrap();

        let window = TimeWindow::new(Some(base), Some(base + Duration::days(1)));
        let states: Vec<_> = ledger
            .query(&id, window)
            .unwrap()
            .into_iter()
            .map(|entry| entry.to_state)
            .collect();

        assert_eq!(
            states,
            vec![
                WorkflowState::DocumentVerification,
                WorkflowState::AcademicReview
            ]
        );
        assert_eq!(ledger.len(&id), 3);
    }

    #[test]
    fn query_rejects_inverted_window_and_unknown_ids_are_empty() {
        let ledger = InMemoryHistoryLedger::new();
        let id = WorkflowId("wf-404".to_string());
        let now = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();

        assert!(ledger
            .query(&id, TimeWindow::unbounded())
            .unwrap()
            .is_empty());
        assert!(matches!(
            ledger.query(&id, TimeWindow::new(Some(now), Some(now - Duration::hours(1)))),
            Err(LedgerError::InvalidWindow { .. })
        ));
    }
}
