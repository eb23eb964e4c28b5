//! Dense, ordered per-category waitlists.
//!
//! Each category owns its own lock so unrelated categories never contend. A second
//! index maps workflow ids to their category; it is always taken after a category
//! lock, never before, so the two cannot deadlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use super::domain::{Metadata, WaitlistEntry, WorkflowId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitlistError {
    #[error("workflow {workflow_id} is already waitlisted in '{category}'")]
    AlreadyWaitlisted {
        workflow_id: WorkflowId,
        category: String,
    },
    #[error("workflow {0} is not on any waitlist")]
    NotWaitlisted(WorkflowId),
    #[error("position {position} is outside 1..={count} for workflow {workflow_id}")]
    InvalidPosition {
        workflow_id: WorkflowId,
        position: usize,
        count: usize,
    },
}

type Category = Arc<Mutex<Vec<WaitlistEntry>>>;

#[derive(Debug, Default)]
pub struct WaitlistManager {
    categories: RwLock<HashMap<String, Category>>,
    index: Mutex<HashMap<WorkflowId, String>>,
}

impl WaitlistManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends at `count + 1`.
    pub fn add_to_waitlist(
        &self,
        workflow_id: &WorkflowId,
        category: &str,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Result<WaitlistEntry, WaitlistError> {
        let slot = self.category_or_insert(category);
        let mut entries = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = index.get(workflow_id) {
            return Err(WaitlistError::AlreadyWaitlisted {
                workflow_id: workflow_id.clone(),
                category: existing.clone(),
            });
        }

        let entry = WaitlistEntry {
            workflow_id: workflow_id.clone(),
            category: category.to_string(),
            position: entries.len() + 1,
            waitlist_date: now,
            metadata,
        };
        entries.push(entry.clone());
        index.insert(workflow_id.clone(), category.to_string());
        Ok(entry)
    }

    /// Removes the entry and closes the gap behind it. Returns the removed entry.
    pub fn remove_position(&self, workflow_id: &WorkflowId) -> Result<WaitlistEntry, WaitlistError> {
        let slot = self.slot_for(workflow_id)?;
        let mut entries = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let offset = locate(&entries, workflow_id)?;

        let removed = entries.remove(offset);
        renumber(&mut entries);
        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(workflow_id);
        Ok(removed)
    }

    /// Moves the entry to `new_position`, shifting the entries between the old and
    /// new slots by one.
    pub fn update_position(
        &self,
        workflow_id: &WorkflowId,
        new_position: usize,
    ) -> Result<WaitlistEntry, WaitlistError> {
        let slot = self.slot_for(workflow_id)?;
        let mut entries = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let offset = locate(&entries, workflow_id)?;

        let count = entries.len();
        if new_position == 0 || new_position > count {
            return Err(WaitlistError::InvalidPosition {
                workflow_id: workflow_id.clone(),
                position: new_position,
                count,
            });
        }

        let entry = entries.remove(offset);
        entries.insert(new_position - 1, entry);
        renumber(&mut entries);
        Ok(entries[new_position - 1].clone())
    }

    /// Snapshot of a category ordered by position.
    pub fn entries(&self, category: &str) -> Vec<WaitlistEntry> {
        let slot = self
            .categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(category)
            .cloned();
        match slot {
            Some(slot) => slot.lock().unwrap_or_else(PoisonError::into_inner).clone(),
            None => Vec::new(),
        }
    }

    pub fn entry(&self, workflow_id: &WorkflowId) -> Option<WaitlistEntry> {
        let slot = self.slot_for(workflow_id).ok()?;
        let entries = slot.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .find(|entry| &entry.workflow_id == workflow_id)
            .cloned()
    }

    fn category_or_insert(&self, category: &str) -> Category {
        if let Some(slot) = self
            .categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(category)
        {
            return slot.clone();
        }
        self.categories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(category.to_string())
            .or_default()
            .clone()
    }

    fn slot_for(&self, workflow_id: &WorkflowId) -> Result<Category, WaitlistError> {
        let category = self
            .index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WaitlistError::NotWaitlisted(workflow_id.clone()))?;
        self.categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .cloned()
            .ok_or_else(|| WaitlistError::NotWaitlisted(workflow_id.clone()))
    }
}

// The index is read without the category lock held, so a concurrent removal can
// leave us holding a category that no longer contains the workflow.
fn locate(entries: &[WaitlistEntry], workflow_id: &WorkflowId) -> Result<usize, WaitlistError> {
    entries
        .iter()
        .position(|entry| &entry.workflow_id == workflow_id)
        .ok_or_else(|| WaitlistError::NotWaitlisted(workflow_id.clone()))
}

fn renumber(entries: &mut [WaitlistEntry]) {
    for (offset, entry) in entries.iter_mut().enumerate() {
        entry.position = offset + 1;
    }
}
