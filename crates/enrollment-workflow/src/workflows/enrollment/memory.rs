//! In-process collaborator implementations used by the service binary and tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};

use super::domain::{ApplicationId, Workflow, WorkflowId};
use super::repository::{
    ApplicationRegistry, NotificationDispatcher, NotifyError, RegistryError, StoreError,
    WorkflowEvent, WorkflowFilter, WorkflowStore,
};

#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    records: RwLock<BTreeMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowStore for InMemoryWorkflowStore {
    fn insert(&self, mut workflow: Workflow) -> Result<Workflow, StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(&workflow.id) {
            return Err(StoreError::Duplicate(workflow.id));
        }
        if let Some(tracking) = records
            .values()
            .find(|stored| stored.application_id == workflow.application_id)
        {
            return Err(StoreError::ApplicationTracked {
                application_id: workflow.application_id,
                workflow_id: tracking.id.clone(),
            });
        }
        workflow.version = 1;
        records.insert(workflow.id.clone(), workflow.clone());
        Ok(workflow)
    }

    fn get_by_id_with_version(&self, id: &WorkflowId) -> Result<(Workflow, u64), StoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .get(id)
            .map(|workflow| (workflow.clone(), workflow.version))
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn put_with_version_check(
        &self,
        mut workflow: Workflow,
        expected_version: u64,
    ) -> Result<Workflow, StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let stored = records
            .get(&workflow.id)
            .ok_or_else(|| StoreError::NotFound(workflow.id.clone()))?;
        if stored.version != expected_version {
            return Err(StoreError::Conflict {
                id: workflow.id.clone(),
                expected: expected_version,
                actual: stored.version,
            });
        }
        workflow.version = expected_version + 1;
        records.insert(workflow.id.clone(), workflow.clone());
        Ok(workflow)
    }

    fn list_by_filter(&self, filter: &WorkflowFilter) -> Result<Vec<Workflow>, StoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .values()
            .filter(|workflow| filter.matches(workflow))
            .cloned()
            .collect())
    }
}

/// Keeps every emitted event so callers can assert on integration boundaries.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl NotificationDispatcher for RecordingNotifier {
    fn emit(&self, event: WorkflowEvent) -> Result<(), NotifyError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

/// Registry backed by a fixed id set, or accepting every id.
#[derive(Debug, Default)]
pub struct StaticApplicationRegistry {
    known: RwLock<HashSet<ApplicationId>>,
    allow_any: bool,
}

impl StaticApplicationRegistry {
    pub fn new<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = ApplicationId>,
    {
        Self {
            known: RwLock::new(ids.into_iter().collect()),
            allow_any: false,
        }
    }

    pub fn allow_any() -> Self {
        Self {
            known: RwLock::default(),
            allow_any: true,
        }
    }

    pub fn register(&self, id: ApplicationId) {
        self.known
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }
}

impl ApplicationRegistry for StaticApplicationRegistry {
    fn application_exists(&self, id: &ApplicationId) -> Result<bool, RegistryError> {
        if self.allow_any {
            return Ok(true);
        }
        Ok(self
            .known
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id))
    }
}
