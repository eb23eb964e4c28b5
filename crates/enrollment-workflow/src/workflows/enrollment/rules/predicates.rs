use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::super::domain::Metadata;

pub type PredicateFn = Arc<dyn Fn(&Metadata) -> bool + Send + Sync>;

/// Named predicates that rule tables can reference through `CustomPredicateRef`.
#[derive(Clone, Default)]
pub struct PredicateRegistry {
    predicates: BTreeMap<String, PredicateFn>,
}

impl PredicateRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the predicates the standard table uses.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("academic_score_in_range", academic_score_in_range);
        registry.register("decision_notes_present", |metadata: &Metadata| {
            metadata
                .get("decisionNotes")
                .and_then(Value::as_str)
                .map(|notes| notes.trim().len() >= 3)
                .unwrap_or(false)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&Metadata) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(predicate));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&PredicateFn> {
        self.predicates.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.predicates.keys().map(String::as_str)
    }
}

impl fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateRegistry")
            .field("predicates", &self.predicates.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn academic_score_in_range(metadata: &Metadata) -> bool {
    metadata
        .get("academicScore")
        .and_then(Value::as_f64)
        .map(|score| (0.0..=100.0).contains(&score))
        .unwrap_or(false)
}
