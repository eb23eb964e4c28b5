//! Transition rule table: the directed graph of allowed moves between workflow states.
//!
//! Tables are plain data. They serialize to JSON for audit, load from a file at startup,
//! and are validated once on construction so the state machine never has to second-guess
//! them at transition time.

mod predicates;
mod standard;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{ActorRole, Metadata, WorkflowState};

pub use predicates::{PredicateFn, PredicateRegistry};

/// Predicate evaluated against a transition's metadata payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Validator {
    /// Key is present, not null, and not a blank string.
    RequiredFieldPresent { field: String },
    BooleanFieldEquals { field: String, expected: bool },
    /// Named predicate resolved through the [`PredicateRegistry`].
    CustomPredicateRef { name: String },
}

impl Validator {
    pub fn describe(&self) -> String {
        match self {
            Validator::RequiredFieldPresent { field } => format!("{field} must be present"),
            Validator::BooleanFieldEquals { field, expected } => {
                format!("{field} must equal {expected}")
            }
            Validator::CustomPredicateRef { name } => format!("predicate {name}"),
        }
    }

    pub fn evaluate(&self, metadata: &Metadata, predicates: &PredicateRegistry) -> bool {
        match self {
            Validator::RequiredFieldPresent { field } => match metadata.get(field) {
                None | Some(Value::Null) => false,
                Some(Value::String(text)) => !text.trim().is_empty(),
                Some(_) => true,
            },
            Validator::BooleanFieldEquals { field, expected } => {
                metadata.get(field).and_then(Value::as_bool) == Some(*expected)
            }
            Validator::CustomPredicateRef { name } => predicates
                .get(name)
                .map(|predicate| predicate(metadata))
                .unwrap_or(false),
        }
    }
}

/// One outgoing edge of the state graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub target: WorkflowState,
    pub required_role: ActorRole,
    #[serde(default)]
    pub required_metadata: Vec<String>,
    #[serde(default)]
    pub validators: Vec<Validator>,
}

impl TransitionRule {
    pub fn new(target: WorkflowState, required_role: ActorRole) -> Self {
        Self {
            target,
            required_role,
            required_metadata: Vec::new(),
            validators: Vec::new(),
        }
    }

    pub fn requires(mut self, keys: &[&str]) -> Self {
        self.required_metadata
            .extend(keys.iter().map(|key| key.to_string()));
        self
    }

    pub fn validated_by(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// First required key missing from `metadata`, in declared order.
    pub fn first_missing_key(&self, metadata: &Metadata) -> Option<&str> {
        self.required_metadata
            .iter()
            .find(|key| !metadata.contains_key(key.as_str()))
            .map(String::as_str)
    }

    /// Index and validator of the first predicate that rejects `metadata`.
    pub fn first_failing_validator(
        &self,
        metadata: &Metadata,
        predicates: &PredicateRegistry,
    ) -> Option<(usize, &Validator)> {
        self.validators
            .iter()
            .enumerate()
            .find(|(_, validator)| !validator.evaluate(metadata, predicates))
    }

    /// The part of `metadata` this edge reads: required keys plus fields named by
    /// field validators. Custom predicates only see what those keys carry.
    pub fn payload_from(&self, metadata: &Metadata) -> Metadata {
        let validated = self.validators.iter().filter_map(|validator| match validator {
            Validator::RequiredFieldPresent { field }
            | Validator::BooleanFieldEquals { field, .. } => Some(field),
            Validator::CustomPredicateRef { .. } => None,
        });
        self.required_metadata
            .iter()
            .chain(validated)
            .filter_map(|key| metadata.get_key_value(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn is_satisfied_by(&self, metadata: &Metadata, predicates: &PredicateRegistry) -> bool {
        self.first_missing_key(metadata).is_none()
            && self.first_failing_validator(metadata, predicates).is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuleTableError {
    #[error("state {from} declares more than one edge to {to}")]
    DuplicateEdge {
        from: WorkflowState,
        to: WorkflowState,
    },
    #[error("initial state {0} has no outgoing transitions")]
    InitialStateTerminal(WorkflowState),
    #[error("rule {from} -> {to} references unregistered predicate '{name}'")]
    UnknownPredicate {
        from: WorkflowState,
        to: WorkflowState,
        name: String,
    },
    #[error("failed to read rule table: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid rule table document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Wire/document form of a table before validation.
#[derive(Debug, Deserialize)]
struct RuleTableDocument {
    initial_state: WorkflowState,
    edges: BTreeMap<WorkflowState, Vec<TransitionRule>>,
}

impl TryFrom<RuleTableDocument> for TransitionRuleTable {
    type Error = RuleTableError;

    fn try_from(document: RuleTableDocument) -> Result<Self, Self::Error> {
        TransitionRuleTable::new(document.initial_state, document.edges)
    }
}

/// Immutable state graph injected into the state machine.
///
/// A state with an empty (or absent) edge list is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleTableDocument")]
pub struct TransitionRuleTable {
    initial_state: WorkflowState,
    edges: BTreeMap<WorkflowState, Vec<TransitionRule>>,
}

impl TransitionRuleTable {
    pub fn new(
        initial_state: WorkflowState,
        edges: BTreeMap<WorkflowState, Vec<TransitionRule>>,
    ) -> Result<Self, RuleTableError> {
        for (from, rules) in &edges {
            let mut seen = BTreeSet::new();
            for rule in rules {
                if !seen.insert(rule.target) {
                    return Err(RuleTableError::DuplicateEdge {
                        from: *from,
                        to: rule.target,
                    });
                }
            }
        }

        let table = Self {
            initial_state,
            edges,
        };
        if table.is_terminal(initial_state) {
            return Err(RuleTableError::InitialStateTerminal(initial_state));
        }
        Ok(table)
    }

    /// The enrollment review lifecycle used when no table file is configured.
    pub fn standard() -> Self {
        standard::enrollment_table()
    }

    pub fn from_json(raw: &str) -> Result<Self, RuleTableError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RuleTableError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn to_json_pretty(&self) -> Result<String, RuleTableError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn initial_state(&self) -> WorkflowState {
        self.initial_state
    }

    pub fn edges_from(&self, state: WorkflowState) -> &[TransitionRule] {
        self.edges.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn rule(&self, from: WorkflowState, to: WorkflowState) -> Option<&TransitionRule> {
        self.edges_from(from).iter().find(|rule| rule.target == to)
    }

    pub fn is_terminal(&self, state: WorkflowState) -> bool {
        self.edges_from(state).is_empty()
    }

    pub fn allowed_targets(&self, state: WorkflowState) -> Vec<WorkflowState> {
        self.edges_from(state).iter().map(|rule| rule.target).collect()
    }

    /// Ensures every custom predicate the table names can be resolved.
    pub fn check_predicates(&self, registry: &PredicateRegistry) -> Result<(), RuleTableError> {
        for (from, rules) in &self.edges {
            for rule in rules {
                for validator in &rule.validators {
                    if let Validator::CustomPredicateRef { name } = validator {
                        if !registry.contains(name) {
                            return Err(RuleTableError::UnknownPredicate {
                                from: *from,
                                to: rule.target,
                                name: name.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(value: Value) -> Metadata {
        serde_json::from_value(value).expect("metadata object")
    }

    #[test]
    fn standard_table_matches_enrollment_lifecycle() {
        let table = TransitionRuleTable::standard();
        assert_eq!(table.initial_state(), WorkflowState::Created);
        assert_eq!(
            table.allowed_targets(WorkflowState::Created),
            vec![WorkflowState::DocumentVerification, WorkflowState::Cancelled]
        );
        for terminal in [
            WorkflowState::Rejected,
            WorkflowState::Cancelled,
            WorkflowState::Completed,
        ] {
            assert!(table.is_terminal(terminal), "{terminal} should be terminal");
        }

        let rule = table
            .rule(WorkflowState::Created, WorkflowState::DocumentVerification)
            .expect("edge exists");
        assert_eq!(rule.required_role, ActorRole::DocumentVerifier);
        assert_eq!(
            rule.required_metadata,
            vec!["documentsVerified".to_string(), "verificationNotes".to_string()]
        );
    }

    #[test]
    fn standard_table_predicates_resolve_against_builtins() {
        let table = TransitionRuleTable::standard();
        table
            .check_predicates(&PredicateRegistry::with_builtins())
            .expect("builtin predicates cover the standard table");
    }

    #[test]
    fn rejects_duplicate_edges() {
        let mut edges = BTreeMap::new();
        edges.insert(
            WorkflowState::Created,
            vec![
                TransitionRule::new(WorkflowState::Completed, ActorRole::Admin),
                TransitionRule::new(WorkflowState::Completed, ActorRole::System),
            ],
        );

        match TransitionRuleTable::new(WorkflowState::Created, edges) {
            Err(RuleTableError::DuplicateEdge { from, to }) => {
                assert_eq!(from, WorkflowState::Created);
                assert_eq!(to, WorkflowState::Completed);
            }
            other => panic!("expected duplicate edge error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_terminal_initial_state() {
        let result = TransitionRuleTable::new(WorkflowState::Completed, BTreeMap::new());
        assert!(matches!(
            result,
            Err(RuleTableError::InitialStateTerminal(WorkflowState::Completed))
        ));
    }

    #[test]
    fn json_document_round_trips_and_is_validated() {
        let table = TransitionRuleTable::standard();
        let json = table.to_json_pretty().expect("serializes");
        let restored = TransitionRuleTable::from_json(&json).expect("parses");
        assert_eq!(restored, table);

        let invalid = r#"{"initial_state":"COMPLETED","edges":{}}"#;
        assert!(matches!(
            TransitionRuleTable::from_json(invalid),
            Err(RuleTableError::Parse(_))
        ));
    }

    #[test]
    fn validators_evaluate_metadata() {
        let registry = PredicateRegistry::with_builtins();
        let payload = metadata(json!({
            "documentsVerified": true,
            "verificationNotes": "  ",
            "academicScore": 87,
        }));

        let present = Validator::RequiredFieldPresent {
            field: "documentsVerified".to_string(),
        };
        let blank = Validator::RequiredFieldPresent {
            field: "verificationNotes".to_string(),
        };
        let flag = Validator::BooleanFieldEquals {
            field: "documentsVerified".to_string(),
            expected: true,
        };
        let custom = Validator::CustomPredicateRef {
            name: "academic_score_in_range".to_string(),
        };
        let unknown = Validator::CustomPredicateRef {
            name: "not_registered".to_string(),
        };

        assert!(present.evaluate(&payload, &registry));
        assert!(!blank.evaluate(&payload, &registry));
        assert!(flag.evaluate(&payload, &registry));
        assert!(custom.evaluate(&payload, &registry));
        assert!(!unknown.evaluate(&payload, &registry));
    }

    #[test]
    fn validator_serializes_as_tagged_variant() {
        let validator = Validator::BooleanFieldEquals {
            field: "depositReceived".to_string(),
            expected: true,
        };
        let value = serde_json::to_value(&validator).expect("serializes");
        assert_eq!(
            value,
            json!({"kind": "boolean_field_equals", "field": "depositReceived", "expected": true})
        );
    }
}
