use std::collections::BTreeMap;

use super::super::domain::{ActorRole, WorkflowState};
use super::{TransitionRule, TransitionRuleTable, Validator};

pub(super) fn enrollment_table() -> TransitionRuleTable {
    TransitionRuleTable {
        initial_state: WorkflowState::Created,
        edges: standard_edges(),
    }
}

fn present(field: &str) -> Validator {
    Validator::RequiredFieldPresent {
        field: field.to_string(),
    }
}

fn flag(field: &str) -> Validator {
    Validator::BooleanFieldEquals {
        field: field.to_string(),
        expected: true,
    }
}

fn predicate(name: &str) -> Validator {
    Validator::CustomPredicateRef {
        name: name.to_string(),
    }
}

fn reject(role: ActorRole) -> TransitionRule {
    TransitionRule::new(WorkflowState::Rejected, role)
        .requires(&["rejectionReason"])
        .validated_by(present("rejectionReason"))
}

fn cancel() -> TransitionRule {
    TransitionRule::new(WorkflowState::Cancelled, ActorRole::Admin)
        .requires(&["cancellationReason"])
        .validated_by(present("cancellationReason"))
}

fn standard_edges() -> BTreeMap<WorkflowState, Vec<TransitionRule>> {
    use WorkflowState::*;

    let mut edges = BTreeMap::new();
    edges.insert(
        Created,
        vec![
            TransitionRule::new(DocumentVerification, ActorRole::DocumentVerifier)
                .requires(&["documentsVerified", "verificationNotes"])
                .validated_by(flag("documentsVerified")),
            cancel(),
        ],
    );
    edges.insert(
        DocumentVerification,
        vec![
            TransitionRule::new(AcademicReview, ActorRole::AcademicReviewer)
                .requires(&["transcriptsReceived"])
                .validated_by(flag("transcriptsReceived")),
            reject(ActorRole::DocumentVerifier),
        ],
    );
    edges.insert(
        AcademicReview,
        vec![
            TransitionRule::new(FinalReview, ActorRole::AdmissionsOfficer)
                .requires(&["academicScore", "academicReviewNotes"])
                .validated_by(predicate("academic_score_in_range"))
                .validated_by(present("academicReviewNotes")),
            reject(ActorRole::AcademicReviewer),
        ],
    );
    edges.insert(
        FinalReview,
        vec![
            TransitionRule::new(Approved, ActorRole::AdmissionsOfficer)
                .requires(&["decisionNotes"])
                .validated_by(predicate("decision_notes_present")),
            TransitionRule::new(Waitlisted, ActorRole::AdmissionsOfficer)
                .requires(&["waitlistCategory"])
                .validated_by(present("waitlistCategory")),
            reject(ActorRole::AdmissionsOfficer),
        ],
    );
    edges.insert(
        Waitlisted,
        vec![
            TransitionRule::new(Approved, ActorRole::AdmissionsOfficer)
                .requires(&["capacityAvailable"])
                .validated_by(flag("capacityAvailable")),
            reject(ActorRole::AdmissionsOfficer),
        ],
    );
    edges.insert(
        Approved,
        vec![
            TransitionRule::new(EnrollmentConfirmed, ActorRole::EnrollmentOfficer)
                .requires(&["depositReceived"])
                .validated_by(flag("depositReceived")),
            cancel(),
        ],
    );
    edges.insert(
        EnrollmentConfirmed,
        vec![TransitionRule::new(Completed, ActorRole::EnrollmentOfficer)],
    );
    edges.insert(Rejected, Vec::new());
    edges.insert(Cancelled, Vec::new());
    edges.insert(Completed, Vec::new());
    edges
}
