use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    AssignmentRecord, HistoryEntry, TimeWindow, Workflow, WorkflowId, WorkflowMetrics,
    WorkflowState,
};
use super::routing::SlaStatus;

/// Incremental dwell/transition accounting plus on-demand bottleneck analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsAggregator;

impl MetricsAggregator {
    pub fn on_transition(
        &self,
        metrics: &mut WorkflowMetrics,
        exited_state: WorkflowState,
        dwell: Duration,
    ) {
        let seconds = dwell.num_seconds().max(0) as u64;
        *metrics.time_in_state.entry(exited_state).or_insert(0) += seconds;
        metrics.total_transitions += 1;
    }

    /// States whose cumulative dwell across `workflows` exceeds `threshold`,
    /// worst first. Never cached: callers pass the population they queried.
    pub fn bottlenecks(&self, workflows: &[Workflow], threshold: Duration) -> Vec<Bottleneck> {
        let threshold_seconds = threshold.num_seconds().max(0) as u64;
        let mut totals: BTreeMap<WorkflowState, (u64, usize)> = BTreeMap::new();

        for workflow in workflows {
            for (state, seconds) in &workflow.metrics.time_in_state {
                let slot = totals.entry(*state).or_insert((0, 0));
                slot.0 += seconds;
                slot.1 += 1;
            }
        }

        let mut bottlenecks: Vec<Bottleneck> = totals
            .into_iter()
            .filter(|(_, (total, _))| *total > threshold_seconds)
            .map(|(state, (total, workflows))| Bottleneck {
                state,
                total_seconds: total,
                workflows,
                average_seconds: total / workflows.max(1) as u64,
            })
            .collect();

        bottlenecks.sort_by(|a, b| {
            b.total_seconds
                .cmp(&a.total_seconds)
                .then_with(|| a.state.cmp(&b.state))
        });
        bottlenecks
    }

    pub fn report(
        &self,
        workflow: &Workflow,
        window: TimeWindow,
        history: &[HistoryEntry],
        sla: SlaStatus,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> MetricsReport {
        let transitions_in_window = history
            .iter()
            .filter(|entry| entry.is_transition() && window.contains(entry.timestamp))
            .count();
        let current_state_seconds = now
            .signed_duration_since(workflow.entered_current_state_at())
            .num_seconds()
            .max(0) as u64;

        MetricsReport {
            workflow_id: workflow.id.clone(),
            current_state: workflow.current_state,
            time_in_state: workflow.metrics.time_in_state.clone(),
            total_transitions: workflow.metrics.total_transitions,
            assignment_history: workflow.metrics.assignment_history.clone(),
            window,
            transitions_in_window,
            current_state_seconds,
            sla,
            threshold_seconds: threshold.num_seconds().max(0) as u64,
            bottlenecks: self.bottlenecks(std::slice::from_ref(workflow), threshold),
        }
    }

    pub fn population(
        &self,
        workflows: &[Workflow],
        breached: usize,
        threshold: Duration,
    ) -> PopulationMetrics {
        let mut time_in_state: BTreeMap<WorkflowState, u64> = BTreeMap::new();
        let mut total_transitions = 0;
        for workflow in workflows {
            total_transitions += workflow.metrics.total_transitions;
            for (state, seconds) in &workflow.metrics.time_in_state {
                *time_in_state.entry(*state).or_insert(0) += seconds;
            }
        }

        PopulationMetrics {
            workflows: workflows.len(),
            total_transitions,
            time_in_state,
            sla_breaches: breached,
            threshold_seconds: threshold.num_seconds().max(0) as u64,
            bottlenecks: self.bottlenecks(workflows, threshold),
        }
    }
}

/// A state accumulating more dwell than the configured threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub state: WorkflowState,
    pub total_seconds: u64,
    pub workflows: usize,
    pub average_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub workflow_id: WorkflowId,
    pub current_state: WorkflowState,
    pub time_in_state: BTreeMap<WorkflowState, u64>,
    pub total_transitions: u64,
    pub assignment_history: Vec<AssignmentRecord>,
    pub window: TimeWindow,
    pub transitions_in_window: usize,
    pub current_state_seconds: u64,
    pub sla: SlaStatus,
    pub threshold_seconds: u64,
    pub bottlenecks: Vec<Bottleneck>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationMetrics {
    pub workflows: usize,
    pub total_transitions: u64,
    pub time_in_state: BTreeMap<WorkflowState, u64>,
    pub sla_breaches: usize,
    pub threshold_seconds: u64,
    pub bottlenecks: Vec<Bottleneck>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::enrollment::domain::{
        Actor, ApplicationId, WorkflowDraft, WorkflowId,
    };
    use chrono::TimeZone;

    fn workflow_with_dwell(id: &str, dwell: &[(WorkflowState, u64)]) -> Workflow {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let mut workflow = Workflow::open(
            WorkflowId(id.to_string()),
            ApplicationId(format!("app-{id}")),
            WorkflowState::Created,
            WorkflowDraft::default(),
            &Actor::system(),
            now,
        );
        for (state, seconds) in dwell {
            workflow.metrics.time_in_state.insert(*state, *seconds);
        }
        workflow
    }

    #[test]
    fn on_transition_accumulates_dwell_and_counts() {
        let aggregator = MetricsAggregator;
        let mut metrics = WorkflowMetrics::default();

        aggregator.on_transition(&mut metrics, WorkflowState::Created, Duration::hours(2));
        aggregator.on_transition(
            &mut metrics,
            WorkflowState::Created,
            Duration::minutes(30),
        );
        aggregator.on_transition(
            &mut metrics,
            WorkflowState::DocumentVerification,
            Duration::seconds(-5),
        );

        assert_eq!(metrics.total_transitions, 3);
        assert_eq!(metrics.time_in_state[&WorkflowState::Created], 9_000);
        assert_eq!(metrics.time_in_state[&WorkflowState::DocumentVerification], 0);
    }

    #[test]
    fn bottlenecks_rank_states_above_threshold() {
        let day = 86_400;
        let workflows = vec![
            workflow_with_dwell(
                "wf-1",
                &[
                    (WorkflowState::Created, 3_600),
                    (WorkflowState::AcademicReview, 2 * day),
                ],
            ),
            workflow_with_dwell(
                "wf-2",
                &[
                    (WorkflowState::AcademicReview, day),
                    (WorkflowState::DocumentVerification, 2 * day),
                ],
            ),
        ];

        let bottlenecks = MetricsAggregator.bottlenecks(&workflows, Duration::hours(24));

        let states: Vec<_> = bottlenecks.iter().map(|b| b.state).collect();
        assert_eq!(
            states,
            vec![
                WorkflowState::AcademicReview,
                WorkflowState::DocumentVerification
            ]
        );
        assert_eq!(bottlenecks[0].workflows, 2);
        assert_eq!(bottlenecks[0].average_seconds, 3 * day / 2);
    }

    #[test]
    fn population_sums_dwell_across_workflows() {
        let workflows = vec![
            workflow_with_dwell("wf-1", &[(WorkflowState::Created, 100)]),
            workflow_with_dwell("wf-2", &[(WorkflowState::Created, 50)]),
        ];

        let population = MetricsAggregator.population(&workflows, 1, Duration::seconds(120));

        assert_eq!(population.workflows, 2);
        assert_eq!(population.time_in_state[&WorkflowState::Created], 150);
        assert_eq!(population.sla_breaches, 1);
        assert_eq!(population.bottlenecks.len(), 1);
    }
}
