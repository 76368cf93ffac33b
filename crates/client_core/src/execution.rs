use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ApprovalMode, GoalId, OverallStatus, StepId, StepStatus},
    protocol::{
        ExecutionCompletePayload, ProgressUpdatePayload, StepCompletedPayload, StepRetryingPayload,
        StepStartedPayload, StepsPlannedPayload,
    },
};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ExecutionStep {
    pub step_id: StepId,
    pub agent: String,
    pub title: Option<String>,
    pub status: StepStatus,
    pub retry_count: u32,
    pub result_summary: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionStep {
    fn new(step_id: StepId, agent: String, title: Option<String>) -> Self {
        Self {
            step_id,
            agent,
            title,
            status: StepStatus::Pending,
            retry_count: 0,
            result_summary: None,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionGoal {
    pub goal_id: GoalId,
    pub title: String,
    pub approval_mode: ApprovalMode,
    pub steps: Vec<ExecutionStep>,
    pub overall_status: OverallStatus,
    pub progress: u8,
    pub status_message: Option<String>,
    /// Set once `execution.complete` arrives; the explicit status then wins
    /// over per-step derivation.
    finalized: bool,
}

impl ExecutionGoal {
    fn new(goal_id: GoalId) -> Self {
        Self {
            goal_id,
            title: String::new(),
            approval_mode: ApprovalMode::default(),
            steps: Vec::new(),
            overall_status: OverallStatus::Pending,
            progress: 0,
            status_message: None,
            finalized: false,
        }
    }

    pub fn step(&self, step_id: &StepId) -> Option<&ExecutionStep> {
        self.steps.iter().find(|step| &step.step_id == step_id)
    }

    fn step_mut_or_insert(&mut self, step_id: &StepId, agent: Option<&str>) -> &mut ExecutionStep {
        if let Some(index) = self
            .steps
            .iter()
            .position(|step| &step.step_id == step_id)
        {
            let step = &mut self.steps[index];
            if let Some(agent) = agent {
                if step.agent.is_empty() {
                    step.agent = agent.to_string();
                }
            }
            return &mut self.steps[index];
        }
        // step events may race goal registration; create the step lazily
        debug!(goal_id = %self.goal_id, step_id = %step_id, "creating step from lifecycle event");
        self.steps.push(ExecutionStep::new(
            step_id.clone(),
            agent.unwrap_or_default().to_string(),
            None,
        ));
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    fn derive_overall(&mut self) {
        if self.finalized {
            return;
        }
        let steps = &self.steps;
        if !steps.is_empty() && steps.iter().all(|s| s.status == StepStatus::Completed) {
            self.overall_status = OverallStatus::Completed;
        } else if steps.iter().any(|s| s.status == StepStatus::Failed)
            && steps.iter().all(|s| s.status.is_terminal())
        {
            self.overall_status = OverallStatus::Failed;
        } else if steps.iter().any(|s| s.status != StepStatus::Pending) {
            self.overall_status = OverallStatus::Executing;
        } else {
            self.overall_status = OverallStatus::Pending;
        }
    }
}

/// Per-goal state machine over step lifecycle events. Events may arrive
/// before the goal or step is known; aggregates are created lazily and
/// retained until the consumer removes them.
#[derive(Default)]
pub struct ExecutionTracker {
    goals: HashMap<GoalId, ExecutionGoal>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn goal(&self, goal_id: &GoalId) -> Option<&ExecutionGoal> {
        self.goals.get(goal_id)
    }

    pub fn goals(&self) -> impl Iterator<Item = &ExecutionGoal> {
        self.goals.values()
    }

    pub fn remove_goal(&mut self, goal_id: &GoalId) -> Option<ExecutionGoal> {
        self.goals.remove(goal_id)
    }

    fn goal_mut_or_insert(&mut self, goal_id: &GoalId) -> &mut ExecutionGoal {
        self.goals
            .entry(goal_id.clone())
            .or_insert_with(|| ExecutionGoal::new(goal_id.clone()))
    }

    pub fn on_steps_planned(&mut self, payload: StepsPlannedPayload) -> &ExecutionGoal {
        let goal = self.goal_mut_or_insert(&payload.goal_id);
        goal.title = payload.title;
        goal.approval_mode = payload.approval_mode;
        for planned in payload.steps {
            if goal.step(&planned.step_id).is_none() {
                goal.steps.push(ExecutionStep::new(
                    planned.step_id,
                    planned.agent,
                    planned.title,
                ));
            }
        }
        goal.derive_overall();
        goal
    }

    pub fn on_step_started(&mut self, payload: StepStartedPayload) -> &ExecutionGoal {
        let goal = self.goal_mut_or_insert(&payload.goal_id);
        let step = goal.step_mut_or_insert(&payload.step_id, payload.agent.as_deref());
        // also the recovery path out of `retrying`
        step.status = StepStatus::Active;
        step.started_at = payload.started_at.or(step.started_at).or(Some(Utc::now()));
        goal.derive_overall();
        goal
    }

    pub fn on_step_completed(&mut self, payload: StepCompletedPayload) -> &ExecutionGoal {
        let goal = self.goal_mut_or_insert(&payload.goal_id);
        let step = goal.step_mut_or_insert(&payload.step_id, None);
        step.status = if payload.success {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };
        step.result_summary = payload.result_summary;
        step.error_message = payload.error_message;
        step.completed_at = payload.completed_at.or(Some(Utc::now()));
        goal.derive_overall();
        goal
    }

    pub fn on_step_retrying(&mut self, payload: StepRetryingPayload) -> &ExecutionGoal {
        let goal = self.goal_mut_or_insert(&payload.goal_id);
        let step = goal.step_mut_or_insert(&payload.step_id, None);
        step.status = StepStatus::Retrying;
        step.retry_count += 1;
        if let Some(reason) = payload.reason {
            step.error_message = Some(reason);
        }
        goal.derive_overall();
        goal
    }

    /// Authoritative completion: the explicit status overrides per-step
    /// derivation (the server may account for skipped steps the client never
    /// saw).
    pub fn on_execution_complete(&mut self, payload: ExecutionCompletePayload) -> &ExecutionGoal {
        let goal = self.goal_mut_or_insert(&payload.goal_id);
        if goal.finalized {
            warn!(goal_id = %payload.goal_id, "duplicate execution.complete; keeping first status");
            return goal;
        }
        goal.overall_status = payload.status;
        goal.finalized = true;
        if payload.status == OverallStatus::Completed || payload.status == OverallStatus::Failed {
            goal.progress = 100;
        }
        goal
    }

    pub fn on_progress_update(&mut self, payload: ProgressUpdatePayload) -> &ExecutionGoal {
        let goal = self.goal_mut_or_insert(&payload.goal_id);
        goal.progress = payload.progress.min(100);
        goal.status_message = payload.message.or(goal.status_message.take());
        goal
    }
}

#[cfg(test)]
#[path = "tests/execution_tests.rs"]
mod tests;
