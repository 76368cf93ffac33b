use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    ActionId, ApprovalMode, ChallengeId, GoalId, MessageId, OverallStatus, SessionId, StepId,
};

/// Wire names for server-to-client frames. The transport's handler registry
/// is keyed by these strings.
pub mod events {
    pub const ARIA_MESSAGE: &str = "aria.message";
    pub const ARIA_THINKING: &str = "aria.thinking";
    pub const ARIA_STREAM_COMPLETE: &str = "aria.stream_complete";
    pub const ARIA_STREAM_ERROR: &str = "aria.stream_error";
    pub const ACTION_PENDING: &str = "action.pending";
    pub const ACTION_COMPLETED: &str = "action.completed";
    pub const ACTION_EXECUTED_WITH_UNDO: &str = "action.executed_with_undo";
    pub const ACTION_UNDO_EXPIRED: &str = "action.undo_expired";
    pub const ACTION_UNDO_COMPLETED: &str = "action.undo_completed";
    pub const PROGRESS_UPDATE: &str = "progress.update";
    pub const EXECUTION_STEPS_PLANNED: &str = "execution.steps_planned";
    pub const EXECUTION_STEP_STARTED: &str = "execution.step_started";
    pub const EXECUTION_STEP_COMPLETED: &str = "execution.step_completed";
    pub const EXECUTION_STEP_RETRYING: &str = "execution.step_retrying";
    pub const EXECUTION_COMPLETE: &str = "execution.complete";
    pub const SIGNAL_DETECTED: &str = "signal.detected";
    pub const EMOTION_DETECTED: &str = "emotion.detected";
    pub const FRICTION_FLAG: &str = "friction.flag";
    pub const FRICTION_CHALLENGE: &str = "friction.challenge";
    pub const FRICTION_REFUSE: &str = "friction.refuse";
    pub const SESSION_SYNC: &str = "session.sync";
}

/// One decoded message unit on the persistent channel: an event type tag plus
/// the payload left opaque until a subscriber parses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl EventEnvelope {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn parse<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.payload.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AriaMessagePayload {
    pub message_id: MessageId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich_content: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ui_commands: Vec<UiCommand>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingPayload {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamCompletePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPendingPayload {
    pub action_id: ActionId,
    pub title: String,
    pub agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCompletedPayload {
    pub action_id: ActionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExecutedWithUndoPayload {
    pub action_id: ActionId,
    pub title: String,
    pub agent: String,
    pub undo_deadline: DateTime<Utc>,
    pub undo_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoExpiredPayload {
    pub action_id: ActionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoCompletedPayload {
    pub action_id: ActionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdatePayload {
    pub goal_id: GoalId,
    pub progress: u8,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStep {
    pub step_id: StepId,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepsPlannedPayload {
    pub goal_id: GoalId,
    pub title: String,
    pub approval_mode: ApprovalMode,
    pub steps: Vec<PlannedStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStartedPayload {
    pub goal_id: GoalId,
    pub step_id: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedPayload {
    pub goal_id: GoalId,
    pub step_id: StepId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRetryingPayload {
    pub goal_id: GoalId,
    pub step_id: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCompletePayload {
    pub goal_id: GoalId,
    pub status: OverallStatus,
    #[serde(default)]
    pub steps_completed: u32,
    #[serde(default)]
    pub steps_failed: u32,
    #[serde(default)]
    pub steps_skipped: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDetectedPayload {
    pub signal_type: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionDetectedPayload {
    pub emotion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrictionFlagPayload {
    pub flag_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrictionChallengePayload {
    pub challenge_id: ChallengeId,
    pub user_message: String,
    pub reasoning: String,
    pub original_request: String,
    pub proceed_if_confirmed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrictionRefusePayload {
    pub reasoning: String,
    pub original_request: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSyncPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub state: Value,
}

/// Typed view of the server-to-client wire contract. Subscribers usually
/// work from [`EventEnvelope`] plus the payload structs; this enum exists so
/// tooling and tests can construct and decode whole frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "aria.message")]
    AriaMessage(AriaMessagePayload),
    #[serde(rename = "aria.thinking")]
    AriaThinking(ThinkingPayload),
    #[serde(rename = "aria.stream_complete")]
    AriaStreamComplete(StreamCompletePayload),
    #[serde(rename = "aria.stream_error")]
    AriaStreamError(StreamErrorPayload),
    #[serde(rename = "action.pending")]
    ActionPending(ActionPendingPayload),
    #[serde(rename = "action.completed")]
    ActionCompleted(ActionCompletedPayload),
    #[serde(rename = "action.executed_with_undo")]
    ActionExecutedWithUndo(ActionExecutedWithUndoPayload),
    #[serde(rename = "action.undo_expired")]
    ActionUndoExpired(UndoExpiredPayload),
    #[serde(rename = "action.undo_completed")]
    ActionUndoCompleted(UndoCompletedPayload),
    #[serde(rename = "progress.update")]
    ProgressUpdate(ProgressUpdatePayload),
    #[serde(rename = "execution.steps_planned")]
    ExecutionStepsPlanned(StepsPlannedPayload),
    #[serde(rename = "execution.step_started")]
    ExecutionStepStarted(StepStartedPayload),
    #[serde(rename = "execution.step_completed")]
    ExecutionStepCompleted(StepCompletedPayload),
    #[serde(rename = "execution.step_retrying")]
    ExecutionStepRetrying(StepRetryingPayload),
    #[serde(rename = "execution.complete")]
    ExecutionComplete(ExecutionCompletePayload),
    #[serde(rename = "signal.detected")]
    SignalDetected(SignalDetectedPayload),
    #[serde(rename = "emotion.detected")]
    EmotionDetected(EmotionDetectedPayload),
    #[serde(rename = "friction.flag")]
    FrictionFlag(FrictionFlagPayload),
    #[serde(rename = "friction.challenge")]
    FrictionChallenge(FrictionChallengePayload),
    #[serde(rename = "friction.refuse")]
    FrictionRefuse(FrictionRefusePayload),
    #[serde(rename = "session.sync")]
    SessionSync(SessionSyncPayload),
}

/// Client-to-server frames published through the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientFrame {
    #[serde(rename = "user.message")]
    UserMessage {
        text: String,
        client_message_id: MessageId,
    },
    #[serde(rename = "user.navigate")]
    UserNavigate { route: String },
    #[serde(rename = "user.approve")]
    UserApprove { goal_id: GoalId },
    #[serde(rename = "user.reject")]
    UserReject {
        goal_id: GoalId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "user.confirm_friction")]
    UserConfirmFriction {
        challenge_id: ChallengeId,
        confirmed: bool,
    },
    #[serde(rename = "user.request_undo")]
    UserRequestUndo { action_id: ActionId },
    #[serde(rename = "modality.change")]
    ModalityChange { modality: String },
    #[serde(rename = "heartbeat")]
    Heartbeat { sent_at: DateTime<Utc> },
}

/// Declarative UI operation embedded in `aria.message` payloads. Tags the
/// client does not recognize decode to `Unknown` and are skipped by the
/// executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum UiCommand {
    Navigate {
        route: String,
    },
    ShowPanel {
        panel: String,
        #[serde(default)]
        payload: Value,
    },
    DismissPanel {
        panel: String,
    },
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
