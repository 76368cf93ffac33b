use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use shared::{
    domain::ActionId,
    protocol::{
        ActionExecutedWithUndoPayload, ClientFrame, UndoCompletedPayload, UndoExpiredPayload,
    },
};
use tracing::{debug, info, warn};

use crate::{error::ClientError, transport::FrameSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoState {
    /// Executed, still inside its undo window.
    Undoable,
    /// The local countdown hit the deadline. Provisional: only the server's
    /// `action.undo_expired` removes the action for good.
    LocallyExpired,
}

#[derive(Debug, Clone)]
pub struct UndoableAction {
    pub action_id: ActionId,
    pub title: String,
    pub agent: String,
    pub undo_deadline: DateTime<Utc>,
    pub undo_duration_seconds: u64,
    pub state: UndoState,
}

/// Tracks actions that executed but remain reversible until a deadline.
/// Server events are authoritative for both expiry and undo completion; the
/// local clock only drives the provisional countdown.
pub struct UndoWindowManager {
    actions: HashMap<ActionId, UndoableAction>,
    sink: Arc<dyn FrameSink>,
}

impl UndoWindowManager {
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            actions: HashMap::new(),
            sink,
        }
    }

    pub fn on_action_executed(&mut self, payload: ActionExecutedWithUndoPayload) {
        info!(
            action_id = %payload.action_id,
            deadline = %payload.undo_deadline,
            "action executed with undo window"
        );
        self.actions.insert(
            payload.action_id.clone(),
            UndoableAction {
                action_id: payload.action_id,
                title: payload.title,
                agent: payload.agent,
                undo_deadline: payload.undo_deadline,
                undo_duration_seconds: payload.undo_duration_seconds,
                state: UndoState::Undoable,
            },
        );
    }

    /// Server-confirmed expiry removes the action even when the local timer
    /// has not fired yet.
    pub fn on_action_expired(&mut self, payload: &UndoExpiredPayload) {
        if self.actions.remove(&payload.action_id).is_none() {
            debug!(action_id = %payload.action_id, "expiry for untracked action");
        }
    }

    pub fn on_action_undo_completed(&mut self, payload: &UndoCompletedPayload) {
        if self.actions.remove(&payload.action_id).is_none() {
            debug!(action_id = %payload.action_id, "undo completion for untracked action");
            return;
        }
        info!(
            action_id = %payload.action_id,
            reversal_summary = payload.reversal_summary.as_deref().unwrap_or(""),
            "undo completed"
        );
    }

    /// Marks actions whose deadline has passed as provisionally expired and
    /// returns their ids. They stay tracked until the server confirms.
    pub fn poll_local_expiry(&mut self, now: DateTime<Utc>) -> Vec<ActionId> {
        let mut expired = Vec::new();
        for action in self.actions.values_mut() {
            if action.state == UndoState::Undoable && action.undo_deadline <= now {
                action.state = UndoState::LocallyExpired;
                expired.push(action.action_id.clone());
            }
        }
        expired
    }

    /// Sends `user.request_undo` for a still-active action. Actions that are
    /// expired (even provisionally) or unknown fail locally without a frame.
    pub fn request_undo(&self, action_id: &ActionId) -> Result<(), ClientError> {
        match self.actions.get(action_id) {
            Some(action) if action.state == UndoState::Undoable => {
                self.sink.send_frame(&ClientFrame::UserRequestUndo {
                    action_id: action_id.clone(),
                })
            }
            Some(_) => {
                warn!(action_id = %action_id, "undo requested after local expiry");
                Err(ClientError::UndoRequestOnTerminalAction(action_id.clone()))
            }
            None => Err(ClientError::UndoRequestOnTerminalAction(action_id.clone())),
        }
    }

    pub fn active_actions(&self) -> Vec<UndoableAction> {
        self.actions
            .values()
            .filter(|action| action.state == UndoState::Undoable)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/undo_tests.rs"]
mod tests;
