use std::sync::Arc;

use shared::{
    domain::ChallengeId,
    protocol::{ClientFrame, FrictionChallengePayload, FrictionFlagPayload, FrictionRefusePayload},
};
use tracing::{info, warn};

use crate::{error::ClientError, transport::FrameSink};

/// At most one challenge is pending per session. A newer challenge
/// supersedes the older one silently: no frame is sent for the discarded
/// challenge.
pub struct FrictionHandler {
    pending: Option<FrictionChallengePayload>,
    sink: Arc<dyn FrameSink>,
}

impl FrictionHandler {
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            pending: None,
            sink,
        }
    }

    /// Flags are informational and require no resolution.
    pub fn on_flag(&self, payload: &FrictionFlagPayload) {
        info!(flag_message = %payload.flag_message, "friction flag raised");
    }

    pub fn on_challenge(&mut self, payload: FrictionChallengePayload) {
        if let Some(previous) = self.pending.replace(payload) {
            warn!(
                challenge_id = %previous.challenge_id,
                "unresolved challenge superseded by a newer one"
            );
        }
    }

    /// Refusals are terminal and admit no confirmation. The blocked request
    /// is surfaced; it must not be retried automatically.
    pub fn on_refuse(&self, payload: &FrictionRefusePayload) {
        warn!(
            original_request = %payload.original_request,
            "action refused: {}",
            payload.reasoning
        );
    }

    pub fn confirm(&mut self, challenge_id: &ChallengeId) -> Result<(), ClientError> {
        self.resolve(challenge_id, true)
    }

    pub fn decline(&mut self, challenge_id: &ChallengeId) -> Result<(), ClientError> {
        self.resolve(challenge_id, false)
    }

    fn resolve(&mut self, challenge_id: &ChallengeId, confirmed: bool) -> Result<(), ClientError> {
        match &self.pending {
            Some(pending) if &pending.challenge_id == challenge_id => {}
            _ => return Err(ClientError::UnknownChallenge(challenge_id.clone())),
        }
        self.sink.send_frame(&ClientFrame::UserConfirmFriction {
            challenge_id: challenge_id.clone(),
            confirmed,
        })?;
        self.pending = None;
        Ok(())
    }

    pub fn pending(&self) -> Option<&FrictionChallengePayload> {
        self.pending.as_ref()
    }
}

#[cfg(test)]
#[path = "tests/friction_tests.rs"]
mod tests;
