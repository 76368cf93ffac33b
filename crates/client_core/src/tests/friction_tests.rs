use super::*;

use parking_lot::Mutex;

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<ClientFrame>>,
    fail_sends: bool,
}

impl FrameSink for RecordingSink {
    fn send_frame(&self, frame: &ClientFrame) -> Result<(), ClientError> {
        if self.fail_sends {
            return Err(ClientError::NotConnected);
        }
        self.frames.lock().push(frame.clone());
        Ok(())
    }
}

fn challenge(id: &str) -> FrictionChallengePayload {
    FrictionChallengePayload {
        challenge_id: ChallengeId::from(id),
        user_message: "This would email the whole company. Continue?".into(),
        reasoning: "broad recipient list".into(),
        original_request: "send the announcement".into(),
        proceed_if_confirmed: true,
    }
}

#[test]
fn confirm_sends_the_resolution_frame_and_clears_pending() {
    let sink = Arc::new(RecordingSink::default());
    let mut handler = FrictionHandler::new(Arc::clone(&sink) as _);

    handler.on_challenge(challenge("c1"));
    handler
        .confirm(&ChallengeId::from("c1"))
        .expect("pending challenge resolves");

    assert_eq!(
        *sink.frames.lock(),
        vec![ClientFrame::UserConfirmFriction {
            challenge_id: ChallengeId::from("c1"),
            confirmed: true,
        }]
    );
    assert!(handler.pending().is_none());
}

#[test]
fn decline_sends_confirmed_false() {
    let sink = Arc::new(RecordingSink::default());
    let mut handler = FrictionHandler::new(Arc::clone(&sink) as _);

    handler.on_challenge(challenge("c1"));
    handler
        .decline(&ChallengeId::from("c1"))
        .expect("pending challenge resolves");

    assert_eq!(
        *sink.frames.lock(),
        vec![ClientFrame::UserConfirmFriction {
            challenge_id: ChallengeId::from("c1"),
            confirmed: false,
        }]
    );
}

#[test]
fn newer_challenge_supersedes_without_sending_for_the_old_one() {
    let sink = Arc::new(RecordingSink::default());
    let mut handler = FrictionHandler::new(Arc::clone(&sink) as _);

    handler.on_challenge(challenge("c1"));
    handler.on_challenge(challenge("c2"));

    let err = handler
        .confirm(&ChallengeId::from("c1"))
        .expect_err("superseded challenge is gone");
    assert!(matches!(err, ClientError::UnknownChallenge(_)));

    handler
        .confirm(&ChallengeId::from("c2"))
        .expect("current challenge resolves");

    // exactly one frame, and only for the current challenge
    assert_eq!(
        *sink.frames.lock(),
        vec![ClientFrame::UserConfirmFriction {
            challenge_id: ChallengeId::from("c2"),
            confirmed: true,
        }]
    );
}

#[test]
fn resolving_with_no_pending_challenge_fails() {
    let sink = Arc::new(RecordingSink::default());
    let mut handler = FrictionHandler::new(Arc::clone(&sink) as _);

    let err = handler
        .decline(&ChallengeId::from("c1"))
        .expect_err("nothing pending");
    assert!(matches!(err, ClientError::UnknownChallenge(_)));
    assert!(sink.frames.lock().is_empty());
}

#[test]
fn failed_send_keeps_the_challenge_pending() {
    let sink = Arc::new(RecordingSink {
        frames: Mutex::new(Vec::new()),
        fail_sends: true,
    });
    let mut handler = FrictionHandler::new(Arc::clone(&sink) as _);

    handler.on_challenge(challenge("c1"));
    let err = handler
        .confirm(&ChallengeId::from("c1"))
        .expect_err("send failed");
    assert!(matches!(err, ClientError::NotConnected));
    assert!(handler.pending().is_some());
}
