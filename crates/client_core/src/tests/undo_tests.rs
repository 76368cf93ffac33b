use super::*;

use parking_lot::Mutex;

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<ClientFrame>>,
}

impl FrameSink for RecordingSink {
    fn send_frame(&self, frame: &ClientFrame) -> Result<(), ClientError> {
        self.frames.lock().push(frame.clone());
        Ok(())
    }
}

fn executed(action_id: &str, deadline: DateTime<Utc>) -> ActionExecutedWithUndoPayload {
    ActionExecutedWithUndoPayload {
        action_id: ActionId::from(action_id),
        title: "Send the email".into(),
        agent: "mail".into(),
        undo_deadline: deadline,
        undo_duration_seconds: 30,
    }
}

#[test]
fn executed_action_is_undoable_and_sends_a_request_frame() {
    let sink = Arc::new(RecordingSink::default());
    let mut manager = UndoWindowManager::new(Arc::clone(&sink) as _);

    manager.on_action_executed(executed("a1", Utc::now() + chrono::Duration::seconds(30)));
    assert_eq!(manager.active_actions().len(), 1);

    manager
        .request_undo(&ActionId::from("a1"))
        .expect("undo inside the window");
    assert_eq!(
        *sink.frames.lock(),
        vec![ClientFrame::UserRequestUndo {
            action_id: ActionId::from("a1"),
        }]
    );
}

#[test]
fn server_expiry_wins_over_an_unfired_local_timer() {
    let sink = Arc::new(RecordingSink::default());
    let mut manager = UndoWindowManager::new(Arc::clone(&sink) as _);

    manager.on_action_executed(executed("a1", Utc::now() + chrono::Duration::seconds(300)));
    manager.on_action_expired(&UndoExpiredPayload {
        action_id: ActionId::from("a1"),
    });

    assert!(manager.active_actions().is_empty());
    let err = manager
        .request_undo(&ActionId::from("a1"))
        .expect_err("expired action cannot be undone");
    assert!(matches!(err, ClientError::UndoRequestOnTerminalAction(_)));
    assert!(sink.frames.lock().is_empty());
}

#[test]
fn local_expiry_is_provisional_but_blocks_requests() {
    let sink = Arc::new(RecordingSink::default());
    let mut manager = UndoWindowManager::new(Arc::clone(&sink) as _);

    manager.on_action_executed(executed("a1", Utc::now() - chrono::Duration::seconds(1)));

    let expired = manager.poll_local_expiry(Utc::now());
    assert_eq!(expired, vec![ActionId::from("a1")]);
    // already marked: a second poll reports nothing new
    assert!(manager.poll_local_expiry(Utc::now()).is_empty());

    assert!(manager.active_actions().is_empty());
    let err = manager
        .request_undo(&ActionId::from("a1"))
        .expect_err("locally expired action is not undoable");
    assert!(matches!(err, ClientError::UndoRequestOnTerminalAction(_)));
    assert!(sink.frames.lock().is_empty());

    // the action stays tracked until the server confirms
    manager.on_action_expired(&UndoExpiredPayload {
        action_id: ActionId::from("a1"),
    });
    assert!(manager.poll_local_expiry(Utc::now()).is_empty());
}

#[test]
fn undo_completion_removes_the_action() {
    let sink = Arc::new(RecordingSink::default());
    let mut manager = UndoWindowManager::new(Arc::clone(&sink) as _);

    manager.on_action_executed(executed("a1", Utc::now() + chrono::Duration::seconds(30)));
    manager.on_action_undo_completed(&UndoCompletedPayload {
        action_id: ActionId::from("a1"),
        reversal_summary: Some("email recalled".into()),
    });

    assert!(manager.active_actions().is_empty());
}

#[test]
fn undo_request_for_unknown_action_fails_without_a_frame() {
    let sink = Arc::new(RecordingSink::default());
    let manager = UndoWindowManager::new(Arc::clone(&sink) as _);

    let err = manager
        .request_undo(&ActionId::from("missing"))
        .expect_err("unknown action");
    assert!(matches!(err, ClientError::UndoRequestOnTerminalAction(_)));
    assert!(sink.frames.lock().is_empty());
}
