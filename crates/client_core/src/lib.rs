use std::{
    collections::HashSet,
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use shared::{
    domain::{ActionId, ChallengeId, GoalId, MessageId},
    protocol::{
        events as event_names, AriaMessagePayload, ClientFrame, EmotionDetectedPayload,
        FrictionChallengePayload, FrictionFlagPayload, FrictionRefusePayload,
        SessionSyncPayload, SignalDetectedPayload, StreamCompletePayload, StreamErrorPayload,
        ThinkingPayload, UiCommand,
    },
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, warn};

pub mod commands;
pub mod error;
pub mod execution;
pub mod friction;
pub mod mutation;
pub mod rest;
pub mod transport;
pub mod undo;

pub use commands::{CommandExecutor, Navigator, PanelHost};
pub use error::ClientError;
pub use execution::{ExecutionGoal, ExecutionStep, ExecutionTracker};
pub use friction::FrictionHandler;
pub use mutation::{OptimisticStore, ResourceWriter};
pub use rest::{RestClient, RestResourceWriter, TokenProvider};
pub use transport::{EventTransport, FrameSink, SubscriptionHandle, TransportConfig};
pub use undo::{UndoWindowManager, UndoableAction};

const COMMAND_QUEUE_DEPTH: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 1024;
const SEEN_MESSAGE_LIMIT: usize = 4096;
const UNDO_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub rest_base_url: String,
    pub transport: TransportConfig,
    pub undo_poll_interval: Duration,
}

impl ClientConfig {
    pub fn new(ws_url: impl Into<String>, rest_base_url: impl Into<String>) -> Self {
        Self {
            rest_base_url: rest_base_url.into(),
            transport: TransportConfig::new(ws_url),
            undo_poll_interval: UNDO_POLL_INTERVAL,
        }
    }
}

/// Fan-out to the view layer. Every variant reflects already-applied state;
/// consumers render, they do not decide.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Message(AriaMessagePayload),
    Thinking(ThinkingPayload),
    StreamComplete(StreamCompletePayload),
    StreamError(StreamErrorPayload),
    ActionPending(shared::protocol::ActionPendingPayload),
    ActionCompleted(shared::protocol::ActionCompletedPayload),
    GoalUpdated(ExecutionGoal),
    UndoableActionsChanged(Vec<UndoableAction>),
    FrictionFlag(FrictionFlagPayload),
    FrictionChallenge(FrictionChallengePayload),
    FrictionRefused(FrictionRefusePayload),
    SignalDetected(SignalDetectedPayload),
    EmotionDetected(EmotionDetectedPayload),
    SessionSync(SessionSyncPayload),
}

/// The realtime client: one transport, the per-concern trackers subscribed
/// to it, and a broadcast channel the embedding view layer listens on.
/// Constructed explicitly with injected collaborators; no ambient state.
pub struct AriaClient {
    transport: EventTransport,
    executor: Arc<CommandExecutor>,
    execution: Arc<Mutex<ExecutionTracker>>,
    undo: Arc<Mutex<UndoWindowManager>>,
    friction: Arc<Mutex<FrictionHandler>>,
    pending_actions: Arc<Mutex<HashSet<ActionId>>>,
    seen_messages: Arc<Mutex<HashSet<MessageId>>>,
    preferences: OptimisticStore<Value>,
    trust_overrides: OptimisticStore<Value>,
    events: broadcast::Sender<ClientEvent>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    command_tx: Mutex<Option<mpsc::Sender<Vec<UiCommand>>>>,
    undo_poll_interval: Duration,
}

impl AriaClient {
    pub fn new(
        config: ClientConfig,
        navigator: Arc<dyn Navigator>,
        panels: Arc<dyn PanelHost>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Arc<Self> {
        let transport = EventTransport::new(config.transport);
        let handle = Arc::new(transport.handle());
        let rest = Arc::new(RestClient::new(config.rest_base_url, tokens));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            executor: Arc::new(CommandExecutor::new(navigator, panels)),
            execution: Arc::new(Mutex::new(ExecutionTracker::new())),
            undo: Arc::new(Mutex::new(UndoWindowManager::new(Arc::clone(&handle) as _))),
            friction: Arc::new(Mutex::new(FrictionHandler::new(handle as _))),
            pending_actions: Arc::new(Mutex::new(HashSet::new())),
            seen_messages: Arc::new(Mutex::new(HashSet::new())),
            preferences: OptimisticStore::new(
                Value::Null,
                Arc::new(RestResourceWriter::new(
                    Arc::clone(&rest),
                    rest::PREFERENCES_PATH,
                )),
            ),
            trust_overrides: OptimisticStore::new(
                Value::Null,
                Arc::new(RestResourceWriter::new(rest, rest::TRUST_OVERRIDES_PATH)),
            ),
            events,
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            command_tx: Mutex::new(None),
            undo_poll_interval: config.undo_poll_interval,
            transport,
        })
    }

    /// Registers subscriptions (once), starts the command worker and the
    /// undo countdown, and opens the connection. Idempotent, like the
    /// transport's own `connect`.
    pub async fn connect(&self) {
        {
            let mut subscriptions = self.subscriptions.lock();
            if subscriptions.is_empty() {
                let command_tx = self.spawn_workers();
                let registered = self.register_handlers(command_tx);
                subscriptions.extend(registered);
            }
        }
        self.transport.connect();
    }

    /// Tears everything down: connection, reconnect timers, background
    /// tasks. No timers or handlers survive.
    pub fn close(&self) {
        self.transport.close();
        for handle in self.subscriptions.lock().drain(..) {
            self.transport.off(&handle);
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.command_tx.lock() = None;
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn transport(&self) -> &EventTransport {
        &self.transport
    }

    pub fn preferences(&self) -> &OptimisticStore<Value> {
        &self.preferences
    }

    pub fn trust_overrides(&self) -> &OptimisticStore<Value> {
        &self.trust_overrides
    }

    pub fn execution_goal(&self, goal_id: &GoalId) -> Option<ExecutionGoal> {
        self.execution.lock().goal(goal_id).cloned()
    }

    pub fn active_undoable_actions(&self) -> Vec<UndoableAction> {
        self.undo.lock().active_actions()
    }

    pub fn pending_challenge(&self) -> Option<FrictionChallengePayload> {
        self.friction.lock().pending().cloned()
    }

    pub fn send_user_message(&self, text: &str) -> Result<MessageId, ClientError> {
        let client_message_id = MessageId::generate();
        self.transport.send(&ClientFrame::UserMessage {
            text: text.to_string(),
            client_message_id: client_message_id.clone(),
        })?;
        Ok(client_message_id)
    }

    pub fn approve(&self, goal_id: &GoalId) -> Result<(), ClientError> {
        self.transport.send(&ClientFrame::UserApprove {
            goal_id: goal_id.clone(),
        })
    }

    pub fn reject(&self, goal_id: &GoalId, reason: Option<String>) -> Result<(), ClientError> {
        self.transport.send(&ClientFrame::UserReject {
            goal_id: goal_id.clone(),
            reason,
        })
    }

    pub fn confirm_friction(&self, challenge_id: &ChallengeId) -> Result<(), ClientError> {
        self.friction.lock().confirm(challenge_id)
    }

    pub fn decline_friction(&self, challenge_id: &ChallengeId) -> Result<(), ClientError> {
        self.friction.lock().decline(challenge_id)
    }

    pub fn request_undo(&self, action_id: &ActionId) -> Result<(), ClientError> {
        self.undo.lock().request_undo(action_id)
    }

    pub fn navigate(&self, route: &str) -> Result<(), ClientError> {
        self.transport.send(&ClientFrame::UserNavigate {
            route: route.to_string(),
        })
    }

    pub fn change_modality(&self, modality: &str) -> Result<(), ClientError> {
        self.transport.send(&ClientFrame::ModalityChange {
            modality: modality.to_string(),
        })
    }

    fn spawn_workers(&self) -> mpsc::Sender<Vec<UiCommand>> {
        let mut tasks = self.tasks.lock();

        let (command_tx, mut command_rx) = mpsc::channel::<Vec<UiCommand>>(COMMAND_QUEUE_DEPTH);
        let executor = Arc::clone(&self.executor);
        tasks.push(tokio::spawn(async move {
            // one worker keeps batches strictly ordered across messages
            while let Some(batch) = command_rx.recv().await {
                executor.execute_commands(&batch).await;
            }
        }));

        let undo = Arc::clone(&self.undo);
        let events = self.events.clone();
        let poll_interval = self.undo_poll_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let expired = { undo.lock().poll_local_expiry(Utc::now()) };
                if !expired.is_empty() {
                    let active = { undo.lock().active_actions() };
                    let _ = events.send(ClientEvent::UndoableActionsChanged(active));
                }
            }
        }));

        *self.command_tx.lock() = Some(command_tx.clone());
        command_tx
    }

    fn register_handlers(
        &self,
        command_tx: mpsc::Sender<Vec<UiCommand>>,
    ) -> Vec<SubscriptionHandle> {
        let mut handles = Vec::new();

        // aria.message: dedup by message id, then queue ui commands and emit
        let seen = Arc::clone(&self.seen_messages);
        let events = self.events.clone();
        handles.push(self.transport.on(event_names::ARIA_MESSAGE, move |env| {
            let payload: AriaMessagePayload = env.parse()?;
            {
                let mut seen = seen.lock();
                if seen.len() >= SEEN_MESSAGE_LIMIT {
                    seen.clear();
                }
                if !seen.insert(payload.message_id.clone()) {
                    debug!(
                        message_id = %payload.message_id,
                        "duplicate aria.message; ui commands suppressed"
                    );
                    return Ok(());
                }
            }
            if !payload.ui_commands.is_empty()
                && command_tx.try_send(payload.ui_commands.clone()).is_err()
            {
                warn!("ui command queue unavailable; dropping batch");
            }
            let _ = events.send(ClientEvent::Message(payload));
            Ok(())
        }));

        let events = self.events.clone();
        handles.push(self.transport.on(event_names::ARIA_THINKING, move |env| {
            let _ = events.send(ClientEvent::Thinking(env.parse()?));
            Ok(())
        }));

        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::ARIA_STREAM_COMPLETE, move |env| {
                    let _ = events.send(ClientEvent::StreamComplete(env.parse()?));
                    Ok(())
                }),
        );

        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::ARIA_STREAM_ERROR, move |env| {
                    let payload: StreamErrorPayload = env.parse()?;
                    warn!("stream error from server: {}", payload.message);
                    let _ = events.send(ClientEvent::StreamError(payload));
                    Ok(())
                }),
        );

        // action lifecycle + undo windows
        let pending = Arc::clone(&self.pending_actions);
        let events = self.events.clone();
        handles.push(self.transport.on(event_names::ACTION_PENDING, move |env| {
            let payload: shared::protocol::ActionPendingPayload = env.parse()?;
            pending.lock().insert(payload.action_id.clone());
            let _ = events.send(ClientEvent::ActionPending(payload));
            Ok(())
        }));

        let pending = Arc::clone(&self.pending_actions);
        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::ACTION_COMPLETED, move |env| {
                    let payload: shared::protocol::ActionCompletedPayload = env.parse()?;
                    pending.lock().remove(&payload.action_id);
                    let _ = events.send(ClientEvent::ActionCompleted(payload));
                    Ok(())
                }),
        );

        let undo = Arc::clone(&self.undo);
        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::ACTION_EXECUTED_WITH_UNDO, move |env| {
                    let active = {
                        let mut undo = undo.lock();
                        undo.on_action_executed(env.parse()?);
                        undo.active_actions()
                    };
                    let _ = events.send(ClientEvent::UndoableActionsChanged(active));
                    Ok(())
                }),
        );

        let undo = Arc::clone(&self.undo);
        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::ACTION_UNDO_EXPIRED, move |env| {
                    let active = {
                        let mut undo = undo.lock();
                        undo.on_action_expired(&env.parse()?);
                        undo.active_actions()
                    };
                    let _ = events.send(ClientEvent::UndoableActionsChanged(active));
                    Ok(())
                }),
        );

        let undo = Arc::clone(&self.undo);
        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::ACTION_UNDO_COMPLETED, move |env| {
                    let active = {
                        let mut undo = undo.lock();
                        undo.on_action_undo_completed(&env.parse()?);
                        undo.active_actions()
                    };
                    let _ = events.send(ClientEvent::UndoableActionsChanged(active));
                    Ok(())
                }),
        );

        // execution lifecycle
        let execution = Arc::clone(&self.execution);
        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::EXECUTION_STEPS_PLANNED, move |env| {
                    let goal = { execution.lock().on_steps_planned(env.parse()?).clone() };
                    let _ = events.send(ClientEvent::GoalUpdated(goal));
                    Ok(())
                }),
        );

        let execution = Arc::clone(&self.execution);
        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::EXECUTION_STEP_STARTED, move |env| {
                    let goal = { execution.lock().on_step_started(env.parse()?).clone() };
                    let _ = events.send(ClientEvent::GoalUpdated(goal));
                    Ok(())
                }),
        );

        let execution = Arc::clone(&self.execution);
        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::EXECUTION_STEP_COMPLETED, move |env| {
                    let goal = { execution.lock().on_step_completed(env.parse()?).clone() };
                    let _ = events.send(ClientEvent::GoalUpdated(goal));
                    Ok(())
                }),
        );

        let execution = Arc::clone(&self.execution);
        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::EXECUTION_STEP_RETRYING, move |env| {
                    let goal = { execution.lock().on_step_retrying(env.parse()?).clone() };
                    let _ = events.send(ClientEvent::GoalUpdated(goal));
                    Ok(())
                }),
        );

        let execution = Arc::clone(&self.execution);
        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::EXECUTION_COMPLETE, move |env| {
                    let goal = { execution.lock().on_execution_complete(env.parse()?).clone() };
                    let _ = events.send(ClientEvent::GoalUpdated(goal));
                    Ok(())
                }),
        );

        let execution = Arc::clone(&self.execution);
        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::PROGRESS_UPDATE, move |env| {
                    let goal = { execution.lock().on_progress_update(env.parse()?).clone() };
                    let _ = events.send(ClientEvent::GoalUpdated(goal));
                    Ok(())
                }),
        );

        // friction escalation
        let friction = Arc::clone(&self.friction);
        let events = self.events.clone();
        handles.push(self.transport.on(event_names::FRICTION_FLAG, move |env| {
            let payload: FrictionFlagPayload = env.parse()?;
            friction.lock().on_flag(&payload);
            let _ = events.send(ClientEvent::FrictionFlag(payload));
            Ok(())
        }));

        let friction = Arc::clone(&self.friction);
        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::FRICTION_CHALLENGE, move |env| {
                    let payload: FrictionChallengePayload = env.parse()?;
                    friction.lock().on_challenge(payload.clone());
                    let _ = events.send(ClientEvent::FrictionChallenge(payload));
                    Ok(())
                }),
        );

        let friction = Arc::clone(&self.friction);
        let pending = Arc::clone(&self.pending_actions);
        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::FRICTION_REFUSE, move |env| {
                    let payload: FrictionRefusePayload = env.parse()?;
                    if pending.lock().is_empty() {
                        // may race an action that already completed
                        warn!("friction.refuse with no pending action; surfacing only");
                    }
                    friction.lock().on_refuse(&payload);
                    let _ = events.send(ClientEvent::FrictionRefused(payload));
                    Ok(())
                }),
        );

        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::SIGNAL_DETECTED, move |env| {
                    let _ = events.send(ClientEvent::SignalDetected(env.parse()?));
                    Ok(())
                }),
        );

        let events = self.events.clone();
        handles.push(
            self.transport
                .on(event_names::EMOTION_DETECTED, move |env| {
                    let _ = events.send(ClientEvent::EmotionDetected(env.parse()?));
                    Ok(())
                }),
        );

        let events = self.events.clone();
        handles.push(self.transport.on(event_names::SESSION_SYNC, move |env| {
            let _ = events.send(ClientEvent::SessionSync(env.parse()?));
            Ok(())
        }));

        handles
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
