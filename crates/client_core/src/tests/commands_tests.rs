use super::*;

use anyhow::anyhow;
use parking_lot::Mutex;
use serde_json::json;

#[derive(Default)]
struct RecordingUi {
    log: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl RecordingUi {
    fn record(&self, entry: String) -> anyhow::Result<()> {
        if let Some(needle) = self.fail_on {
            if entry.contains(needle) {
                return Err(anyhow!("refused: {entry}"));
            }
        }
        self.log.lock().push(entry);
        Ok(())
    }
}

#[async_trait]
impl Navigator for RecordingUi {
    async fn navigate(&self, route: &str) -> anyhow::Result<()> {
        self.record(format!("navigate {route}"))
    }
}

#[async_trait]
impl PanelHost for RecordingUi {
    async fn show_panel(&self, panel: &str, payload: &Value) -> anyhow::Result<()> {
        self.record(format!("show {panel} {payload}"))
    }

    async fn dismiss_panel(&self, panel: &str) -> anyhow::Result<()> {
        self.record(format!("dismiss {panel}"))
    }
}

fn executor(ui: &Arc<RecordingUi>) -> CommandExecutor {
    CommandExecutor::new(Arc::clone(ui) as _, Arc::clone(ui) as _)
}

#[tokio::test]
async fn commands_run_in_listed_order() {
    let ui = Arc::new(RecordingUi::default());
    let executor = executor(&ui);

    executor
        .execute_commands(&[
            UiCommand::Navigate {
                route: "/flights".into(),
            },
            UiCommand::ShowPanel {
                panel: "itinerary".into(),
                payload: json!({"flight": "BA117"}),
            },
            UiCommand::DismissPanel {
                panel: "search".into(),
            },
        ])
        .await;

    assert_eq!(
        *ui.log.lock(),
        vec![
            "navigate /flights".to_string(),
            r#"show itinerary {"flight":"BA117"}"#.to_string(),
            "dismiss search".to_string(),
        ]
    );
}

#[tokio::test]
async fn failing_command_does_not_stop_the_batch() {
    let ui = Arc::new(RecordingUi {
        log: Mutex::new(Vec::new()),
        fail_on: Some("itinerary"),
    });
    let executor = executor(&ui);

    executor
        .execute_commands(&[
            UiCommand::ShowPanel {
                panel: "itinerary".into(),
                payload: Value::Null,
            },
            UiCommand::Navigate {
                route: "/home".into(),
            },
        ])
        .await;

    assert_eq!(*ui.log.lock(), vec!["navigate /home".to_string()]);
}

#[tokio::test]
async fn unknown_command_is_skipped() {
    let ui = Arc::new(RecordingUi::default());
    let executor = executor(&ui);

    executor
        .execute_commands(&[
            UiCommand::Unknown,
            UiCommand::Navigate {
                route: "/home".into(),
            },
        ])
        .await;

    assert_eq!(*ui.log.lock(), vec!["navigate /home".to_string()]);
}
