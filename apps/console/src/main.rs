use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use client_core::{AriaClient, ClientConfig, ClientEvent, Navigator, PanelHost, TokenProvider};
use serde_json::Value;
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    /// Websocket endpoint, e.g. ws://localhost:8080/ws
    #[arg(long)]
    ws_url: String,
    /// REST base url, e.g. http://localhost:8080
    #[arg(long)]
    rest_url: String,
    /// Bearer token attached to REST calls
    #[arg(long, env = "ARIA_TOKEN")]
    token: Option<String>,
    /// Optional message to send once connected
    #[arg(long)]
    message: Option<String>,
}

struct PrintingNavigator;

#[async_trait]
impl Navigator for PrintingNavigator {
    async fn navigate(&self, route: &str) -> Result<()> {
        println!("navigate -> {route}");
        Ok(())
    }
}

struct PrintingPanels;

#[async_trait]
impl PanelHost for PrintingPanels {
    async fn show_panel(&self, panel: &str, payload: &Value) -> Result<()> {
        println!("show panel {panel}: {payload}");
        Ok(())
    }

    async fn dismiss_panel(&self, panel: &str) -> Result<()> {
        println!("dismiss panel {panel}");
        Ok(())
    }
}

struct StaticToken(Option<String>);

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    let args = Args::parse();

    let client = AriaClient::new(
        ClientConfig::new(args.ws_url, args.rest_url),
        Arc::new(PrintingNavigator),
        Arc::new(PrintingPanels),
        Arc::new(StaticToken(args.token)),
    );

    let mut events = client.subscribe_events();
    client.connect().await;

    if client
        .transport()
        .wait_until_connected(Duration::from_secs(10))
        .await
    {
        info!("connected");
        if let Some(text) = &args.message {
            let message_id = client.send_user_message(text)?;
            info!(message_id = %message_id, "message sent");
        }
    } else {
        info!("still connecting; the transport keeps retrying in the background");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ClientEvent::Message(message)) => println!("aria: {}", message.text),
                Ok(ClientEvent::Thinking(thinking)) => println!("thinking: {}", thinking.text),
                Ok(ClientEvent::GoalUpdated(goal)) => {
                    println!(
                        "goal {} [{:?}] {}%",
                        goal.goal_id, goal.overall_status, goal.progress
                    );
                }
                Ok(ClientEvent::UndoableActionsChanged(actions)) => {
                    for action in actions {
                        println!("undoable until {}: {}", action.undo_deadline, action.title);
                    }
                }
                Ok(ClientEvent::FrictionChallenge(challenge)) => {
                    println!(
                        "challenge {}: {}",
                        challenge.challenge_id, challenge.reasoning
                    );
                }
                Ok(ClientEvent::FrictionRefused(refusal)) => {
                    println!("refused: {}", refusal.reasoning);
                }
                Ok(other) => println!("{other:?}"),
                Err(_) => break,
            },
        }
    }

    client.close();
    Ok(())
}
