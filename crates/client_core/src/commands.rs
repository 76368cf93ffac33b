use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use shared::protocol::UiCommand;
use tracing::{debug, warn};

/// Route-change side effect, owned by the embedding application.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, route: &str) -> anyhow::Result<()>;
}

/// Panel visibility side effects, owned by the embedding application.
#[async_trait]
pub trait PanelHost: Send + Sync {
    async fn show_panel(&self, panel: &str, payload: &Value) -> anyhow::Result<()>;
    async fn dismiss_panel(&self, panel: &str) -> anyhow::Result<()>;
}

/// Applies server-issued UI commands strictly in order. Stateless: duplicate
/// suppression for re-delivered command lists is the caller's job (the client
/// dedupes by message id before invoking this).
pub struct CommandExecutor {
    navigator: Arc<dyn Navigator>,
    panels: Arc<dyn PanelHost>,
}

impl CommandExecutor {
    pub fn new(navigator: Arc<dyn Navigator>, panels: Arc<dyn PanelHost>) -> Self {
        Self { navigator, panels }
    }

    /// Runs every command in sequence. A failing command is logged and the
    /// rest of the batch still runs; navigation effects are awaited before
    /// the next command so panel content may depend on the route.
    pub async fn execute_commands(&self, commands: &[UiCommand]) {
        for command in commands {
            if let Err(err) = self.execute_one(command).await {
                warn!("ui command failed: {err:#}");
            }
        }
    }

    async fn execute_one(&self, command: &UiCommand) -> anyhow::Result<()> {
        match command {
            UiCommand::Navigate { route } => {
                debug!(route = %route, "ui command: navigate");
                self.navigator.navigate(route).await
            }
            UiCommand::ShowPanel { panel, payload } => {
                debug!(panel = %panel, "ui command: show panel");
                self.panels.show_panel(panel, payload).await
            }
            UiCommand::DismissPanel { panel } => {
                debug!(panel = %panel, "ui command: dismiss panel");
                self.panels.dismiss_panel(panel).await
            }
            UiCommand::Unknown => {
                warn!("ignoring unrecognized ui command tag");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
