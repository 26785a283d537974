//! `strata reassign` - move a conversation into or out of a project.

use anyhow::{Result, anyhow};
use console::style;
use uuid::Uuid;

use strata_types::archive::Conversation;

use crate::state::AppState;

/// Move `conversation_id` into `project`, or back to general with `None`.
pub async fn reassign(
    state: &AppState,
    conversation_id: &str,
    project: Option<&str>,
    json: bool,
) -> Result<Conversation> {
    let id: Uuid = conversation_id
        .parse()
        .map_err(|_| anyhow!("invalid conversation id: {conversation_id}"))?;
    let conversation = state.engine.reassign_project(&id, project).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&conversation)?);
    } else {
        let target = match conversation.project.as_deref() {
            Some(name) => format!("project {}", style(name).cyan()),
            None => style("general").cyan().to_string(),
        };
        println!(
            "  {} Moved {} to {}",
            style("✓").green().bold(),
            style(id.to_string()).dim(),
            target
        );
    }
    Ok(conversation)
}
