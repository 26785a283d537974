//! `strata archive` - store conversations from a JSON file.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use serde::Deserialize;
use tokio::io::AsyncReadExt;

use strata_types::archive::NewConversation;

use crate::state::AppState;

#[derive(Deserialize)]
#[serde(untagged)]
enum ArchiveInput {
    Many(Vec<NewConversation>),
    One(NewConversation),
}

fn parse_input(raw: &str) -> Result<Vec<NewConversation>> {
    let input: ArchiveInput = serde_json::from_str(raw)
        .context("expected a conversation object or an array of conversations")?;
    Ok(match input {
        ArchiveInput::Many(list) => list,
        ArchiveInput::One(one) => vec![one],
    })
}

async fn read_source(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut raw = String::new();
        tokio::io::stdin().read_to_string(&mut raw).await?;
        return Ok(raw);
    }
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))
}

/// Archive every conversation in `file`, stopping at the first failure.
pub async fn archive(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let raw = read_source(file).await?;
    let conversations = parse_input(&raw)?;

    let mut stored = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        let archived = state.engine.archive(conversation).await?;
        if !json {
            let count = archived.messages.len();
            println!(
                "  {} Archived {} ({} message{}) for {}",
                style("✓").green().bold(),
                style(archived.conversation.id.to_string()).dim(),
                count,
                if count == 1 { "" } else { "s" },
                style(&archived.conversation.owner).cyan()
            );
        }
        stored.push(archived.conversation);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&stored)?);
    } else {
        println!(
            "  {} Messages become searchable after the next {}",
            style("i").blue().bold(),
            style("strata sweep").yellow()
        );
    }
    Ok(())
}
