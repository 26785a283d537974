//! `strata search` - ranked message hits with related facts.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use strata_types::search::SearchScope;

use crate::cli::{format_relative_time, truncate};
use crate::state::AppState;

pub async fn search(
    state: &AppState,
    query: &str,
    k: usize,
    scope: SearchScope,
    json: bool,
) -> Result<()> {
    let results = state.engine.search(query, k, &scope).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.hits.is_empty() {
        println!();
        println!(
            "  {} No indexed messages match. Pending messages are indexed by {}",
            style("i").blue().bold(),
            style("strata sweep").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Score").fg(Color::White),
        Cell::new("Owner").fg(Color::White),
        Cell::new("Role").fg(Color::White),
        Cell::new("Message").fg(Color::White),
        Cell::new("When").fg(Color::White),
    ]);

    for hit in &results.hits {
        table.add_row(vec![
            Cell::new(format!("{:.3}", hit.score)).fg(Color::Cyan),
            Cell::new(&hit.conversation.owner),
            Cell::new(hit.message.role.to_string()).fg(Color::DarkGrey),
            Cell::new(truncate(&hit.message.content, 80)),
            Cell::new(format_relative_time(&hit.message.created_at)).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");

    if !results.facts.is_empty() {
        println!();
        println!("  {}", style("── Related facts ──").dim());
        for fact in &results.facts {
            println!(
                "  {} {} {}",
                style("•").dim(),
                style(&fact.value).cyan(),
                style(format!("({}, {:.2})", fact.kind, fact.confidence)).dim()
            );
        }
    }
    println!();

    Ok(())
}
