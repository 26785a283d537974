//! `strata facts` - browse the knowledge graph.

use anyhow::{Result, anyhow};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use strata_types::knowledge::FactKind;

use crate::cli::{format_relative_time, truncate};
use crate::state::AppState;

pub async fn list_facts(
    state: &AppState,
    kind: Option<&str>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let kind = kind
        .map(|k| k.parse::<FactKind>().map_err(|e| anyhow!(e)))
        .transpose()?;
    let facts = state.engine.list_facts(kind, limit.max(1)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&facts)?);
        return Ok(());
    }

    if facts.is_empty() {
        println!();
        println!(
            "  {} No facts yet. Facts are extracted by {}",
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
        Cell::new("Kind").fg(Color::White),
        Cell::new("Value").fg(Color::White),
        Cell::new("Confidence").fg(Color::White),
        Cell::new("Sources").fg(Color::White),
        Cell::new("Last Seen").fg(Color::White),
    ]);

    for fact in &facts {
        let kind_cell = match fact.kind {
            FactKind::Preference => Cell::new("preference").fg(Color::Green),
            FactKind::Entity => Cell::new("entity").fg(Color::Cyan),
            FactKind::Pattern => Cell::new("pattern").fg(Color::Yellow),
        };
        table.add_row(vec![
            kind_cell,
            Cell::new(truncate(&fact.value, 60)),
            Cell::new(format!("{:.2}", fact.confidence)),
            Cell::new(fact.sources.len()),
            Cell::new(format_relative_time(&fact.last_seen)).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} fact{}",
        style(facts.len()).bold(),
        if facts.len() == 1 { "" } else { "s" }
    );
    println!();

    Ok(())
}
