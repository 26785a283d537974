//! `strata sweep` - one bounded maintenance sweep.

use anyhow::Result;
use console::style;

use crate::state::AppState;

pub async fn sweep(state: &AppState, json: bool) -> Result<()> {
    let report = state.engine.run_maintenance_sweep().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    if report.is_idle() {
        println!("  {} Nothing to do", style("✓").green().bold());
        println!();
        return Ok(());
    }

    println!("  {}", style("── Embeddings ──").dim());
    println!("  Model:       {}", style(report.embedded).bold());
    println!("  Fallback:    {}", style(report.embedded_with_fallback).bold());
    if report.embedding_failures > 0 {
        println!("  Failed:      {}", style(report.embedding_failures).red());
    }

    println!("  {}", style("── Knowledge ──").dim());
    println!("  Merged:      {}", style(report.messages_merged).bold());
    println!(
        "  Facts:       {} new, {} corroborated",
        style(report.facts_created).green(),
        report.facts_corroborated
    );
    if report.extraction_failures > 0 {
        println!("  Failed:      {}", style(report.extraction_failures).red());
    }

    println!("  {}", style("── Compaction ──").dim());
    println!("  Compacted:   {}", style(report.conversations_compacted).bold());
    if report.conversations_recovered > 0 {
        println!("  Recovered:   {}", report.conversations_recovered);
    }
    if report.compaction_failures > 0 {
        println!("  Failed:      {}", style(report.compaction_failures).red());
    }

    println!();
    println!("  {}", style(format!("Done in {}ms", report.duration_ms)).dim());
    println!();
    Ok(())
}
