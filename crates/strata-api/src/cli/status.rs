//! System status dashboard command.

use anyhow::Result;
use console::style;

use crate::state::AppState;

/// Display queue depths, permanent failures and layer sizes.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let counts = state.engine.status().await?;
    let embedder = state.engine.embedder();

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "embedding_model": embedder.model_name(),
            "embedding_dimension": embedder.dimension(),
            "extractor": state.engine.extractor_name(),
            "summarizer": state.engine.summarizer_name(),
            "counts": counts,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  {} Strata v{}", style("⚡").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Archive ──").dim());
    println!("  Active:     {}", style(counts.active_conversations).green());
    println!("  Summarized: {}", counts.summarized_conversations);
    println!("  Messages:   {}", style(counts.messages).bold());
    println!();

    println!("  {}", style("── Queues ──").dim());
    println!("  Embedding:  {} pending", counts.pending_embeddings);
    println!("  Extraction: {} pending", counts.pending_extractions);
    let failures = [
        ("embedding", counts.failed_embeddings),
        ("extraction", counts.failed_extractions),
        ("compaction", counts.failed_compactions),
    ];
    for (name, count) in failures.iter().filter(|(_, c)| *c > 0) {
        println!(
            "  {} {} permanent {} failure{}",
            style("!").red().bold(),
            count,
            name,
            if *count == 1 { "" } else { "s" }
        );
    }
    println!();

    println!("  {}", style("── Layers ──").dim());
    println!("  Facts:      {}", style(counts.facts).bold());
    println!("  Digests:    {}", style(counts.digests).bold());
    println!();

    println!("  {}", style("── Providers ──").dim());
    println!(
        "  Embedding:  {} ({} dims)",
        style(embedder.model_name()).cyan(),
        embedder.dimension()
    );
    println!("  Extractor:  {}", state.engine.extractor_name());
    println!("  Summarizer: {}", state.engine.summarizer_name());
    println!("  Data:       {}", style(state.data_dir.display()).dim());
    println!();

    Ok(())
}
