//! CLI command definitions and dispatch for the `strata` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod archive;
pub mod facts;
pub mod reassign;
pub mod search;
pub mod status;
pub mod sweep;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Layered conversation memory: archive, index, distill, compact.
#[derive(Parser)]
#[command(name = "strata", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server with the background sweep.
    Serve {
        /// Port to listen on. Defaults to the configured port.
        #[arg(long, short)]
        port: Option<u16>,

        /// Host to bind to. Defaults to the configured host.
        #[arg(long)]
        host: Option<String>,
    },

    /// Archive conversations from a JSON file (`-` reads stdin).
    ///
    /// The file holds one conversation object or an array of them.
    Archive {
        file: PathBuf,
    },

    /// Semantic search over archived messages.
    Search {
        query: String,

        /// Number of hits to return.
        #[arg(short, default_value_t = 5)]
        k: usize,

        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        project: Option<String>,

        /// Also search summarized conversations.
        #[arg(long)]
        archived: bool,
    },

    /// Move a conversation into a project, or back to general.
    Reassign {
        conversation_id: String,

        /// Target project.
        #[arg(long, required_unless_present = "general", conflicts_with = "general")]
        project: Option<String>,

        /// Move the conversation out of any project.
        #[arg(long)]
        general: bool,
    },

    /// Run one maintenance sweep now.
    Sweep,

    /// Show queue depths and layer sizes.
    Status,

    /// List knowledge facts, most confident first.
    Facts {
        /// Filter by kind (preference, entity, pattern).
        #[arg(long)]
        kind: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Shorten `text` to `max` characters, with an ellipsis when cut.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let kept: String = flat.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

pub(crate) fn format_relative_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    let diff = chrono::Utc::now() - *dt;

    if diff.num_minutes() < 1 {
        "just now".to_string()
    } else if diff.num_hours() < 1 {
        format!("{}m ago", diff.num_minutes())
    } else if diff.num_days() < 1 {
        format!("{}h ago", diff.num_hours())
    } else if diff.num_days() < 30 {
        format!("{}d ago", diff.num_days())
    } else {
        dt.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search_flags() {
        let cli = Cli::try_parse_from([
            "strata", "search", "dark mode", "-k", "3", "--owner", "alice", "--archived",
        ])
        .unwrap();
        match cli.command {
            Commands::Search {
                query,
                k,
                owner,
                archived,
                project,
            } => {
                assert_eq!(query, "dark mode");
                assert_eq!(k, 3);
                assert_eq!(owner.as_deref(), Some("alice"));
                assert!(archived);
                assert!(project.is_none());
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn test_parse_reassign_targets() {
        let cli = Cli::try_parse_from(["strata", "reassign", "abc", "--project", "atlas"]).unwrap();
        match cli.command {
            Commands::Reassign {
                conversation_id,
                project,
                general,
            } => {
                assert_eq!(conversation_id, "abc");
                assert_eq!(project.as_deref(), Some("atlas"));
                assert!(!general);
            }
            _ => panic!("expected reassign"),
        }

        let cli = Cli::try_parse_from(["strata", "reassign", "abc", "--general"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Reassign { project: None, general: true, .. }
        ));

        assert!(Cli::try_parse_from(["strata", "reassign", "abc"]).is_err());
        assert!(Cli::try_parse_from([
            "strata", "reassign", "abc", "--project", "atlas", "--general"
        ])
        .is_err());
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line one\nline two", 40), "line one line two");
        assert_eq!(truncate("éééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_relative_time() {
        let now = chrono::Utc::now();
        assert_eq!(format_relative_time(&now), "just now");
        assert_eq!(format_relative_time(&(now - chrono::Duration::hours(3))), "3h ago");
    }
}
