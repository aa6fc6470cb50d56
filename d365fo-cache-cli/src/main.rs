// d365fo-cache-cli/src/main.rs

use clap::{Parser, Subcommand};
use d365fo_cache_core::domain::sync::{SyncState, SyncStrategy};

mod commands;
mod context;

#[derive(Parser)]
#[command(name = "d365fo-cache")]
#[command(about = "Version-aware metadata cache and sync engine for Dynamics 365 Finance & Operations", long_about = None)]
#[command(version)]
struct Cli {
    /// Profile name, or a literal base URL, identifying the environment
    #[arg(long, short, global = true, default_value = "default")]
    env: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start, inspect or cancel metadata syncs
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Look up entities
    Entity {
        #[command(subcommand)]
        command: EntityCommands,
    },

    /// Look up an enumeration by name
    Enum { name: String },

    /// List bound/unbound actions
    Actions {
        /// Only actions on this entity
        #[arg(long)]
        entity: Option<String>,
        /// unbound | bound_to_entity | bound_to_entity_set
        #[arg(long)]
        binding: Option<String>,
        #[arg(long)]
        name_pattern: Option<String>,
        #[arg(long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Resolve one or more label ids
    Label {
        #[command(subcommand)]
        command: LabelCommands,
    },

    /// Full-text / LIKE search over cached metadata
    Search {
        text: String,
        /// Restrict to one or more entity types (data_entity, public_entity, enumeration, action)
        #[arg(long = "type")]
        entity_types: Vec<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Use the `LIKE` fallback instead of FTS5
        #[arg(long)]
        no_fulltext: bool,
    },

    /// Report what the cache knows about the environment
    Info,

    /// Manage saved environment profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Start a new sync session
    Start {
        /// full | entities_only | labels_only | full_without_labels | sharing_mode | incremental
        #[arg(long)]
        strategy: Option<String>,
        #[arg(long)]
        language: Option<String>,
        /// Block and print progress until the session reaches a terminal state
        #[arg(long)]
        wait: bool,
    },
    /// Show one session's progress
    Status { session_id: String },
    /// Request cancellation of a running session
    Cancel { session_id: String },
    /// List sessions, optionally filtered by state
    List {
        #[arg(long)]
        state: Option<String>,
    },
    /// Show recent completed sessions
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum EntityCommands {
    /// Fetch one entity's full record
    Get { name: String },
    /// List data entities, optionally filtered
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        read_only: Option<bool>,
        #[arg(long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
}

#[derive(Subcommand)]
enum LabelCommands {
    /// Resolve a single label id
    Get {
        label_id: String,
        #[arg(long, default_value = "en-US")]
        language: String,
    },
    /// Resolve several label ids in one batch
    Batch {
        label_ids: Vec<String>,
        #[arg(long, default_value = "en-US")]
        language: String,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List saved profile names
    List,
    /// Save (or overwrite) a profile
    Add {
        name: String,
        base_url: String,
        #[arg(long)]
        client_id: Option<String>,
        #[arg(long)]
        client_secret: Option<String>,
        #[arg(long)]
        tenant_id: Option<String>,
        #[arg(long)]
        language: Option<String>,
    },
    /// Show a resolved profile
    Show { name: String },
}

fn parse_strategy(s: &str) -> anyhow::Result<SyncStrategy> {
    Ok(match s.to_lowercase().as_str() {
        "full" => SyncStrategy::Full,
        "entities_only" => SyncStrategy::EntitiesOnly,
        "labels_only" => SyncStrategy::LabelsOnly,
        "full_without_labels" => SyncStrategy::FullWithoutLabels,
        "sharing_mode" => SyncStrategy::SharingMode,
        "incremental" => SyncStrategy::Incremental,
        other => anyhow::bail!("unknown sync strategy '{other}'"),
    })
}

fn parse_state(s: &str) -> anyhow::Result<SyncState> {
    Ok(match s.to_lowercase().as_str() {
        "pending" => SyncState::Pending,
        "running" => SyncState::Running,
        "cancelling" => SyncState::Cancelling,
        "completed" => SyncState::Completed,
        "failed" => SyncState::Failed,
        "cancelled" => SyncState::Cancelled,
        other => anyhow::bail!("unknown sync state '{other}'"),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync { command } => match command {
            SyncCommands::Start { strategy, language, wait } => {
                let strategy = strategy.map(|s| parse_strategy(&s)).transpose()?;
                commands::sync::start(&cli.env, strategy, language, wait).await?;
            }
            SyncCommands::Status { session_id } => commands::sync::status(&cli.env, &session_id)?,
            SyncCommands::Cancel { session_id } => commands::sync::cancel(&cli.env, &session_id)?,
            SyncCommands::List { state } => {
                let state = state.map(|s| parse_state(&s)).transpose()?;
                commands::sync::list(&cli.env, state)?;
            }
            SyncCommands::History { limit } => commands::sync::history(&cli.env, limit)?,
        },

        Commands::Entity { command } => match command {
            EntityCommands::Get { name } => commands::entity::get(&cli.env, &name)?,
            EntityCommands::List { category, read_only, limit, offset } => {
                commands::entity::list(&cli.env, category, read_only, limit, offset)?
            }
        },

        Commands::Enum { name } => commands::enumeration::get(&cli.env, &name)?,

        Commands::Actions { entity, binding, name_pattern, limit, offset } => {
            commands::action::list(&cli.env, entity, binding, name_pattern, limit, offset)?
        }

        Commands::Label { command } => match command {
            LabelCommands::Get { label_id, language } => commands::label::get(&cli.env, &label_id, &language).await?,
            LabelCommands::Batch { label_ids, language } => commands::label::batch(&cli.env, &label_ids, &language).await?,
        },

        Commands::Search { text, entity_types, limit, offset, no_fulltext } => {
            commands::search::run(&cli.env, &text, entity_types, limit, offset, no_fulltext)?
        }

        Commands::Info => commands::environment::info(&cli.env)?,

        Commands::Profile { command } => match command {
            ProfileCommands::List => commands::profile::list()?,
            ProfileCommands::Add { name, base_url, client_id, client_secret, tenant_id, language } => {
                commands::profile::add(&name, &base_url, client_id, client_secret, tenant_id, language)?
            }
            ProfileCommands::Show { name } => commands::profile::show(&name)?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sync_start_with_strategy() {
        let args = Cli::parse_from(["d365fo-cache", "sync", "start", "--strategy", "incremental"]);
        match args.command {
            Commands::Sync { command: SyncCommands::Start { strategy, wait,.. } } => {
                assert_eq!(strategy.as_deref(), Some("incremental"));
                assert!(!wait);
            }
            _ => panic!("expected sync start"),
        }
    }

    #[test]
    fn parses_entity_get() {
        let args = Cli::parse_from(["d365fo-cache", "--env", "prod", "entity", "get", "Customers"]);
        assert_eq!(args.env, "prod");
        match args.command {
            Commands::Entity { command: EntityCommands::Get { name } } => assert_eq!(name, "Customers"),
            _ => panic!("expected entity get"),
        }
    }

    #[test]
    fn parses_search_with_type_filter() {
        let args = Cli::parse_from(["d365fo-cache", "search", "customer", "--type", "data_entity"]);
        match args.command {
            Commands::Search { text, entity_types,.. } => {
                assert_eq!(text, "customer");
                assert_eq!(entity_types, vec!["data_entity".to_string()]);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn defaults_env_to_default_profile() {
        let args = Cli::parse_from(["d365fo-cache", "info"]);
        assert_eq!(args.env, "default");
    }
}
