use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use leadflow_core::store::{
    AssignmentGuard, ConfigStore, ConversationPatch, ConversationStore, SalesmanDirectory,
};
use leadflow_core::{
    AssignmentEngine, Conversation, ConversationTurn, EndUserContext, EventLedger, HeatScorer, LanguageCode,
    LeadPipeline, LlmHeatClassifier, RoutingDefaults, Salesman, StoreHandles, Strategy,
    TriageEscalator, WorkloadTracker,
};
use leadflow_store::LeadDb;

mod config;

use config::LeadflowConfig;

#[derive(Parser)]
#[command(name = "leadflow")]
#[command(version)]
#[command(about = "Leadflow - lead routing and heat scoring for sales teams")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,

    /// Score a single message without touching the database
    Score {
        message: String,
        /// Skip the AI classifier and use keyword scoring only
        #[arg(long)]
        keywords_only: bool,
    },

    /// Inspect or change a tenant's assignment config
    Tenant {
        #[command(subcommand)]
        action: TenantAction,
    },

    /// Manage the salesman roster
    Salesman {
        #[command(subcommand)]
        action: SalesmanAction,
    },

    /// Open or close conversations
    Conversation {
        #[command(subcommand)]
        action: ConversationAction,
    },

    /// Process an inbound customer message (score, escalate, auto-assign)
    Ingest {
        tenant: String,
        conversation: String,
        message: String,
        /// Earlier turn as `customer:<text>` or `agent:<text>`, oldest first (repeatable)
        #[arg(long = "history", value_name = "ROLE:TEXT")]
        history: Vec<String>,
    },

    /// Assign an unowned conversation
    Assign {
        tenant: String,
        conversation: String,
        /// Override the tenant's configured strategy
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Move a conversation to another salesman
    Reassign {
        tenant: String,
        conversation: String,
        salesman: String,
        #[arg(long)]
        reason: String,
    },

    /// Show a salesman's open lead count
    Workload { tenant: String, salesman: String },

    /// List ledger events for a tenant
    Events {
        tenant: String,
        #[arg(long)]
        conversation: Option<String>,
    },

    /// List open triage entries for a tenant
    Triage { tenant: String },

    /// Recompute rotation cursors from the event table
    RebuildCursors,
}

#[derive(Subcommand)]
enum TenantAction {
    /// Show the assignment config (created with defaults if missing)
    Show { tenant: String },

    /// Change the assignment strategy
    SetStrategy { tenant: String, strategy: String },

    /// Flip assignment flags
    Toggle {
        tenant: String,
        #[arg(long)]
        auto_assign: Option<bool>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        consider_capacity: Option<bool>,
        #[arg(long)]
        consider_score: Option<bool>,
    },
}

#[derive(Subcommand)]
enum SalesmanAction {
    /// Add or update a salesman
    Add {
        tenant: String,
        id: String,
        name: String,
        #[arg(long, default_value_t = leadflow_core::types::DEFAULT_MAX_LEADS_PER_MONTH)]
        capacity: u32,
        /// Allow VERY_HOT and ON_FIRE leads past capacity
        #[arg(long)]
        high_heat_override: bool,
        #[arg(long, value_delimiter = ',')]
        products: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        languages: Vec<String>,
        #[arg(long)]
        zone: Option<String>,
        #[arg(long, default_value_t = 0.0)]
        performance: f64,
    },

    /// Remove a salesman from the active roster
    Deactivate { id: String },

    /// Return a salesman to the active roster
    Activate { id: String },

    /// List active salesmen
    List { tenant: String },
}

#[derive(Subcommand)]
enum ConversationAction {
    /// Register a new unowned conversation
    Open {
        tenant: String,
        id: String,
        #[arg(long, value_delimiter = ',')]
        products: Vec<String>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },

    /// Mark a conversation closed
    Close { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config),
        Commands::Score {
            message,
            keywords_only,
        } => cmd_score(&cli.config, &message, keywords_only).await,
        command => {
            let app = App::open(&cli.config)?;
            app.run(command).await
        }
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("Leadflow initialized at {}", config_dir.display());
    println!(
        "Edit {} to configure routing defaults and provider keys.",
        config_path.display()
    );
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = LeadflowConfig::load(config_path)?;
    // Debug output masks provider keys
    println!("{:#?}", cfg);
    Ok(())
}

async fn cmd_score(config_path: &Option<PathBuf>, message: &str, keywords_only: bool) -> Result<()> {
    let cfg = load_or_default(config_path)?;
    let scorer = build_scorer(&cfg)?;
    let result = if keywords_only {
        scorer.score_deterministic(message)
    } else {
        scorer.score(message, None).await
    };
    print_json(&result)
}

fn load_or_default(config_path: &Option<PathBuf>) -> Result<LeadflowConfig> {
    let default_path = config::config_dir().join("config.toml");
    if config_path.is_none() && !default_path.exists() {
        warn!("No config at {}, using built-in defaults", default_path.display());
        return Ok(LeadflowConfig::default());
    }
    LeadflowConfig::load(config_path)
}

fn build_scorer(cfg: &LeadflowConfig) -> Result<HeatScorer> {
    let scorer = HeatScorer::new(cfg.heat.to_scorer_config());
    if !cfg.heat.classifier_enabled {
        info!("AI classifier disabled, keyword scoring only");
        return Ok(scorer);
    }
    match cfg.providers.build_router()? {
        Some(router) => {
            info!(
                "Heat classifier using {} ({}), {} provider(s)",
                router.provider_name(),
                router.model(),
                router.provider_count()
            );
            Ok(scorer.with_classifier(Arc::new(LlmHeatClassifier::new(router))))
        }
        None => {
            info!("No LLM provider configured, keyword scoring only");
            Ok(scorer)
        }
    }
}

/// Parse a `--history` value such as `customer:do you ship to Spain?`
fn parse_turn(raw: &str) -> Result<ConversationTurn> {
    let (role, content) = raw
        .split_once(':')
        .with_context(|| format!("history turn '{}' must look like ROLE:TEXT", raw))?;
    let content = content.trim();
    if content.is_empty() {
        bail!("history turn '{}' has no text", raw);
    }
    match role.trim().to_ascii_lowercase().as_str() {
        "customer" => Ok(ConversationTurn::customer(content)),
        "agent" => Ok(ConversationTurn::agent(content)),
        other => bail!("unknown history role '{}' (expected customer or agent)", other),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Database-backed commands share one set of handles
struct App {
    db: Arc<LeadDb>,
    stores: StoreHandles,
    defaults: RoutingDefaults,
    cfg: LeadflowConfig,
}

impl App {
    fn open(config_path: &Option<PathBuf>) -> Result<Self> {
        let cfg = load_or_default(config_path)?;
        let defaults = cfg.routing.to_defaults()?;
        let (db, stores) = leadflow_store::open_handles(cfg.db_path())
            .context("Failed to open lead database")?;
        Ok(Self {
            db,
            stores,
            defaults,
            cfg,
        })
    }

    fn engine(&self) -> AssignmentEngine {
        AssignmentEngine::new(&self.stores, self.defaults)
    }

    async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Tenant { action } => self.tenant(action).await,
            Commands::Salesman { action } => self.salesman(action).await,
            Commands::Conversation { action } => self.conversation(action).await,
            Commands::Ingest {
                tenant,
                conversation,
                message,
                history,
            } => {
                let turns = history
                    .iter()
                    .map(|turn| parse_turn(turn))
                    .collect::<Result<Vec<_>>>()?;
                let pipeline =
                    LeadPipeline::new(&self.stores, self.defaults, build_scorer(&self.cfg)?);
                let history = (!turns.is_empty()).then_some(turns.as_slice());
                let outcome = pipeline
                    .process_message(&tenant, &conversation, &message, history)
                    .await?;
                print_json(&outcome)
            }
            Commands::Assign {
                tenant,
                conversation,
                strategy,
            } => {
                let strategy = strategy.map(|s| s.parse::<Strategy>()).transpose()?;
                let result = self.engine().assign(&tenant, &conversation, strategy).await?;
                print_json(&result)
            }
            Commands::Reassign {
                tenant,
                conversation,
                salesman,
                reason,
            } => {
                self.engine()
                    .reassign(&tenant, &conversation, &salesman, &reason)
                    .await?;
                println!("Conversation {} now owned by {}", conversation, salesman);
                Ok(())
            }
            Commands::Workload { tenant, salesman } => {
                let tracker = WorkloadTracker::new(self.stores.conversations.clone());
                let open = tracker.workload_of(&tenant, &salesman).await?;
                println!("{}", open);
                Ok(())
            }
            Commands::Events {
                tenant,
                conversation,
            } => {
                let ledger = EventLedger::new(self.stores.events.clone());
                let events = ledger.history(&tenant, conversation.as_deref()).await?;
                print_json(&events)
            }
            Commands::Triage { tenant } => {
                let escalator = TriageEscalator::new(self.stores.triage.clone());
                print_json(&escalator.open_entries(&tenant).await?)
            }
            Commands::RebuildCursors => {
                let rebuilt = self.db.rebuild_cursors().await?;
                println!("Rebuilt {} rotation cursor(s)", rebuilt);
                Ok(())
            }
            Commands::Init | Commands::Config | Commands::Score { .. } => {
                bail!("command does not use the lead database")
            }
        }
    }

    async fn tenant(&self, action: TenantAction) -> Result<()> {
        match action {
            TenantAction::Show { tenant } => {
                let config = self.db.get_or_create(&tenant, &self.defaults).await?;
                print_json(&config)
            }
            TenantAction::SetStrategy { tenant, strategy } => {
                let mut config = self.db.get_or_create(&tenant, &self.defaults).await?;
                config.strategy = strategy.parse()?;
                self.db.save_config(config.clone()).await?;
                print_json(&config)
            }
            TenantAction::Toggle {
                tenant,
                auto_assign,
                active,
                consider_capacity,
                consider_score,
            } => {
                let mut config = self.db.get_or_create(&tenant, &self.defaults).await?;
                if let Some(value) = auto_assign {
                    config.auto_assign_enabled = value;
                }
                if let Some(value) = active {
                    config.active = value;
                }
                if let Some(value) = consider_capacity {
                    config.consider_capacity = value;
                }
                if let Some(value) = consider_score {
                    config.consider_score = value;
                }
                self.db.save_config(config.clone()).await?;
                print_json(&config)
            }
        }
    }

    async fn salesman(&self, action: SalesmanAction) -> Result<()> {
        match action {
            SalesmanAction::Add {
                tenant,
                id,
                name,
                capacity,
                high_heat_override,
                products,
                languages,
                zone,
                performance,
            } => {
                let mut salesman = Salesman::new(&id, &tenant, &name)
                    .with_capacity(capacity)
                    .with_high_heat_override(high_heat_override)
                    .with_products(products.iter().map(String::as_str))
                    .with_languages(languages.iter().map(String::as_str))
                    .with_performance(performance);
                if let Some(zone) = &zone {
                    salesman = salesman.with_zone(zone);
                }
                self.db.upsert_salesman(salesman.clone()).await?;
                print_json(&salesman)
            }
            SalesmanAction::Deactivate { id } => self.set_active(&id, false).await,
            SalesmanAction::Activate { id } => self.set_active(&id, true).await,
            SalesmanAction::List { tenant } => print_json(&self.db.list_active(&tenant).await?),
        }
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        if !self.db.set_active(id, active).await? {
            bail!("salesman '{}' not found", id);
        }
        println!("Salesman {} {}", id, if active { "activated" } else { "deactivated" });
        Ok(())
    }

    async fn conversation(&self, action: ConversationAction) -> Result<()> {
        match action {
            ConversationAction::Open {
                tenant,
                id,
                products,
                language,
                address,
            } => {
                if self.db.get_conversation(&id).await?.is_some() {
                    bail!("conversation '{}' already exists", id);
                }
                let conversation = Conversation::new(&id, &tenant).with_context(EndUserContext {
                    product_mentions: products,
                    language: language.as_deref().map(LanguageCode::new),
                    address,
                });
                self.db.insert_conversation(conversation.clone()).await?;
                print_json(&conversation)
            }
            ConversationAction::Close { id } => {
                let closed = self
                    .db
                    .update_conversation(&id, ConversationPatch::close(), AssignmentGuard::Any)
                    .await?;
                if !closed {
                    bail!("conversation '{}' not found", id);
                }
                println!("Conversation {} closed", id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_core::heat::TurnRole;

    #[test]
    fn test_parse_turn_roles() {
        let turn = parse_turn("customer: do you ship to Spain?").unwrap();
        assert_eq!(turn.role, TurnRole::Customer);
        assert_eq!(turn.content, "do you ship to Spain?");

        let turn = parse_turn("Agent:yes, within a week: usually").unwrap();
        assert_eq!(turn.role, TurnRole::Agent);
        assert_eq!(turn.content, "yes, within a week: usually");
    }

    #[test]
    fn test_parse_turn_rejects_bad_input() {
        assert!(parse_turn("no role here").is_err());
        assert!(parse_turn("customer:   ").is_err());
        assert!(parse_turn("bot:hello").is_err());
    }

    #[test]
    fn test_ingest_collects_repeated_history() {
        let cli = Cli::try_parse_from([
            "leadflow",
            "ingest",
            "t1",
            "c1",
            "send the contract",
            "--history",
            "customer:what does it cost?",
            "--history",
            "agent:it is 40 euros",
        ])
        .unwrap();
        match cli.command {
            Commands::Ingest { history, .. } => assert_eq!(history.len(), 2),
            _ => panic!("expected ingest"),
        }
    }
}
