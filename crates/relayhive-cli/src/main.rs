use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relayhive_engine::{EventEngine, EventRouter, RuntimeConfig};
use relayhive_gateway::{GatewayContextService, GatewayManager, RuntimeConfigStore};
use relayhive_runtime::NoopTaskRunner;
use relayhive_schema::Event;
use relayhive_store::{EventStore, GatewayStore};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "relayhive", version, about = "persistent rule-driven event engine")]
struct Cli {
    #[arg(long, help = "Path to a YAML runtime config file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the HTTP API server and background triggers")]
    Serve,
    #[command(subcommand, about = "Inspect and manage declarative rules")]
    Rules(RulesCommands),
    #[command(about = "Append a new event to the store and run matching rules")]
    Emit {
        event_type: String,
        #[arg(long, default_value = "cli")]
        source: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    #[command(subcommand, about = "List and resolve pending human-in-the-loop approvals")]
    Approvals(ApprovalsCommands),
    #[command(about = "Re-run a previously stored event through the rules engine")]
    Replay {
        event_id: String,
        #[arg(long, help = "Skip the dedup/cooldown gates for this replay")]
        bypass_dedup: bool,
    },
}

#[derive(Subcommand)]
enum RulesCommands {
    #[command(about = "List the currently loaded rules")]
    List,
    #[command(about = "Parse every rule file under the rules directory and report errors")]
    Validate,
    #[command(about = "Write the default seed rule file if none exists yet")]
    Seed,
}

#[derive(Subcommand)]
enum ApprovalsCommands {
    #[command(about = "List pending approval requests")]
    List,
    #[command(about = "Approve or reject a pending request")]
    Resolve {
        approval_id: String,
        #[arg(value_enum)]
        decision: Decision,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum Decision {
    Approve,
    Reject,
}

fn init_logging(config: &RuntimeConfig) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = config
        .db_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "relayhive.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    Ok(guard)
}

/// Builds the engine/gateway pair shared by every subcommand that touches
/// live state, wiring the store, rules, router and gateway context service
/// together the way `serve` runs them in the foreground.
async fn build_engine_and_gateway(config: &RuntimeConfig) -> Result<(Arc<EventEngine>, Arc<GatewayManager>)> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    relayhive_rules::ensure_default_rules(&config.rules_path).context("seeding default rules")?;

    let store = Arc::new(EventStore::open(&config.db_path).context("opening event store")?);
    let router = Arc::new(EventRouter::noop());
    let engine = EventEngine::build(store.clone(), router, Some(config.rules_path.clone())).await;

    let gateway_store = GatewayStore::from_connection(store.connection());
    let context_service = Arc::new(GatewayContextService::new(
        gateway_store,
        Arc::new(NoopTaskRunner),
        config.db_path.to_string_lossy().to_string(),
        config.rules_path.to_string_lossy().to_string(),
    ));
    let configs = RuntimeConfigStore::load(config.gateway_config_path.clone()).context("loading gateway configs")?;
    let gateway = Arc::new(GatewayManager::new(configs, context_service, engine.clone()));

    Ok((engine, gateway))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RuntimeConfig::load(cli.config.as_deref())?;
    let _log_guard = init_logging(&config)?;

    match cli.command {
        Commands::Serve => {
            let (engine, gateway) = build_engine_and_gateway(&config).await?;
            if let Some(interval) = config.heartbeat_interval_seconds {
                engine.start_heartbeat(interval).await;
            }
            if !config.cron_jobs.is_empty() {
                engine.start_cron_jobs(config.cron_jobs.clone()).await;
            }
            engine.start_rule_watch(std::time::Duration::from_secs(5)).await;

            let state = relayhive_server::state::AppState { engine, gateway };
            relayhive_server::serve(state, &config.http_addr).await?;
        }
        Commands::Rules(command) => match command {
            RulesCommands::List => {
                let rules = relayhive_rules::load_rules(&config.rules_path);
                for rule in rules {
                    println!(
                        "{:<24} {:<28} active={:<5} priority={}",
                        rule.id, rule.event_type, rule.is_active, rule.priority
                    );
                }
            }
            RulesCommands::Validate => {
                let files = relayhive_rules::list_rule_files(&config.rules_path);
                if files.is_empty() {
                    println!("no rule files found under {}", config.rules_path.display());
                }
                let rules = relayhive_rules::load_rules(&config.rules_path);
                println!("{} file(s), {} rule(s) loaded successfully", files.len(), rules.len());
            }
            RulesCommands::Seed => {
                relayhive_rules::ensure_default_rules(&config.rules_path)?;
                println!("seeded default rules under {}", config.rules_path.display());
            }
        },
        Commands::Emit {
            event_type,
            source,
            subject,
            payload,
            idempotency_key,
        } => {
            let (engine, _gateway) = build_engine_and_gateway(&config).await?;
            let payload: serde_json::Value = serde_json::from_str(&payload).context("parsing --payload as JSON")?;
            let mut event = Event::new(event_type, source).with_payload(payload);
            if let Some(subject) = subject {
                event = event.with_subject(subject);
            }
            if let Some(key) = idempotency_key {
                event = event.with_idempotency_key(key);
            }
            let event_id = event.event_id.clone();
            let results = engine.emit(event).await;
            println!("emitted {event_id}, {} rule(s) matched", results.len());
            for result in results {
                println!("  rule={} status={}", result.rule_id, result.status);
            }
        }
        Commands::Approvals(command) => {
            let (engine, _gateway) = build_engine_and_gateway(&config).await?;
            match command {
                ApprovalsCommands::List => {
                    let pending = engine.list_pending_approvals().await?;
                    for approval in pending {
                        println!(
                            "{} rule={} event={} risk={}",
                            approval.approval_id, approval.rule_id, approval.event_id, approval.risk_level
                        );
                    }
                }
                ApprovalsCommands::Resolve { approval_id, decision } => {
                    let approve = matches!(decision, Decision::Approve);
                    let resolution = engine.resolve_approval(&approval_id, approve).await?;
                    println!("approval {approval_id} resolved: status={}", resolution.status);
                }
            }
        }
        Commands::Replay { event_id, bypass_dedup } => {
            let (engine, _gateway) = build_engine_and_gateway(&config).await?;
            let results = engine.replay_event(&event_id, bypass_dedup).await?;
            println!("replayed {event_id}, {} rule(s) ran", results.len());
            for result in results {
                println!("  rule={} status={}", result.rule_id, result.status);
            }
        }
    }

    Ok(())
}
