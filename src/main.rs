use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fleetlens::api::{serve, AppState};
use fleetlens::engine::{ChannelBroadcaster, HealthCheckLoop, StatusBroadcastLoop, TelemetryService};
use fleetlens::lifecycle::HealthMonitor;
use fleetlens::registry::AgentRegistry;
use fleetlens::storage::{AgentStore, InMemoryStore, PostgresStore};
use fleetlens::workspace::Locator;
use fleetlens::Config;

#[derive(Parser)]
#[command(name = "fleetlens")]
#[command(about = "Agent telemetry and health reconciliation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and run the reconciliation loops
    Serve {
        #[arg(long, help = "Port to listen on (overrides PORT)")]
        port: Option<u16>,
    },
    /// Print the derived status of every agent
    Status,
    /// Run a health check for one agent
    Health {
        #[arg(help = "Agent id or name")]
        id: String,
    },
    /// Print the fleet-wide live stream
    Stream {
        #[arg(long, help = "Maximum entries (1-200)")]
        limit: Option<usize>,
        #[arg(long, help = "Only this agent, by id or name")]
        agent: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Serve { port } => run_server(config, port).await?,
        Commands::Status => print_status(config).await?,
        Commands::Health { id } => print_health(config, &id).await?,
        Commands::Stream { limit, agent } => print_stream(config, limit, agent).await?,
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_registry(config: &Config) -> Arc<AgentRegistry> {
    match AgentRegistry::load(&config.agents_config, config.orchestrator_ids.clone()) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            log::warn!("No agent registry loaded ({:#}); starting with an empty fleet", e);
            Arc::new(AgentRegistry::new(Vec::new(), config.orchestrator_ids.clone()))
        }
    }
}

fn locator(config: &Config, registry: &AgentRegistry) -> Locator {
    Locator::new(&config.root_dir, registry.orchestrator_ids().to_vec())
}

async fn open_store(config: &Config) -> Result<Arc<dyn AgentStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresStore::new(url).await?;
            store.run_migrations().await?;
            log::info!("Using Postgres datastore");
            Ok(Arc::new(store))
        }
        None => {
            log::info!("DATABASE_URL not set; using in-memory datastore");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// Inserts registry agents the datastore has not seen. Existing rows keep their status.
async fn seed_agents(store: &dyn AgentStore, registry: &AgentRegistry) {
    for agent in registry.agents() {
        if let Err(e) = store.upsert_agent(&agent.id, &agent.display_name).await {
            log::warn!("Failed to seed agent {}: {}", agent.id, e);
        }
    }
}

async fn run_server(config: Config, port: Option<u16>) -> Result<()> {
    let registry = load_registry(&config);
    let locator = locator(&config, &registry);
    let store = open_store(&config).await?;
    seed_agents(store.as_ref(), &registry).await;

    let telemetry = TelemetryService::new(registry.clone(), locator.clone());
    let monitor = Arc::new(HealthMonitor::new(store.clone(), registry.clone(), locator));
    let broadcaster = ChannelBroadcaster::default();

    StatusBroadcastLoop::new(telemetry.clone(), store.clone(), Arc::new(broadcaster.clone()))
        .spawn(config.status_interval());
    HealthCheckLoop::new(monitor.clone(), Arc::new(broadcaster.clone()))
        .spawn(config.health_interval());

    log::info!(
        "Watching {} agents under {}",
        registry.agents().len(),
        config.root_dir.display()
    );

    let state = AppState {
        telemetry,
        monitor,
        broadcaster,
    };
    serve(state, port.unwrap_or(config.port)).await
}

async fn print_status(config: Config) -> Result<()> {
    let registry = load_registry(&config);
    let telemetry = TelemetryService::new(registry.clone(), locator(&config, &registry));

    for status in telemetry.list_agent_statuses().await? {
        println!(
            "{} {:<16} {:<8} {:>14} tokens  ${:>9.4}  {}",
            status.emoji,
            status.name,
            status.state.as_str(),
            status.total_tokens,
            status.estimated_cost,
            status.last_active_str
        );
    }
    Ok(())
}

async fn print_health(config: Config, id: &str) -> Result<()> {
    let registry = load_registry(&config);
    let store = open_store(&config).await?;
    seed_agents(store.as_ref(), &registry).await;
    let monitor = HealthMonitor::new(store, registry.clone(), locator(&config, &registry));

    let health = monitor.get_agent_health(id).await?;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}

async fn print_stream(config: Config, limit: Option<usize>, agent: Option<String>) -> Result<()> {
    let registry = load_registry(&config);
    let telemetry = TelemetryService::new(registry.clone(), locator(&config, &registry));

    for entry in telemetry.get_global_stream(limit, agent).await? {
        println!(
            "{} {} {:<10} {:<8} {}",
            entry.time_abs,
            entry.emoji,
            entry.agent,
            entry.kind.as_str(),
            entry.content
        );
    }
    Ok(())
}
