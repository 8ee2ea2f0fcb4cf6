mod busy;
mod config;
mod http;
mod llm_clients;
mod shutdown;
mod state;
mod store;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use waggle_agent::compaction::Compactor;
use waggle_agent::prompt::build_system_prompt;
use waggle_agent::runtime::SessionRuntime;
use waggle_agent::tools::{SkillLoadTool, SmartCompactTool};
use waggle_core::cancel::CancelRegistry;
use waggle_core::node::NodeIdentity;
use waggle_core::session::SessionStore;
use waggle_core::tool::SessionTool;
use waggle_skills::{SkillManager, ToolProviderRegistry, COMPACTOR_SKILL_ID};
use waggle_swarm::{
    DispatchBatchTool, DispatchTaskTool, NodeRegistry, SwarmDispatcher,
};

use crate::busy::BusyLock;
use crate::state::{AppState, SessionToolSets};
use crate::store::SqliteSessionStore;

/// waggle node daemon — one process per port, equally leader and worker in
/// the swarm.
#[derive(Parser, Debug)]
#[command(name = "waggled", version, about)]
struct Cli {
    /// Port to serve on; also this node's identity in the swarm registry.
    #[arg(long)]
    port: u16,

    /// Config file path.
    #[arg(short, long, default_value = "waggle.toml")]
    config: PathBuf,

    /// Increase log verbosity (debug level).
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(&cli.config)?;
    config::validate_config(&config)?;

    telemetry::init_telemetry(cli.verbose)?;

    let node = NodeIdentity::new(cli.port);
    // Tools running in this process (the dispatcher in particular) read the
    // port back from the environment for self-exclusion.
    node.export_env();
    info!(port = node.port, node_name = %config.node_name, "waggled starting");

    // Session store: one database per node, named by port.
    let store: Arc<dyn SessionStore> = Arc::new(
        SqliteSessionStore::open(
            &config
                .data_dir
                .join(format!("sessions_port_{}.db", node.port)),
        )
        .await?,
    );

    // Swarm registry: unavailability is a warning, not a startup failure;
    // the node simply runs standalone.
    let registry = match NodeRegistry::open(&config.registry_path).await {
        Ok(registry) => {
            if let Err(e) = registry.register(&node).await {
                warn!(error = %e, "failed to self-register in the swarm registry");
            }
            Some(registry)
        }
        Err(e) => {
            warn!(error = %e, "swarm registry unavailable, running standalone");
            None
        }
    };

    // Skills: discovery scan only; full instruction bodies load on demand.
    let mut skill_manager = SkillManager::new(&config.skills_dir);
    if let Err(e) = skill_manager.scan().await {
        warn!(error = %e, "skill scan failed, continuing with no skills");
    }
    let system_prompt =
        build_system_prompt(&config.node_name, node.port, &skill_manager.manifests_yaml());

    let llm = llm_clients::build_main_client(&config.model)?;
    let summarizer = llm_clients::build_summarizer_client(&config.model)?;
    let compactor = Compactor::new(summarizer, config.limits);

    let runtime = Arc::new(SessionRuntime::new(
        store.clone(),
        llm,
        compactor.clone(),
        system_prompt,
        config.limits,
    ));

    // Skill tool providers: the swarm connector and the compactor ship with
    // the node; other skills are instruction-only unless registered here.
    let mut providers = ToolProviderRegistry::new();
    if let Some(registry) = &registry {
        let dispatcher = Arc::new(SwarmDispatcher::new(
            registry.clone(),
            node.clone(),
            Duration::from_secs(config.dispatch.chat_timeout_secs),
        ));
        providers.register("remote_worker_connector", move || {
            vec![
                Arc::new(DispatchTaskTool::new(dispatcher.clone())) as Arc<dyn SessionTool>,
                Arc::new(DispatchBatchTool::new(dispatcher.clone())),
            ]
        });
    }
    {
        let compactor = compactor.clone();
        let store = store.clone();
        providers.register(COMPACTOR_SKILL_ID, move || {
            vec![Arc::new(SmartCompactTool::new(compactor.clone(), store.clone()))
                as Arc<dyn SessionTool>]
        });
    }

    let skill_load: Arc<dyn SessionTool> = Arc::new(SkillLoadTool::new(
        Arc::new(Mutex::new(skill_manager)),
        Arc::new(providers),
        compactor,
        store.clone(),
    ));

    let app_state = AppState {
        node: node.clone(),
        runtime,
        store,
        registry: registry.clone(),
        busy: BusyLock::new(),
        cancels: CancelRegistry::new(),
        tool_sets: SessionToolSets::new(),
        core_tools: Arc::new(move || vec![skill_load.clone()]),
        http: reqwest::Client::new(),
    };

    let router = http::router(app_state);
    let bind_addr = format!("{}:{}", config.bind_host, node.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "node API listening");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(shutdown::signal_listener(shutdown_tx));

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_rx.changed().await.ok();
        })
        .await?;

    // Graceful stop: leave the registry so peers stop routing to us.
    if let Some(registry) = &registry {
        if let Err(e) = registry.remove(node.port).await {
            warn!(error = %e, "failed to deregister from the swarm registry");
        } else {
            info!(port = node.port, "node deregistered");
        }
    }

    info!("waggled stopped");
    Ok(())
}
