#![forbid(unsafe_code)]

//! **fabric-cli** – Command-line interface for the execution fabric.
//!
//! Provides two modes of operation: `serve` stands up the HTTP surface
//! (`fabric-api`) over a freshly wired fabric stack, while the remaining
//! subcommands are one-shot: they wire an ephemeral stack, perform one
//! operation, and print the result. Useful for local smoke testing; nothing
//! persists across invocations unless `--storage sled` is given, in which
//! case the State Surface's durable tier, the WAL, and the Artifact Plane
//! all open sled trees rooted under `--db-path` and survive a restart.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fabric_api::ApiState;
use fabric_artifacts::{ArtifactPlane, ArtifactStorage, InMemoryArtifactStorage, SledArtifactStorage};
use fabric_bus::{SledWalBackend, WalBackend, WriteAheadLog};
use fabric_kernel::{ExecutionLifecycleManager, IntentRegistry, SessionManager};
use fabric_outbox::{InMemoryEventBus, Outbox};
use fabric_steward::StaticDataSteward;
use fabric_store::{InMemoryKvBackend, KvBackend, SledKvBackend, StateSurface};
use fabric_types::{Fields, Intent, IntentRequest};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fabric")]
#[command(about = "Intent-dispatched execution fabric CLI")]
#[command(version)]
struct Cli {
    /// Durable storage backend (memory, sled).
    #[arg(long, default_value = "memory")]
    storage: String,

    /// Database path for the sled backend.
    #[arg(long, default_value = "fabric.sled")]
    db_path: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP surface (session, intent, execution-status, artifact endpoints).
    Serve {
        /// Port to bind.
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Create an anonymous session and print it.
    CreateSession,
    /// Submit an intent against a fresh stack with no registered realms,
    /// useful for exercising the validation and §8A error paths.
    SubmitIntent {
        #[arg(long)]
        intent_type: String,
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        session: String,
        #[arg(long)]
        solution: String,
        /// JSON object literal for the intent's parameters.
        #[arg(long, default_value = "{}")]
        parameters: String,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Print the set of intent types presently registered (empty, absent any realms).
    QueryRegistry,
}

/// Durable backends for the three stores that persist when `--storage sled`
/// is given: the State Surface's durable tier, the WAL, and the Artifact
/// Plane each get their own sled tree under a subdirectory of `db_path`
/// rather than sharing one, since a sled database only admits one opener.
struct DurableBackends {
    state: Option<Arc<dyn KvBackend>>,
    artifact_registry: Option<Arc<dyn KvBackend>>,
    wal: Option<Arc<dyn WalBackend>>,
    artifacts: Option<Box<dyn ArtifactStorage>>,
}

fn parse_durable_backends(storage: &str, db_path: &str) -> Result<DurableBackends> {
    match storage {
        "memory" => {
            Ok(DurableBackends { state: None, artifact_registry: None, wal: None, artifacts: None })
        }
        "sled" => {
            let root = std::path::Path::new(db_path);
            let state = SledKvBackend::open(root.join("state"))
                .map_err(|e| anyhow::anyhow!("opening sled state db under {db_path}: {e}"))?;
            let artifact_registry = SledKvBackend::open(root.join("artifact_registry"))
                .map_err(|e| anyhow::anyhow!("opening sled artifact registry db under {db_path}: {e}"))?;
            let wal = SledWalBackend::open(root.join("wal"))
                .map_err(|e| anyhow::anyhow!("opening sled WAL db under {db_path}: {e}"))?;
            let artifacts = SledArtifactStorage::open(root.join("artifacts"))
                .map_err(|e| anyhow::anyhow!("opening sled artifact blob db under {db_path}: {e}"))?;
            Ok(DurableBackends {
                state: Some(Arc::new(state) as Arc<dyn KvBackend>),
                artifact_registry: Some(Arc::new(artifact_registry) as Arc<dyn KvBackend>),
                wal: Some(Arc::new(wal) as Arc<dyn WalBackend>),
                artifacts: Some(Box::new(artifacts) as Box<dyn ArtifactStorage>),
            })
        }
        other => anyhow::bail!("unsupported storage backend: {other} (expected memory or sled)"),
    }
}

struct FabricStack {
    sessions: Arc<SessionManager>,
    lifecycle: Arc<ExecutionLifecycleManager>,
    artifacts: Arc<ArtifactPlane>,
    state: Arc<StateSurface>,
}

fn build_stack(storage: &str, db_path: &str) -> Result<FabricStack> {
    let durable = parse_durable_backends(storage, db_path)?;
    let use_memory = durable.state.is_none();
    let hot: Arc<dyn KvBackend> = Arc::new(InMemoryKvBackend::new());
    let state = Arc::new(StateSurface::new(Some(hot), durable.state, use_memory));

    let wal = Arc::new(WriteAheadLog::new(durable.wal));
    let outbox = Arc::new(Outbox::new(Box::new(InMemoryEventBus::new())));
    let artifact_storage: Box<dyn ArtifactStorage> =
        durable.artifacts.unwrap_or_else(|| Box::new(InMemoryArtifactStorage::new()));
    let artifact_registry_state = StateSurface::new(None, durable.artifact_registry, use_memory);
    let artifacts = Arc::new(ArtifactPlane::new(artifact_registry_state, artifact_storage));
    let sessions = Arc::new(SessionManager::new(state.clone(), wal.clone()));
    let intents = Arc::new(IntentRegistry::new());

    let lifecycle = Arc::new(ExecutionLifecycleManager::new(
        intents,
        wal,
        state.clone(),
        outbox,
        artifacts.clone(),
        Some(StaticDataSteward::shared()),
        sessions.clone(),
        ["ingest-file".to_string()].into_iter().collect::<HashSet<_>>(),
    ));

    Ok(FabricStack { sessions, lifecycle, artifacts, state })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    info!("fabric-cli v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve { port } => handle_serve(&cli.storage, &cli.db_path, port).await,
        Commands::CreateSession => handle_create_session(&cli.storage, &cli.db_path).await,
        Commands::SubmitIntent {
            intent_type,
            tenant,
            session,
            solution,
            parameters,
            idempotency_key,
        } => {
            handle_submit_intent(
                &cli.storage,
                &cli.db_path,
                intent_type,
                tenant,
                session,
                solution,
                parameters,
                idempotency_key,
            )
            .await
        }
        Commands::QueryRegistry => handle_query_registry(&cli.storage, &cli.db_path).await,
    }
}

async fn handle_serve(storage: &str, db_path: &str, port: u16) -> Result<()> {
    let stack = build_stack(storage, db_path)?;

    let app = fabric_api::create_app(ApiState {
        sessions: stack.sessions,
        lifecycle: stack.lifecycle,
        artifacts: stack.artifacts,
        state: stack.state,
        service_name: "fabric".to_string(),
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("failed to bind to port {port}"))?;
    info!("HTTP server listening on port {port}");
    info!("Health check: http://localhost:{port}/health");

    let server = axum_serve(listener, app);
    tokio::select! {
        result = server => {
            if let Err(err) = result {
                warn!(%err, "HTTP server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
    Ok(())
}

async fn axum_serve(
    listener: tokio::net::TcpListener,
    app: axum::Router,
) -> std::io::Result<()> {
    axum::serve(listener, app).await
}

async fn handle_create_session(storage: &str, db_path: &str) -> Result<()> {
    let stack = build_stack(storage, db_path)?;
    let session = stack.sessions.create_anonymous_session(Fields::new(), Fields::new()).await?;
    println!("session created: {}", session.session_id);
    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_submit_intent(
    storage: &str,
    db_path: &str,
    intent_type: String,
    tenant: String,
    session: String,
    solution: String,
    parameters: String,
    idempotency_key: Option<String>,
) -> Result<()> {
    let stack = build_stack(storage, db_path)?;
    let parameters: Fields = serde_json::from_str(&parameters).context("parameters must be a JSON object")?;

    let intent = Intent::create(IntentRequest {
        intent_id: None,
        intent_type,
        tenant_id: tenant,
        session_id: session,
        solution_id: solution,
        parameters,
        metadata: Fields::new(),
        idempotency_key,
    })?;

    match stack.lifecycle.execute(intent).await {
        Ok(result) => {
            println!("execution accepted: {}", result.execution_id);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Err(err) => {
            println!("execution failed to accept: {}", err.message);
        }
    }
    Ok(())
}

async fn handle_query_registry(storage: &str, db_path: &str) -> Result<()> {
    let stack = build_stack(storage, db_path)?;
    let _ = &stack;
    println!("registered intent types: (none — the CLI wires an empty realm registry; embed fabric-kernel to register realms)");
    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}
