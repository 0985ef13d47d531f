//! Serve command implementation

use crate::api::{create_router, AppState};
use crate::cli::ServeArgs;
use crate::config::{ConfigError, EnforcementConfig, StoreBackend, StoreConfig, TokengateConfig};
use crate::degradation::DegradationPolicy;
use crate::engine::ReservationEngine;
use crate::policy::{BudgetPolicy, PolicyStrictness};
use crate::store::{CounterStore, MemoryStore, RedisStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Load configuration with CLI overrides
pub fn load_config_with_overrides(
    args: &ServeArgs,
) -> Result<TokengateConfig, Box<dyn std::error::Error>> {
    // Load from file if it exists, otherwise use defaults
    let mut config = if args.config.exists() {
        TokengateConfig::load(Some(&args.config))?
    } else {
        tracing::debug!("Config file not found, using defaults");
        TokengateConfig::default()
    };

    config = config.with_env_overrides();

    // CLI overrides (highest priority)
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ref host) = args.host {
        config.server.host = host.clone();
    }
    if let Some(ref log_level) = args.log_level {
        config.logging.level = log_level.clone();
    }
    if let Some(ref policy) = args.policy {
        config.enforcement.policy_path = Some(policy.clone());
    }
    if let Some(store) = args.store {
        config.store.backend = store;
    }
    if let Some(mode) = args.enforcement {
        config.enforcement.mode = Some(mode);
    }

    Ok(config)
}

/// Build the configured counter store.
///
/// The Redis store connects lazily, so an unreachable server does not stop
/// startup; the degradation policy decides what requests see meanwhile.
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn CounterStore>, ConfigError> {
    match config.backend {
        StoreBackend::Redis => match RedisStore::new(config) {
            Ok(store) => Ok(Arc::new(store)),
            Err(source) => Err(ConfigError::Store {
                backend: "redis",
                source,
            }),
        },
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new(config.reservation_ttl()))),
    }
}

/// Load the policy named by the enforcement config.
///
/// Running without a policy is allowed only where nothing would be rejected
/// for lack of one: development, or disabled enforcement.
pub fn load_policy(
    config: &EnforcementConfig,
    degradation: &DegradationPolicy,
) -> Result<BudgetPolicy, ConfigError> {
    match &config.policy_path {
        Some(path) => BudgetPolicy::load(path, degradation.policy_strictness()).map_err(|source| {
            ConfigError::Policy {
                path: path.clone(),
                source,
            }
        }),
        None if !degradation.enforces()
            || degradation.policy_strictness() == PolicyStrictness::Permissive =>
        {
            tracing::warn!("No budget policy configured; usage is tracked but never limited");
            Ok(BudgetPolicy::default())
        }
        None => Err(ConfigError::PolicyRequired),
    }
}

/// Assemble the engine from configuration.
pub fn build_engine(config: &TokengateConfig) -> Result<ReservationEngine, ConfigError> {
    let degradation = DegradationPolicy::from_config(&config.enforcement);
    let store = build_store(&config.store)?;
    let policy = load_policy(&config.enforcement, &degradation)?;
    Ok(ReservationEngine::new(store, policy, degradation))
}

/// Re-read the policy file and swap it in. A policy that fails to load or
/// validate is logged and the current one stays active.
pub fn reload_policy(engine: &ReservationEngine, path: &Path) -> bool {
    let strictness = engine.degradation().policy_strictness();
    match BudgetPolicy::load(path, strictness) {
        Ok(policy) => {
            engine.replace_policy(policy);
            tracing::info!(path = %path.display(), "Budget policy reloaded");
            true
        }
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Policy reload failed; keeping current policy"
            );
            false
        }
    }
}

/// Reload the policy on every SIGHUP until cancelled
#[cfg(unix)]
fn spawn_policy_reloader(
    engine: Arc<ReservationEngine>,
    path: PathBuf,
    cancel_token: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    tracing::info!("Received SIGHUP, reloading policy");
                    reload_policy(&engine, &path);
                }
            }
        }
    }))
}

#[cfg(not(unix))]
fn spawn_policy_reloader(
    _engine: Arc<ReservationEngine>,
    _path: PathBuf,
    _cancel_token: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    tracing::warn!("Policy reload on SIGHUP is not supported on this platform");
    Ok(tokio::spawn(async {}))
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
        _ = cancel_token.cancelled() => {}
    }

    cancel_token.cancel();
}

/// Main serve command handler
pub async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load and merge configuration
    let config = load_config_with_overrides(&args)?;
    config.validate()?;

    // 2. Initialize tracing
    crate::logging::init_tracing(&config.logging)?;

    tracing::info!("Starting tokengate server");
    tracing::debug!(?config, "Loaded configuration");

    // 3. Store, policy and engine
    let engine = Arc::new(build_engine(&config)?);
    let degradation = *engine.degradation();
    tracing::info!(
        store = engine.store_name(),
        mode = ?degradation.mode(),
        environment = ?degradation.environment(),
        windows = ?engine.policy().windows(),
        "Budget engine ready"
    );

    if let Err(e) = engine.ping().await {
        tracing::warn!(
            store = engine.store_name(),
            error = %e,
            "Counter store unreachable at startup"
        );
    }

    // 4. Policy reload on SIGHUP
    let cancel_token = CancellationToken::new();
    let reload_handle = match &config.enforcement.policy_path {
        Some(path) => Some(spawn_policy_reloader(
            Arc::clone(&engine),
            path.clone(),
            cancel_token.clone(),
        )?),
        None => None,
    };

    // 5. Bind and serve
    let app_state = Arc::new(AppState::new(engine, Arc::new(config.clone())));
    let app = create_router(app_state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %addr, "tokengate API server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token.clone()))
        .await?;

    // 6. Cleanup
    cancel_token.cancel();
    if let Some(handle) = reload_handle {
        handle.await?;
    }

    tracing::info!("tokengate server stopped");
    Ok(())
}
