//! Broiler API Server
//!
//! REST API server for account registration, verification and sessions.
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use broiler_api::{
    auth::{CredentialService, PasswordConfig},
    create_router,
    error::set_expose_error_details,
    seed::{seed_account, SeedAccount, SeedOutcome},
    state::AppState,
};
use broiler_core::{
    config::LoggingConfig, AppConfig, CacheBackendKind, CacheStore, LogNotifier, MemoryCache,
    PgUserRepository, RedisCache, UserRole,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Command line arguments; flags take precedence over the environment
#[derive(Debug, Parser)]
#[command(name = "broiler-api", version, about = "Broiler account API server")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "BROILER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Create a verified, active account (e.g. the first administrator)
    Seed {
        /// Account email
        #[arg(long)]
        email: String,
        /// Account password
        #[arg(long, env = "BROILER_SEED_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, default_value = "Admin")]
        first_name: String,
        #[arg(long, default_value = "User")]
        last_name: String,
        /// ADMIN or USER
        #[arg(long, default_value = "ADMIN")]
        role: UserRole,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config.logging);
    config.validate()?;

    set_expose_error_details(!config.environment.is_production());
    install_panic_hook();

    // Stores
    let users = PgUserRepository::connect(
        &config.database.postgres_url,
        config.database.postgres_pool_size,
    )
    .await
    .context("failed to connect to the record store")?;
    users
        .migrate()
        .await
        .context("failed to apply migrations")?;

    if let Some(Command::Seed {
        email,
        password,
        first_name,
        last_name,
        role,
    }) = args.command
    {
        let account = SeedAccount {
            email,
            password,
            first_name,
            last_name,
            role,
        };
        let credentials = CredentialService::new(PasswordConfig::default());
        return match seed_account(&users, &credentials, account).await {
            Ok(SeedOutcome::Created(user)) => {
                tracing::info!(email = %user.email, role = %user.role, "account seeded");
                Ok(())
            }
            Ok(SeedOutcome::Existing(user)) => {
                tracing::warn!(email = %user.email, "account already exists, nothing to seed");
                Ok(())
            }
            Err(err) => Err(anyhow::anyhow!("seeding failed: {err}")),
        };
    }

    let cache: Arc<dyn CacheStore> = match config.cache.backend {
        CacheBackendKind::Redis => Arc::new(
            RedisCache::connect(&config.cache.redis.connection_url())
                .await
                .context("failed to connect to the cache store")?,
        ),
        CacheBackendKind::Memory => {
            tracing::warn!("using the in-memory cache store; sessions do not survive restarts");
            Arc::new(MemoryCache::with_capacity(config.cache.memory_max_capacity))
        }
    };

    let notifier = Arc::new(LogNotifier::new(config.email.clone()));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let environment = config.environment;

    // Create application state
    let state = Arc::new(AppState::new(
        config,
        Arc::new(users),
        cache,
        notifier,
        CredentialService::new(PasswordConfig::default()),
    ));

    // Create router
    let app = create_router(state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%environment, "Broiler API Server starting on http://{}", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    tracing::info!("Broiler API Server stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "unrecoverable error, shutting down");
        std::process::exit(1);
    }));
}

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    state.set_ready(false);
    tracing::info!("Shutting down Broiler API Server...");
}
