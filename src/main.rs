use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use soma::auth::{CredentialHasher, generate_secret};
use soma::config::{LogConfig, SomaConfig};
use soma::server::{AppState, create_router};
use soma::store::{ROOT_UID, SqliteStore, Store, bootstrap, is_bootstrapped};
use soma::supervisor::password_credential;

const ROOT_PASSWORD_FILE: &str = ".root_password";

#[cfg(unix)]
fn set_restrictive_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[derive(Parser)]
#[command(name = "soma")]
#[command(about = "Configuration tree engine for monitoring deployments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// Path to the TOML configuration file
        #[arg(long, short, default_value = "./soma.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Initialize the installation (create database and root account)
    Init {
        /// Path to the TOML configuration file
        #[arg(long, short, default_value = "./soma.toml")]
        config: PathBuf,
    },
}

fn init_logging(log: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("soma=info".parse()?);
    match &log.path {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("soma.log"))
                .with_context(|| format!("cannot open log file in {}", dir.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

fn open_store(config: &SomaConfig) -> anyhow::Result<SqliteStore> {
    fs::create_dir_all(config.data_dir())?;
    let store = SqliteStore::new(&config.database.path)?;
    store.initialize()?;
    Ok(store)
}

fn run_init(config: &SomaConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let password_file = config.data_dir().join(ROOT_PASSWORD_FILE);

    if is_bootstrapped(&store)? {
        bail!(
            "Installation already initialized. Root password was written to: {}",
            password_file.display()
        );
    }

    let hasher = CredentialHasher::new()?;
    let password = generate_secret();
    let ttl_days = config.auth.credential_ttl_days;
    bootstrap(&store, |root_id| {
        password_credential(&hasher, root_id, &password, ttl_days)
    })?;

    fs::write(&password_file, &password)?;

    #[cfg(unix)]
    set_restrictive_permissions(&password_file);

    println!();
    println!("========================================");
    println!("Password for '{ROOT_UID}' (save this, it won't be shown again):");
    println!();
    println!("  {password}");
    println!();
    println!("Password also written to: {}", password_file.display());
    println!("========================================");
    println!();

    Ok(())
}

async fn run_serve(config: SomaConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    if !is_bootstrapped(&store)? {
        bail!("Installation not initialized. Run 'soma admin init' first.");
    }

    let addr = config.socket_addr()?;
    let state = AppState::start(config, Arc::new(store)).await?;
    state.reaper.watch_signals();

    let app = create_router(state.clone());
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let reaper = state.reaper.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { reaper.reaped().await })
        .await?;

    state.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init { config } => {
                let config = SomaConfig::load(&config)?;
                init_logging(&config.log)?;
                run_init(&config)?;
            }
        },
        Commands::Serve { config } => {
            let config = SomaConfig::load(&config)?;
            init_logging(&config.log)?;
            run_serve(config).await?;
        }
    }

    Ok(())
}
