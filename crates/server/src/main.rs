//! Remote Storage Server
//!
//! Serves tenant-scoped file storage over HTTP and manages the user directory.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use server::auth::{self, SqliteUserDirectory, TenantRecord};
use server::{build_state, gateway, Config};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Remote storage server - multi-tenant file storage over HTTP.
#[derive(Parser, Debug)]
#[command(name = "remote-storage-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `start`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for the server.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start serving requests
    Start {
        /// Override the configured listen address
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Manage the user directory
    #[command(subcommand)]
    User(UserCommands),
}

/// Subcommands for user management.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommands {
    /// Add a user; the password is read from stdin
    Add {
        /// Login name
        name: String,

        /// Root directory relative to the storage root (defaults to the name;
        /// `/` gives the user the whole storage root)
        #[arg(long)]
        root: Option<String>,
    },

    /// Remove a user
    Remove {
        /// Login name
        name: String,
    },

    /// List all users
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();

    let filter = if cli.verbose {
        "debug"
    } else {
        config.server.log_level.as_str()
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    match cli.command.unwrap_or(Commands::Start { bind: None }) {
        Commands::Start { bind } => {
            if let Some(bind) = bind {
                config.server.bind_addr = bind;
            }
            config.validate()?;
            run_server(config).await?;
        }
        Commands::User(command) => {
            config.validate()?;
            run_user_command(&config, command)?;
        }
    }

    Ok(())
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("Remote storage server starting...");

    let storage_root = config.storage_root();
    std::fs::create_dir_all(&storage_root)
        .with_context(|| format!("failed to create storage root {:?}", storage_root))?;

    let users = Arc::new(SqliteUserDirectory::open(config.users_db_path())?);
    let key = auth::load_or_generate_key(&config.key_path())?;
    tracing::info!("Service key: {}", key.fingerprint());

    let state = build_state(&config, users, key);
    let sessions = Arc::clone(&state.sessions);
    let shutdown = CancellationToken::new();

    let cleanup = sessions.start_cleanup_task(
        config.cleanup_interval(),
        config.idle_timeout(),
        shutdown.clone(),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
        }
        signal.cancel();
    });

    gateway::serve(listener, gateway::router(state), shutdown.clone()).await?;

    shutdown.cancel();
    if let Some(handle) = cleanup {
        let _ = handle.await;
    }
    sessions.close_all();
    tracing::info!("Remote storage server stopped");
    Ok(())
}

fn run_user_command(config: &Config, command: UserCommands) -> anyhow::Result<()> {
    let users = SqliteUserDirectory::open(config.users_db_path())?;

    match command {
        UserCommands::Add { name, root } => {
            let root = auth::tenant_root_for(&name, root.as_deref())?;
            let password = read_password()?;
            if password.is_empty() {
                anyhow::bail!("Password must not be empty");
            }

            let record = TenantRecord::new(&name, &root, &password);
            let tenant_dir = protocol::path::normalize(&record.root_directory)?
                .iter()
                .fold(config.storage_root(), |path, segment| path.join(segment));
            std::fs::create_dir_all(&tenant_dir)
                .with_context(|| format!("failed to create tenant root {:?}", tenant_dir))?;

            users.add_user(&record)?;
            println!("Added user {} (root: {})", record.identity, record.root_directory);
        }
        UserCommands::Remove { name } => {
            if users.remove_user(&name)? {
                println!("Removed user {}", name);
            } else {
                println!("No such user: {}", name);
            }
        }
        UserCommands::List => {
            let records = users.list_users()?;
            if records.is_empty() {
                println!("No users.");
                return Ok(());
            }

            println!("{:<24} ROOT", "NAME");
            println!("{}", "-".repeat(48));
            for record in records {
                println!("{:<24} {}", record.identity, record.root_directory);
            }
        }
    }

    Ok(())
}

/// Reads one line from stdin, without the trailing newline.
fn read_password() -> anyhow::Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
