//! Remote Storage Client
//!
//! Interactive shell for a remote storage server.

use std::io::Write;

use clap::Parser;
use client::{ClientError, Command, Flow, Shell, StorageClient, TransferOptions};
use protocol::ErrorKind;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

/// Remote storage client - browse and transfer files interactively.
#[derive(Parser, Debug)]
#[command(name = "remote-storage")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Server base URL
    #[arg(long, env = "REMOTE_STORAGE_URL", default_value = "http://localhost:8080")]
    pub url: String,

    /// Login name (prompted when omitted)
    #[arg(short, long, env = "REMOTE_STORAGE_USER")]
    pub user: Option<String>,

    /// Upload chunk size in bytes
    #[arg(long, default_value_t = client::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Complete/resend rounds before an upload is abandoned
    #[arg(long, default_value = "16")]
    pub max_complete_rounds: usize,

    /// Attempts per download chunk
    #[arg(long, default_value = "5")]
    pub max_chunk_retries: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

async fn read_line(lines: &mut Lines<BufReader<Stdin>>, prompt: &str) -> anyhow::Result<Option<String>> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?.map(|line| line.trim().to_string()))
}

/// Prompts until login succeeds. Returns the user name, or `None` on EOF.
async fn authenticate(
    client: &StorageClient,
    lines: &mut Lines<BufReader<Stdin>>,
    mut user: Option<String>,
) -> anyhow::Result<Option<String>> {
    loop {
        let name = match user.take() {
            Some(name) => name,
            None => match read_line(lines, "Enter your name: ").await? {
                Some(name) => name,
                None => return Ok(None),
            },
        };
        let Some(password) = read_line(lines, "Enter your password: ").await? else {
            return Ok(None);
        };

        match client.login(&name, &password).await {
            Ok(_) => {
                println!("Authenticated successfully");
                return Ok(Some(name));
            }
            Err(e) if e.kind() == Some(ErrorKind::WrongCredentials) => {
                println!("Authentication failed");
            }
            Err(ClientError::Http(e)) => {
                println!("Problem with server connection: {e}");
            }
            Err(e) => println!("Server error occurred: {e}"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let client = StorageClient::new(&cli.url)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let Some(user) = authenticate(&client, &mut lines, cli.user.clone()).await? else {
        return Ok(());
    };

    let options = TransferOptions {
        chunk_size: cli.chunk_size,
        max_complete_rounds: cli.max_complete_rounds,
        max_chunk_retries: cli.max_chunk_retries,
    };
    let mut shell = Shell::new(client, &user, options);
    if let Err(e) = shell.start().await {
        println!("Unable to load file system state: {e}");
    }

    while let Some(line) = read_line(&mut lines, &shell.prompt()).await? {
        if line.is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match shell.execute(command).await {
            Ok(Flow::Exit) => return Ok(()),
            Ok(Flow::Continue) => {}
            Err(e) => println!("{e}"),
        }
    }

    shell.stop().await;
    Ok(())
}
