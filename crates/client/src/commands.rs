//! Interactive shell commands.
//!
//! A line is parsed into a [`Command`] and executed by a [`Shell`], which
//! owns the API client, the cached tree and the background refresher.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

use crate::api::StorageClient;
use crate::browser::RemoteBrowser;
use crate::error::{ClientError, Result};
use crate::refresh::{TokenRefresher, DEFAULT_REFRESH_MARGIN};
use crate::transfer::{download_file, upload_file, TransferOptions};

const PROGRESS_BAR_WIDTH: usize = 50;

pub const HELP: &str = "\
Commands:
  ls [dir]                      list a directory
  cd <dir>                      change directory (.., -, / supported)
  mkdir <path>                  create a directory
  rename <path> <new_name>      rename a file or directory
  move <path> <dest_dir>        move into another directory
  copy <path> <dest_dir>        copy into another directory
  delete <path>                 delete a file or directory
  upload <local_file> [dir]     upload into dir (default: current)
  download <path> [local_dir]   download into local_dir (default: .)
  refresh                       refresh the credential now
  logout                        end the session and exit
  help                          show this text";

/// Errors produced while parsing a command line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("not enough arguments for {0}")]
    NotEnoughArguments(&'static str),

    #[error("too many arguments for {0}")]
    TooManyArguments(&'static str),

    #[error("unknown command: {0}")]
    Unknown(String),
}

/// One parsed shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ls { path: String },
    Cd { path: String },
    Mkdir { path: String },
    Rename { path: String, new_name: String },
    Move { path: String, dest: String },
    Copy { path: String, dest: String },
    Delete { path: String },
    Upload { local: PathBuf, dest: Option<String> },
    Download { path: String, local_dir: Option<PathBuf> },
    Refresh,
    Logout,
    Help,
}

fn arity(
    name: &'static str,
    args: &[&str],
    min: usize,
    max: usize,
) -> std::result::Result<(), ParseError> {
    if args.len() < min {
        return Err(ParseError::NotEnoughArguments(name));
    }
    if args.len() > max {
        return Err(ParseError::TooManyArguments(name));
    }
    Ok(())
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();
        let arg = |i: usize| args[i].to_string();

        let command = match name {
            "ls" => {
                arity("ls", &args, 0, 1)?;
                Command::Ls {
                    path: args.first().map(|s| s.to_string()).unwrap_or_default(),
                }
            }
            "cd" => {
                arity("cd", &args, 1, 1)?;
                Command::Cd { path: arg(0) }
            }
            "mkdir" => {
                arity("mkdir", &args, 1, 1)?;
                Command::Mkdir { path: arg(0) }
            }
            "rename" => {
                arity("rename", &args, 2, 2)?;
                Command::Rename {
                    path: arg(0),
                    new_name: arg(1),
                }
            }
            "move" => {
                arity("move", &args, 2, 2)?;
                Command::Move {
                    path: arg(0),
                    dest: arg(1),
                }
            }
            "copy" => {
                arity("copy", &args, 2, 2)?;
                Command::Copy {
                    path: arg(0),
                    dest: arg(1),
                }
            }
            "delete" => {
                arity("delete", &args, 1, 1)?;
                Command::Delete { path: arg(0) }
            }
            "upload" => {
                arity("upload", &args, 1, 2)?;
                Command::Upload {
                    local: PathBuf::from(args[0]),
                    dest: args.get(1).map(|s| s.to_string()),
                }
            }
            "download" => {
                arity("download", &args, 1, 2)?;
                Command::Download {
                    path: arg(0),
                    local_dir: args.get(1).map(PathBuf::from),
                }
            }
            "refresh" => Command::Refresh,
            "logout" | "exit" | "quit" => Command::Logout,
            "help" | "?" => Command::Help,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// Whether the shell keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Renders `[#####     ] 50%` for `done` of `total`.
pub fn progress_bar(done: usize, total: usize, width: usize) -> String {
    let (filled, percent) = if total == 0 {
        (width, 100)
    } else {
        let done = done.min(total);
        (done * width / total, done * 100 / total)
    };
    format!(
        "[{}{}] {}%",
        "#".repeat(filled),
        " ".repeat(width - filled),
        percent
    )
}

fn print_progress(done: usize, total: usize) {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "\r{}", progress_bar(done, total, PROGRESS_BAR_WIDTH));
    let _ = stderr.flush();
}

/// Interactive session bound to one logged-in user.
pub struct Shell {
    client: StorageClient,
    browser: RemoteBrowser,
    user: String,
    options: TransferOptions,
    refresher: Option<TokenRefresher>,
}

impl Shell {
    pub fn new(client: StorageClient, user: &str, options: TransferOptions) -> Self {
        Self {
            client,
            browser: RemoteBrowser::default(),
            user: user.to_string(),
            options,
            refresher: None,
        }
    }

    /// Starts the background refresher and loads the tree.
    pub async fn start(&mut self) -> Result<()> {
        self.refresher = Some(TokenRefresher::start(
            self.client.clone(),
            DEFAULT_REFRESH_MARGIN,
        ));
        self.sync().await
    }

    pub fn prompt(&self) -> String {
        self.browser.prompt(&self.user)
    }

    pub fn browser(&self) -> &RemoteBrowser {
        &self.browser
    }

    /// Reloads the tree from the server.
    pub async fn sync(&mut self) -> Result<()> {
        let tree = self.client.state().await?;
        self.browser.set_tree(tree);
        Ok(())
    }

    /// Refreshes the tree after a mutation; failure only warns.
    async fn resync(&mut self) {
        if let Err(e) = self.sync().await {
            warn!("Unable to update file system state: {}", e);
        }
    }

    /// Executes one command, printing its output to stdout.
    pub async fn execute(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Ls { path } => {
                for line in self.browser.ls(&path)? {
                    println!("{line}");
                }
            }
            Command::Cd { path } => {
                self.browser.cd(&path)?;
            }
            Command::Mkdir { path } => {
                let (location, name) = self.browser.resolve_entry(&path)?;
                let response = self.client.mkdir(&location, &name).await?;
                println!("{}", response.message);
                self.resync().await;
            }
            Command::Rename { path, new_name } => {
                let (location, name) = self.browser.resolve_entry(&path)?;
                let response = self.client.rename(&location, &name, &new_name).await?;
                println!("{}", response.message);
                self.resync().await;
            }
            Command::Move { path, dest } => {
                let (location, name) = self.browser.resolve_entry(&path)?;
                let dest = self.browser.resolve_dir(&dest)?;
                let response = self.client.move_entry(&location, &name, &dest).await?;
                println!("{}", response.message);
                self.resync().await;
            }
            Command::Copy { path, dest } => {
                let (location, name) = self.browser.resolve_entry(&path)?;
                let dest = self.browser.resolve_dir(&dest)?;
                let response = self.client.copy(&location, &name, &dest).await?;
                println!("{}", response.message);
                self.resync().await;
            }
            Command::Delete { path } => {
                let (location, name) = self.browser.resolve_entry(&path)?;
                let response = self.client.delete(&location, &name).await?;
                println!("{}", response.message);
                self.resync().await;
            }
            Command::Upload { local, dest } => {
                let name = local_file_name(&local)?;
                let location = match dest {
                    Some(dest) => self.browser.resolve_dir(&dest)?,
                    None => self.browser.current_path(),
                };
                let message = upload_file(
                    &self.client,
                    &local,
                    &location,
                    &name,
                    &self.options,
                    print_progress,
                )
                .await?;
                eprintln!();
                println!("{message}");
                self.resync().await;
            }
            Command::Download { path, local_dir } => {
                let (location, name) = self.browser.resolve_entry(&path)?;
                let local_dir = local_dir.unwrap_or_else(|| PathBuf::from("."));
                let written = download_file(
                    &self.client,
                    &location,
                    &name,
                    &local_dir,
                    &self.options,
                    print_progress,
                )
                .await?;
                eprintln!();
                println!("downloaded successfully to {}", written.display());
            }
            Command::Refresh => {
                let session = self.client.refresh().await?;
                println!("credential refreshed, expires at {}", session.expires_at);
            }
            Command::Logout => {
                self.stop().await;
                let response = self.client.logout().await?;
                println!("{}", response.message);
                return Ok(Flow::Exit);
            }
            Command::Help => println!("{HELP}"),
        }
        Ok(Flow::Continue)
    }

    /// Stops the background refresher.
    pub async fn stop(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.stop().await;
        }
    }
}

fn local_file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} does not name a file", path.display()),
            ))
        })
}
