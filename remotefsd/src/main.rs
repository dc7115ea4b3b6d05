use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use remotefs_core::{FileType, LoopbackStore, RequestState, paths};
use remotefsd::config::MirrorConfig;
use remotefsd::mirror::NodeRef;
use remotefsd::runtime::MirrorRuntime;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "remotefsd",
    version,
    about = "Browse and transfer files through a lazily loaded mirror of a remote store"
)]
struct Cli {
    /// Directory backing the store (overrides REMOTEFS_STORE_DIR)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Remote root folder name (overrides REMOTEFS_USER)
    #[arg(long, global = true)]
    user: Option<String>,

    /// Seconds to wait for an operation (overrides REMOTEFS_OP_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

// Remote paths are relative to the user's root folder.
#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Command {
    /// List a remote folder
    Ls {
        path: String,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a remote file
    Cat { path: String },
    /// Download a remote file
    Get { path: String, local_file: PathBuf },
    /// Upload a local file into a remote folder
    Put { local_file: PathBuf, remote_dir: String },
    /// Create a remote folder
    Mkdir { remote_dir: String, name: String },
    /// Delete a remote file or folder
    Rm { path: String },
    /// Move a remote entry to a new full path
    Mv { path: String, dest_path: String },
    /// Copy a remote entry to a new full path
    Cp { path: String, dest_path: String },
    /// Rename a remote entry in place
    Rename { path: String, new_name: String },
    /// Download a remote folder recursively
    Pull {
        remote_dir: String,
        local_parent: PathBuf,
    },
    /// Upload a local folder recursively
    Push {
        local_dir: PathBuf,
        remote_parent: String,
    },
    /// Compress a remote folder into an archive next to it
    Compress { remote_dir: String },
    /// Extract a remote archive next to it
    Extract { remote_file: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let mut config = MirrorConfig::from_env()?;
    if let Some(store) = cli.store {
        config.store_dir = store;
    }
    if let Some(user) = cli.user {
        config.user = user;
    }
    if let Some(secs) = cli.timeout.filter(|secs| *secs > 0) {
        config.op_timeout = Duration::from_secs(secs);
    }
    config.validate()?;

    let state = run(cli.command, &config).await?;
    Ok(if state.is_good() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("REMOTEFS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Command, config: &MirrorConfig) -> anyhow::Result<RequestState> {
    let user_dir = config.user_dir();
    tokio::fs::create_dir_all(&user_dir)
        .await
        .with_context(|| format!("failed to create store root at {user_dir:?}"))?;

    let root = config.root_path();
    let limit = config.op_timeout;
    let mut rt = MirrorRuntime::new(Arc::new(LoopbackStore::new(&config.store_dir)), &root);
    rt.load_root(limit)
        .await
        .context("failed to load the remote root")?;
    let remote = |arg: &str| remote_path(&root, arg);

    match command {
        Command::Ls { path, json } => {
            let folder = rt.locate(&remote(&path), true, limit).await?;
            let entries = if folder.kind() == FileType::Dir {
                rt.engine().children_of(&folder)
            } else {
                vec![folder]
            };
            print_listing(&entries, json)?;
            return Ok(RequestState::Good);
        }
        Command::Cat { path } => {
            let file = rt.locate(&remote(&path), false, limit).await?;
            let Some(bytes) = rt.engine().file_buffer(&file) else {
                bail!("{} is not a file", file.path());
            };
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
            return Ok(RequestState::Good);
        }
        Command::Get { path, local_file } => {
            let target = rt.find(&remote(&path), limit).await?;
            rt.engine_mut().download_file(&target, &local_file)?;
        }
        Command::Put {
            local_file,
            remote_dir,
        } => {
            let folder = rt.locate(&remote(&remote_dir), true, limit).await?;
            rt.engine_mut().upload_file(&folder, &local_file)?;
        }
        Command::Mkdir { remote_dir, name } => {
            let folder = rt.locate(&remote(&remote_dir), true, limit).await?;
            rt.engine_mut().mkdir(&folder, &name)?;
        }
        Command::Rm { path } => {
            let target = rt.find(&remote(&path), limit).await?;
            rt.engine_mut().delete_node(&target)?;
        }
        Command::Mv { path, dest_path } => {
            let target = rt.find(&remote(&path), limit).await?;
            rt.engine_mut().move_node(&target, &remote(&dest_path))?;
        }
        Command::Cp { path, dest_path } => {
            let target = rt.find(&remote(&path), limit).await?;
            rt.engine_mut().copy_node(&target, &remote(&dest_path))?;
        }
        Command::Rename { path, new_name } => {
            let target = rt.find(&remote(&path), limit).await?;
            rt.engine_mut().rename_node(&target, &new_name)?;
        }
        Command::Pull {
            remote_dir,
            local_parent,
        } => {
            let folder = rt.locate(&remote(&remote_dir), true, limit).await?;
            rt.engine_mut().download_folder(&folder, &local_parent)?;
        }
        Command::Push {
            local_dir,
            remote_parent,
        } => {
            let folder = rt.locate(&remote(&remote_parent), true, limit).await?;
            rt.engine_mut().upload_folder(&folder, &local_dir)?;
        }
        Command::Compress { remote_dir } => {
            let folder = rt.locate(&remote(&remote_dir), true, limit).await?;
            rt.engine_mut().compress_folder(&folder)?;
        }
        Command::Extract { remote_file } => {
            let target = rt.find(&remote(&remote_file), limit).await?;
            rt.engine_mut().decompress_file(&target)?;
        }
    }

    let finished = rt.wait_for_finish(limit).await?;
    if finished.state.is_good() {
        println!("{}", finished.message);
    } else {
        eprintln!("{}", finished.message);
    }
    Ok(finished.state)
}

fn remote_path(root: &str, arg: &str) -> String {
    let relative = paths::normalize(arg);
    if relative == "/" {
        root.to_string()
    } else {
        format!("{root}{relative}")
    }
}

fn print_listing(entries: &[NodeRef], as_json: bool) -> anyhow::Result<()> {
    if as_json {
        let rows: Vec<_> = entries
            .iter()
            .map(|entry| {
                json!({
                    "name": entry.name(),
                    "path": entry.path(),
                    "type": entry.kind(),
                    "size": entry.size(),
                    "modified": entry.modified(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for entry in entries {
        let marker = match entry.kind() {
            FileType::Dir => 'd',
            FileType::File => '-',
            FileType::Unknown => '?',
        };
        println!(
            "{marker} {:>10} {:<25} {}",
            entry.size(),
            format_modified(entry.modified()),
            entry.name()
        );
    }
    Ok(())
}

fn format_modified(modified: Option<i64>) -> String {
    modified
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .and_then(|stamp| stamp.format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["remotefsd", "ls", "docs", "--json", "--user", "bob"]).unwrap();
        assert_eq!(cli.user.as_deref(), Some("bob"));
        assert_eq!(
            cli.command,
            Command::Ls {
                path: "docs".into(),
                json: true
            }
        );
    }

    #[test]
    fn parses_push_arguments() {
        let cli = Cli::try_parse_from(["remotefsd", "--timeout", "5", "push", "./proj", "/"]).unwrap();
        assert_eq!(cli.timeout, Some(5));
        assert_eq!(
            cli.command,
            Command::Push {
                local_dir: PathBuf::from("./proj"),
                remote_parent: "/".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(Cli::try_parse_from(["remotefsd", "frobnicate"]).is_err());
    }

    #[test]
    fn maps_cli_paths_under_the_root() {
        assert_eq!(remote_path("/alice", "/"), "/alice");
        assert_eq!(remote_path("/alice", ""), "/alice");
        assert_eq!(remote_path("/alice", "docs/a.txt"), "/alice/docs/a.txt");
        assert_eq!(remote_path("/alice", "/docs//b/"), "/alice/docs/b");
    }

    #[test]
    fn formats_timestamps_as_rfc3339() {
        assert_eq!(format_modified(Some(0)), "1970-01-01T00:00:00Z");
        assert_eq!(format_modified(None), "-");
    }
}
