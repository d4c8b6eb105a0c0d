mod config;
mod repl;
mod server;

use chrono::Utc;
use clap::{Parser, Subcommand};
use config::Settings;
use docchat_core::{DocumentLoader, UploadedFile};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docchat", version, about = "Chat with your PDF and DOCX documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat in the terminal.
    Chat {
        /// PDF or DOCX file to upload before the first question.
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        /// Folder scanned recursively for PDF and DOCX files.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Upload files, ask a single question and print the answer.
    Ask {
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        question: String,
        /// Print the retrieved chunks used as context.
        #[arg(long, default_value_t = false)]
        show_sources: bool,
    },
    /// Serve the HTTP API with one session per client.
    Serve {
        #[arg(long, env = "DOCCHAT_BIND", default_value = "127.0.0.1:8501")]
        bind: SocketAddr,
        /// Sessions without requests for this long are closed and their files removed.
        #[arg(long, env = "DOCCHAT_SESSION_IDLE_SECS", default_value_t = 1800)]
        session_idle_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let factory = cli.settings.session_factory()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        model = %cli.settings.model,
        started_at = %Utc::now().to_rfc3339(),
        "docchat boot"
    );

    match cli.command {
        Command::Chat { files, dir } => {
            let uploads = read_uploads(&files, dir.as_deref()).await?;
            repl::run(factory.shared(), uploads).await?;
        }
        Command::Ask {
            files,
            dir,
            question,
            show_sources,
        } => {
            let uploads = read_uploads(&files, dir.as_deref()).await?;
            let mut session = factory.shared();
            session.upload(uploads).await?;
            let answer = session.ask(&question).await?;

            println!("{}", answer.text);
            if show_sources {
                for hit in &answer.sources {
                    println!(
                        "[{} #{}] distance={:.4}\n{}",
                        hit.chunk.file_name, hit.chunk.chunk_index, hit.distance, hit.chunk.text
                    );
                }
            }
        }
        Command::Serve {
            bind,
            session_idle_secs,
        } => {
            server::serve(bind, factory, Duration::from_secs(session_idle_secs)).await?;
        }
    }

    Ok(())
}

/// Reads the given files, plus every supported file under `dir`, as uploads.
pub(crate) async fn read_uploads(
    files: &[PathBuf],
    dir: Option<&Path>,
) -> anyhow::Result<Vec<UploadedFile>> {
    let mut paths = files.to_vec();
    if let Some(dir) = dir {
        paths.extend(DocumentLoader::default().discover(dir));
    }

    let mut uploads = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow::anyhow!("path has no file name: {}", path.display()))?
            .to_string();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|error| anyhow::anyhow!("{}: {error}", path.display()))?;
        uploads.push(UploadedFile::new(name, bytes));
    }

    Ok(uploads)
}
