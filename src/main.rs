use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use cxxsense::analyzer::{AnalyzeDone, AnalyzeRequest, Finding};
use cxxsense::cache::{CacheConfig, TuCache};
use cxxsense::diagnostics::{self, DiagnosticFilter};
use cxxsense::editor::{LogUi, MainThread};
use cxxsense::server::{self, state::AppState};
use cxxsense::settings::{PathContext, Settings};
use cxxsense::workspace::views::View;

#[derive(Parser)]
#[command(name = "cxxsense", about = "C/C++/Objective-C completion, goto and diagnostics server")]
struct Cli {
    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start the server the editor talks to
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Bind address
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,

        /// Settings file (JSON)
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Workspace folder; may be given more than once
        #[arg(long = "folder")]
        folders: Vec<PathBuf>,

        /// Bundled include directory prepended to every file's options
        #[arg(long)]
        clang_includes: Option<PathBuf>,

        /// Delay before the parse workers start, in milliseconds
        #[arg(long, default_value = "500")]
        startup_delay_ms: u64,
    },
    /// Parse one file and print its diagnostics
    Check {
        file: PathBuf,

        /// Settings file (JSON)
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Run the static analyzer and print its findings
    Analyze {
        /// File to analyze, or a folder with --project
        path: PathBuf,

        /// Analyze every file under the folder with an analyzer extension
        #[arg(long)]
        project: bool,

        /// Settings file (JSON)
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => Settings::load(path).with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("cxxsense v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            bind,
            settings,
            folders,
            clang_includes,
            startup_delay_ms,
        } => {
            let settings = load_settings(settings.as_deref())?;
            let config = CacheConfig {
                workers: settings.worker_threadcount,
                startup_delay: Duration::from_millis(startup_delay_ms),
                clang_includes,
                ..CacheConfig::default()
            };
            run_server(settings, folders, config, port, bind).await?;
        }
        Commands::Check { file, settings } => {
            let settings = load_settings(settings.as_deref())?;
            tokio::task::spawn_blocking(move || check(&file, settings)).await??;
        }
        Commands::Analyze {
            path,
            project,
            settings,
        } => {
            let settings = load_settings(settings.as_deref())?;
            tokio::task::spawn_blocking(move || analyze(&path, project, settings)).await??;
        }
    }

    Ok(())
}

async fn run_server(
    settings: Settings,
    folders: Vec<PathBuf>,
    config: CacheConfig,
    port: u16,
    bind: String,
) -> anyhow::Result<()> {
    let folders = folders
        .iter()
        .map(|f| f.canonicalize().with_context(|| format!("Folder not accessible: {}", f.display())))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let (state, _editor) = AppState::new(settings, folders.clone(), config);
    let app = server::build_router(state.clone());

    let addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("cxxsense listening on http://{} ({} folders)", addr, folders.len());

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down, dropping {} cached translation units", shutdown_state.cache().len());
            shutdown_state.cache().clear();
        })
        .await?;

    Ok(())
}

/// Parses `file` once and prints its diagnostics.
fn check(file: &Path, settings: Settings) -> anyhow::Result<()> {
    let file = file
        .canonicalize()
        .with_context(|| format!("File not accessible: {}", file.display()))?;
    let folders: Vec<PathBuf> = file.parent().map(Path::to_path_buf).into_iter().collect();

    let (main, _editor) = MainThread::spawn(Arc::new(LogUi));
    let cache = TuCache::new(
        CacheConfig {
            workers: 1,
            startup_delay: Duration::ZERO,
            ..CacheConfig::default()
        },
        main,
    );
    let view = View::new(&file, None, settings, folders);
    let entry = cache
        .get_for_view(&view)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let filter = DiagnosticFilter::from_settings(&view.settings, &view.paths);
    let report = {
        let state = entry.lock();
        diagnostics::group(state.tu.diagnostics(), &filter)
    };
    for line in report.lines() {
        println!("{}", line);
    }
    println!(
        "{}: {} errors, {} warnings",
        file.display(),
        report.error_count(),
        report.warning_count()
    );
    Ok(())
}

/// Runs the analyzer over `path` and prints what it found.
fn analyze(path: &Path, project: bool, settings: Settings) -> anyhow::Result<()> {
    let path = path
        .canonicalize()
        .with_context(|| format!("Path not accessible: {}", path.display()))?;
    let (main, _editor) = MainThread::spawn(Arc::new(LogUi));
    let cache = TuCache::new(
        CacheConfig {
            workers: settings.worker_threadcount,
            startup_delay: Duration::ZERO,
            ..CacheConfig::default()
        },
        main,
    );

    let (tx, rx) = crossbeam::channel::bounded(1);
    let on_done: AnalyzeDone = Box::new(move |findings: Vec<Finding>| {
        let _ = tx.send(findings);
    });
    if project {
        let paths = PathContext {
            folders: vec![path.clone()],
            this_file: None,
        };
        let files = cache.analyze_project(&settings, &paths, Some(on_done));
        info!("Analyzing {} files under {}", files, path.display());
    } else {
        let paths = PathContext {
            folders: path.parent().map(Path::to_path_buf).into_iter().collect(),
            this_file: Some(path.clone()),
        };
        cache.analyze_file(AnalyzeRequest::new(&settings, &paths, &path), Some(on_done));
    }

    let findings: Vec<Finding> = rx.recv().context("Analysis did not finish")?;
    for finding in &findings {
        println!("{}", finding);
    }
    println!("{}: {} findings", path.display(), findings.len());
    Ok(())
}
