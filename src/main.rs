use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use velvron_catalog::{
    aggregator::Aggregation,
    api,
    catalog::{BrowseState, Catalog, ViewMode},
    config::CatalogConfig,
    render,
    sandbox::{ArtifactRegistry, ProcessBackend, SandboxManager},
    scanner,
};

#[derive(Parser)]
#[command(name = "velvron")]
#[command(about = "Browse, serve, and preview a library of self-contained UI components")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the content root and write the component index
    Scan {
        /// Content root to scan
        #[arg(long)]
        root: Option<PathBuf>,

        /// Where to write the index
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also require each manifest to be complete and to name its directory
        #[arg(long)]
        strict: bool,
    },
    /// Serve the catalog over HTTP
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,

        /// Aggregate from another catalog server instead of the local library
        #[arg(long)]
        source_url: Option<String>,
    },
    /// Search the catalog
    Search {
        /// Text matched against name, description, and tags
        #[arg(default_value = "")]
        query: String,

        /// Only show components carrying exactly this tag
        #[arg(short, long)]
        tag: Option<String>,

        #[arg(long, default_value = "1")]
        page: usize,

        #[arg(long)]
        page_size: Option<usize>,

        /// One entry per line with details, instead of a grid of names
        #[arg(short, long)]
        list: bool,

        #[arg(long)]
        json: bool,
    },
    /// Show one component's manifest
    Show {
        name: String,

        #[arg(long)]
        json: bool,
    },
    /// List every tag in the catalog
    Tags,
    /// Run a component's demo in an isolated process and print its output
    Preview {
        name: String,

        /// Runner program and arguments; the demo path is appended
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        runner: Option<Vec<String>>,

        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

/// Initialize tracing. Logs always go to stderr so command output on stdout
/// stays machine readable.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "velvron_catalog=info,velvron=info,tower_http=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = CatalogConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve {
        port: None,
        host: None,
        source_url: None,
    }) {
        Commands::Scan {
            root,
            output,
            strict,
        } => {
            let root = root.unwrap_or_else(|| config.content_root.clone());
            let output = output.unwrap_or_else(|| config.index_path.clone());
            scanner::scan_and_write(&root, &output, &config.scan_options(strict))
                .await
                .with_context(|| format!("scan of {} failed", root.display()))?;
        }
        Commands::Serve {
            port,
            host,
            source_url,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if source_url.is_some() {
                config.source_url = source_url;
            }
            serve(config).await?;
        }
        Commands::Search {
            query,
            tag,
            page,
            page_size,
            list,
            json,
        } => {
            let catalog = load_catalog(&config).await?;
            let page_size = page_size
                .and_then(std::num::NonZeroUsize::new)
                .unwrap_or(config.page_size());
            let mode = if list { ViewMode::List } else { ViewMode::Grid };
            let state = BrowseState::new(page_size)
                .with_search(query)
                .with_tag(tag.as_deref())
                .with_page(page)
                .with_view_mode(mode);

            let view = state.view(&catalog);
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print!("{}", render::render_page(&view, state.view_mode()));
            }
        }
        Commands::Show { name, json } => {
            let catalog = load_catalog(&config).await?;
            let manifest = catalog.lookup(&name)?;
            if json {
                println!("{}", serde_json::to_string_pretty(manifest)?);
            } else {
                print!("{}", render::render_manifest(manifest));
            }
        }
        Commands::Tags => {
            let catalog = load_catalog(&config).await?;
            for tag in catalog.tags() {
                println!("{}", tag);
            }
        }
        Commands::Preview {
            name,
            runner,
            timeout_secs,
        } => {
            if let Some(runner) = runner {
                config.sandbox.runner = runner;
            }
            if let Some(secs) = timeout_secs {
                config.sandbox.timeout_secs = secs;
            }
            preview(&config, &name).await?;
        }
    }

    Ok(())
}

async fn load_catalog(config: &CatalogConfig) -> anyhow::Result<Catalog> {
    let aggregation = config.aggregator().load_session().await?;
    Ok(aggregation.catalog)
}

async fn serve(config: CatalogConfig) -> anyhow::Result<()> {
    // The gallery stays up with an empty catalog when the index is missing.
    let aggregation = match config.aggregator().load_session().await {
        Ok(aggregation) => aggregation,
        Err(e) => {
            tracing::error!("Failed to load components: {}", e);
            Aggregation::default()
        }
    };

    let state = api::AppState::new(aggregation, &config);
    let sandboxes = state.sandboxes.clone();
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                config.server.host, config.server.port
            )
        })?;
    tracing::info!(
        "Velvron catalog listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sandboxes.close_all().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn preview(config: &CatalogConfig, name: &str) -> anyhow::Result<()> {
    let catalog = load_catalog(config).await?;
    let registry = ArtifactRegistry::from_catalog(&catalog, &config.content_root, &config.demo_file);
    let manager = SandboxManager::new(
        registry,
        Arc::new(ProcessBackend::new(config.sandbox.runner.clone())),
        config.sandbox_policy(),
    );

    let rendered = manager.render(name).await?;
    print!("{}", rendered.body);
    if rendered.truncated {
        tracing::warn!(
            "Output truncated at {} bytes",
            config.sandbox.max_output_bytes
        );
    }
    Ok(())
}
