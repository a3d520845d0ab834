//! quakesearch - Search the USGS earthquake catalog around a point.
//!
//! Runs one search from the terminal, prints the catalog request it would
//! send, or serves a map dashboard driven by the same search session.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info};

mod cli;
mod client;
mod coordinator;
mod errors;
mod geo;
mod models;
mod output;
mod query;
mod selection;
mod server;
mod session;
mod views;

use cli::{Cli, Command};
use client::CatalogClient;
use coordinator::{RequestStatus, Snapshot};
use errors::ValidationError;
use output::Format;
use query::{build_request, local_today};
use session::SessionConfig;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Search(args) => cmd_search(args),
        Command::Url(args) => cmd_url(&args),
        Command::Ui(args) => cmd_ui(args),
    }
}

/// Initialize tracing subscriber.
fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn validation_failure(errors: &[ValidationError]) -> anyhow::Error {
    let list = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    anyhow::anyhow!("invalid search parameters: {list}")
}

/// Execute the `search` command - one search through a session.
fn cmd_search(args: cli::SearchArgs) -> Result<()> {
    let client = CatalogClient::new(Duration::from_secs(args.timeout))
        .context("failed to create USGS client")?;

    let config = SessionConfig {
        base_url: args.query.base_url.clone(),
        slow_after: Duration::from_millis(args.slow_after_ms),
        rules: args.query.rules(),
        ..Default::default()
    };

    let snapshot = tokio::runtime::Runtime::new()
        .context("failed to create tokio runtime")?
        .block_on(search_once(client, args.query.params(), config))?;

    let result = snapshot.result.unwrap_or_default();
    let center = snapshot.last_searched;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.format == Format::Human {
        output::write_summary(&mut handle, result.len())?;
    }
    output::write_events(&mut handle, &result.events, center, args.format)?;
    if args.histogram && args.format == Format::Human {
        writeln!(handle)?;
        output::write_histogram(&mut handle, &result.events)?;
    }
    Ok(())
}

/// Submit the form once and wait for the search to settle.
async fn search_once(
    client: CatalogClient,
    params: query::SearchParameters,
    config: SessionConfig,
) -> Result<Snapshot> {
    let (session, task) = session::spawn(Arc::new(client), params, config);

    let initial = session.snapshot();
    if !initial.validation.is_empty() {
        session.shutdown().await?;
        return Err(validation_failure(&initial.validation));
    }

    session.submit().await?;

    let mut announced = false;
    let settled = session
        .wait_for(|s| {
            if s.slow_load && !announced {
                eprintln!("Gathering data...");
                announced = true;
            }
            s.status == RequestStatus::Succeeded
                || (s.status == RequestStatus::Idle && s.notice.is_some())
        })
        .await
        .context("search session stopped unexpectedly")?;

    session.shutdown().await?;
    task.await.context("search session panicked")?;

    if let Some(notice) = &settled.notice {
        bail!("{notice}");
    }
    info!(
        "search returned {} events",
        settled.result.as_ref().map_or(0, models::SearchResult::len)
    );
    Ok(settled)
}

/// Execute the `url` command - print the catalog request for the form.
fn cmd_url(args: &cli::QueryArgs) -> Result<()> {
    let search = args
        .params()
        .resolve(local_today(), args.rules())
        .map_err(|errors| validation_failure(&errors))?;

    println!("{}", build_request(&search, &args.base_url));
    Ok(())
}

/// Execute the `ui` command - start web server.
fn cmd_ui(args: cli::UiArgs) -> Result<()> {
    let config = server::ServerConfig {
        port: args.port,
        host: args.host.clone(),
        base_url: args.query.base_url.clone(),
        timeout: Duration::from_secs(args.timeout),
        slow_after: Duration::from_millis(args.slow_after_ms),
        rules: args.query.rules(),
        params: args.query.params(),
    };

    // Print startup message
    let url = format!("http://{}:{}", args.host, args.port);
    println!("\x1b[1m🌍 quakesearch\x1b[0m");
    println!("\x1b[2m───────────────────────────────────────\x1b[0m");
    println!("  Local:    \x1b[96m{url}\x1b[0m");
    println!("  Catalog:  {}", args.query.base_url);
    println!("\x1b[2m───────────────────────────────────────\x1b[0m");
    println!("\x1b[2mPress Ctrl+C to stop\x1b[0m\n");

    // Open browser if requested (using xdg-open/open command)
    if args.open {
        #[cfg(target_os = "linux")]
        let _ = std::process::Command::new("xdg-open").arg(&url).spawn();
        #[cfg(target_os = "macos")]
        let _ = std::process::Command::new("open").arg(&url).spawn();
        #[cfg(target_os = "windows")]
        let _ = std::process::Command::new("cmd").args(["/c", "start", &url]).spawn();
    }

    tokio::runtime::Runtime::new()
        .context("failed to create tokio runtime")?
        .block_on(server::run_server(config))
}
