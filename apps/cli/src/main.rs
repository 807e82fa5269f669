//! Command-line front end for the mod index aggregator

use aggregator::{
    CancellationToken, FetchConfig, Pipeline, PipelineError, PipelineEvent, ProgressEvent,
    SourceKind, Store, TotalRecord,
};
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "aggregator", about = "Aggregate KSP mod listings from SpaceDock, Curse and CKAN")]
struct Cli {
    /// Directory for the database and cache snapshots.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh one source (or all of them) and rebuild the merged view.
    Fetch {
        source: SourceArg,
        /// Use the cache snapshot from a previous run instead of the network.
        #[arg(long)]
        offline: bool,
    },
    /// Show per-source record counts and the size of the merged view.
    Status,
    /// Export the merged view as CSV (or TSV) to stdout.
    Export {
        #[arg(long)]
        tsv: bool,
        /// Case-insensitive substring filter on the mod name.
        #[arg(long)]
        filter: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    Spacedock,
    Curse,
    Ckan,
    All,
}

impl SourceArg {
    fn kinds(self) -> Vec<SourceKind> {
        match self {
            SourceArg::Spacedock => vec![SourceKind::SpaceDock],
            SourceArg::Curse => vec![SourceKind::Curse],
            SourceArg::Ckan => vec![SourceKind::Ckan],
            SourceArg::All => SourceKind::ALL.to_vec(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<PipelineError>()
                .map(PipelineError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code.clamp(1, 255) as u8)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = FetchConfig::default().with_data_dir(&cli.data_dir);
    std::fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("creating data directory {}", cli.data_dir.display()))?;
    let store = Store::connect(cli.data_dir.join("database.db")).await?;

    match cli.command {
        Command::Fetch { source, offline } => fetch(store, config, source, offline).await,
        Command::Status => status(store).await,
        Command::Export { tsv, filter } => export(store, tsv, filter.as_deref()).await,
    }
}

async fn fetch(
    store: Store,
    config: FetchConfig,
    source: SourceArg,
    offline: bool,
) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::new(store, config)?);
    let progress = Arc::new(|event: ProgressEvent| {
        if let (Some(source), Some(percent)) = (event.source(), event.percent()) {
            debug!("{source}: {percent}%");
        }
    });

    if offline {
        for kind in source.kinds() {
            let outcome = pipeline.refresh_offline(kind, progress.clone()).await?;
            println!("{kind}: {outcome:?}");
        }
        return Ok(());
    }

    // Ctrl-C flips the shared token; running fetches stop before their next
    // request and leave previously persisted data alone.
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("cancelling...");
                cancel.cancel();
            }
        }
    });

    let mut events = pipeline.refresh_all(source.kinds(), cancel, progress);
    let mut first_failure: Option<PipelineError> = None;
    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Started { source } => println!("{source}: refreshing..."),
            PipelineEvent::Finished { source, records } => {
                println!("{source}: done, {records} records")
            }
            PipelineEvent::Cancelled { source } => println!("{source}: cancelled"),
            PipelineEvent::Failed { source, error } => {
                eprintln!("{source}: failed: {error}");
                first_failure.get_or_insert(error);
            }
        }
    }

    match first_failure {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

async fn status(store: Store) -> anyhow::Result<()> {
    for kind in SourceKind::ALL {
        println!("{:<10} {:>6} records", kind.label(), store.count(kind).await?);
    }
    println!("{:<10} {:>6} records", "Total", store.count_total().await?);
    Ok(())
}

async fn export(store: Store, tsv: bool, filter: Option<&str>) -> anyhow::Result<()> {
    let rows = store.query_total(filter).await?;
    let delimiter = if tsv { '\t' } else { ',' };

    let mut header: Vec<String> = vec!["Mod".to_string()];
    header.extend(SourceKind::ALL.iter().map(|kind| kind.label().to_string()));
    header.push("Source".to_string());
    header.push("Homepage".to_string());
    println!("{}", join_row(&header, delimiter));

    for row in &rows {
        println!("{}", join_row(&export_fields(row), delimiter));
    }
    Ok(())
}

fn export_fields(row: &TotalRecord) -> Vec<String> {
    let mut fields = vec![row.name.clone()];
    for kind in SourceKind::ALL {
        let cell = match row.compatibility.get(&kind) {
            Some(version) => format!("OK ({version})"),
            None => "Not available".to_string(),
        };
        fields.push(cell);
    }
    fields.push(row.source_url.clone().unwrap_or_default());
    fields.push(row.homepage_url.clone().unwrap_or_default());
    fields
}

fn join_row(fields: &[String], delimiter: char) -> String {
    fields
        .iter()
        .map(|field| quote_field(field, delimiter))
        .collect::<Vec<_>>()
        .join(&delimiter.to_string())
}

/// Minimal CSV quoting: wrap when the field contains the delimiter, a quote
/// or a newline, doubling embedded quotes.
fn quote_field(field: &str, delimiter: char) -> String {
    if field.contains(delimiter) || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_only_touches_fields_that_need_it() {
        assert_eq!(quote_field("plain", ','), "plain");
        assert_eq!(quote_field("a,b", ','), "\"a,b\"");
        assert_eq!(quote_field("say \"hi\"", ','), "\"say \"\"hi\"\"\"");
        assert_eq!(quote_field("a,b", '\t'), "a,b");
    }

    #[test]
    fn all_selects_every_source() {
        assert_eq!(SourceArg::All.kinds(), SourceKind::ALL.to_vec());
        assert_eq!(SourceArg::Ckan.kinds(), vec![SourceKind::Ckan]);
    }
}
