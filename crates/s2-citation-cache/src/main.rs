//! Semantic Scholar Citation Cache - Entry Point
//!
//! Builds the dump index, resolves papers and filters cached records.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures::{StreamExt, pin_mut};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use s2_citation_cache::{CitationCache, Config, Filter, ResolveOptions};

#[derive(Parser, Debug)]
#[command(name = "s2cache")]
#[command(about = "Local citation cache for the Semantic Scholar Graph API")]
#[command(version)]
struct Cli {
    /// Semantic Scholar API key (optional, enables higher rate limits)
    #[arg(long, env = "SEMANTIC_SCHOLAR_API_KEY")]
    api_key: Option<String>,

    /// Directory holding the record store and dump index
    #[arg(long, env = "S2CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Directory holding citation dump shards
    #[arg(long, env = "S2CACHE_DUMP_DIR")]
    dump_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the citation dump index and make it active
    BuildIndex {
        /// Shard files or directories (defaults to --dump-dir)
        paths: Vec<PathBuf>,
    },
    /// Resolve a paper and print its record as JSON
    Paper {
        /// Paper ID (S2 ID, CorpusId:<n>, DOI:<doi>, ...)
        paper_id: String,

        /// Refetch even if the cached record is fresh
        #[arg(long)]
        force: bool,

        /// Skip the dump index for capped edge lists
        #[arg(long)]
        no_dump: bool,

        /// Citations to print
        #[arg(long)]
        max_citations: Option<usize>,

        /// References to print
        #[arg(long)]
        max_references: Option<usize>,
    },
    /// Print cached records matching a filter as JSON lines
    Filter {
        /// Filter predicates as a JSON array
        #[arg(long)]
        filter: String,

        /// Paper IDs to test
        paper_ids: Vec<String>,
    },
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Records go to stdout; logs stay on stderr.
    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Semantic Scholar citation cache");

    let mut config = Config::new(cli.api_key, cli.cache_dir);
    config.dump_dir = cli.dump_dir;
    let cache = CitationCache::open(config).await?;

    match cli.command {
        Command::BuildIndex { paths } => {
            let paths = if paths.is_empty() {
                let dump_dir = cache.config().dump_dir.clone();
                vec![dump_dir.ok_or_else(|| anyhow::anyhow!("no dump paths given and no --dump-dir set"))?]
            } else {
                paths
            };
            let (handle, report) = cache.rebuild_dump_index(&paths).await?;
            for sample in &report.samples {
                tracing::warn!(error = %sample, "Skipped malformed dump record");
            }
            tracing::info!(
                version = handle.version(),
                shards = report.shards,
                edges = report.edges,
                malformed = report.malformed,
                reused = report.reused,
                "Dump index ready"
            );
        }
        Command::Paper { paper_id, force, no_dump, max_citations, max_references } => {
            let options = ResolveOptions {
                force,
                use_dump: !no_dump,
                max_citations,
                max_references,
                ..ResolveOptions::default()
            };
            match cache.get_paper_details(&paper_id, &options).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => anyhow::bail!("paper not found: {paper_id}"),
            }
        }
        Command::Filter { filter, paper_ids } => {
            let filter = Filter::from_json(&filter)?;
            let matches = cache.filter_papers(paper_ids, &filter);
            pin_mut!(matches);
            while let Some(record) = matches.next().await {
                println!("{}", serde_json::to_string(&record?)?);
            }
        }
    }

    cache.close();
    Ok(())
}
