//! Solr Reindex CLI
//!
//! Copies a query-defined subset of a SolrCloud collection into another
//! collection. Pedantic lints relaxed for CLI ergonomics.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use solr_reindex::pipeline::create_progress_bar;
use solr_reindex::{JobConfig, ReindexRequest, ReindexService};

#[derive(Parser)]
#[command(name = "solr-reindex")]
#[command(version)]
#[command(about = "Reindex a subset of a SolrCloud collection into another collection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Job configuration file (TOML)
    #[arg(long, value_name = "FILE", env = "REINDEX_JOB_CONFIG", default_value = solr_reindex::job::DEFAULT_JOB_CONFIG)]
    job_config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a reindex request file
    Run {
        /// Request file path (YAML)
        #[arg(short, long, value_name = "FILE")]
        request: PathBuf,

        /// Deadline for the whole run, in seconds
        #[arg(long, default_value_t = solr_reindex::job::DEFAULT_TIMEOUT_SECS)]
        timeout_secs: u64,
    },

    /// Validate a request file without contacting Solr
    Validate {
        /// Request file path (YAML)
        #[arg(short, long, value_name = "FILE")]
        request: PathBuf,
    },

    /// Generate an example request file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "request.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let job = match JobConfig::load_from_path(&cli.job_config).and_then(|job| {
        job.validate()?;
        Ok(job)
    }) {
        Ok(job) => job,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Setup logging: RUST_LOG wins over the job's log level
    let default_level = if cli.verbose { "debug" } else { job.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {e}");
        return ExitCode::FAILURE;
    }

    let outcome = match cli.command {
        Some(Commands::Run {
            request,
            timeout_secs,
        }) => run_request_file(&request, timeout_secs).await,
        Some(Commands::Validate { request }) => validate_request(&request),
        Some(Commands::Init { output }) => generate_request(&output),
        None => run_job(&job).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_job(job: &JobConfig) -> anyhow::Result<()> {
    let request = match job.load_request() {
        Ok(request) => request,
        Err(e) => {
            error!("Request validation failed: {}", e);
            anyhow::bail!("Request validation failed");
        }
    };
    run_reindex(&request, job.timeout()).await
}

async fn run_request_file(path: &Path, timeout_secs: u64) -> anyhow::Result<()> {
    info!("Loading request from {:?}", path);
    let request = ReindexRequest::from_file(path)?;
    let deadline = match timeout_secs {
        0 => Duration::from_secs(solr_reindex::job::DEFAULT_TIMEOUT_SECS),
        secs => Duration::from_secs(secs),
    };
    run_reindex(&request, deadline).await
}

async fn run_reindex(request: &ReindexRequest, deadline: Duration) -> anyhow::Result<()> {
    let mut service = ReindexService::new();
    if console::Term::stderr().is_term() {
        service = service.with_progress(create_progress_bar());
    }

    let result = service.reindex(request, deadline).await?;
    let stats = &result.stats;

    println!("\nReindex complete");
    println!("   Read:       {}", stats.docs_read);
    println!("   Indexed:    {}", stats.docs_indexed);
    println!("   Batches:    {}", stats.batches_sent);
    println!("   Retries:    {}", stats.retries);
    println!("   Duration:   {:.2}s", stats.elapsed.as_secs_f64());
    println!("   Throughput: {:.0} docs/sec", stats.throughput());
    println!(
        "   Strategy:   {}",
        if result.export_mode_used { "export" } else { "cursor" }
    );
    for warning in &result.warnings {
        println!("   Note:       {}", warning);
    }

    Ok(())
}

fn validate_request(path: &Path) -> anyhow::Result<()> {
    info!("Validating request from {:?}", path);

    let request = ReindexRequest::from_file(path)?;

    println!("Request is valid");
    println!(
        "   Source: {}/{}",
        request.source.cluster().base_url(),
        request.source.collection()
    );
    println!(
        "   Target: {}/{}",
        request.target.cluster().base_url(),
        request.target.collection()
    );
    println!("   Query:  {}", request.filters.query());
    if !request.filters.source_shards().is_empty() {
        println!("   Shards: {}", request.filters.source_shards().join(", "));
    }
    println!(
        "   Fields: {}",
        if request.fields.is_all() {
            "*".to_string()
        } else {
            request.fields.names().join(", ")
        }
    );

    Ok(())
}

fn generate_request(output: &Path) -> anyhow::Result<()> {
    std::fs::write(output, REQUEST_TEMPLATE)?;
    println!("Generated request: {:?}", output);
    println!("   Edit the file and run: solr-reindex run --request {:?}", output);
    Ok(())
}

const REQUEST_TEMPLATE: &str = r#"# Solr reindex request
source:
  cluster:
    base_url: http://localhost:8983/solr
    request_timeout_ms: 30000
    # basic_auth_user: reader
    # basic_auth_password: secret
  collection: source_collection

target:
  cluster:
    base_url: http://localhost:8983/solr
  collection: target_collection

filters:
  query: "*:*"
  fqs: []
  # Restrict to specific shards (default: all)
  # source_shards: [shard1, shard2]

# "*" copies every stored field (cursor paging).
# An explicit list whose fields all have docValues enables /export streaming.
fields: "*"

tuning:
  read_page_size: 500
  write_batch_size: 200
  read_concurrency: 1
  write_concurrency: 4
  max_in_flight_batches: 32
  request_timeout_ms: 30000
  retry_policy:
    max_retries: 3
    initial_backoff_ms: 250
    max_backoff_ms: 5000
    jitter_factor: 0.2
"#;
