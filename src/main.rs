//! kbforge CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use kbforge::{
    commands::{
        cmd_backfill, cmd_enqueue, cmd_ingest_file, cmd_init, cmd_job, cmd_purge, cmd_query,
        cmd_reap, cmd_serve, cmd_status, print_backfill_report, print_enqueue_report,
        print_ingest_stats, print_init_report, print_job, print_purge_stats, print_query_results,
        print_reap_report, print_status, resolve_base_dir, ChatPageArgs, EnqueueTarget, Services,
        STATUS_JOB_LIMIT,
    },
    config::Config,
    enqueue::BackfillRequest,
    error::Result,
    meta::MetaDb,
    retrieve::RetrieveRequest,
    shutdown,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "kbforge")]
#[command(version, about = "Tenant-scoped knowledge ingestion and retrieval", long_about = None)]
struct Cli {
    /// Path to config file (or its directory)
    #[arg(short, long, global = true, env = "KBFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize kbforge configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Run the outbox relay, consumer workers and reaper until interrupted
    Serve,

    /// Reset events stuck in processing so they are redelivered
    Reap,

    /// Query a tenant's knowledge base
    Query {
        /// Tenant user id
        tenant: String,

        /// Question text
        question: String,

        /// Number of hits to request from the vector store
        #[arg(short = 'k', long, default_value = "0")]
        top_k: usize,

        /// Knowledge base type
        #[arg(long, default_value = "")]
        kb_type: String,

        /// Only search these source types
        #[arg(long = "source-type")]
        source_types: Vec<String>,

        /// Only search these source keys
        #[arg(long = "source-key")]
        source_keys: Vec<String>,

        /// Drop hits scoring below this
        #[arg(long)]
        min_score: Option<f32>,

        /// Maximum chunks to return (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_chunks: usize,

        /// Cumulative content budget in characters (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_chars: usize,

        /// Keep only the best hit per source
        #[arg(long)]
        dedupe: bool,
    },

    /// Ingest a JSON request file directly, bypassing the outbox
    Ingest {
        /// Path to the request JSON
        file: PathBuf,
    },

    /// Record an incremental event in the outbox
    Enqueue {
        #[command(subcommand)]
        target: EnqueueCommand,
    },

    /// Schedule a backfill job from the reader data
    Backfill {
        /// Tenant user id
        tenant: String,

        /// Only messages after this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long, default_value = "")]
        since: String,

        /// Only messages up to this time
        #[arg(long, default_value = "")]
        until: String,

        /// Messages per page (0 = maximum)
        #[arg(long, default_value = "0")]
        page_size: usize,

        /// Sessions to scan (0 = all)
        #[arg(long, default_value = "0")]
        max_sessions: usize,

        /// Pages per session (0 = all)
        #[arg(long, default_value = "0")]
        max_pages: usize,
    },

    /// Remove every chunk and vector of one source
    Purge {
        /// Tenant user id
        tenant: String,

        /// Source type (e.g. chat_private, contact_profile)
        source_type: String,

        /// Source key
        source_key: String,

        /// Also mark the source disabled
        #[arg(long)]
        disable: bool,
    },

    /// Show outbox, index and job status
    Status {
        /// Only show jobs of this tenant
        #[arg(long)]
        tenant: Option<String>,

        /// Number of recent jobs to show
        #[arg(long, default_value_t = STATUS_JOB_LIMIT)]
        jobs: usize,
    },

    /// Show one backfill job
    Job {
        /// Job id
        id: i64,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum EnqueueCommand {
    /// Refresh the tenant's own profile
    #[command(name = "self")]
    SelfProfile {
        tenant: String,
    },

    /// Refresh a contact profile
    Contact {
        tenant: String,
        contact_id: String,
    },

    /// Refresh a group profile
    Group {
        tenant: String,
        group_id: String,
    },

    /// Ingest recent messages of a session
    ChatPage {
        tenant: String,

        /// Session uuid
        session_uuid: String,

        /// Private or group chat partner id
        target_id: String,

        /// 1 = private, 2 = group
        #[arg(long, default_value = "1")]
        session_type: i64,

        #[arg(long, default_value = "")]
        session_name: String,

        #[arg(long, default_value = "1")]
        page: usize,

        /// Messages per page (0 = default)
        #[arg(long, default_value = "0")]
        page_size: usize,

        #[arg(long)]
        since: Option<String>,

        #[arg(long)]
        until: Option<String>,

        /// Overrides the type derived from --session-type
        #[arg(long)]
        source_type: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    // Neither of these needs an existing config
    if let Commands::Init { force } = cli.command {
        let base_dir = resolve_base_dir(cli.config.as_deref());
        let report = cmd_init(Some(base_dir), force).await?;
        return emit(cli.json, &report, print_init_report);
    }
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "kbforge", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    // Status only reads the metadata database
    if let Commands::Status { tenant, jobs } = &cli.command {
        let db = MetaDb::connect(&config).await?;
        let status = cmd_status(&config, &db, tenant.as_deref(), *jobs).await?;
        return emit(cli.json, &status, print_status);
    }

    let services = Services::open(config).await?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } | Commands::Status { .. } => {
            unreachable!()
        }

        Commands::Serve => {
            let (tx, rx) = shutdown::channel();
            tokio::spawn(shutdown::signal_on_interrupt(tx));
            cmd_serve(&services, rx).await?;
        }

        Commands::Reap => {
            let report = cmd_reap(&services).await?;
            emit(cli.json, &report, print_reap_report)?;
        }

        Commands::Query {
            tenant,
            question,
            top_k,
            kb_type,
            source_types,
            source_keys,
            min_score,
            max_chunks,
            max_chars,
            dedupe,
        } => {
            let request = RetrieveRequest {
                tenant_user_id: tenant,
                question,
                top_k,
                kb_type,
                source_types,
                source_keys,
                score_threshold: min_score,
                max_chunks,
                max_content_chars: max_chars,
                dedup_by_same_source: dedupe,
            };
            let result = cmd_query(&services, request).await?;
            emit(cli.json, &result, print_query_results)?;
        }

        Commands::Ingest { file } => {
            let stats = cmd_ingest_file(&services, &file).await?;
            emit(cli.json, &stats, print_ingest_stats)?;
        }

        Commands::Enqueue { target } => {
            let (tenant, target) = enqueue_target(target);
            let report = cmd_enqueue(&services, &tenant, target).await?;
            emit(cli.json, &report, print_enqueue_report)?;
        }

        Commands::Backfill {
            tenant,
            since,
            until,
            page_size,
            max_sessions,
            max_pages,
        } => {
            let request = BackfillRequest {
                tenant_user_id: tenant,
                since,
                until,
                page_size,
                max_sessions,
                max_pages_per_session: max_pages,
            };
            let report = cmd_backfill(&services, request).await?;
            emit(cli.json, &report, print_backfill_report)?;
        }

        Commands::Purge {
            tenant,
            source_type,
            source_key,
            disable,
        } => {
            let stats = cmd_purge(&services, &tenant, &source_type, &source_key, disable).await?;
            emit(cli.json, &stats, print_purge_stats)?;
        }

        Commands::Job { id } => {
            let job = cmd_job(&services, id).await?;
            emit(cli.json, &job, print_job)?;
        }
    }

    Ok(())
}

/// Print `value` as pretty JSON or through its console printer
fn emit<T: Serialize>(json: bool, value: &T, print: fn(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

fn enqueue_target(command: EnqueueCommand) -> (String, EnqueueTarget) {
    match command {
        EnqueueCommand::SelfProfile { tenant } => (tenant, EnqueueTarget::SelfProfile),
        EnqueueCommand::Contact { tenant, contact_id } => {
            (tenant, EnqueueTarget::Contact { contact_id })
        }
        EnqueueCommand::Group { tenant, group_id } => (tenant, EnqueueTarget::Group { group_id }),
        EnqueueCommand::ChatPage {
            tenant,
            session_uuid,
            target_id,
            session_type,
            session_name,
            page,
            page_size,
            since,
            until,
            source_type,
        } => (
            tenant,
            EnqueueTarget::ChatPage(ChatPageArgs {
                session_uuid,
                session_type,
                session_name,
                target_id,
                page,
                page_size,
                since,
                until,
                source_type,
            }),
        ),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let base_dir = resolve_base_dir(path);
    let config_path = match path {
        Some(p) if p.extension().map_or(false, |e| e == "toml") => p.to_path_buf(),
        _ => base_dir.join("config.toml"),
    };

    if !config_path.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'kbforge init' first.",
            config_path.display()
        );
        std::process::exit(1);
    }

    Config::load(&config_path)
}
