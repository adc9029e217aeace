//! # tutor-rag CLI (`trag`)
//!
//! Commands for database setup, document upload and processing, tutor
//! scoping, similarity search, seeding, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! trag --config ./config/trag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trag init` | Create the SQLite database and run schema migrations |
//! | `trag add <file> --owner <id>` | Upload a file and run the pipeline |
//! | `trag process <id>...` | Re-run the pipeline for stored documents |
//! | `trag link <tutor> <document>` | Attach a document to a tutor |
//! | `trag unlink <tutor> <document>` | Detach a document from a tutor |
//! | `trag search "<query>"` | Similarity search |
//! | `trag seed <user>` | Seed the configured document set |
//! | `trag stats <owner>` | Per-owner chunk and token totals |
//! | `trag serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! trag init
//! trag add ./notes/biology.pdf --owner instructor-1 --public
//! trag link tutor-bio 3f0c...
//! trag search "what do mitochondria do" --tutor tutor-bio --context
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tutor_rag::config;
use tutor_rag::context::AppContext;
use tutor_rag::ingest::{self, AddOptions};
use tutor_rag::logging;
use tutor_rag::migrate;
use tutor_rag::search::{self, SearchArgs};
use tutor_rag::server;
use tutor_rag::stats;
use tutor_rag_core::models::Visibility;

/// tutor-rag: document ingestion and similarity retrieval for grounded
/// tutor chat.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/trag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "trag",
    about = "tutor-rag: document ingestion and similarity retrieval for grounded tutor chat",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Upload a file, create its document record and process it.
    ///
    /// Exits non-zero when the pipeline fails; the document is left in
    /// `error` status.
    Add {
        /// Path to a .pdf, .doc, .docx, .pptx, .txt or .md file.
        file: PathBuf,

        /// Owning user id.
        #[arg(long)]
        owner: String,

        /// Title. Defaults to the file name without extension.
        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Make the document visible to every owner's searches.
        #[arg(long)]
        public: bool,
    },

    /// Re-run the pipeline for stored documents.
    Process {
        /// Document ids.
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Attach a document to a tutor's retrieval scope.
    Link {
        tutor: String,
        document: String,
    },

    /// Detach a document from a tutor's retrieval scope.
    Unlink {
        tutor: String,
        document: String,
    },

    /// Similarity search over processed chunks.
    Search {
        query: String,

        /// Search only documents linked to this tutor.
        #[arg(long)]
        tutor: Option<String>,

        /// Search documents owned by this user plus public documents.
        #[arg(long)]
        owner: Option<String>,

        /// Restrict to these document ids (repeatable).
        #[arg(long = "document")]
        documents: Vec<String>,

        /// Minimum cosine similarity, 0.0 to 1.0.
        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        limit: Option<usize>,

        /// Print results as a prompt context block.
        #[arg(long)]
        context: bool,
    },

    /// Seed the configured document set for a user.
    Seed {
        user: String,
    },

    /// Show chunk and token totals for an owner.
    Stats {
        owner: String,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(cfg.logging.level.as_deref());

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Stats { owner } => {
            stats::run_stats(&cfg, &owner).await?;
        }
        command => {
            let ctx = AppContext::from_config(&cfg).await?;
            run(&ctx, command).await?;
        }
    }

    Ok(())
}

async fn run(ctx: &AppContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Add {
            file,
            owner,
            title,
            description,
            public,
        } => {
            let opts = AddOptions {
                owner_id: owner,
                title,
                description,
                visibility: if public {
                    Visibility::Public
                } else {
                    Visibility::Private
                },
            };
            ingest::run_add(ctx, &file, opts).await?;
        }
        Commands::Process { ids } => {
            ingest::run_process(ctx, &ids).await?;
        }
        Commands::Link { tutor, document } => {
            ingest::run_link(ctx, &tutor, &document).await?;
        }
        Commands::Unlink { tutor, document } => {
            ingest::run_unlink(ctx, &tutor, &document).await?;
        }
        Commands::Search {
            query,
            tutor,
            owner,
            documents,
            threshold,
            limit,
            context,
        } => {
            let args = SearchArgs {
                tutor,
                owner,
                documents,
                threshold,
                limit,
                context,
            };
            search::run_search(ctx, &query, args).await?;
        }
        Commands::Seed { user } => {
            ingest::run_seed(ctx, &user).await?;
        }
        Commands::Serve => {
            server::run_server(ctx.clone()).await?;
        }
        Commands::Init | Commands::Stats { .. } => {}
    }
    Ok(())
}
