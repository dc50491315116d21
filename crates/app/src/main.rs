use askpdf_core::config::{
    DEFAULT_CHAT_MODEL, DEFAULT_COLLECTION, DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBED_MAX_INPUT_CHARS,
    DEFAULT_OPENAI_BASE_URL, DEFAULT_QDRANT_URL, DEFAULT_STORE_TIMEOUT, DEFAULT_TOP_K,
    DEFAULT_UPLOAD_BATCH_SIZE, DEFAULT_UPLOAD_PARALLEL,
};
use askpdf_core::{
    ChatModel, Embedder, ExtractiveChat, HashingEmbedder, InMemoryStore, IngestionSummary,
    Ingestor, OpenAiChat, OpenAiConfig, OpenAiEmbedder, PageExtractor, Pipeline, QdrantConfig,
    QdrantStore, QueryEngine, QueryError, Session, SessionError, VectorStore,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "askpdf", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    providers: ProviderArgs,

    /// Use a hashing embedder, an in-process store and an extractive answerer.
    #[arg(long, default_value_t = false, global = true)]
    offline: bool,
}

#[derive(Args)]
struct ProviderArgs {
    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    /// Embedding model
    #[arg(long, env = "EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Longest embedding input in characters; longer pages are split and averaged
    #[arg(long, env = "EMBED_MAX_INPUT_CHARS", default_value_t = DEFAULT_EMBED_MAX_INPUT_CHARS)]
    embed_max_input_chars: usize,

    /// Chat completion model
    #[arg(long, env = "CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    chat_model: String,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = DEFAULT_QDRANT_URL)]
    qdrant_url: String,

    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    qdrant_api_key: Option<String>,

    /// Qdrant request timeout in seconds
    #[arg(long, env = "QDRANT_TIMEOUT_SECS", default_value_t = DEFAULT_STORE_TIMEOUT.as_secs())]
    qdrant_timeout_secs: u64,

    /// Points per upload request
    #[arg(long, env = "UPLOAD_BATCH_SIZE", default_value_t = DEFAULT_UPLOAD_BATCH_SIZE)]
    upload_batch_size: usize,

    /// Upload requests in flight
    #[arg(long, env = "UPLOAD_PARALLEL", default_value_t = DEFAULT_UPLOAD_PARALLEL)]
    upload_parallel: usize,

    /// Pages extracted concurrently (defaults to available cores)
    #[arg(long, env = "EXTRACT_WORKERS")]
    extract_workers: Option<usize>,

    /// Pages retrieved per question
    #[arg(long, env = "TOP_K", default_value_t = DEFAULT_TOP_K)]
    top_k: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, embed and index a PDF, replacing the collection.
    Ingest {
        /// PDF to index.
        pdf: PathBuf,
        /// Destination collection.
        collection: String,
    },
    /// Answer one question against an indexed collection.
    Ask {
        /// Collection produced by `ingest`.
        collection: String,
        /// Question text.
        question: String,
    },
    /// Upload a PDF into a session and ask questions interactively.
    Chat {
        /// PDF to load at start.
        pdf: Option<PathBuf>,
        /// Session collection.
        #[arg(long, default_value = DEFAULT_COLLECTION)]
        collection: String,
    },
}

impl ProviderArgs {
    fn openai(&self) -> OpenAiConfig {
        OpenAiConfig {
            api_key: self.openai_api_key.clone(),
            base_url: self.openai_base_url.clone(),
            embedding_model: self.embedding_model.clone(),
            chat_model: self.chat_model.clone(),
            max_input_chars: self.embed_max_input_chars,
            ..OpenAiConfig::default()
        }
    }

    fn qdrant(&self) -> QdrantConfig {
        QdrantConfig {
            url: self.qdrant_url.clone(),
            api_key: self.qdrant_api_key.clone(),
            timeout: Duration::from_secs(self.qdrant_timeout_secs),
            batch_size: self.upload_batch_size,
            parallel: self.upload_parallel,
        }
    }

    fn extractor(&self) -> PageExtractor {
        self.extract_workers
            .map(PageExtractor::new)
            .unwrap_or_default()
    }
}

fn build_pipeline(cli: &Cli, collection: &str) -> anyhow::Result<Pipeline> {
    let providers = &cli.providers;
    let (embedder, store, chat): (Arc<dyn Embedder>, Arc<dyn VectorStore>, Arc<dyn ChatModel>) =
        if cli.offline {
            (
                Arc::new(HashingEmbedder::default()),
                Arc::new(InMemoryStore::new()),
                Arc::new(ExtractiveChat),
            )
        } else {
            let openai = providers.openai();
            (
                Arc::new(OpenAiEmbedder::new(&openai)?),
                Arc::new(QdrantStore::new(&providers.qdrant())?),
                Arc::new(OpenAiChat::new(&openai)?),
            )
        };

    let ingestor = Ingestor::new(embedder.clone(), store.clone(), providers.extractor());
    let engine = QueryEngine::new(embedder, store, chat, providers.top_k);
    Ok(Pipeline::new(ingestor, engine, collection))
}

fn print_summary(summary: &IngestionSummary) {
    println!(
        "{} pages indexed into '{}' (dim {}, {} empty, {} skipped) at {}",
        summary.pages_indexed,
        summary.collection,
        summary.vector_dim,
        summary.pages_empty,
        summary.pages_skipped,
        Utc::now().to_rfc3339()
    );
}

fn load_into_session(session: &mut Session, path: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    if session.accept_upload(&name, &bytes)? {
        info!(file = %name, "document uploaded to session");
    }
    Ok(())
}

/// Text shown for one question; failures keep the session alive.
fn chat_reply(outcome: Result<String, SessionError>) -> String {
    match outcome {
        Ok(answer) => format!("\nAnswer:\n\n{answer}\n"),
        Err(SessionError::NoDocument) => "upload a PDF first with :load <pdf>".to_string(),
        Err(SessionError::Query(QueryError::NotIndexed(name))) => {
            format!("document not indexed (collection '{name}' is missing)")
        }
        Err(error) => {
            warn!(error = %error, "question failed");
            format!("unable to answer: {error}")
        }
    }
}

async fn run_chat(pipeline: &Pipeline, initial: Option<PathBuf>) -> anyhow::Result<()> {
    let mut session = Session::new();
    if let Some(path) = initial {
        load_into_session(&mut session, &path)?;
    }

    println!("commands: :load <pdf>, :reset, :quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if session.needs_ingestion() {
            println!("Indexing PDF, please wait...");
            match pipeline.ingest_session(&mut session).await {
                Ok(Some(summary)) => print_summary(&summary),
                Ok(None) => {}
                Err(error) => {
                    println!("indexing failed: {error}");
                    session.reset()?;
                }
            }
        }

        print!("Ask a question > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        if input.is_empty() {
            continue;
        }
        if input == ":quit" {
            break;
        }
        if input == ":reset" {
            session.reset()?;
            println!("session cleared");
            continue;
        }
        if let Some(path) = input.strip_prefix(":load ") {
            if let Err(error) = load_into_session(&mut session, Path::new(path.trim())) {
                println!("unable to load document: {error}");
            }
            continue;
        }

        println!("{}", chat_reply(pipeline.ask(&session, input).await));
    }

    session.reset()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        offline = cli.offline,
        "askpdf boot"
    );

    match &cli.command {
        Command::Ingest { pdf, collection } => {
            if cli.offline {
                warn!("offline index lives only for this process");
            }
            let pipeline = build_pipeline(&cli, collection)?;
            let summary = pipeline.ingestor().ingest(pdf, collection).await?;
            print_summary(&summary);
        }
        Command::Ask {
            collection,
            question,
        } => {
            let pipeline = build_pipeline(&cli, collection)?;
            match pipeline.engine().answer(question, collection).await {
                Ok(answer) => println!("{answer}"),
                Err(QueryError::NotIndexed(name)) => {
                    println!("document not indexed: run `askpdf ingest <pdf> {name}` first");
                }
                Err(error) => return Err(error.into()),
            }
        }
        Command::Chat { pdf, collection } => {
            let pipeline = build_pipeline(&cli, collection)?;
            run_chat(&pipeline, pdf.clone()).await?;
        }
    }

    Ok(())
}
