use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ledger_agent::chat::ChatSession;
use ledger_agent::config::Settings;
use ledger_agent::graph::RunConfig;
use ledger_agent::ledger::{render_table, Ledger};
use ledger_agent::llm::ChatModel;
use ledger_agent::server::{self, LedgerMcpServer};
use ledger_agent::state::InvoiceState;
use ledger_agent::workflow::{self, invoice};
use rmcp::{transport::stdio, ServiceExt};
use tracing_subscriber::EnvFilter;

/// Transaction extraction agent: free text in, ledger invoices out
#[derive(Parser)]
#[command(name = "ledger-agent", version, about)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive session: type a transaction, get an invoice (default)
    Chat,

    /// Serve the ledger as MCP tools over stdio
    Serve {
        /// Allow tools that write to the ledger (record_transaction, extract_transaction)
        #[arg(long)]
        allow_write: bool,

        /// Maximum rows returned by list_transactions
        #[arg(long, default_value_t = server::DEFAULT_LIST_LIMIT)]
        list_limit: u32,
    },

    /// Print the ledger table
    Ledger {
        /// Show only the newest N entries
        #[arg(long)]
        limit: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Classify a markdown invoice and assess its profitability
    Invoice {
        /// Invoice markdown file
        #[arg(long, default_value = invoice::DEFAULT_INVOICE_PATH)]
        file: PathBuf,

        /// Cost of the services billed, in dollars
        #[arg(long, default_value_t = 150000.0)]
        cost: f64,

        /// Write the bundled sample invoice to --file first
        #[arg(long)]
        write_sample: bool,
    },

    /// Print a graph as a Mermaid flowchart
    Graph {
        #[arg(value_enum, default_value_t = GraphKind::Transaction)]
        kind: GraphKind,
    },

    /// Inspect or delete the checkpoints of a thread
    Checkpoints {
        thread_id: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Delete the thread's checkpoints instead of listing them
        #[arg(long)]
        delete: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GraphKind {
    Transaction,
    Invoice,
}

/// Model stand-in for commands that only need the graph's shape.
struct Offline;

#[async_trait::async_trait]
impl ChatModel for Offline {
    async fn invoke(&self, _: &[ledger_agent::message::Message]) -> ledger_agent::Result<String> {
        Err(ledger_agent::AgentError::Config("offline".to_string()))
    }

    fn model_name(&self) -> &str {
        "offline"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing, so clap's env fallbacks see values from .env.
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = cli.settings;
    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(&settings).await,
        Command::Serve {
            allow_write,
            list_limit,
        } => run_serve(&settings, allow_write, list_limit).await,
        Command::Ledger { limit, json } => {
            let ledger = settings.open_ledger()?;
            let entries = ledger.list(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print!("{}", render_table(&entries));
            }
            Ok(())
        }
        Command::Invoice {
            file,
            cost,
            write_sample,
        } => run_invoice(&settings, file, cost, write_sample).await,
        Command::Graph { kind } => {
            let model: Arc<dyn ChatModel> = Arc::new(Offline);
            let mermaid = match kind {
                GraphKind::Transaction => {
                    let ledger = Arc::new(Ledger::in_memory()?);
                    workflow::build_transaction_graph(model, ledger, None)?.to_mermaid()
                }
                GraphKind::Invoice => workflow::build_invoice_graph(model, None)?.to_mermaid(),
            };
            print!("{}", mermaid);
            Ok(())
        }
        Command::Checkpoints {
            thread_id,
            limit,
            delete,
        } => {
            let saver = settings.connect_checkpointer().await?;
            if delete {
                let removed = saver.delete_thread(&thread_id).await?;
                println!("Deleted {} checkpoint(s) for thread '{}'", removed, thread_id);
            } else {
                let checkpoints = saver.list(&thread_id, Some(limit)).await?;
                println!("{}", serde_json::to_string_pretty(&checkpoints)?);
            }
            Ok(())
        }
    }
}

async fn run_chat(settings: &Settings) -> Result<()> {
    let model: Arc<dyn ChatModel> = Arc::new(settings.build_model()?);
    let ledger = Arc::new(settings.open_ledger()?);
    let checkpointer = settings.connect_checkpointer().await?;

    let graph = workflow::build_transaction_graph(model, Arc::clone(&ledger), Some(checkpointer))?;
    let mut session = ChatSession::new(Arc::new(graph), ledger);
    tracing::info!(session = session.session_id(), "Starting chat session");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    session.run(stdin, tokio::io::stdout()).await?;
    Ok(())
}

async fn run_serve(settings: &Settings, allow_write: bool, list_limit: u32) -> Result<()> {
    let ledger = Arc::new(settings.open_ledger()?);
    let checkpointer = settings.connect_checkpointer().await?;

    let mut service = LedgerMcpServer::new(Arc::clone(&ledger), allow_write, list_limit)
        .with_checkpointer(Arc::clone(&checkpointer));

    match settings.build_model() {
        Ok(model) => {
            let graph = workflow::build_transaction_graph(Arc::new(model), ledger, Some(checkpointer))?;
            service = service.with_graph(Arc::new(graph));
        }
        Err(e) => tracing::warn!(error = %e, "extract_transaction disabled"),
    }

    tracing::info!(
        allow_write,
        list_limit,
        ledger = %settings.ledger_path.display(),
        "Starting ledger-agent MCP server"
    );

    let running = service.serve(stdio()).await?;
    running.waiting().await?;
    Ok(())
}

async fn run_invoice(settings: &Settings, file: PathBuf, cost: f64, write_sample: bool) -> Result<()> {
    if write_sample {
        invoice::write_sample_invoice(&file)?;
        tracing::info!(path = %file.display(), "Wrote sample invoice");
    } else if !file.exists() {
        bail!(
            "Invoice file '{}' not found (use --write-sample to create one)",
            file.display()
        );
    }
    let text = invoice::read_invoice(&file)?;

    let model: Arc<dyn ChatModel> = Arc::new(settings.build_model()?);
    let graph = workflow::build_invoice_graph(model, None)?;
    let state = graph
        .invoke(InvoiceState::new(text.clone(), cost), &RunConfig::default())
        .await?;

    println!("Invoice Text:\n{}\n", text);
    print!("{}", invoice::render_report(&state));
    Ok(())
}
