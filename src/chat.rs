//! Interactive loop: one transaction per line until `exit` or `quit`.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AgentError, Result};
use crate::graph::{CompiledGraph, RunConfig};
use crate::ledger::{render_table, Ledger};
use crate::state::TransactionState;
use crate::workflow::render_outcome;

const BANNER: &str = "\n================================================
 Transaction Details Extractor
================================================
Example: 'Amazon paid $40000 for 5 GPUs'
Type 'exit' or 'quit' to end the session.
";

pub fn is_exit(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "exit" | "quit")
}

pub struct ChatSession {
    graph: Arc<CompiledGraph<TransactionState>>,
    ledger: Arc<Ledger>,
    session_id: String,
    turn: u64,
}

impl ChatSession {
    pub fn new(graph: Arc<CompiledGraph<TransactionState>>, ledger: Arc<Ledger>) -> Self {
        Self::with_session_id(graph, ledger, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_session_id(
        graph: Arc<CompiledGraph<TransactionState>>,
        ledger: Arc<Ledger>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            graph,
            ledger,
            session_id: session_id.into(),
            turn: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Thread id used for the next submitted line.
    pub fn next_thread_id(&self) -> String {
        format!("{}-{}", self.session_id, self.turn + 1)
    }

    /// Run one transaction through the graph and return the report to print.
    pub async fn submit(&mut self, text: &str) -> Result<String> {
        let config = RunConfig::thread(self.next_thread_id());
        self.turn += 1;

        let state = self
            .graph
            .invoke(TransactionState::new(text.trim()), &config)
            .await?;

        let mut out = String::from("\n--- Final Result ---\n");
        out.push_str(&render_outcome(&state));
        if state.function_call_success && state.invoice_success {
            out.push('\n');
            out.push_str(&render_table(&self.ledger.list(None)?));
        }
        Ok(out)
    }

    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let io = |e: std::io::Error| AgentError::Other(format!("terminal I/O failed: {}", e));

        writer.write_all(BANNER.as_bytes()).await.map_err(io)?;
        let mut lines = reader.lines();
        loop {
            writer.write_all(b"\nYou: ").await.map_err(io)?;
            writer.flush().await.map_err(io)?;

            let Some(line) = lines.next_line().await.map_err(io)? else {
                break;
            };
            if is_exit(&line) {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }

            let report = match self.submit(&line).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(error = %e, "Transaction run failed");
                    format!("\nERROR: {}\n", e)
                }
            };
            writer.write_all(report.as_bytes()).await.map_err(io)?;
            writer.write_all(b"\n").await.map_err(io)?;
        }
        writer.flush().await.map_err(io)?;
        Ok(())
    }
}
