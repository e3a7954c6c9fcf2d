use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{schemars, tool, tool_handler, tool_router, ServerHandler};
use serde::Deserialize;

use crate::checkpoint::Checkpointer;
use crate::error::AgentError;
use crate::extract::TransactionDetails;
use crate::graph::{CompiledGraph, RunConfig};
use crate::ledger::Ledger;
use crate::state::TransactionState;

/// Default cap on rows returned by `list_transactions`.
pub const DEFAULT_LIST_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct LedgerMcpServer {
    ledger: Arc<Ledger>,
    graph: Option<Arc<CompiledGraph<TransactionState>>>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    allow_write: bool,
    list_limit: u32,
    tool_router: ToolRouter<Self>,
}

// -- Tool parameter types --

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListParams {
    #[schemars(description = "Maximum number of transactions to return, newest first")]
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TransactionIdParams {
    #[schemars(description = "Invoice id in the ledger")]
    pub id: i64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RecordParams {
    #[schemars(description = "Name of the paying company")]
    pub company_name: String,

    #[schemars(description = "Amount paid, in dollars")]
    pub amount_paid: f64,

    #[schemars(description = "Product purchased")]
    #[serde(default)]
    pub product_name: Option<String>,

    #[schemars(description = "Number of units purchased")]
    #[serde(default)]
    pub num_units: Option<i64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExtractParams {
    #[schemars(description = "Free-text description of a payment, e.g. 'Amazon paid $40000 for 5 GPUs'")]
    pub text: String,

    #[schemars(description = "Checkpoint thread id (optional, generated when omitted)")]
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CheckpointParams {
    #[schemars(description = "Thread id whose checkpoints to list")]
    pub thread_id: String,

    #[schemars(description = "Maximum number of checkpoints to return (default: 10)")]
    #[serde(default)]
    pub limit: Option<u32>,
}

impl LedgerMcpServer {
    pub fn new(ledger: Arc<Ledger>, allow_write: bool, list_limit: u32) -> Self {
        Self {
            ledger,
            graph: None,
            checkpointer: None,
            allow_write,
            list_limit,
            tool_router: Self::tool_router(),
        }
    }

    /// Enable `extract_transaction` by attaching the transaction graph.
    pub fn with_graph(mut self, graph: Arc<CompiledGraph<TransactionState>>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    fn check_read_only(&self, operation: &str) -> Result<(), AgentError> {
        if !self.allow_write {
            return Err(AgentError::ReadOnly(format!(
                "'{}' requires --allow-write flag",
                operation
            )));
        }
        Ok(())
    }

    fn err(&self, e: AgentError) -> ErrorData {
        e.to_mcp_error()
    }
}

fn json_result(value: serde_json::Value) -> CallToolResult {
    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string());
    CallToolResult::success(vec![Content::text(text)])
}

// -- Public methods for testability --

impl LedgerMcpServer {
    pub async fn do_list_transactions(&self, params: ListParams) -> Result<CallToolResult, ErrorData> {
        let limit = std::cmp::min(params.limit.unwrap_or(self.list_limit), self.list_limit);
        let entries = self
            .ledger
            .list(Some(limit as usize))
            .map_err(|e| self.err(e))?;

        Ok(json_result(serde_json::json!({
            "transactions": entries,
            "count": entries.len(),
        })))
    }

    pub async fn do_get_transaction(
        &self,
        params: TransactionIdParams,
    ) -> Result<CallToolResult, ErrorData> {
        let entry = self
            .ledger
            .get(params.id)
            .map_err(|e| self.err(e))?
            .ok_or_else(|| self.err(AgentError::TransactionNotFound(params.id)))?;

        Ok(json_result(serde_json::json!(entry)))
    }

    pub async fn do_ledger_summary(&self) -> Result<CallToolResult, ErrorData> {
        let summary = self.ledger.summary().map_err(|e| self.err(e))?;
        Ok(json_result(serde_json::json!(summary)))
    }

    pub async fn do_record_transaction(
        &self,
        params: RecordParams,
    ) -> Result<CallToolResult, ErrorData> {
        self.check_read_only("record_transaction")
            .map_err(|e| self.err(e))?;

        if params.company_name.trim().is_empty() {
            return Err(self.err(AgentError::InvalidParams(
                "company_name must not be empty".to_string(),
            )));
        }
        let details = TransactionDetails {
            company_name: params.company_name.trim().to_string(),
            amount_paid: params.amount_paid,
            product_name: params.product_name.unwrap_or_default().trim().to_string(),
            num_units: params.num_units.unwrap_or(0),
        };
        details
            .validate()
            .map_err(|e| self.err(AgentError::InvalidParams(e.to_string())))?;
        let id = self.ledger.record(&details).map_err(|e| self.err(e))?;

        Ok(json_result(serde_json::json!({
            "invoice_id": id,
            "transaction": details,
        })))
    }

    pub async fn do_extract_transaction(
        &self,
        params: ExtractParams,
    ) -> Result<CallToolResult, ErrorData> {
        self.check_read_only("extract_transaction")
            .map_err(|e| self.err(e))?;

        let graph = self.graph.as_ref().ok_or_else(|| {
            self.err(AgentError::Config(
                "no language model configured (set GOOGLE_API_KEY)".to_string(),
            ))
        })?;

        let thread_id = params
            .thread_id
            .unwrap_or_else(|| format!("mcp-{}", uuid::Uuid::new_v4()));
        let state = graph
            .invoke(TransactionState::new(params.text), &RunConfig::thread(thread_id.clone()))
            .await
            .map_err(|e| self.err(e))?;

        Ok(json_result(serde_json::json!({
            "thread_id": thread_id,
            "extracted": state.function_call_success,
            "recorded": state.invoice_success,
            "invoice_id": state.invoice_id,
            "transaction": state.details(),
            "error": (!state.error_message.is_empty()).then_some(state.error_message.as_str()),
        })))
    }

    pub async fn do_list_checkpoints(
        &self,
        params: CheckpointParams,
    ) -> Result<CallToolResult, ErrorData> {
        let saver = self.checkpointer.as_ref().ok_or_else(|| {
            self.err(AgentError::Config("no checkpoint store configured".to_string()))
        })?;

        let limit = params.limit.unwrap_or(10) as usize;
        let checkpoints = saver
            .list(&params.thread_id, Some(limit))
            .await
            .map_err(|e| self.err(e))?;

        let items: Vec<serde_json::Value> = checkpoints
            .iter()
            .map(|c| {
                serde_json::json!({
                    "step": c.step,
                    "node": c.node,
                    "next": c.next,
                    "created_at": c.created_at.to_rfc3339(),
                    "state": c.state,
                })
            })
            .collect();

        Ok(json_result(serde_json::json!({
            "thread_id": params.thread_id,
            "checkpoints": items,
            "count": items.len(),
        })))
    }
}

// -- MCP tool handlers (thin wrappers) --

#[tool_router]
impl LedgerMcpServer {
    #[tool(
        name = "list_transactions",
        description = "List recorded invoices from the ledger, newest first"
    )]
    async fn list_transactions(
        &self,
        Parameters(params): Parameters<ListParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.do_list_transactions(params).await
    }

    #[tool(name = "get_transaction", description = "Get a single ledger entry by invoice id")]
    async fn get_transaction(
        &self,
        Parameters(params): Parameters<TransactionIdParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.do_get_transaction(params).await
    }

    #[tool(
        name = "ledger_summary",
        description = "Total number of transactions and amount paid, overall and per company"
    )]
    async fn ledger_summary(&self) -> Result<CallToolResult, ErrorData> {
        self.do_ledger_summary().await
    }

    #[tool(
        name = "record_transaction",
        description = "Record a structured transaction as a new invoice (requires --allow-write)"
    )]
    async fn record_transaction(
        &self,
        Parameters(params): Parameters<RecordParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.do_record_transaction(params).await
    }

    #[tool(
        name = "extract_transaction",
        description = "Extract company, amount, product and units from free text with the language model and record the invoice (requires --allow-write)"
    )]
    async fn extract_transaction(
        &self,
        Parameters(params): Parameters<ExtractParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.do_extract_transaction(params).await
    }

    #[tool(
        name = "list_checkpoints",
        description = "List the graph checkpoints stored for a thread, newest first"
    )]
    async fn list_checkpoints(
        &self,
        Parameters(params): Parameters<CheckpointParams>,
    ) -> Result<CallToolResult, ErrorData> {
        self.do_list_checkpoints(params).await
    }
}

#[tool_handler]
impl ServerHandler for LedgerMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "ledger-agent".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Invoice ledger. Tools: list_transactions (recent invoices), \
                 get_transaction (one invoice), ledger_summary (totals per company), \
                 record_transaction (add an invoice), extract_transaction (parse free text \
                 and record it), list_checkpoints (graph state history for a thread)."
                    .to_string(),
            ),
        }
    }
}
