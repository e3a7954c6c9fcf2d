//! Extract a payment from free text and record it in the ledger.

use std::sync::Arc;

use async_trait::async_trait;

use crate::checkpoint::Checkpointer;
use crate::error::Result;
use crate::extract::{extraction_prompt, parse_transaction};
use crate::graph::{CompiledGraph, Node, StateGraph, END};
use crate::ledger::{format_amount, Ledger};
use crate::llm::ChatModel;
use crate::message::{add_messages, Message};
use crate::state::TransactionState;

pub const EXTRACT_NODE: &str = "extract_transaction_details";
pub const CREATE_INVOICE_NODE: &str = "create_invoice";

pub struct ExtractTransactionDetails {
    model: Arc<dyn ChatModel>,
}

impl ExtractTransactionDetails {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Node<TransactionState> for ExtractTransactionDetails {
    async fn run(&self, mut state: TransactionState) -> Result<TransactionState> {
        let prompt = extraction_prompt().format(&[("text", state.text.as_str())])?;
        let request = Message::Human(prompt);

        let outcome = self.model.invoke(std::slice::from_ref(&request)).await;
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "Model call failed during extraction");
                add_messages(&mut state.messages, [request]);
                state.error_message = e.to_string();
                state.function_call_success = false;
                return Ok(state);
            }
        };
        add_messages(&mut state.messages, [request, Message::Ai(reply.clone())]);

        match parse_transaction(&reply) {
            Ok(details) => {
                state.apply_details(details);
                state.function_call_success = true;
                state.error_message.clear();
            }
            Err(e) => {
                tracing::info!(error = %e, "Could not parse extraction reply");
                state.error_message = e.to_string();
                state.function_call_success = false;
            }
        }
        Ok(state)
    }
}

pub struct CreateInvoice {
    ledger: Arc<Ledger>,
}

impl CreateInvoice {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Node<TransactionState> for CreateInvoice {
    async fn run(&self, mut state: TransactionState) -> Result<TransactionState> {
        if !state.function_call_success {
            state.error_message = "Cannot create invoice - extraction failed".to_string();
            return Ok(state);
        }

        match self.ledger.record(&state.details()) {
            Ok(id) => {
                state.invoice_id = Some(id);
                state.invoice_success = true;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to record invoice");
                state.error_message = e.to_string();
                state.invoice_success = false;
            }
        }
        Ok(state)
    }
}

/// Failed extractions skip the ledger so their error reaches the user intact.
pub fn route_after_extraction(state: &TransactionState) -> String {
    if state.function_call_success {
        CREATE_INVOICE_NODE.to_string()
    } else {
        END.to_string()
    }
}

pub fn build_transaction_graph(
    model: Arc<dyn ChatModel>,
    ledger: Arc<Ledger>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
) -> Result<CompiledGraph<TransactionState>> {
    let mut graph = StateGraph::new();
    graph
        .add_node(EXTRACT_NODE, ExtractTransactionDetails::new(model))
        .add_node(CREATE_INVOICE_NODE, CreateInvoice::new(ledger))
        .set_entry_point(EXTRACT_NODE)
        .add_conditional_edges(EXTRACT_NODE, route_after_extraction, &[CREATE_INVOICE_NODE, END])
        .add_edge(CREATE_INVOICE_NODE, END);
    if let Some(saver) = checkpointer {
        graph.with_checkpointer(saver);
    }
    Ok(graph.compile()?)
}

/// Human-readable report of a finished run.
pub fn render_outcome(state: &TransactionState) -> String {
    if state.function_call_success && state.invoice_success {
        let mut out = String::from("SUCCESS: Transaction recorded.\n");
        if let Some(id) = state.invoice_id {
            out.push_str(&format!("   Invoice ID: {}\n", id));
        }
        out.push_str(&format!("   Company: {}\n", state.company_name));
        out.push_str(&format!("   Amount: ${}\n", format_amount(state.amount_paid)));
        out.push_str(&format!(
            "   Product: {} ({} units)\n",
            state.product_name, state.num_units
        ));
        out
    } else if !state.function_call_success {
        format!("EXTRACTION FAILED: {}\n", state.error_message)
    } else {
        format!("DATABASE FAILED: {}\n", state.error_message)
    }
}
