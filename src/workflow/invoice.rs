//! Client-tier classification and profitability of a markdown invoice.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::checkpoint::Checkpointer;
use crate::error::{AgentError, Result};
use crate::graph::{CompiledGraph, Node, StateGraph, END};
use crate::llm::ChatModel;
use crate::message::Message;
use crate::prompt::PromptTemplate;
use crate::state::InvoiceState;

pub const CLASSIFY_NODE: &str = "classify_client_tier";
pub const AMOUNT_NODE: &str = "extract_invoice_amount";
pub const ENTITIES_NODE: &str = "extract_entities";
pub const PROFITABILITY_NODE: &str = "assess_profitability";

pub const DEFAULT_INVOICE_PATH: &str = "./data/invoice.md";

pub const SAMPLE_INVOICE: &str = "# Invoice
***Client:** ABC Corp
***Address:*** 123 Business Rd, Suite 100, Business City, BC 12345
***Due Date:** 2025-01-23
**Payment Terms:** Net30

## Services
1. Web Development - $150000
2. SEO - $50000
3. Social Media Management - $30,000
4. Content Creation – $26,000
5. Email Marketing – $20,000
6. Graphic Design – $10,000


**Notes:**
Please make the payment by the due date to avoid any late fees. If you have any questions regarding this invoice, feel free to contact us at billing@abccorp.com.

**Bank Details:**
Bank Name: Business Bank
Account Number: 123456789
Routing Number: 987654321
SWIFT Code: BUSB1234

**Contact Information:**
Phone: (123) 456–7890
Email: support@abccorp.com
*****
";

const CLASSIFY_TEMPLATE: &str = "Classify the client tier based on the invoice amount into one of the categories: Silver, Gold, Platinum
- Silver: $0-$100,000
- Gold: $100,000-$1,000,000
- Platinum: $1,000,000+

Invoice Info: {text}
Category:";

const AMOUNT_TEMPLATE: &str = "Extract the Total Amount Due.\n\nText:{text}. Return the number only.";

const ENTITIES_TEMPLATE: &str = "Extract the following entities from the text: Client, Services, Payment Terms.\n\nText:{text}\n\nEntities";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTier {
    Silver,
    Gold,
    Platinum,
}

impl ClientTier {
    pub fn from_amount(amount: f64) -> Self {
        if amount >= 1_000_000.0 {
            ClientTier::Platinum
        } else if amount >= 100_000.0 {
            ClientTier::Gold
        } else {
            ClientTier::Silver
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientTier::Silver => "Silver",
            ClientTier::Gold => "Gold",
            ClientTier::Platinum => "Platinum",
        }
    }
}

impl fmt::Display for ClientTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientTier {
    type Err = AgentError;

    /// Accepts model replies such as `"gold"`, `"Category: Platinum"` or `"**Silver**"`.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_lowercase();
        let found: Vec<ClientTier> = [ClientTier::Silver, ClientTier::Gold, ClientTier::Platinum]
            .into_iter()
            .filter(|t| lower.contains(&t.as_str().to_lowercase()))
            .collect();
        match found.as_slice() {
            [tier] => Ok(*tier),
            [] => Err(AgentError::Other(format!("no client tier in '{}'", s.trim()))),
            _ => Err(AgentError::Other(format!("ambiguous client tier in '{}'", s.trim()))),
        }
    }
}

/// Parse the first `", "`-separated token of a reply as a dollar amount.
pub fn parse_amount(reply: &str) -> Option<f64> {
    let first = reply.trim().split(", ").next()?;
    let cleaned: String = first
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

pub fn assess_profitability(total_amount_due: Option<f64>, cost_of_services: f64) -> String {
    let Some(revenue) = total_amount_due else {
        return "Unknown".to_string();
    };
    let profit = revenue - cost_of_services;
    if profit.abs() < 0.005 {
        return "Break-even".to_string();
    }
    let margin = if revenue != 0.0 {
        profit / revenue * 100.0
    } else {
        0.0
    };
    if profit > 0.0 {
        format!("Profitable (margin {:.1}%)", margin)
    } else {
        format!("Loss (margin {:.1}%)", margin)
    }
}

async fn ask(model: &dyn ChatModel, template: &str, text: &str) -> Result<String> {
    let prompt = PromptTemplate::new(template, &["text"]).format(&[("text", text)])?;
    Ok(model.invoke(&[Message::Human(prompt)]).await?.trim().to_string())
}

pub struct ClassifyClientTier {
    model: Arc<dyn ChatModel>,
}

#[async_trait]
impl Node<InvoiceState> for ClassifyClientTier {
    async fn run(&self, mut state: InvoiceState) -> Result<InvoiceState> {
        let reply = ask(self.model.as_ref(), CLASSIFY_TEMPLATE, &state.text).await?;
        state.classification = match reply.parse::<ClientTier>() {
            Ok(tier) => tier.to_string(),
            Err(_) => reply,
        };
        Ok(state)
    }
}

pub struct ExtractInvoiceAmount {
    model: Arc<dyn ChatModel>,
}

#[async_trait]
impl Node<InvoiceState> for ExtractInvoiceAmount {
    async fn run(&self, mut state: InvoiceState) -> Result<InvoiceState> {
        let reply = ask(self.model.as_ref(), AMOUNT_TEMPLATE, &state.text).await?;
        state.total_amount_due = parse_amount(&reply);
        if state.total_amount_due.is_none() {
            tracing::warn!(reply = %reply, "Could not parse total amount due");
        }
        Ok(state)
    }
}

pub struct ExtractEntities {
    model: Arc<dyn ChatModel>,
}

#[async_trait]
impl Node<InvoiceState> for ExtractEntities {
    async fn run(&self, mut state: InvoiceState) -> Result<InvoiceState> {
        let reply = ask(self.model.as_ref(), ENTITIES_TEMPLATE, &state.text).await?;
        state.entities = reply
            .split(", ")
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(String::from)
            .collect();
        Ok(state)
    }
}

pub struct AssessProfitability;

#[async_trait]
impl Node<InvoiceState> for AssessProfitability {
    async fn run(&self, mut state: InvoiceState) -> Result<InvoiceState> {
        state.profitability = assess_profitability(state.total_amount_due, state.cost_of_services);
        Ok(state)
    }
}

pub fn build_invoice_graph(
    model: Arc<dyn ChatModel>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
) -> Result<CompiledGraph<InvoiceState>> {
    let mut graph = StateGraph::new();
    graph
        .add_node(CLASSIFY_NODE, ClassifyClientTier { model: Arc::clone(&model) })
        .add_node(AMOUNT_NODE, ExtractInvoiceAmount { model: Arc::clone(&model) })
        .add_node(ENTITIES_NODE, ExtractEntities { model })
        .add_node(PROFITABILITY_NODE, AssessProfitability)
        .set_entry_point(CLASSIFY_NODE)
        .add_edge(CLASSIFY_NODE, AMOUNT_NODE)
        .add_edge(AMOUNT_NODE, ENTITIES_NODE)
        .add_edge(ENTITIES_NODE, PROFITABILITY_NODE)
        .add_edge(PROFITABILITY_NODE, END);
    if let Some(saver) = checkpointer {
        graph.with_checkpointer(saver);
    }
    Ok(graph.compile()?)
}

/// Write [`SAMPLE_INVOICE`] to `path`, creating parent directories.
pub fn write_sample_invoice(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| AgentError::Other(format!("cannot create {}: {}", parent.display(), e)))?;
    }
    std::fs::write(path, SAMPLE_INVOICE)
        .map_err(|e| AgentError::Other(format!("cannot write {}: {}", path.display(), e)))
}

pub fn read_invoice(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| AgentError::Other(format!("cannot read {}: {}", path.display(), e)))
}

pub fn render_report(state: &InvoiceState) -> String {
    let (amount, tier) = match state.total_amount_due {
        Some(a) => (
            format!("${}", crate::ledger::format_amount(a)),
            ClientTier::from_amount(a).to_string(),
        ),
        None => ("unknown".to_string(), "unknown".to_string()),
    };
    format!(
        "Client Classification: {} (by amount due: {})\nTotal Amount Due: {}\nCost of services: ${}\nProfitability: {}\nEntities: {}\n",
        state.classification,
        tier,
        amount,
        crate::ledger::format_amount(state.cost_of_services),
        state.profitability,
        state.entities.join(" | ")
    )
}
