mod support;

use std::sync::Arc;

use ledger_agent::checkpoint::{Checkpointer, MemorySaver};
use ledger_agent::graph::{RunConfig, END};
use ledger_agent::ledger::Ledger;
use ledger_agent::message::Message;
use ledger_agent::state::{InvoiceState, TransactionState};
use ledger_agent::workflow::transaction::{CREATE_INVOICE_NODE, EXTRACT_NODE};
use ledger_agent::workflow::{build_invoice_graph, build_transaction_graph, render_outcome};
use support::{ScriptedModel, AMAZON_REPLY};

fn ledger() -> Arc<Ledger> {
    Arc::new(Ledger::in_memory().expect("in-memory ledger"))
}

#[tokio::test]
async fn successful_extraction_records_invoice() {
    let model = Arc::new(ScriptedModel::new([AMAZON_REPLY]));
    let ledger = ledger();
    let graph = build_transaction_graph(model.clone(), ledger.clone(), None).unwrap();

    let state = graph
        .invoke(
            TransactionState::new("Amazon paid $40000 for 5 GPUs"),
            &RunConfig::default(),
        )
        .await
        .unwrap();

    assert!(state.function_call_success);
    assert!(state.invoice_success);
    assert_eq!(state.company_name, "Amazon");
    assert_eq!(state.amount_paid, 40000.0);
    assert_eq!(state.product_name, "GPUs");
    assert_eq!(state.num_units, 5);
    assert!(state.error_message.is_empty());

    let id = state.invoice_id.expect("invoice id set");
    let entry = ledger.get(id).unwrap().expect("row exists");
    assert_eq!(entry.company_name, "Amazon");
    assert_eq!(entry.num_units, Some(5));

    // Prompt and reply are kept in the conversation history.
    assert_eq!(state.messages.len(), 2);
    assert!(matches!(&state.messages[0], Message::Human(p) if p.contains("Amazon paid $40000 for 5 GPUs")));
    assert!(matches!(&state.messages[1], Message::Ai(r) if r == AMAZON_REPLY));

    let report = render_outcome(&state);
    assert!(report.starts_with("SUCCESS: Transaction recorded.\n"));
    assert!(report.contains(&format!("   Invoice ID: {}\n", id)));
    assert!(report.contains("   Amount: $40,000.00\n"));
    assert!(report.contains("   Product: GPUs (5 units)\n"));
}

#[tokio::test]
async fn unparseable_reply_skips_ledger_and_keeps_error() {
    let model = Arc::new(ScriptedModel::new(["Sorry, I can't find a transaction here."]));
    let ledger = ledger();
    let graph = build_transaction_graph(model, ledger.clone(), None).unwrap();

    let state = graph
        .invoke(
            TransactionState::new("Invalid text that won't parse correctly"),
            &RunConfig::default(),
        )
        .await
        .unwrap();

    assert!(!state.function_call_success);
    assert!(!state.invoice_success);
    assert!(state.invoice_id.is_none());
    assert!(state.error_message.starts_with("Invalid JSON: "));
    assert_eq!(ledger.count().unwrap(), 0);
    assert!(render_outcome(&state).starts_with("EXTRACTION FAILED: Invalid JSON: "));
}

#[tokio::test]
async fn negative_amount_never_reaches_ledger() {
    let model = Arc::new(ScriptedModel::new([
        r#"{"company_name": "Amazon", "amount_paid": -40000, "product_name": "GPUs", "num_units": 5}"#,
    ]));
    let ledger = ledger();
    let graph = build_transaction_graph(model, ledger.clone(), None).unwrap();

    let state = graph
        .invoke(TransactionState::new("Amazon refunded $40000"), &RunConfig::default())
        .await
        .unwrap();

    assert!(!state.function_call_success);
    assert!(state.error_message.starts_with("Data validation error: amount_paid"));
    assert_eq!(ledger.count().unwrap(), 0);
}

#[tokio::test]
async fn bad_field_is_a_validation_failure() {
    let model = Arc::new(ScriptedModel::new([
        r#"{"company_name": "Acme", "amount_paid": "lots", "product_name": "Anvils", "num_units": 3}"#,
    ]));
    let graph = build_transaction_graph(model, ledger(), None).unwrap();
    let state = graph
        .invoke(TransactionState::new("Acme paid lots"), &RunConfig::default())
        .await
        .unwrap();
    assert!(state.error_message.starts_with("Data validation error: "));
}

#[tokio::test]
async fn model_failure_is_reported_as_extraction_failure() {
    let model = Arc::new(ScriptedModel::failing("quota exceeded"));
    let graph = build_transaction_graph(model, ledger(), None).unwrap();
    let state = graph
        .invoke(TransactionState::new("Amazon paid $1"), &RunConfig::default())
        .await
        .unwrap();
    assert!(!state.function_call_success);
    assert!(state.error_message.contains("quota exceeded"));
    assert_eq!(state.messages.len(), 1);
}

#[tokio::test]
async fn checkpoints_follow_each_node() {
    let saver = Arc::new(MemorySaver::new());
    let model = Arc::new(ScriptedModel::new([AMAZON_REPLY, "not json"]));
    let graph = build_transaction_graph(model, ledger(), Some(saver.clone())).unwrap();

    graph
        .invoke(TransactionState::new("Amazon paid $40000 for 5 GPUs"), &RunConfig::thread("ok"))
        .await
        .unwrap();
    let nodes: Vec<(String, String)> = saver
        .list("ok", None)
        .await
        .unwrap()
        .into_iter()
        .rev()
        .map(|c| (c.node, c.next))
        .collect();
    assert_eq!(
        nodes,
        [
            (EXTRACT_NODE.to_string(), CREATE_INVOICE_NODE.to_string()),
            (CREATE_INVOICE_NODE.to_string(), END.to_string()),
        ]
    );
    let last: TransactionState = saver.latest("ok").await.unwrap().unwrap().state_as().unwrap();
    assert!(last.invoice_success);

    graph
        .invoke(TransactionState::new("???"), &RunConfig::thread("bad"))
        .await
        .unwrap();
    let bad = saver.list("bad", None).await.unwrap();
    assert_eq!(bad.len(), 1);
    assert_eq!(bad[0].node, EXTRACT_NODE);
    assert_eq!(bad[0].next, END);
}

#[tokio::test]
async fn invoice_graph_classifies_and_assesses() {
    let model = Arc::new(ScriptedModel::new([
        "Gold",
        "$286,000",
        "ABC Corp, Web Development, SEO, Net30",
    ]));
    let graph = build_invoice_graph(model.clone(), None).unwrap();
    let state = graph
        .invoke(
            InvoiceState::new(ledger_agent::workflow::invoice::SAMPLE_INVOICE, 150000.0),
            &RunConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(state.classification, "Gold");
    assert_eq!(state.total_amount_due, Some(286000.0));
    assert_eq!(state.entities, ["ABC Corp", "Web Development", "SEO", "Net30"]);
    assert_eq!(state.profitability, "Profitable (margin 47.6%)");
    assert_eq!(model.prompt_count(), 3);
}

#[tokio::test]
async fn invoice_graph_keeps_unrecognised_tier_text() {
    let model = Arc::new(ScriptedModel::new(["Bronze", "unknown", "ABC Corp"]));
    let graph = build_invoice_graph(model, None).unwrap();
    let state = graph
        .invoke(InvoiceState::new("text", 10.0), &RunConfig::default())
        .await
        .unwrap();
    assert_eq!(state.classification, "Bronze");
    assert_eq!(state.total_amount_due, None);
    assert_eq!(state.profitability, "Unknown");
}
