//! End-to-end tests that run the `ledger-agent` binary.
//!
//! Only commands that need neither the language model nor Redis are covered.

use std::process::Command;

use ledger_agent::extract::TransactionDetails;
use ledger_agent::ledger::Ledger;
use tempfile::TempDir;

fn agent() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ledger-agent"));
    cmd.env_remove("GOOGLE_API_KEY")
        .env_remove("GEMINI_API_KEY")
        .env_remove("LEDGER_DB");
    cmd
}

#[test]
fn graph_prints_transaction_mermaid() {
    let output = agent().arg("graph").output().unwrap();
    assert!(
        output.status.success(),
        "graph failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("graph TD;"));
    assert!(stdout.contains("__start__ --> extract_transaction_details;"));
    assert!(stdout.contains("extract_transaction_details -.-> |create_invoice| create_invoice;"));
    assert!(stdout.contains("create_invoice --> __end__;"));
}

#[test]
fn graph_prints_invoice_mermaid() {
    let output = agent().args(["graph", "invoice"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("classify_client_tier --> extract_invoice_amount;"));
    assert!(stdout.contains("assess_profitability --> __end__;"));
}

#[test]
fn ledger_lists_recorded_rows() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("ledger.db");
    {
        let ledger = Ledger::open(&db).unwrap();
        ledger
            .record(&TransactionDetails {
                company_name: "Amazon".into(),
                amount_paid: 40000.0,
                product_name: "GPUs".into(),
                num_units: 5,
            })
            .unwrap();
    }

    let output = agent().arg("--ledger").arg(&db).arg("ledger").output().unwrap();
    assert!(
        output.status.success(),
        "ledger failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("=== Current Ledger ==="));
    assert!(stdout.contains("$40,000.00"));

    let output = agent()
        .arg("--ledger")
        .arg(&db)
        .args(["ledger", "--json"])
        .output()
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json[0]["company_name"], "Amazon");
}

#[test]
fn dotenv_file_supplies_settings() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("from-env.db");
    {
        let ledger = Ledger::open(&db).unwrap();
        ledger
            .record(&TransactionDetails {
                company_name: "Microsoft".into(),
                amount_paid: 50000.0,
                product_name: "Licenses".into(),
                num_units: 100,
            })
            .unwrap();
    }
    std::fs::write(dir.path().join(".env"), format!("LEDGER_DB={}\n", db.display())).unwrap();

    let output = agent()
        .current_dir(dir.path())
        .args(["ledger", "--json"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "ledger failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json[0]["company_name"], "Microsoft");
}

#[test]
fn chat_without_api_key_fails_cleanly() {
    let dir = TempDir::new().unwrap();
    let output = agent()
        .current_dir(dir.path())
        .args(["--no-redis", "chat"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("GOOGLE_API_KEY"));
}

#[test]
fn invoice_with_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let output = agent()
        .current_dir(dir.path())
        .args(["invoice", "--file", "nope.md"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--write-sample"));
}
