//! SQLite ledger of recorded invoices.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::{AgentError, Result};
use crate::extract::TransactionDetails;

pub const DEFAULT_LEDGER_PATH: &str = "ledger_test.db";

const RULE_WIDTH: usize = 75;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub company_name: String,
    pub amount_paid: f64,
    pub product_name: Option<String>,
    pub num_units: Option<i64>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyTotal {
    pub company_name: String,
    pub transactions: i64,
    pub total_paid: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub transactions: i64,
    pub total_paid: f64,
    pub companies: Vec<CompanyTotal>,
}

pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open or create the ledger database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.create_schema()?;
        tracing::info!(path = %path.display(), "Ledger database initialized");
        Ok(ledger)
    }

    pub fn in_memory() -> Result<Self> {
        let ledger = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        ledger.create_schema()?;
        Ok(ledger)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AgentError::Other("ledger connection lock poisoned".to_string()))
    }

    fn create_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS Ledger (
                id INTEGER PRIMARY KEY,
                company_name TEXT NOT NULL,
                amount_paid REAL NOT NULL,
                product_name TEXT,
                num_units INTEGER,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            ",
        )?;
        Ok(())
    }

    /// Insert an invoice row and return its id.
    pub fn record(&self, details: &TransactionDetails) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO Ledger (company_name, amount_paid, product_name, num_units)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                details.company_name,
                details.amount_paid,
                details.product_name,
                details.num_units
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!(id, company = %details.company_name, amount = details.amount_paid, "Recorded invoice");
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<Option<LedgerEntry>> {
        let conn = self.lock()?;
        let entry = conn
            .query_row(
                "SELECT id, company_name, amount_paid, product_name, num_units, timestamp
                 FROM Ledger WHERE id = ?1",
                params![id],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Newest entries first.
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<LedgerEntry>> {
        let conn = self.lock()?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(
            "SELECT id, company_name, amount_paid, product_name, num_units, timestamp
             FROM Ledger ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_entry)?;
        let entries = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM Ledger", [], |row| row.get(0))?)
    }

    pub fn summary(&self) -> Result<LedgerSummary> {
        let conn = self.lock()?;
        let (transactions, total_paid): (i64, f64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(amount_paid), 0.0) FROM Ledger",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT company_name, COUNT(*), SUM(amount_paid) FROM Ledger
             GROUP BY company_name ORDER BY SUM(amount_paid) DESC, company_name ASC",
        )?;
        let companies = stmt
            .query_map([], |row| {
                Ok(CompanyTotal {
                    company_name: row.get(0)?,
                    transactions: row.get(1)?,
                    total_paid: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(LedgerSummary {
            transactions,
            total_paid,
            companies,
        })
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        company_name: row.get(1)?,
        amount_paid: row.get(2)?,
        product_name: row.get(3)?,
        num_units: row.get(4)?,
        timestamp: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
    })
}

/// Two decimal places with comma thousands separators: `40000.0` -> `40,000.00`.
pub fn format_amount(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (whole, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac)
}

pub fn render_table(entries: &[LedgerEntry]) -> String {
    let rule = "-".repeat(RULE_WIDTH);
    let mut out = String::new();
    out.push_str("=== Current Ledger ===\n");
    out.push_str("ID | Company Name        | Amount Paid | Product   | Units | Timestamp\n");
    out.push_str(&rule);
    out.push('\n');
    for e in entries {
        out.push_str(&format!(
            "{:2} | {:<18} | ${:>9} | {:<8} | {:>5} | {}\n",
            e.id,
            e.company_name,
            format_amount(e.amount_paid),
            e.product_name.as_deref().unwrap_or(""),
            e.num_units.map(|n| n.to_string()).unwrap_or_default(),
            e.timestamp
        ));
    }
    out.push_str(&rule);
    out.push('\n');
    out
}
