//! Transaction extraction agent backed by a SQLite ledger.
//!
//! Free-text payments are sent to a Gemini model, parsed into structured
//! fields and recorded as invoices by a small state graph. Graph state is
//! checkpointed after every node (Redis or in-process), and the ledger is
//! exposed to other LLM clients as MCP tools.

pub mod chat;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extract;
pub mod graph;
pub mod ledger;
pub mod llm;
pub mod message;
pub mod prompt;
pub mod server;
pub mod state;
pub mod workflow;

pub use error::{AgentError, Result};
