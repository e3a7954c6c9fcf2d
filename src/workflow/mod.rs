//! The two agent graphs: transaction recording and invoice analysis.

pub mod invoice;
pub mod transaction;

pub use invoice::{build_invoice_graph, ClientTier};
pub use transaction::{build_transaction_graph, render_outcome};
