use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::extract::TransactionDetails;
use crate::message::Message;

/// Bound for any state type that flows through a graph and into checkpoints.
pub trait GraphState: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> GraphState for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionState {
    #[serde(default)]
    pub messages: Vec<Message>,

    pub text: String,

    pub company_name: String,
    pub amount_paid: f64,
    pub product_name: String,
    pub num_units: i64,

    pub function_call_success: bool,
    pub error_message: String,

    pub invoice_id: Option<i64>,
    pub invoice_success: bool,
}

impl TransactionState {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn details(&self) -> TransactionDetails {
        TransactionDetails {
            company_name: self.company_name.clone(),
            amount_paid: self.amount_paid,
            product_name: self.product_name.clone(),
            num_units: self.num_units,
        }
    }

    pub fn apply_details(&mut self, details: TransactionDetails) {
        self.company_name = details.company_name;
        self.amount_paid = details.amount_paid;
        self.product_name = details.product_name;
        self.num_units = details.num_units;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceState {
    pub text: String,
    pub classification: String,
    pub entities: Vec<String>,
    pub cost_of_services: f64,
    pub total_amount_due: Option<f64>,
    pub profitability: String,
}

impl InvoiceState {
    pub fn new(text: impl Into<String>, cost_of_services: f64) -> Self {
        Self {
            text: text.into(),
            cost_of_services,
            ..Default::default()
        }
    }
}
