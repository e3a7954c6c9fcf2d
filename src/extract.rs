//! Parsing of the model's transaction-extraction reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::prompt::PromptTemplate;

const EXTRACTION_TEMPLATE: &str = "Extract these fields from {text} as JSON:
- company_name (string)
- amount_paid (float)
- product_name (string)
- num_units (integer)";

pub fn extraction_prompt() -> PromptTemplate {
    PromptTemplate::new(EXTRACTION_TEMPLATE, &["text"])
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub company_name: String,
    pub amount_paid: f64,
    pub product_name: String,
    pub num_units: i64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Data validation error: {0}")]
    Validation(String),
}

/// Remove a surrounding markdown code fence (```json or ```), if any.
///
/// The opening line is always dropped. The last line is dropped only when the
/// body has more than one line, so an unterminated fence keeps its content.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let Some((_, body)) = trimmed.split_once('\n') else {
        return "";
    };
    match body.rsplit_once('\n') {
        Some((inner, _)) => inner,
        None => body.trim_end().trim_end_matches("```"),
    }
}

pub fn parse_transaction(raw: &str) -> Result<TransactionDetails, ExtractionError> {
    let body = strip_code_fence(raw);
    let value: Value =
        serde_json::from_str(body).map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| ExtractionError::Validation("expected a JSON object".to_string()))?;

    let details = TransactionDetails {
        company_name: text_field(obj.get("company_name"), "company_name")?,
        amount_paid: float_field(obj.get("amount_paid"), "amount_paid")?,
        product_name: text_field(obj.get("product_name"), "product_name")?,
        num_units: int_field(obj.get("num_units"), "num_units")?,
    };
    details.validate()?;
    Ok(details)
}

impl TransactionDetails {
    /// Checks every ledger write shares: a finite non-negative amount and a
    /// non-negative unit count.
    pub fn validate(&self) -> Result<(), ExtractionError> {
        if !self.amount_paid.is_finite() || self.amount_paid < 0.0 {
            return Err(ExtractionError::Validation(format!(
                "amount_paid must be a non-negative number, got {}",
                self.amount_paid
            )));
        }
        if self.num_units < 0 {
            return Err(ExtractionError::Validation(format!(
                "num_units must not be negative, got {}",
                self.num_units
            )));
        }
        Ok(())
    }
}

fn text_field(value: Option<&Value>, name: &str) -> Result<String, ExtractionError> {
    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(_) => Err(ExtractionError::Validation(format!(
            "{} must be a string",
            name
        ))),
    }
}

fn float_field(value: Option<&Value>, name: &str) -> Result<f64, ExtractionError> {
    let parsed = match value {
        None => return Ok(0.0),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match parsed {
        Some(f) if f.is_finite() => Ok(f),
        _ => Err(ExtractionError::Validation(format!(
            "could not convert {} to float: {}",
            name,
            value.map(Value::to_string).unwrap_or_default()
        ))),
    }
}

fn int_field(value: Option<&Value>, name: &str) -> Result<i64, ExtractionError> {
    let parsed = match value {
        None => return Ok(0),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(float_to_i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    parsed.ok_or_else(|| {
        ExtractionError::Validation(format!(
            "invalid literal for {}: {}",
            name,
            value.map(Value::to_string).unwrap_or_default()
        ))
    })
}

/// Truncate toward zero, refusing values that do not fit in an `i64`.
fn float_to_i64(f: f64) -> Option<i64> {
    let t = f.trunc();
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    if t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64 {
        Some(t as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fence(raw), "{\"a\": 1}");
    }

    #[test]
    fn unfenced_text_is_trimmed() {
        assert_eq!(strip_code_fence("  {}\n"), "{}");
    }

    #[test]
    fn fence_without_body_is_empty() {
        assert_eq!(strip_code_fence("```"), "");
    }

    #[test]
    fn unterminated_fence_keeps_body() {
        let raw = "```json\n{\"company_name\": \"Amazon\", \"amount_paid\": 40000, \"num_units\": 5}";
        assert_eq!(
            strip_code_fence(raw),
            "{\"company_name\": \"Amazon\", \"amount_paid\": 40000, \"num_units\": 5}"
        );
        let details = parse_transaction(raw).unwrap();
        assert_eq!(details.company_name, "Amazon");
        assert_eq!(details.num_units, 5);
    }

    #[test]
    fn closing_fence_on_body_line_is_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}```"), "{\"a\": 1}");
    }

    #[test]
    fn parses_fenced_reply() {
        let raw = "```json\n{\"company_name\": \" Amazon \", \"amount_paid\": 15499.99, \"product_name\": \"Cloud Servers\", \"num_units\": 25}\n```";
        let details = parse_transaction(raw).unwrap();
        assert_eq!(
            details,
            TransactionDetails {
                company_name: "Amazon".into(),
                amount_paid: 15499.99,
                product_name: "Cloud Servers".into(),
                num_units: 25,
            }
        );
    }

    #[test]
    fn coerces_strings_and_defaults_missing_fields() {
        let details =
            parse_transaction(r#"{"company_name": "Microsoft", "amount_paid": "50000", "num_units": 100.0}"#)
                .unwrap();
        assert_eq!(details.amount_paid, 50000.0);
        assert_eq!(details.num_units, 100);
        assert_eq!(details.product_name, "");
    }

    #[test]
    fn prose_is_invalid_json() {
        let err = parse_transaction("I could not find a transaction.").unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidJson(_)));
        assert!(err.to_string().starts_with("Invalid JSON: "));
    }

    #[test]
    fn unparseable_amount_is_validation_error() {
        let err = parse_transaction(r#"{"amount_paid": "$40,000"}"#).unwrap_err();
        assert!(err.to_string().starts_with("Data validation error: "));
    }

    #[test]
    fn null_amount_is_validation_error() {
        let err = parse_transaction(r#"{"amount_paid": null}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::Validation(_)));
    }

    #[test]
    fn out_of_range_units_are_rejected() {
        let err = parse_transaction(r#"{"company_name":"A","amount_paid":1,"num_units":1e30}"#)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Validation(_)));
        let err = parse_transaction(r#"{"company_name":"A","amount_paid":1,"num_units":-1e19}"#)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Validation(_)));
        let details =
            parse_transaction(r#"{"company_name":"A","amount_paid":1,"num_units":7.9}"#).unwrap();
        assert_eq!(details.num_units, 7);
    }

    #[test]
    fn negative_amount_or_units_are_rejected() {
        let err = parse_transaction(r#"{"company_name":"A","amount_paid":-5,"num_units":1}"#)
            .unwrap_err();
        assert!(err.to_string().contains("amount_paid must be a non-negative number"));
        let err = parse_transaction(r#"{"company_name":"A","amount_paid":5,"num_units":-2}"#)
            .unwrap_err();
        assert!(err.to_string().contains("num_units must not be negative"));
    }

    #[test]
    fn array_reply_is_validation_error() {
        let err = parse_transaction("[1, 2]").unwrap_err();
        assert!(matches!(err, ExtractionError::Validation(_)));
    }

    #[test]
    fn prompt_embeds_text() {
        let prompt = extraction_prompt()
            .format(&[("text", "Amazon paid $40000 for 5 GPUs")])
            .unwrap();
        assert!(prompt.starts_with("Extract these fields from Amazon paid $40000 for 5 GPUs as JSON:"));
        assert!(prompt.contains("- num_units (integer)"));
    }
}
