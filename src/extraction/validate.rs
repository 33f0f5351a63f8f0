//! Field-level validation and normalization of parsed model output.
//!
//! Validation is advisory where possible: values are corrected in place
//! (currency uppercasing, numeric strings coerced) with a warning, and only
//! shape violations that cannot be repaired become errors. The goal is to
//! hand the caller the most usable object without silently inventing data.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::templates::FieldKind;

const KNOWN_CURRENCIES: &[&str] = &["USD", "EUR", "GBP", "HUF", "CHF", "CAD", "AUD", "JPY"];
const KNOWN_PAYMENT_METHODS: &[&str] = &[
    "cash",
    "card",
    "credit_card",
    "debit_card",
    "bank_transfer",
    "check",
    "paypal",
    "other",
];

/// Outcome of validating one parsed object against a template's field set
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// The (possibly normalized) object
    pub data: Value,
    /// Violations that make a field value unusable
    pub errors: Vec<String>,
    /// Advisory findings; the value was kept or corrected
    pub warnings: Vec<String>,
}

/// Validate `value` against the expected fields, normalizing in place.
///
/// When `buyer` was supplied by the caller it is authoritative and is
/// injected into the object if the model omitted it.
pub fn validate_fields(value: Value, fields: &BTreeMap<String, FieldKind>, buyer: Option<&str>) -> ValidationOutcome {
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            return ValidationOutcome {
                errors: vec![format!(
                    "expected a JSON object, got {}",
                    json_type_name(&other)
                )],
                warnings: Vec::new(),
                data: other,
            };
        }
    };

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for (name, kind) in fields {
        match map.get_mut(name) {
            None | Some(Value::Null) => {
                warnings.push(format!("expected field '{name}' is missing"));
            }
            Some(field_value) => check_field(name, *kind, field_value, &mut errors, &mut warnings),
        }
    }

    if let Some(buyer) = buyer {
        map.entry("buyer".to_string())
            .or_insert_with(|| Value::String(buyer.to_string()));
    }

    ValidationOutcome {
        data: Value::Object(map),
        errors,
        warnings,
    }
}

fn check_field(name: &str, kind: FieldKind, value: &mut Value, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    match kind {
        FieldKind::Text => {
            if !value.is_string() {
                errors.push(format!(
                    "field '{name}' should be text, got {}",
                    json_type_name(value)
                ));
            }
        }
        FieldKind::Number => match &*value {
            Value::Number(_) => {}
            Value::String(s) => {
                // Models often quote amounts; coerce when cleanly numeric
                let cleaned = s.trim().replace(',', "");
                match cleaned.parse::<f64>() {
                    Ok(parsed) if parsed.is_finite() => {
                        warnings.push(format!("field '{name}' was a numeric string, coerced to a number"));
                        if let Some(number) = serde_json::Number::from_f64(parsed) {
                            *value = Value::Number(number);
                        }
                    }
                    _ => {
                        errors.push(format!("field '{name}' should be a number, got '{s}'"));
                    }
                }
            }
            other => {
                errors.push(format!(
                    "field '{name}' should be a number, got {}",
                    json_type_name(other)
                ));
            }
        },
        FieldKind::Date => match value.as_str() {
            Some(s) if is_iso_date(s) => {}
            Some(s) => {
                errors.push(format!("field '{name}' should be a YYYY-MM-DD date, got '{s}'"));
            }
            None => {
                errors.push(format!(
                    "field '{name}' should be a YYYY-MM-DD date, got {}",
                    json_type_name(value)
                ));
            }
        },
        FieldKind::Currency => match value.as_str() {
            Some(s) => {
                let upper = s.trim().to_ascii_uppercase();
                if upper != s {
                    warnings.push(format!("field '{name}' currency code normalized to '{upper}'"));
                }
                if upper.len() != 3 || !KNOWN_CURRENCIES.contains(&upper.as_str()) {
                    warnings.push(format!("field '{name}' has unrecognized currency code '{upper}'"));
                }
                *value = Value::String(upper);
            }
            None => {
                errors.push(format!(
                    "field '{name}' should be a currency code, got {}",
                    json_type_name(value)
                ));
            }
        },
        FieldKind::PaymentMethod => match value.as_str() {
            Some(s) => {
                let lower = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
                if lower != s {
                    warnings.push(format!("field '{name}' payment method normalized to '{lower}'"));
                }
                if !KNOWN_PAYMENT_METHODS.contains(&lower.as_str()) {
                    warnings.push(format!("field '{name}' has unrecognized payment method '{lower}'"));
                }
                *value = Value::String(lower);
            }
            None => {
                errors.push(format!(
                    "field '{name}' should be a payment method, got {}",
                    json_type_name(value)
                ));
            }
        },
    }
}

/// Strict YYYY-MM-DD shape check (calendar validity is left to the reader;
/// the model is prompted for ISO dates and anything else is a shape error)
fn is_iso_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && [0, 1, 2, 3, 5, 6, 8, 9].iter().all(|&i| bytes[i].is_ascii_digit());
    if !shaped {
        return false;
    }
    let month: u32 = s[5..7].parse().unwrap_or(0);
    let day: u32 = s[8..10].parse().unwrap_or(0);
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invoice_fields() -> BTreeMap<String, FieldKind> {
        BTreeMap::from([
            ("seller".to_string(), FieldKind::Text),
            ("total".to_string(), FieldKind::Number),
            ("date".to_string(), FieldKind::Date),
            ("currency".to_string(), FieldKind::Currency),
            ("payment_method".to_string(), FieldKind::PaymentMethod),
        ])
    }

    #[test]
    fn clean_object_passes_without_findings() {
        let value = json!({
            "seller": "Acme Corp",
            "total": 99.5,
            "date": "2026-01-15",
            "currency": "USD",
            "payment_method": "card"
        });
        let outcome = validate_fields(value, &invoice_fields(), None);
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    }

    #[test]
    fn missing_fields_warn_but_do_not_error() {
        let outcome = validate_fields(json!({"seller": "Acme"}), &invoice_fields(), None);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.warnings.len(), 4);
    }

    #[test]
    fn numeric_strings_are_coerced_with_warning() {
        let outcome = validate_fields(json!({"total": "1,234.50"}), &invoice_fields(), None);
        assert!(outcome.errors.is_empty());
        assert!(outcome.warnings.iter().any(|w| w.contains("coerced")));
        assert_eq!(outcome.data["total"], json!(1234.5));
    }

    #[test]
    fn non_numeric_total_is_an_error_and_value_kept() {
        let outcome = validate_fields(json!({"total": "forty-two"}), &invoice_fields(), None);
        assert!(outcome.errors.iter().any(|e| e.contains("'total'")));
        assert_eq!(outcome.data["total"], json!("forty-two"));
    }

    #[test]
    fn currency_is_uppercased_and_unknown_codes_warn() {
        let outcome = validate_fields(json!({"currency": "usd"}), &invoice_fields(), None);
        assert_eq!(outcome.data["currency"], json!("USD"));
        assert!(outcome.warnings.iter().any(|w| w.contains("normalized")));

        let odd = validate_fields(json!({"currency": "XXX"}), &invoice_fields(), None);
        assert!(odd.warnings.iter().any(|w| w.contains("unrecognized currency")));
    }

    #[test]
    fn payment_method_is_normalized() {
        let outcome = validate_fields(json!({"payment_method": "Credit Card"}), &invoice_fields(), None);
        assert_eq!(outcome.data["payment_method"], json!("credit_card"));
    }

    #[test]
    fn malformed_dates_are_errors() {
        for bad in ["15/01/2026", "2026-1-5", "January 15, 2026", "2026-13-01"] {
            let outcome = validate_fields(json!({"date": bad}), &invoice_fields(), None);
            assert!(!outcome.errors.is_empty(), "expected error for {bad}");
        }
        let good = validate_fields(json!({"date": "2026-01-15"}), &invoice_fields(), None);
        assert!(good.errors.is_empty());
    }

    #[test]
    fn caller_supplied_buyer_is_injected_when_absent() {
        let outcome = validate_fields(json!({"seller": "Acme"}), &invoice_fields(), Some("Globex"));
        assert_eq!(outcome.data["buyer"], json!("Globex"));

        // Model-provided buyer is not overwritten
        let kept = validate_fields(json!({"buyer": "From Model"}), &invoice_fields(), Some("Globex"));
        assert_eq!(kept.data["buyer"], json!("From Model"));
    }

    #[test]
    fn non_object_payload_is_a_shape_error() {
        let outcome = validate_fields(json!([1, 2]), &invoice_fields(), None);
        assert!(outcome.errors.iter().any(|e| e.contains("expected a JSON object")));
    }
}
