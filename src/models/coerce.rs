//! Best-effort coercion of raw capability output into typed field values.
//!
//! Decision makers and extractors hand back loosely typed JSON. Every value
//! is coerced to its column's [`ColumnType`] before it reaches a row. When a
//! confidence entry exists for the field, coercion appends a note to its
//! reason, and a failed coercion drops the score to `0.0`.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::column::{ColumnMetadata, ColumnType};
use super::value::{FieldConfidence, FieldValue};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%B %d, %Y", "%b %d, %Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S"];

static NUMBER_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn number_pattern() -> Option<&'static Regex> {
    NUMBER_PATTERN
        .get_or_init(|| Regex::new(r"-?\d{1,3}(?:,\d{3})+(?:\.\d+)?|-?\d+(?:\.\d+)?").ok())
        .as_ref()
}

/// Notes gathered while coercing a single value.
#[derive(Debug, Default)]
struct Coercion {
    notes: Vec<String>,
    failed: bool,
}

impl Coercion {
    fn note(&mut self, message: impl Into<String>) {
        self.notes.push(format!("Note: {}", message.into()));
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.failed = true;
        self.notes.push(format!("Error: {}", message.into()));
    }

    fn apply(self, confidence: Option<&mut FieldConfidence>) {
        let Some(conf) = confidence else {
            return;
        };
        for note in self.notes {
            conf.reason.push_str(&format!(" ({})", note));
        }
        if self.failed {
            conf.score = 0.0;
        }
    }
}

/// Coerce a raw JSON value into `column_type`.
///
/// Returns `None` for `null` and for values that cannot be coerced.
pub fn coerce_value(
    raw: &Value,
    column_type: ColumnType,
    confidence: Option<&mut FieldConfidence>,
) -> Option<FieldValue> {
    if raw.is_null() {
        return None;
    }

    let mut coercion = Coercion::default();
    let value = match column_type {
        ColumnType::String => Some(FieldValue::String(to_string(raw, &mut coercion))),
        ColumnType::Number => to_number(raw, &mut coercion).map(FieldValue::Number),
        ColumnType::Boolean => to_bool(raw, &mut coercion).map(FieldValue::Bool),
        ColumnType::Date => to_date(raw, &mut coercion).map(FieldValue::Date),
    };
    coercion.apply(confidence);
    value
}

/// Coerce every known column present in `raw`.
///
/// Keys without column metadata are dropped, as are `null` and uncoercible
/// values.
pub fn coerce_row(
    raw: &serde_json::Map<String, Value>,
    columns: &[ColumnMetadata],
    confidence: &mut BTreeMap<String, FieldConfidence>,
) -> BTreeMap<String, FieldValue> {
    let mut coerced = BTreeMap::new();
    for column in columns {
        let Some(value) = raw.get(&column.name) else {
            continue;
        };
        if let Some(v) = coerce_value(value, column.column_type, confidence.get_mut(&column.name)) {
            coerced.insert(column.name.clone(), v);
        }
    }
    coerced
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_string(raw: &Value, c: &mut Coercion) -> String {
    match raw {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            c.note(format!("Multiple values found and joined: {} items", items.len()));
            items
                .iter()
                .map(scalar_to_string)
                .collect::<Vec<_>>()
                .join(", ")
        }
        other => scalar_to_string(other),
    }
}

fn extract_number(s: &str) -> Option<f64> {
    let found = number_pattern()?.find(s)?;
    found.as_str().replace(',', "").parse().ok()
}

fn to_number(raw: &Value, c: &mut Coercion) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            if let Ok(n) = s.trim().parse::<f64>() {
                if n.is_finite() {
                    return Some(n);
                }
            }
            match extract_number(s) {
                Some(n) => {
                    c.note("Number extracted from string");
                    Some(n)
                }
                None => {
                    c.fail(format!("Could not coerce string '{}' to number", s));
                    None
                }
            }
        }
        Value::Array(items) => {
            let numbers: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
            match numbers.len() {
                0 => {
                    c.fail("No numeric values found in array");
                    None
                }
                1 => Some(numbers[0]),
                n => {
                    c.note(format!("Averaged {} numeric values", n));
                    Some(numbers.iter().sum::<f64>() / n as f64)
                }
            }
        }
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        other => {
            c.fail(format!("Cannot coerce type {} to number", type_name(other)));
            None
        }
    }
}

fn to_bool(raw: &Value, c: &mut Coercion) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" | "y" | "t" => Some(true),
            "false" | "no" | "0" | "off" | "n" | "f" => Some(false),
            _ => {
                c.fail(format!("Could not coerce string '{}' to boolean", s));
                None
            }
        },
        Value::Number(n) => {
            c.note("Coerced from numeric value");
            Some(n.as_f64().is_some_and(|v| v != 0.0))
        }
        Value::Array(items) => match items.len() {
            0 => Some(false),
            1 => to_bool(&items[0], c),
            n => {
                c.note(format!("Coerced from array with {} elements", n));
                Some(true)
            }
        },
        other => {
            c.fail(format!("Cannot coerce type {} to boolean", type_name(other)));
            None
        }
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.date());
        }
    }
    None
}

fn date_from_timestamp(secs: f64) -> Option<NaiveDate> {
    DateTime::from_timestamp(secs as i64, 0).map(|dt| dt.date_naive())
}

fn to_date(raw: &Value, c: &mut Coercion) -> Option<NaiveDate> {
    match raw {
        Value::String(s) => {
            let parsed = parse_date(s);
            if parsed.is_none() {
                c.fail(format!("Could not parse date string '{}'", s));
            }
            parsed
        }
        Value::Number(n) => {
            let parsed = n.as_f64().and_then(date_from_timestamp);
            match parsed {
                Some(_) => c.note("Coerced from Unix timestamp"),
                None => c.fail("Timestamp out of range"),
            }
            parsed
        }
        Value::Array(items) => {
            let first = items.iter().find_map(|item| match item {
                Value::String(s) => parse_date(s),
                Value::Number(n) => n.as_f64().and_then(date_from_timestamp),
                _ => None,
            });
            match first {
                Some(_) => c.note("Date extracted from array"),
                None => c.fail("No valid date found in array"),
            }
            first
        }
        other => {
            c.fail(format!("Cannot coerce type {} to date", type_name(other)));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conf() -> FieldConfidence {
        FieldConfidence::new(0.9, "from search")
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn test_string_from_array_joins_with_note() {
        let mut c = conf();
        let value = coerce_value(&json!(["Alice", "Bob"]), ColumnType::String, Some(&mut c));
        assert_eq!(value, Some(FieldValue::String("Alice, Bob".to_string())));
        assert!(c.reason.contains("joined: 2 items"));
        assert_eq!(c.score, 0.9);
    }

    #[test]
    fn test_number_from_currency_string() {
        let mut c = conf();
        let value = coerce_value(&json!("$1,250.50"), ColumnType::Number, Some(&mut c));
        assert_eq!(value, Some(FieldValue::Number(1250.5)));
        assert!(c.reason.contains("Number extracted from string"));
    }

    #[test]
    fn test_number_failure_zeroes_confidence() {
        let mut c = conf();
        let value = coerce_value(&json!("unknown"), ColumnType::Number, Some(&mut c));
        assert_eq!(value, None);
        assert_eq!(c.score, 0.0);
        assert!(c.reason.contains("Could not coerce string 'unknown' to number"));
    }

    #[test]
    fn test_number_from_array_averages() {
        let mut c = conf();
        let value = coerce_value(&json!([10, 20, "x"]), ColumnType::Number, Some(&mut c));
        assert_eq!(value, Some(FieldValue::Number(15.0)));
        assert!(c.reason.contains("Averaged 2 numeric values"));
    }

    #[test]
    fn test_bool_coercions() {
        assert_eq!(
            coerce_value(&json!("Yes"), ColumnType::Boolean, None),
            Some(FieldValue::Bool(true))
        );
        assert_eq!(
            coerce_value(&json!("off"), ColumnType::Boolean, None),
            Some(FieldValue::Bool(false))
        );
        assert_eq!(
            coerce_value(&json!([]), ColumnType::Boolean, None),
            Some(FieldValue::Bool(false))
        );
        assert_eq!(
            coerce_value(&json!(["no"]), ColumnType::Boolean, None),
            Some(FieldValue::Bool(false))
        );

        let mut c = conf();
        assert_eq!(
            coerce_value(&json!(0), ColumnType::Boolean, Some(&mut c)),
            Some(FieldValue::Bool(false))
        );
        assert!(c.reason.contains("Coerced from numeric value"));

        let mut c = conf();
        assert_eq!(coerce_value(&json!("maybe"), ColumnType::Boolean, Some(&mut c)), None);
        assert_eq!(c.score, 0.0);
    }

    #[test]
    fn test_date_formats() {
        let cases = [
            ("2004-02-04", date(2004, 2, 4)),
            ("02/04/2004", date(2004, 2, 4)),
            ("25/12/2020", date(2020, 12, 25)),
            ("2021-06-01T10:00:00Z", date(2021, 6, 1)),
            ("2021-06-01 10:00:00", date(2021, 6, 1)),
            ("January 2, 2006", date(2006, 1, 2)),
            ("Jan 2, 2006", date(2006, 1, 2)),
        ];
        for (input, expected) in cases {
            assert_eq!(
                coerce_value(&json!(input), ColumnType::Date, None),
                Some(FieldValue::Date(expected)),
                "failed for {}",
                input
            );
        }
    }

    #[test]
    fn test_date_from_timestamp_and_array() {
        let mut c = conf();
        let value = coerce_value(&json!(86400), ColumnType::Date, Some(&mut c));
        assert_eq!(value, Some(FieldValue::Date(date(1970, 1, 2))));
        assert!(c.reason.contains("Unix timestamp"));

        let mut c = conf();
        let value = coerce_value(&json!(["soon", "2010-05-05"]), ColumnType::Date, Some(&mut c));
        assert_eq!(value, Some(FieldValue::Date(date(2010, 5, 5))));
        assert_eq!(c.score, 0.9);
    }

    #[test]
    fn test_coerce_row_drops_unknown_and_null() {
        let columns = vec![
            ColumnMetadata::new("ceo", ColumnType::String),
            ColumnMetadata::new("employees", ColumnType::Number),
            ColumnMetadata::new("public", ColumnType::Boolean),
        ];
        let raw = json!({"ceo": "Jane", "employees": "about 500", "public": null, "extra": 1});
        let raw = raw.as_object().expect("object").clone();
        let mut confidence = BTreeMap::new();
        confidence.insert("employees".to_string(), conf());

        let coerced = coerce_row(&raw, &columns, &mut confidence);
        assert_eq!(coerced.len(), 2);
        assert_eq!(coerced["ceo"], FieldValue::from("Jane"));
        assert_eq!(coerced["employees"], FieldValue::Number(500.0));
        assert!(!coerced.contains_key("public"));
        assert!(!coerced.contains_key("extra"));
        assert!(confidence["employees"].reason.contains("extracted from string"));
    }
}
