//! Table-level facts (company, location, pay, contract, deadline) pulled
//! from a scraped detail page. Field names vary by site and opportunity
//! type, so each fact has a list of aliases checked in order.

use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value as JsonValue};

const COMPANY_KEYS: &[&str] = &["company", "organization", "provider"];
const SALARY_KEYS: &[&str] = &["salary_range", "salary", "amount", "cost"];
const JOB_TYPE_KEYS: &[&str] = &["contract_type", "job_type", "employment_type"];
const DEADLINE_KEYS: &[&str] = &["deadline", "application_deadline"];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MainInfo {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary_range: Option<String>,
    pub job_type: Option<String>,
    pub deadline: Option<NaiveDate>,
}

fn text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Array(items) => {
            let joined = items.iter().filter_map(text).collect::<Vec<_>>().join(", ");
            Some(joined).filter(|s| !s.is_empty())
        }
        _ => None,
    }
}

fn first_text(data: &Map<String, JsonValue>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| data.get(*key).and_then(text))
}

/// Dates are kept only when they parse; free text like "rolling" is dropped.
pub fn parse_deadline(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.date_naive());
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

impl MainInfo {
    pub fn from_scraped(data: &Map<String, JsonValue>) -> Self {
        Self {
            title: first_text(data, &["title"]),
            company: first_text(data, COMPANY_KEYS),
            location: first_text(data, &["location"]),
            salary_range: first_text(data, SALARY_KEYS),
            job_type: first_text(data, JOB_TYPE_KEYS),
            deadline: DEADLINE_KEYS
                .iter()
                .filter_map(|key| data.get(*key).and_then(text))
                .find_map(|value| parse_deadline(&value)),
        }
    }
}
