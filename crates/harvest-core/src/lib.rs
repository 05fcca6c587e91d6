//! Core domain model for opportunity harvesting: records, lifecycle states,
//! section schema and the pure text normalizers.

pub mod boilerplate;
pub mod candidate;
pub mod sections;
pub mod slice;
pub mod source_url;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

pub use boilerplate::strip;
pub use candidate::{CandidateId, CandidateRecord, ScrapeOptions, ScrapeOutcome};
pub use sections::{combine, CleanedContent, Section, Sections};
pub use slice::slice_opportunity_section;
pub use source_url::normalize_source_url;

pub const CRATE_NAME: &str = "harvest-core";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityType {
    Job,
    Funding,
    Training,
}

impl OpportunityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Funding => "funding",
            Self::Training => "training",
        }
    }

    /// Field names requested from the scrape service for the table-level
    /// "main info" of a posting of this type.
    pub fn main_info_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Job => &[
                "title",
                "company",
                "organization",
                "location",
                "salary_range",
                "salary",
                "contract_type",
                "job_type",
                "employment_type",
                "deadline",
                "application_deadline",
            ],
            Self::Funding => &[
                "title",
                "organization",
                "location",
                "amount",
                "deadline",
                "application_deadline",
            ],
            Self::Training => &[
                "title",
                "provider",
                "organization",
                "location",
                "cost",
                "deadline",
                "application_deadline",
            ],
        }
    }
}

impl fmt::Display for OpportunityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for OpportunityType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "job" => Ok(Self::Job),
            "funding" => Ok(Self::Funding),
            "training" => Ok(Self::Training),
            _ => Err(ParseEnumError {
                kind: "opportunity type",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("extraction status cannot move from {from} to {to}")]
pub struct StatusTransitionError {
    pub from: ExtractionStatus,
    pub to: ExtractionStatus,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Only pending -> processing -> {completed, failed} is allowed.
    pub fn can_advance_to(&self, next: ExtractionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn advance(&mut self, next: ExtractionStatus) -> Result<(), StatusTransitionError> {
        if !self.can_advance_to(next) {
            return Err(StatusTransitionError { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseEnumError {
                kind: "extraction status",
                value: s.to_string(),
            }),
        }
    }
}

/// Which path produced a record's final section text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "model", rename_all = "snake_case")]
pub enum PolishSource {
    Model(String),
    RuleBased,
}

impl PolishSource {
    const RULE_BASED: &'static str = "rule-based";
    const MODEL_PREFIX: &'static str = "model:";

    /// Column encoding: `model:<id>` or `rule-based`.
    pub fn to_column(&self) -> String {
        match self {
            Self::Model(id) => format!("{}{id}", Self::MODEL_PREFIX),
            Self::RuleBased => Self::RULE_BASED.to_string(),
        }
    }

    pub fn from_column(value: &str) -> Self {
        match value.strip_prefix(Self::MODEL_PREFIX) {
            Some(id) if !id.is_empty() => Self::Model(id.to_string()),
            _ => Self::RuleBased,
        }
    }
}

/// Normalization lifecycle of a stored record. `Raw` content may still be
/// sent through the extractor; `Polished` content is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PolishState {
    #[default]
    Raw,
    Polished {
        at: DateTime<Utc>,
        by: PolishSource,
    },
}

impl PolishState {
    pub fn from_columns(polished_at: Option<DateTime<Utc>>, polished_by: Option<&str>) -> Self {
        match polished_at {
            Some(at) => Self::Polished {
                at,
                by: polished_by
                    .map(PolishSource::from_column)
                    .unwrap_or(PolishSource::RuleBased),
            },
            None => Self::Raw,
        }
    }

    pub fn is_polished(&self) -> bool {
        matches!(self, Self::Polished { .. })
    }

    pub fn polished_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Polished { at, .. } => Some(*at),
            Self::Raw => None,
        }
    }

    pub fn polished_by(&self) -> Option<&PolishSource> {
        match self {
            Self::Polished { by, .. } => Some(by),
            Self::Raw => None,
        }
    }
}

/// Persisted extraction record for a single opportunity page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedOpportunity {
    pub id: Uuid,
    pub title: String,
    pub opportunity_type: OpportunityType,
    pub source_url: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary_range: Option<String>,
    pub job_type: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub description: Option<String>,
    pub responsibilities: Option<String>,
    pub requirements: Option<String>,
    pub qualifications: Option<String>,
    pub benefits: Option<String>,
    pub application_instructions: Option<String>,
    pub contact_info: Option<String>,
    pub additional_info: Option<String>,
    pub raw_content: Option<String>,
    pub structured_content: Option<Map<String, JsonValue>>,
    pub extraction_status: ExtractionStatus,
    pub extraction_error: Option<String>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub model_used: Option<String>,
    pub extraction_cost: Option<f64>,
    pub polish: PolishState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtractedOpportunity {
    /// Fresh `pending` row with every content field empty.
    pub fn pending(
        title: impl Into<String>,
        source_url: impl Into<String>,
        opportunity_type: OpportunityType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            opportunity_type,
            source_url: source_url.into(),
            company: None,
            location: None,
            salary_range: None,
            job_type: None,
            deadline: None,
            description: None,
            responsibilities: None,
            requirements: None,
            qualifications: None,
            benefits: None,
            application_instructions: None,
            contact_info: None,
            additional_info: None,
            raw_content: None,
            structured_content: None,
            extraction_status: ExtractionStatus::Pending,
            extraction_error: None,
            extracted_at: None,
            model_used: None,
            extraction_cost: None,
            polish: PolishState::Raw,
            created_at: now,
            updated_at: now,
        }
    }

    /// The eight content sections exactly as stored.
    pub fn stored_sections(&self) -> Sections {
        Sections {
            overview: self.description.clone(),
            responsibilities: self.responsibilities.clone(),
            requirements: self.requirements.clone(),
            qualifications: self.qualifications.clone(),
            benefits: self.benefits.clone(),
            how_to_apply: self.application_instructions.clone(),
            contact_info: self.contact_info.clone(),
            extra: self.additional_info.clone(),
        }
        .normalized()
    }

    /// Overwrite the content columns with a cleaned section set.
    pub fn apply_sections(&mut self, sections: &Sections) {
        self.description = sections.overview.clone();
        self.responsibilities = sections.responsibilities.clone();
        self.requirements = sections.requirements.clone();
        self.qualifications = sections.qualifications.clone();
        self.benefits = sections.benefits.clone();
        self.application_instructions = sections.how_to_apply.clone();
        self.contact_info = sections.contact_info.clone();
        self.additional_info = sections.extra.clone();
    }
}

/// Input to the section extractor: whatever free text a record carries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawOpportunityContent {
    pub description: Option<String>,
    pub responsibilities: Option<String>,
    pub requirements: Option<String>,
    pub qualifications: Option<String>,
    pub benefits: Option<String>,
    pub application_instructions: Option<String>,
    pub contact_info: Option<String>,
    pub raw_content: Option<String>,
    pub structured_content: Option<Map<String, JsonValue>>,
}

impl RawOpportunityContent {
    /// Structured fields in canonical section order, paired with the section
    /// each one feeds.
    pub fn structured_fields(&self) -> [(Section, Option<&str>); 7] {
        [
            (Section::Overview, self.description.as_deref()),
            (Section::Responsibilities, self.responsibilities.as_deref()),
            (Section::Requirements, self.requirements.as_deref()),
            (Section::Qualifications, self.qualifications.as_deref()),
            (Section::Benefits, self.benefits.as_deref()),
            (Section::HowToApply, self.application_instructions.as_deref()),
            (Section::ContactInfo, self.contact_info.as_deref()),
        ]
    }

    /// Free text hidden in `structured_content` under the keys scrapers
    /// commonly use for a posting body.
    pub fn structured_text(&self) -> Option<&str> {
        let map = self.structured_content.as_ref()?;
        ["description", "full_description", "job_details", "content"]
            .iter()
            .filter_map(|key| map.get(*key).and_then(JsonValue::as_str))
            .find(|text| !text.trim().is_empty())
    }
}

impl From<&ExtractedOpportunity> for RawOpportunityContent {
    fn from(record: &ExtractedOpportunity) -> Self {
        Self {
            description: record.description.clone(),
            responsibilities: record.responsibilities.clone(),
            requirements: record.requirements.clone(),
            qualifications: record.qualifications.clone(),
            benefits: record.benefits.clone(),
            application_instructions: record.application_instructions.clone(),
            contact_info: record.contact_info.clone(),
            raw_content: record.raw_content.clone(),
            structured_content: record.structured_content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        let mut status = ExtractionStatus::Pending;
        assert!(status.advance(ExtractionStatus::Completed).is_err());
        status.advance(ExtractionStatus::Processing).expect("pending -> processing");
        status.advance(ExtractionStatus::Failed).expect("processing -> failed");
        let err = status
            .advance(ExtractionStatus::Processing)
            .expect_err("failed is terminal");
        assert_eq!(err.from, ExtractionStatus::Failed);
        assert_eq!(status, ExtractionStatus::Failed);
    }

    #[test]
    fn polish_state_round_trips_through_columns() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T09:30:00Z")
            .expect("ts")
            .with_timezone(&Utc);
        let state = PolishState::Polished {
            at,
            by: PolishSource::Model("gpt-4o-mini".into()),
        };
        let by = state.polished_by().map(PolishSource::to_column);
        assert_eq!(by.as_deref(), Some("model:gpt-4o-mini"));
        assert_eq!(PolishState::from_columns(state.polished_at(), by.as_deref()), state);
        assert_eq!(PolishState::from_columns(None, Some("rule-based")), PolishState::Raw);
    }

    #[test]
    fn opportunity_type_parses_case_insensitively() {
        assert_eq!("Funding".parse::<OpportunityType>().unwrap(), OpportunityType::Funding);
        assert!("internship".parse::<OpportunityType>().is_err());
    }

    #[test]
    fn structured_text_prefers_known_body_keys() {
        let mut map = Map::new();
        map.insert("content".into(), JsonValue::String("body text".into()));
        map.insert("description".into(), JsonValue::String("  ".into()));
        let raw = RawOpportunityContent {
            structured_content: Some(map),
            ..Default::default()
        };
        assert_eq!(raw.structured_text(), Some("body text"));
    }
}
