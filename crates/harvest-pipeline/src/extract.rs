//! Turns noisy posting text into the fixed section schema, with a language
//! model when one is configured and the rule-based stripper otherwise.

use std::sync::Arc;

use harvest_adapters::TextModel;
use harvest_core::{strip, CleanedContent, PolishSource, RawOpportunityContent, Section, Sections};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

const PROMPT_HEADER: &str = r#"You are given the full text of an opportunity detail page (job, funding call, training programme).
The text may include navigation menus, cookie banners, footers, subscription widgets and other site boilerplate.

Keep every piece of information about the opportunity itself, word for word. Do not summarize, shorten or reword anything.
Remove only site boilerplate: cookie notices, navigation menus, footer links, social media links, subscription widgets,
generic site-wide warnings and anything that appears before the opportunity heading.

Return only a JSON object with exactly these keys, each holding plain text (no Markdown, no HTML) or an empty string:
{
  "overview": "full description of the opportunity",
  "responsibilities": "every responsibility, task or scope item",
  "requirements": "every requirement: education, experience, skills, certifications",
  "qualifications": "formal qualifications when listed separately from requirements",
  "benefits": "every benefit offered",
  "howToApply": "complete application instructions, documents and submission details",
  "contactInfo": "all contact details",
  "extra": "any other opportunity details: deadlines, dates, location, salary, contract terms"
}

TEXT TO CLEAN:
"#;

/// Build the single prompt sent to the model for `text`.
pub fn build_prompt(text: &str) -> String {
    format!("{PROMPT_HEADER}{}", text.trim())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedReply {
    #[error("reply is not valid JSON: {0}")]
    Json(String),
    #[error("reply is not a JSON object")]
    NotObject,
    #[error("section `{0}` is not a string")]
    NotString(&'static str),
}

/// Read the eight canonical keys from a model reply. Missing keys and `null`
/// count as empty; any other non-string value makes the reply malformed.
pub fn parse_model_sections(reply: &str) -> Result<Sections, MalformedReply> {
    let value: JsonValue =
        serde_json::from_str(reply.trim()).map_err(|e| MalformedReply::Json(e.to_string()))?;
    let JsonValue::Object(map) = value else {
        return Err(MalformedReply::NotObject);
    };

    let mut sections = Sections::default();
    for section in Section::CANONICAL {
        match map.get(section.key()) {
            None | Some(JsonValue::Null) => {}
            Some(JsonValue::String(text)) => sections.set(section, Some(text.clone())),
            Some(_) => return Err(MalformedReply::NotString(section.key())),
        }
    }
    Ok(sections)
}

/// Content produced by the extractor and the path that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub content: CleanedContent,
    pub source: PolishSource,
}

impl Extraction {
    fn rule_based(content: CleanedContent) -> Self {
        Self {
            content,
            source: PolishSource::RuleBased,
        }
    }
}

#[derive(Clone, Default)]
pub struct SectionExtractor {
    model: Option<Arc<dyn TextModel>>,
}

impl std::fmt::Debug for SectionExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionExtractor")
            .field("model", &self.model.as_ref().map(|m| m.model_id().to_string()))
            .finish()
    }
}

impl SectionExtractor {
    pub fn new(model: Option<Arc<dyn TextModel>>) -> Self {
        Self { model }
    }

    pub fn rule_based() -> Self {
        Self { model: None }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Rule-based cleaning only: each structured field is stripped on its
    /// own, and the raw page text fills `extra` when no structured field
    /// survives.
    pub fn polish_locally(&self, raw: &RawOpportunityContent) -> CleanedContent {
        let mut sections = Sections::default();
        for (section, text) in raw.structured_fields() {
            sections.set(section, Some(strip(text)));
        }

        if sections.is_empty() {
            let fallback = raw
                .raw_content
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .or_else(|| raw.structured_text());
            if let Some(text) = fallback {
                sections.set(Section::Extra, Some(strip(Some(text))));
            }
        }

        CleanedContent::new(sections)
    }

    pub async fn extract(&self, raw: &RawOpportunityContent) -> CleanedContent {
        self.extract_detailed(raw).await.content
    }

    /// Never fails: every model problem degrades to the rule-based result.
    pub async fn extract_detailed(&self, raw: &RawOpportunityContent) -> Extraction {
        let local = self.polish_locally(raw);
        let Some(model) = &self.model else {
            return Extraction::rule_based(local);
        };

        let text = if local.is_empty() {
            model_input_from_raw(raw)
        } else {
            local.combined_plain_text().to_string()
        };
        if text.is_empty() {
            return Extraction::rule_based(local);
        }

        let span = info_span!("model_extract", model = model.model_id(), chars = text.len());
        let reply = model.complete_json(&build_prompt(&text)).instrument(span).await;

        let sections = match reply {
            Ok(reply) => match parse_model_sections(&reply) {
                Ok(sections) => sections,
                Err(err) => {
                    warn!(error = %err, "malformed model reply; using rule-based sections");
                    return Extraction::rule_based(local);
                }
            },
            Err(err) => {
                warn!(error = %err, "model call failed; using rule-based sections");
                return Extraction::rule_based(local);
            }
        };

        let content = CleanedContent::new(sections);
        if content.is_empty() {
            debug!("model returned only empty sections; using rule-based sections");
            return Extraction::rule_based(local);
        }
        Extraction {
            content,
            source: PolishSource::Model(model.model_id().to_string()),
        }
    }
}

/// Every raw field, stripped as one block.
fn model_input_from_raw(raw: &RawOpportunityContent) -> String {
    let joined = raw
        .structured_fields()
        .into_iter()
        .filter_map(|(_, text)| text)
        .chain(raw.raw_content.as_deref())
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    strip(Some(&joined))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_trimmed_text_after_the_instructions() {
        let prompt = build_prompt("  Role text \n");
        assert!(prompt.ends_with("TEXT TO CLEAN:\nRole text"));
        for section in Section::CANONICAL {
            assert!(prompt.contains(&format!("\"{}\"", section.key())));
        }
    }

    #[test]
    fn missing_and_null_keys_are_empty() {
        let sections =
            parse_model_sections(r#"{"overview": "  Lead the team ", "benefits": null}"#).expect("parse");
        assert_eq!(sections.overview.as_deref(), Some("Lead the team"));
        assert_eq!(sections.benefits, None);
        assert_eq!(sections.extra, None);
    }

    #[test]
    fn non_object_and_non_string_replies_are_malformed() {
        assert_eq!(parse_model_sections("[1, 2]"), Err(MalformedReply::NotObject));
        assert_eq!(
            parse_model_sections(r#"{"overview": 3}"#),
            Err(MalformedReply::NotString("overview"))
        );
        assert!(matches!(parse_model_sections("not json"), Err(MalformedReply::Json(_))));
    }

    #[test]
    fn raw_content_feeds_extra_only_without_structured_fields() {
        let extractor = SectionExtractor::rule_based();
        let raw = RawOpportunityContent {
            raw_content: Some("We use cookies to improve your visit.\nField Officer role".into()),
            ..Default::default()
        };
        let cleaned = extractor.polish_locally(&raw);
        assert_eq!(cleaned.get(Section::Extra), Some("Field Officer role"));

        let raw = RawOpportunityContent {
            requirements: Some("Degree in agronomy".into()),
            raw_content: Some("Whole page".into()),
            ..Default::default()
        };
        let cleaned = extractor.polish_locally(&raw);
        assert_eq!(cleaned.get(Section::Extra), None);
        assert_eq!(cleaned.combined_plain_text(), "Degree in agronomy");
    }

    #[test]
    fn boilerplate_only_fields_do_not_count_as_structured() {
        let raw = RawOpportunityContent {
            description: Some("Facebook\nLinkedIn".into()),
            raw_content: Some("Grant for rural cooperatives".into()),
            ..Default::default()
        };
        let cleaned = SectionExtractor::rule_based().polish_locally(&raw);
        assert_eq!(cleaned.get(Section::Overview), None);
        assert_eq!(cleaned.get(Section::Extra), Some("Grant for rural cooperatives"));
    }
}
