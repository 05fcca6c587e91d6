//! Canonical section schema and the combiner that flattens it.

use serde::{Deserialize, Serialize};

/// Section names in their canonical order. Export, display and the fallback
/// combined text all rely on this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    Overview,
    Responsibilities,
    Requirements,
    Qualifications,
    Benefits,
    HowToApply,
    ContactInfo,
    Extra,
}

impl Section {
    pub const CANONICAL: [Section; 8] = [
        Self::Overview,
        Self::Responsibilities,
        Self::Requirements,
        Self::Qualifications,
        Self::Benefits,
        Self::HowToApply,
        Self::ContactInfo,
        Self::Extra,
    ];

    /// JSON key used in model responses and API payloads.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Overview => "overview",
            Self::Responsibilities => "responsibilities",
            Self::Requirements => "requirements",
            Self::Qualifications => "qualifications",
            Self::Benefits => "benefits",
            Self::HowToApply => "howToApply",
            Self::ContactInfo => "contactInfo",
            Self::Extra => "extra",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sections {
    pub overview: Option<String>,
    pub responsibilities: Option<String>,
    pub requirements: Option<String>,
    pub qualifications: Option<String>,
    pub benefits: Option<String>,
    pub how_to_apply: Option<String>,
    pub contact_info: Option<String>,
    pub extra: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Sections {
    pub fn get(&self, section: Section) -> Option<&str> {
        match section {
            Section::Overview => self.overview.as_deref(),
            Section::Responsibilities => self.responsibilities.as_deref(),
            Section::Requirements => self.requirements.as_deref(),
            Section::Qualifications => self.qualifications.as_deref(),
            Section::Benefits => self.benefits.as_deref(),
            Section::HowToApply => self.how_to_apply.as_deref(),
            Section::ContactInfo => self.contact_info.as_deref(),
            Section::Extra => self.extra.as_deref(),
        }
    }

    /// Store a section value; blank text is stored as `None`.
    pub fn set(&mut self, section: Section, value: Option<String>) {
        let value = non_empty(value);
        match section {
            Section::Overview => self.overview = value,
            Section::Responsibilities => self.responsibilities = value,
            Section::Requirements => self.requirements = value,
            Section::Qualifications => self.qualifications = value,
            Section::Benefits => self.benefits = value,
            Section::HowToApply => self.how_to_apply = value,
            Section::ContactInfo => self.contact_info = value,
            Section::Extra => self.extra = value,
        }
    }

    pub fn with(mut self, section: Section, value: impl Into<String>) -> Self {
        self.set(section, Some(value.into()));
        self
    }

    /// Trim every section and turn blank ones into `None`.
    pub fn normalized(self) -> Self {
        let mut out = Sections::default();
        for section in Section::CANONICAL {
            out.set(section, self.get(section).map(str::to_string));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        Section::CANONICAL
            .iter()
            .all(|s| self.get(*s).map_or(true, |v| v.trim().is_empty()))
    }

    /// Present sections in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Section, &str)> + '_ {
        Section::CANONICAL
            .into_iter()
            .filter_map(move |s| self.get(s).map(|v| (s, v)))
    }
}

/// Join the non-empty sections in canonical order with a blank line between
/// them.
pub fn combine(sections: &Sections) -> String {
    sections
        .iter()
        .map(|(_, text)| text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim()
        .to_string()
}

/// Final section text plus its combined plain-text rendering. The combined
/// text is derived at construction and cannot be edited on its own.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Sections")]
pub struct CleanedContent {
    #[serde(flatten)]
    sections: Sections,
    #[serde(rename = "combinedPlainText")]
    combined_plain_text: String,
}

impl CleanedContent {
    pub fn new(sections: Sections) -> Self {
        let sections = sections.normalized();
        let combined_plain_text = combine(&sections);
        Self {
            sections,
            combined_plain_text,
        }
    }

    pub fn sections(&self) -> &Sections {
        &self.sections
    }

    pub fn into_sections(self) -> Sections {
        self.sections
    }

    pub fn get(&self, section: Section) -> Option<&str> {
        self.sections.get(section)
    }

    pub fn combined_plain_text(&self) -> &str {
        &self.combined_plain_text
    }

    pub fn is_empty(&self) -> bool {
        self.combined_plain_text.is_empty()
    }
}

impl From<Sections> for CleanedContent {
    fn from(sections: Sections) -> Self {
        Self::new(sections)
    }
}
