//! Rule-based boilerplate stripper. Used as the free first pass before the
//! language model and as the fallback when the model is unavailable.
//!
//! Only known page-chrome shapes are matched; generic short lines, headings
//! and numbered lists always survive.

use std::sync::LazyLock;

use regex::Regex;

static BOILERPLATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)we use cookies[^.\n]*\.",
        r"(?i)cookies? policy[^.\n]*\.",
        r"(?i)back to search results",
        r"(?i)powered by pageup",
        r"(?i)toggle navigation",
        r"(?i)main navigation",
        r"(?i)subscribe\s+recaptcha\s+privacy agreement",
        r"(?i)unicef careers home",
        r"(?i)beware of fraudulent job offers",
        r"(?im)^[ \t]*legal[ \t]*$",
        r"(?im)^[ \t]*accessibility[ \t]*$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static boilerplate pattern"))
    .collect()
});

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("static blank-run pattern"));

const NAVIGATION_LABELS: &[&str] = &[
    "global links",
    "main navigation",
    "footer",
    "footer secondary",
    "social",
];

const SOCIAL_LABELS: &[&str] = &["facebook", "linkedin", "twitter", "youtube", "whatsapp"];

const PROMO_PREFIXES: &[&str] = &[
    "we will email you new jobs that match this search",
    "great, we can send you jobs like this",
    "the email address was invalid",
    "you must agree to the privacy statement",
    "sharethis copy and paste",
];

fn is_noise_line(line: &str) -> bool {
    let lower = line.trim().to_lowercase();
    lower.is_empty()
        || NAVIGATION_LABELS.contains(&lower.as_str())
        || SOCIAL_LABELS.contains(&lower.as_str())
        || PROMO_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
}

/// Strip cookie, navigation, footer, social and subscription noise from a
/// block of page text.
pub fn strip(text: Option<&str>) -> String {
    let Some(text) = text.filter(|t| !t.is_empty()) else {
        return String::new();
    };

    let mut cleaned = text.replace("\r\n", "\n");
    for pattern in BOILERPLATE_PATTERNS.iter() {
        cleaned = pattern.replace_all(&cleaned, "").into_owned();
    }

    let kept = cleaned
        .split('\n')
        .map(str::trim_end)
        .filter(|line| !is_noise_line(line))
        .collect::<Vec<_>>()
        .join("\n");

    BLANK_RUNS.replace_all(&kept, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_boilerplate_pattern_compiles() {
        assert_eq!(BOILERPLATE_PATTERNS.len(), 11);
    }

    #[test]
    fn removes_cookie_sentence_and_keeps_content_line() {
        let out = strip(Some(
            "We use cookies to improve your experience.\nReal job description here.",
        ));
        assert_eq!(out, "Real job description here.");
    }

    #[test]
    fn null_and_empty_input_yield_empty_string() {
        assert_eq!(strip(None), "");
        assert_eq!(strip(Some("")), "");
        assert_eq!(strip(Some("  \n\n ")), "");
    }

    #[test]
    fn drops_navigation_social_and_promo_lines() {
        let input = "Toggle navigation\nGlobal Links\nProgramme Officer\nFacebook\nLinkedIn\n\
                     We will email you new jobs that match this search.\nShareThis Copy and Paste\n\
                     Lead the country programme.";
        assert_eq!(strip(Some(input)), "Programme Officer\nLead the country programme.");
    }

    #[test]
    fn keeps_numbered_lists_headings_and_short_lines() {
        let input = "Requirements\n1. Degree\n2. Five years\nLegal assistant duties\nParalegal\nSocial work experience";
        assert_eq!(strip(Some(input)), input);
    }

    #[test]
    fn whole_line_legal_and_accessibility_labels_are_removed() {
        let input = "Apply by 1 May\nLegal\n  Accessibility  \nThanks";
        assert_eq!(strip(Some(input)), "Apply by 1 May\nThanks");
    }

    #[test]
    fn normalizes_line_endings_and_is_deterministic() {
        let input = "Intro\r\nCookie policy applies here.\r\nDuties\r\n";
        let first = strip(Some(input));
        assert_eq!(first, "Intro\nDuties");
        assert_eq!(strip(Some(input)), first);
    }
}
