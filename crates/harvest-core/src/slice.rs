//! Cuts a full page dump down to the posting body between the title and the
//! apply link.

/// Markers that end the posting body on most listing sites.
const APPLY_MARKERS: &[&str] = &["\napply", " apply", "[apply", "apply"];

const TITLE_SNIPPET_CHARS: usize = 180;
const MIN_KEEP_CHARS: usize = 500;

/// Keep the part of a full page dump that runs from the opportunity title to
/// the first "apply" marker after it.
///
/// Returns the input unchanged when the title cannot be found or when the
/// slice would throw away nearly everything.
pub fn slice_opportunity_section(raw: &str, title: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let snippet: String = title
        .trim()
        .chars()
        .take(TITLE_SNIPPET_CHARS)
        .collect::<String>()
        .to_lowercase();
    if snippet.is_empty() {
        return raw.to_string();
    }

    let (lower, offsets) = lowercase_with_offsets(raw);
    let Some(start) = lower.find(&snippet) else {
        return raw.to_string();
    };

    let search_from = start + snippet.len();
    let end = APPLY_MARKERS
        .iter()
        .filter_map(|marker| lower[search_from..].find(marker).map(|i| search_from + i))
        .min();

    let sliced = match end {
        Some(end) => &raw[offsets[start]..offsets[end]],
        None => &raw[offsets[start]..],
    };
    let trimmed = sliced.trim();

    let floor = MIN_KEEP_CHARS.min(raw.len() / 10);
    if trimmed.len() < floor {
        return raw.to_string();
    }
    trimmed.to_string()
}

/// Lowercase `raw` and map every byte of the result back to the start of the
/// source character it came from. The final entry maps `lower.len()` to
/// `raw.len()`.
fn lowercase_with_offsets(raw: &str) -> (String, Vec<usize>) {
    let mut lower = String::with_capacity(raw.len());
    let mut offsets = Vec::with_capacity(raw.len() + 1);
    for (at, ch) in raw.char_indices() {
        for folded in ch.to_lowercase() {
            lower.push(folded);
            offsets.extend(std::iter::repeat(at).take(folded.len_utf8()));
        }
    }
    offsets.push(raw.len());
    (lower, offsets)
}
