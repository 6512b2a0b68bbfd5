use std::sync::LazyLock;

use regex::Regex;

use crate::config::ServiceArea;

static POSTAL_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCEP\b\s*:?\s*").expect("valid postal label regex"));

static POSTAL_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{5})[-.\s]?(\d{3})\b").expect("valid postal code regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Prepares a free-text address for the geocoder.
///
/// Drops the `CEP:` label, collapses whitespace, and appends the service area
/// when the locality is not already mentioned.
pub fn normalize_address(raw: &str, area: &ServiceArea) -> String {
    let without_label = POSTAL_LABEL.replace_all(raw, "");
    let collapsed = WHITESPACE.replace_all(without_label.trim(), " ");
    let trimmed = collapsed.trim_end_matches([',', '-', ' ', ';']).to_string();

    if trimmed.is_empty() || mentions(&trimmed, &area.locality) {
        return trimmed;
    }

    format!(
        "{trimmed}, {}, {}, {}",
        area.locality, area.region, area.country
    )
}

/// Finds the first postal code (`NNNNN-NNN` or eight digits) and returns it
/// as `NNNNN-NNN`.
pub fn extract_postal_code(text: &str) -> Option<String> {
    POSTAL_CODE
        .captures(text)
        .map(|caps| format!("{}-{}", &caps[1], &caps[2]))
}

/// Digits-only form used by the postal lookup service.
pub fn postal_digits(code: &str) -> Option<String> {
    let digits: String = code.chars().filter(char::is_ascii_digit).collect();
    let only_digits_and_separators = code
        .trim()
        .chars()
        .all(|c| c.is_ascii_digit() || c == '-' || c == '.' || c == ' ');

    (digits.len() == 8 && only_digits_and_separators).then_some(digits)
}

fn mentions(haystack: &str, needle: &str) -> bool {
    let needle = fold(needle);
    !needle.is_empty() && fold(haystack).contains(&needle)
}

pub(crate) fn fold(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}
