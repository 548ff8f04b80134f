//! Sign identifier matching
//!
//! A sign identifier is a four-digit code, optionally followed by a decimal
//! suffix (`2001`, `2001.1`). The all-zero code `0000` is a placeholder and is
//! never a sign.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static IDENTIFIER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}(\.\d+)?$").expect("Invalid identifier regex"));

const PLACEHOLDER: &str = "0000";

/// Normalized sign identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Four-digit base without the decimal suffix
    pub fn base(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Decimal suffix, if any (`"1"` for `2001.1`)
    pub fn suffix(&self) -> Option<&str> {
        self.0.split_once('.').map(|(_, suffix)| suffix)
    }

    /// Thousand bucket label, e.g. `2000s` for `2417`
    pub fn thousand_bucket(&self) -> String {
        let lead = self.0.chars().next().unwrap_or('0');
        format!("{lead}000s")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Match a whole token against the identifier pattern.
///
/// Surrounding whitespace is ignored; any other leading or trailing character
/// rejects the token.
pub fn match_identifier(token: &str) -> Option<Identifier> {
    let trimmed = token.trim();
    if trimmed == PLACEHOLDER || !IDENTIFIER_REGEX.is_match(trimmed) {
        return None;
    }
    Some(Identifier(trimmed.to_owned()))
}

pub fn is_identifier(token: &str) -> bool {
    match_identifier(token).is_some()
}

/// Normalize raw recognition output before matching.
///
/// Removes internal whitespace and trims stray `.`/`-` from both ends.
pub fn clean_recognized(text: &str) -> Option<Identifier> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let cleaned = compact.trim_matches(|c| c == '.' || c == '-');
    match_identifier(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_and_decimal_identifiers() {
        for token in ["2001", "2001.1", "1234.56", "9999", "0001", " 3100 "] {
            assert!(is_identifier(token), "{token} should match");
        }
        assert_eq!(match_identifier(" 3100 ").map(|id| id.to_string()), Some("3100".to_owned()));
    }

    #[test]
    fn test_rejects_non_identifiers() {
        for token in [
            "0000", "ABCD", "", "200", "20011", "2001.", ".2001", "A2001", "2001A", "2001-1",
            "12/05/2023", "A-101", "2001.1.2",
        ] {
            assert!(!is_identifier(token), "{token:?} should not match");
        }
    }

    #[test]
    fn test_only_exact_placeholder_is_rejected() {
        assert!(!is_identifier("0000"));
        assert!(is_identifier("0000.1"));
    }

    #[test]
    fn test_base_suffix_and_bucket() {
        let id = match_identifier("2417.3").expect("valid identifier");
        assert_eq!(id.base(), "2417");
        assert_eq!(id.suffix(), Some("3"));
        assert_eq!(id.thousand_bucket(), "2000s");

        let plain = match_identifier("0420").expect("valid identifier");
        assert_eq!(plain.suffix(), None);
        assert_eq!(plain.thousand_bucket(), "0000s");
    }

    #[test]
    fn test_clean_recognized_strips_noise() {
        assert_eq!(clean_recognized("-2001.\n").map(|id| id.to_string()), Some("2001".to_owned()));
        assert_eq!(clean_recognized("20 01.2").map(|id| id.to_string()), Some("2001.2".to_owned()));
        assert_eq!(clean_recognized("..0000--"), None);
        assert_eq!(clean_recognized("S-2001"), None);
        assert_eq!(clean_recognized(""), None);
    }

    #[test]
    fn test_match_is_deterministic() {
        assert_eq!(match_identifier("2001.1"), match_identifier("2001.1"));
    }
}
