//! Parsing of identifier lists (UPC-A / EAN-13) into submissions.

use std::fmt;

use serde::Serialize;

/// Why a line was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Not 12 or 13 ASCII digits.
    Malformed,
    BadCheckDigit,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Malformed => f.write_str("expected 12 or 13 digits"),
            RejectReason::BadCheckDigit => f.write_str("check digit mismatch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedIdentifier {
    /// 1-based line number in the input.
    pub line: usize,
    pub value: String,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedIdentifiers {
    pub valid: Vec<String>,
    pub rejected: Vec<RejectedIdentifier>,
}

fn is_well_formed(code: &str) -> bool {
    matches!(code.len(), 12 | 13) && code.bytes().all(|b| b.is_ascii_digit())
}

/// Verifies the GS1 check digit of a 12- or 13-digit code.
pub fn has_valid_check_digit(code: &str) -> bool {
    if !is_well_formed(code) {
        return false;
    }
    let digits: Vec<u32> = code.bytes().map(|b| u32::from(b - b'0')).collect();
    let (body, check) = digits.split_at(digits.len() - 1);

    // weights alternate 3,1,3,... starting from the digit next to the check digit
    let total: u32 = body
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { d * 3 } else { *d })
        .sum();
    (10 - total % 10) % 10 == check[0]
}

fn parse_with(text: &str, strict: bool) -> ParsedIdentifiers {
    let mut parsed = ParsedIdentifiers::default();

    for (line_no, line) in text.lines().enumerate() {
        let value = line.trim();
        if value.is_empty() || value.starts_with('#') {
            continue;
        }

        let reason = if !is_well_formed(value) {
            Some(RejectReason::Malformed)
        } else if strict && !has_valid_check_digit(value) {
            Some(RejectReason::BadCheckDigit)
        } else {
            None
        };

        match reason {
            None => parsed.valid.push(value.to_string()),
            Some(reason) => {
                tracing::warn!(line = line_no + 1, value, %reason, "Rejected identifier");
                parsed.rejected.push(RejectedIdentifier {
                    line: line_no + 1,
                    value: value.to_string(),
                    reason,
                });
            }
        }
    }

    tracing::debug!(
        valid = parsed.valid.len(),
        rejected = parsed.rejected.len(),
        "Parsed identifier list"
    );
    parsed
}

/// One identifier per line. Blank lines and `#` comments are ignored.
pub fn parse_identifiers(text: &str) -> ParsedIdentifiers {
    parse_with(text, false)
}

/// Like [`parse_identifiers`], but also rejects codes with a wrong check digit.
pub fn parse_identifiers_strict(text: &str) -> ParsedIdentifiers {
    parse_with(text, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_digits() {
        assert!(has_valid_check_digit("036000291452"));
        assert!(has_valid_check_digit("012345678905"));
        assert!(has_valid_check_digit("4006381333931"));
        assert!(!has_valid_check_digit("036000291453"));
        assert!(!has_valid_check_digit("4006381333932"));
        assert!(!has_valid_check_digit("12345"));
        assert!(!has_valid_check_digit("03600029145a"));
    }

    #[test]
    fn test_parse_skips_blanks_and_comments() {
        let text = "# vinyl batch\n036000291452\n\n  4006381333931  \nabc\n";
        let parsed = parse_identifiers(text);
        assert_eq!(parsed.valid, vec!["036000291452", "4006381333931"]);
        assert_eq!(parsed.rejected.len(), 1);
        assert_eq!(parsed.rejected[0].line, 5);
        assert_eq!(parsed.rejected[0].reason, RejectReason::Malformed);
    }

    #[test]
    fn test_lenient_parse_keeps_bad_check_digit() {
        let parsed = parse_identifiers("036000291453");
        assert_eq!(parsed.valid.len(), 1);

        let strict = parse_identifiers_strict("036000291453\n036000291452");
        assert_eq!(strict.valid, vec!["036000291452"]);
        assert_eq!(strict.rejected[0].reason, RejectReason::BadCheckDigit);
    }
}
