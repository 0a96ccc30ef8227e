//! Parsing of numbered follow-up suggestions.

/// Number of follow-up questions requested.
pub const FOLLOWUP_COUNT: usize = 3;

/// Extract up to three items from "1. ..." or "1) ..." lines.
pub fn parse_followups(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(numbered_item)
        .take(FOLLOWUP_COUNT)
        .map(str::to_string)
        .collect()
}

fn numbered_item(line: &str) -> Option<&str> {
    let line = line.trim();
    let digits = line.find(|c: char| !c.is_ascii_digit())?;
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    let item = rest
        .strip_prefix('.')
        .or_else(|| rest.strip_prefix(')'))?
        .trim();
    (!item.is_empty()).then_some(item)
}
