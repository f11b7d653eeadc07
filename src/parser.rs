use std::str::FromStr;
use std::sync::OnceLock;

use log::{debug, warn};
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;

/// One `(label, amount)` line extracted from a broadcast message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedEntry {
    pub label: String,
    pub amount: Decimal,
}

/// The full ordered extraction from one message, sorted by amount descending.
/// Replaces any prior snapshot process-wide; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedSnapshot {
    pub entries: Vec<ParsedEntry>,
}

impl ParsedSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^\^(.+?)\$(-?[\d\s\u{a0}.,]+)\$").expect("entry pattern compiles")
    })
}

/// True when the text carries both delimiter characters and is worth parsing.
pub fn looks_like_balance_message(text: &str) -> bool {
    text.contains('^') && text.contains('$')
}

/// Normalize a raw amount capture: strip space/no-break-space separators and
/// coerce the decimal comma to a dot before parsing.
fn parse_amount(raw: &str) -> Option<Decimal> {
    let normalized: String = raw
        .chars()
        .filter(|c| *c != ' ' && *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    Decimal::from_str(&normalized).ok()
}

/// Extract all `^label$amount$` lines from `text`.
///
/// Returns the entries sorted by amount descending plus the total over all
/// parsed values. The total is accumulated in encounter order before the
/// sort; decimal addition is exact, so ordering cannot change it. A matched
/// line whose amount fails to parse is skipped with a warning rather than
/// failing the whole message.
pub fn parse_balance_message(text: &str) -> (ParsedSnapshot, Decimal) {
    let mut entries = Vec::new();
    let mut total = Decimal::ZERO;

    for caps in entry_pattern().captures_iter(text) {
        let label = caps[1].trim().to_string();
        match parse_amount(&caps[2]) {
            Some(amount) => {
                total += amount;
                entries.push(ParsedEntry { label, amount });
            }
            None => {
                warn!("skipping entry '{}': malformed amount '{}'", label, &caps[2]);
            }
        }
    }

    entries.sort_by(|a, b| b.amount.cmp(&a.amount));
    debug!("parsed {} entries, total {}", entries.len(), total);

    (ParsedSnapshot { entries }, total)
}
