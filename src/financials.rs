//! Balance-sheet extraction from registry detail responses.
//!
//! The registry nests financial data under several keys and formats it
//! inconsistently. Parsing never fails: anything unusable is skipped and
//! the caller sees an empty series instead.

use crate::models::{BalanceSheetInfo, FinancialSeries};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Detail keys that may hold financial data, in priority order.
pub const FINANCIAL_SECTIONS: [&str; 4] =
    ["financial_summary", "accounts", "latest_accounts", "financials"];

const YEAR_KEYS: [&str; 7] = [
    "year",
    "fiscal_year",
    "period_end",
    "made_up_to",
    "end_date",
    "date",
    "period",
];
const VALUE_KEYS: [&str; 3] = ["value", "amount", "total"];

/// Which asset class a series belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetClass {
    Current,
    Fixed,
}

impl AssetClass {
    fn key(&self) -> &'static str {
        match self {
            AssetClass::Current => "current_assets",
            AssetClass::Fixed => "fixed_assets",
        }
    }
}

/// Everything the extractor needs to know about a company's financials.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFinancials {
    /// Non-empty financial sections, verbatim.
    pub raw: Option<Value>,
    pub series: FinancialSeries,
    pub balance_sheet: BalanceSheetInfo,
}

impl ParsedFinancials {
    /// Any financial section was present and non-empty.
    pub fn has_financial_data(&self) -> bool {
        self.raw.is_some()
    }

    /// No usable total-assets value for any year.
    pub fn insufficient_data(&self) -> bool {
        self.series.is_insufficient()
    }
}

/// Parse the financial sections of a `results.company` object.
pub fn parse_company_financials(company: &Value) -> ParsedFinancials {
    let sections = collect_sections(company);
    if sections.is_empty() {
        return ParsedFinancials::default();
    }

    let mut series = FinancialSeries::default();
    let mut balance_sheet = BalanceSheetInfo::default();

    // Map iteration is alphabetical; walk the sections in priority order.
    for section in FINANCIAL_SECTIONS.iter().filter_map(|key| sections.get(*key)) {
        for holder in section_holders(section) {
            for class in [AssetClass::Current, AssetClass::Fixed] {
                let Some(field) = holder.get(class.key()) else {
                    continue;
                };
                let entries = entry_count(field);
                if entries == 0 {
                    continue;
                }
                match class {
                    AssetClass::Current => {
                        balance_sheet.has_current_assets = true;
                        balance_sheet.current_assets_entries =
                            balance_sheet.current_assets_entries.max(entries);
                        merge_first_wins(&mut series.current_assets, parse_series(field));
                    }
                    AssetClass::Fixed => {
                        balance_sheet.has_fixed_assets = true;
                        balance_sheet.fixed_assets_entries =
                            balance_sheet.fixed_assets_entries.max(entries);
                        merge_first_wins(&mut series.fixed_assets, parse_series(field));
                    }
                }
            }
        }
    }

    ParsedFinancials {
        raw: Some(Value::Object(sections)),
        series,
        balance_sheet,
    }
}

/// Non-empty financial sections keyed by their detail-response name.
fn collect_sections(company: &Value) -> Map<String, Value> {
    FINANCIAL_SECTIONS
        .iter()
        .filter_map(|key| {
            let value = company.get(*key)?;
            let non_empty = match value {
                Value::Null => false,
                Value::Array(items) => !items.is_empty(),
                Value::Object(map) => !map.is_empty(),
                Value::String(s) => !s.trim().is_empty(),
                _ => true,
            };
            non_empty.then(|| (key.to_string(), value.clone()))
        })
        .collect()
}

/// Objects within a section that may carry asset fields.
fn section_holders(section: &Value) -> Vec<&Map<String, Value>> {
    match section {
        Value::Object(map) => vec![map],
        Value::Array(items) => items.iter().filter_map(|item| item.as_object()).collect(),
        _ => Vec::new(),
    }
}

fn entry_count(field: &Value) -> usize {
    match field {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 0,
    }
}

fn merge_first_wins(target: &mut BTreeMap<i32, f64>, incoming: BTreeMap<i32, f64>) {
    for (year, value) in incoming {
        target.entry(year).or_insert(value);
    }
}

/// Parse one `current_assets` / `fixed_assets` field into year -> value.
///
/// Accepts a list of `{year-ish: .., value-ish: ..}` entries or an object
/// keyed by year. Entries without a year or a numeric value are skipped.
pub fn parse_series(field: &Value) -> BTreeMap<i32, f64> {
    let mut out = BTreeMap::new();
    match field {
        Value::Array(entries) => {
            for entry in entries {
                let Some(obj) = entry.as_object() else {
                    continue;
                };
                let year = YEAR_KEYS
                    .iter()
                    .filter_map(|k| obj.get(*k))
                    .find_map(parse_year);
                let value = VALUE_KEYS
                    .iter()
                    .filter_map(|k| obj.get(*k))
                    .find_map(parse_amount);
                if let (Some(year), Some(value)) = (year, value) {
                    out.entry(year).or_insert(value);
                }
            }
        }
        Value::Object(map) => {
            for (key, value) in map {
                if let (Some(year), Some(amount)) =
                    (parse_year(&Value::String(key.clone())), parse_amount(value))
                {
                    out.entry(year).or_insert(amount);
                }
            }
        }
        _ => {}
    }
    out
}

fn year_regex() -> &'static Regex {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    YEAR.get_or_init(|| Regex::new(r"(?:^|\D)((?:18|19|20|21)\d{2})(?:\D|$)").expect("valid year regex"))
}

/// A fiscal year from a number or a date-like string.
pub fn parse_year(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .filter(|y| (1800..=2199).contains(y))
            .map(|y| y as i32),
        Value::String(s) => year_regex()
            .captures(s)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok()),
        _ => None,
    }
}

/// A monetary amount from a number or a formatted string
/// (`"£1,234"`, `"(500)"` for negatives). Null and garbage yield `None`.
pub fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => {
            let trimmed = s.trim();
            let (negative, body) = match trimmed
                .strip_prefix('(')
                .and_then(|rest| rest.strip_suffix(')'))
            {
                Some(inner) => (true, inner),
                None => (false, trimmed),
            };
            let cleaned: String = body
                .chars()
                .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | 'e' | 'E' | '+'))
                .collect();
            let parsed: f64 = cleaned.parse().ok().filter(|v: &f64| v.is_finite())?;
            Some(if negative { -parsed } else { parsed })
        }
        _ => None,
    }
}
