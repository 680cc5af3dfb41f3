//! Tag value normalization.
//!
//! Raw tag strings arrive as newline-separated multi-value fields with an
//! optional user-configured secondary separator inside each value. This
//! module splits them, strips control characters, applies the inclusion
//! policy and 'the' rewriting, and adjusts the numeric fields (year,
//! tracknumber, sizes and rates).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{IncludePolicy, TheMode};
use crate::models::{MultiValue, SqlNum, Tracknumber};
use crate::progress::warn;

/// Separator between values of a multi-valued tag field.
pub const MULTI_SEPARATOR: char = '\n';

/// Collapses runs of the multi-value separator into one.
static MULTI_SEP_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n+").unwrap());

/// Matches a run of four digits (used as the year fallback).
static FOUR_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").unwrap());

// ============================================================================
// Separator / Control Character Handling
// ============================================================================

/// Strip Unicode control characters below U+0020 from one entry.
/// One user had garbage in tags which broke an index, hence the sweep.
fn strip_ctrl(entry: &str) -> String {
    entry.chars().filter(|c| *c as u32 >= 0x20).collect()
}

/// Strip control characters from each entry and drop entries that end up
/// empty.
fn remove_ctrl(entries: Vec<String>) -> Vec<String> {
    entries
        .into_iter()
        .map(|e| strip_ctrl(&e))
        .filter(|e| !e.is_empty())
        .collect()
}

/// Remove redundant separators and control characters from a single-value
/// field (titles): collapse separator runs, strip a trailing separator,
/// then sweep control characters per entry.
pub fn remove_sep(liststring: &str) -> String {
    let mut collapsed = MULTI_SEP_RUN.replace_all(liststring, "\n").to_string();
    if collapsed.ends_with(MULTI_SEPARATOR) {
        collapsed.pop();
    }
    let parts: Vec<String> = collapsed
        .split(MULTI_SEPARATOR)
        .map(|s| s.to_string())
        .collect();
    remove_ctrl(parts).join("\n")
}

// ============================================================================
// Multi-Value Unwrapping
// ============================================================================

/// Split a raw multi-value string into its full concat, filtered concat and
/// list forms.
///
/// The string can hold separator-separated entries within separator-separated
/// entries, e.g. `artist1 \n artist2 ; artist3` with `;` configured as the
/// secondary separator. The full form is the concatenation after splitting
/// and the inclusion policy but before 'the' rewriting; the filtered form and
/// the list have 'the' rewriting applied (when a mode is given).
pub fn unwrap_list(
    liststring: &str,
    multi_field_separator: &str,
    include: IncludePolicy,
    the_processing: Option<TheMode>,
) -> MultiValue {
    // first remove multiple consecutive separators
    let mut collapsed = MULTI_SEP_RUN.replace_all(liststring, "\n").to_string();
    if collapsed.ends_with(MULTI_SEPARATOR) {
        collapsed.pop();
    }

    // now split out separate tags
    let multi: Vec<String> = collapsed
        .split(MULTI_SEPARATOR)
        .map(|s| s.to_string())
        .collect();

    // now split each tag on the secondary separator
    let multilist: Vec<String> = if multi_field_separator.is_empty() {
        multi
    } else {
        let mut out = Vec::new();
        for entry in &multi {
            for part in entry.split(multi_field_separator) {
                let part = part.trim();
                if !part.is_empty() {
                    out.push(part.to_string());
                }
            }
        }
        out
    };

    let multilist = remove_ctrl(multilist);

    // select the entries we want
    let newlist: Vec<String> = if multilist.is_empty() {
        multilist
    } else {
        match include {
            IncludePolicy::First => vec![multilist[0].clone()],
            IncludePolicy::Last => vec![multilist[multilist.len() - 1].clone()],
            IncludePolicy::All => multilist,
        }
    };

    let full = newlist.join("\n");

    let newlist = match the_processing {
        Some(TheMode::After) | Some(TheMode::Remove) => {
            process_list_the(newlist, the_processing.unwrap())
        }
        _ => newlist,
    };

    let filtered = newlist.join("\n");

    MultiValue {
        full,
        filtered,
        list: newlist,
    }
}

/// Rewrite each entry whose name leads with "The " according to the mode.
/// The literal "The The" is a band name and is left alone.
fn process_list_the(plist: Vec<String>, the_processing: TheMode) -> Vec<String> {
    plist
        .into_iter()
        .map(|entry| {
            let lower = entry.to_lowercase();
            if lower.starts_with("the ") && lower != "the the" {
                let pre = &entry[0..3];
                let post = &entry[4..];
                match the_processing {
                    TheMode::After => format!("{}, {}", post, pre),
                    TheMode::Remove => post.to_string(),
                    TheMode::Before => entry.clone(),
                }
            } else {
                entry
            }
        })
        .collect()
}

// ============================================================================
// Numeric Adjustments
// ============================================================================

/// Days from 0001-01-01 (= day 1) to January 1st of the given year,
/// proleptic Gregorian.
fn ordinal_of_year(year: i64) -> i64 {
    let y = year - 1;
    365 * y + y / 4 - y / 100 + y / 400 + 1
}

/// Convert a year tag to the ordinal of (year, 1, 1).
///
/// Accepts a bare year or any date-like string carrying one; falls back to
/// the rightmost four-digit run. Returns None (and warns, carrying the file
/// path and the offending tag) when no year can be found.
pub fn adjust_year(year: &str, filespec: &str) -> Option<i64> {
    let trimmed = year.trim();
    if trimmed.is_empty() {
        return None;
    }

    // a plain integer is taken as the year directly
    if let Ok(y) = trimmed.parse::<i64>() {
        if (1..=9999).contains(&y) {
            return Some(ordinal_of_year(y));
        }
    }

    // otherwise look for the century: rightmost four-digit run wins
    if let Some(m) = FOUR_DIGITS.find_iter(trimmed).last() {
        if let Ok(cccc) = m.as_str().parse::<i64>() {
            return Some(ordinal_of_year(cccc));
        }
    }

    warn(&format!(
        "Warning processing track: {} : tag: {} : Couldn't convert year tag to cccc, year tag ignored",
        filespec, year
    ));
    None
}

/// Truncate a numeric tag to its leading integer digits; blank (or a value
/// with no leading digits) stays blank.
pub fn truncate_number(value: &str) -> SqlNum {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return SqlNum(None);
    }
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return SqlNum(None);
    }
    SqlNum(digits.parse::<i64>().ok())
}

/// Adjust a raw tracknumber tag: keep the left side of a `3/12` style
/// value, strip leading zeros; blank stays missing.
pub fn adjust_tracknumber(value: &str) -> Tracknumber {
    let mut part = value.trim();
    if let Some(pos) = part.find('/') {
        part = part[..pos].trim();
    }
    let stripped = part.trim_start_matches('0');
    if stripped.is_empty() {
        if part.chars().any(|c| c == '0') {
            // a value of all zeros is tracknumber zero
            return Tracknumber::Present(0);
        }
        return Tracknumber::Missing;
    }
    Tracknumber::parse(stripped)
}

/// Integerise a date-like value to second accuracy; garbage becomes zero.
pub fn make_int(value: &str) -> i64 {
    let trimmed = value.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return i;
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return f as i64;
    }
    0
}

// ============================================================================
// TESTS
// ============================================================================
