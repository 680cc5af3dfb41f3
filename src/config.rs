//! User configuration (scan.ini).
//!
//! The config file is a small INI-style file with a `[movetags]` section of
//! plain options and two format sections, `[work name format]` and
//! `[virtual name format]`, whose entries name user-defined album
//! groupings. Unknown keys are ignored. A missing file yields all
//! defaults. The parsed value is immutable for the whole run and passed by
//! reference through the pipeline.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::path::Path;

use crate::format::{parse_template, Structure};

/// Albumtype code for a plain (non-work, non-virtual) album.
pub const ALBUM_TYPE_PLAIN: i64 = 10;

/// First albumtype code of the virtual band.
pub const VIRTUAL_BAND_START: i64 = 100;

/// First albumtype code of the work band.
pub const WORK_BAND_START: i64 = 200;

static SECTION_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\[([^\]]+)\]\s*$").unwrap());
static KEY_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([^=:#;]+?)\s*[=:]\s*(.*?)\s*$").unwrap());

// ============================================================================
// Option Enums
// ============================================================================

/// How a leading "The " on artist-like names is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TheMode {
    /// Keep as tagged: "The Beatles"
    Before,
    /// Move after the name: "Beatles, The"
    After,
    /// Drop it: "Beatles"
    Remove,
}

impl TheMode {
    pub fn parse(s: &str) -> Option<TheMode> {
        match s.to_lowercase().as_str() {
            "before" => Some(TheMode::Before),
            "after" => Some(TheMode::After),
            "remove" => Some(TheMode::Remove),
            _ => None,
        }
    }
}

/// Which of a field's multiple parsed values to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludePolicy {
    All,
    First,
    Last,
}

impl IncludePolicy {
    /// Parse an include option; anything unrecognized means `all`.
    pub fn parse(s: &str) -> IncludePolicy {
        match s.to_lowercase().as_str() {
            "first" => IncludePolicy::First,
            "last" => IncludePolicy::Last,
            _ => IncludePolicy::All,
        }
    }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub the_processing: TheMode,
    pub multi_field_separator: String,
    pub include_album: IncludePolicy,
    pub include_artist: IncludePolicy,
    pub include_albumartist: IncludePolicy,
    pub include_composer: IncludePolicy,
    pub include_genre: IncludePolicy,
    pub prefer_folderart: bool,
    /// Album titles that keep per-artist albumsonly rows.
    pub separate_album_list: Vec<String>,
    pub work_structures: Vec<Structure>,
    pub virtual_structures: Vec<Structure>,
    /// Every configured name with its allocated albumtype number, for the
    /// wvlookup table (includes _ALBUM and the two defaults).
    pub wv_numbers: Vec<(String, i64)>,
}

impl Default for Config {
    fn default() -> Self {
        Config::from_entries(&RawEntries::default(), None)
    }
}

/// Raw key/value capture from the three recognized sections, in file order.
#[derive(Debug, Default)]
struct RawEntries {
    movetags: Vec<(String, String)>,
    work_formats: Vec<(String, String)>,
    virtual_formats: Vec<(String, String)>,
}

impl Config {
    /// Load the config file; a missing file yields all defaults.
    /// A command-line 'the' mode overrides the file's.
    pub fn load(path: &Path, the_override: Option<TheMode>) -> Result<Config> {
        let entries = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            parse_ini(&text)
        } else {
            RawEntries::default()
        };
        Ok(Config::from_entries(&entries, the_override))
    }

    fn from_entries(entries: &RawEntries, the_override: Option<TheMode>) -> Config {
        let mut the_processing = TheMode::Remove;
        let mut multi_field_separator = String::new();
        let mut include_album = IncludePolicy::All;
        let mut include_artist = IncludePolicy::All;
        let mut include_albumartist = IncludePolicy::All;
        let mut include_composer = IncludePolicy::All;
        let mut include_genre = IncludePolicy::All;
        let mut prefer_folderart = false;
        let mut separate_album_list = Vec::new();

        for (key, value) in &entries.movetags {
            match key.to_lowercase().as_str() {
                "the_processing" => {
                    if let Some(mode) = TheMode::parse(value) {
                        the_processing = mode;
                    }
                }
                "multiple_tag_separator" => multi_field_separator = value.clone(),
                "include_album" => include_album = IncludePolicy::parse(value),
                "include_artist" => include_artist = IncludePolicy::parse(value),
                "include_albumartist" => include_albumartist = IncludePolicy::parse(value),
                "include_composer" => include_composer = IncludePolicy::parse(value),
                "include_genre" => include_genre = IncludePolicy::parse(value),
                "prefer_folderart" => prefer_folderart = value.to_lowercase() == "y",
                "separate_album_list" => separate_album_list = split_on_comma(value),
                // unknown keys are ignored
                _ => {}
            }
        }

        if let Some(mode) = the_override {
            the_processing = mode;
        }

        // underscore-prefixed keys in either format section define reusable
        // placeholders; they receive no albumtype number of their own
        let mut lookup_name_dict: FxHashMap<String, String> = FxHashMap::default();
        for (key, value) in entries.work_formats.iter().chain(&entries.virtual_formats) {
            if key.starts_with('_') {
                lookup_name_dict.insert(key.clone(), value.clone());
            }
        }

        let mut wv_numbers: Vec<(String, i64)> = vec![("_ALBUM".to_string(), ALBUM_TYPE_PLAIN)];

        let mut work_structures = vec![Structure {
            name: "_DEFAULT_WORK".to_string(),
            number: WORK_BAND_START,
            template: parse_template(
                r#""%s - %s - %s" % (composer, work, artist)"#,
                &lookup_name_dict,
            ),
        }];
        wv_numbers.push(("_DEFAULT_WORK".to_string(), WORK_BAND_START));
        let mut work_number = WORK_BAND_START + 1;
        for (key, value) in &entries.work_formats {
            if key.starts_with('_') {
                continue;
            }
            work_structures.push(Structure {
                name: key.clone(),
                number: work_number,
                template: parse_template(value, &lookup_name_dict),
            });
            wv_numbers.push((key.clone(), work_number));
            work_number += 1;
        }

        let mut virtual_structures = vec![Structure {
            name: "_DEFAULT_VIRTUAL".to_string(),
            number: VIRTUAL_BAND_START,
            template: parse_template(r#""%s" % (virtual)"#, &lookup_name_dict),
        }];
        wv_numbers.push(("_DEFAULT_VIRTUAL".to_string(), VIRTUAL_BAND_START));
        let mut virtual_number = VIRTUAL_BAND_START + 1;
        for (key, value) in &entries.virtual_formats {
            if key.starts_with('_') {
                continue;
            }
            virtual_structures.push(Structure {
                name: key.clone(),
                number: virtual_number,
                template: parse_template(value, &lookup_name_dict),
            });
            wv_numbers.push((key.clone(), virtual_number));
            virtual_number += 1;
        }

        Config {
            the_processing,
            multi_field_separator,
            include_album,
            include_artist,
            include_albumartist,
            include_composer,
            include_genre,
            prefer_folderart,
            separate_album_list,
            work_structures,
            virtual_structures,
            wv_numbers,
        }
    }

}

// ============================================================================
// INI Parsing
// ============================================================================

fn parse_ini(text: &str) -> RawEntries {
    let mut entries = RawEntries::default();
    let mut section = String::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if let Some(caps) = SECTION_HEADER.captures(trimmed) {
            section = caps[1].trim().to_lowercase();
            continue;
        }
        if let Some(caps) = KEY_VALUE.captures(line) {
            let key = caps[1].to_string();
            let value = caps[2].to_string();
            match section.as_str() {
                "movetags" => entries.movetags.push((key, value)),
                "work name format" => entries.work_formats.push((key, value)),
                "virtual name format" => entries.virtual_formats.push((key, value)),
                _ => {}
            }
        }
    }
    entries
}

/// Split a comma-separated list where literal commas in names are escaped
/// with a backslash.
pub fn split_on_comma(string: &str) -> Vec<String> {
    const STANDIN: &str = "~%^@#";
    let protected = string.replace("\\,", STANDIN);
    protected
        .split(',')
        .map(|e| e.replace(STANDIN, ",").trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{expand, ListBinding};

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.the_processing, TheMode::Remove);
        assert_eq!(cfg.multi_field_separator, "");
        assert_eq!(cfg.include_artist, IncludePolicy::All);
        assert!(!cfg.prefer_folderart);
        assert!(cfg.separate_album_list.is_empty());
        // the two default structures are always present
        assert_eq!(cfg.work_structures.len(), 1);
        assert_eq!(cfg.work_structures[0].number, 200);
        assert_eq!(cfg.virtual_structures.len(), 1);
        assert_eq!(cfg.virtual_structures[0].number, 100);
        assert!(cfg
            .wv_numbers
            .contains(&("_ALBUM".to_string(), ALBUM_TYPE_PLAIN)));
    }

    #[test]
    fn test_parse_movetags_options() {
        let entries = parse_ini(
            "[movetags]\n\
             the_processing = after\n\
             multiple_tag_separator = ;\n\
             include_artist = first\n\
             prefer_folderart = Y\n\
             separate_album_list = Greatest Hits, Best\\, Of\n\
             unknown_option = ignored\n",
        );
        let cfg = Config::from_entries(&entries, None);
        assert_eq!(cfg.the_processing, TheMode::After);
        assert_eq!(cfg.multi_field_separator, ";");
        assert_eq!(cfg.include_artist, IncludePolicy::First);
        assert!(cfg.prefer_folderart);
        assert_eq!(cfg.separate_album_list, vec!["Greatest Hits", "Best, Of"]);
    }

    #[test]
    fn test_the_override_wins() {
        let entries = parse_ini("[movetags]\nthe_processing = after\n");
        let cfg = Config::from_entries(&entries, Some(TheMode::Before));
        assert_eq!(cfg.the_processing, TheMode::Before);
    }

    #[test]
    fn test_format_numbering() {
        let entries = parse_ini(
            "[work name format]\n\
             OPUS = \"%s: %s\" % (composer, work)\n\
             [virtual name format]\n\
             ALBUM_V = \"%s - %s\" % (virtual, artist)\n\
             SECOND_V = \"%s\" % (virtual)\n",
        );
        let cfg = Config::from_entries(&entries, None);
        assert_eq!(cfg.work_structures.len(), 2);
        assert_eq!(cfg.work_structures[1].name, "OPUS");
        assert_eq!(cfg.work_structures[1].number, 201);
        assert_eq!(cfg.virtual_structures.len(), 3);
        assert_eq!(cfg.virtual_structures[1].number, 101);
        assert_eq!(cfg.virtual_structures[2].number, 102);
        assert!(cfg.wv_numbers.contains(&("ALBUM_V".to_string(), 101)));
    }

    #[test]
    fn test_placeholder_entries_define_substitutions() {
        let entries = parse_ini(
            "[virtual name format]\n\
             _WHO = artist\n\
             NAMED = \"%s by %s\" % (virtual, _WHO)\n",
        );
        let cfg = Config::from_entries(&entries, None);
        let named = &cfg.virtual_structures[1];
        assert_eq!(named.name, "NAMED");
        let lb = ListBinding {
            virtuals: vec!["Best Of".to_string()],
            artists: vec!["X".to_string()],
            ..ListBinding::default()
        };
        assert_eq!(expand(&named.template, &lb), vec!["Best Of by X"]);
        // placeholder keys get no albumtype number
        assert!(!cfg.wv_numbers.iter().any(|(k, _)| k == "_WHO"));
    }

    #[test]
    fn test_split_on_comma_escapes() {
        assert_eq!(split_on_comma("a, b"), vec!["a", "b"]);
        assert_eq!(split_on_comma("a\\,b, c"), vec!["a,b", "c"]);
        assert_eq!(split_on_comma(""), Vec::<String>::new());
    }
}
