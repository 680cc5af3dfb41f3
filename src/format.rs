//! Work/virtual name-format templates.
//!
//! A format is a pair `"template" % (field, field, ...)` read from the
//! config file. The template is a restricted positional formatter: each
//! `%s` consumes the next field from the list. Fields are validated
//! against a fixed set; underscore-prefixed names are user-defined
//! placeholders resolved through the config's lookup dictionary before
//! validation. There is no expression evaluation: parsing produces a flat
//! list of literal and field-reference segments that is rendered against a
//! typed binding per track image.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::progress::warn;

/// Field names a template may reference.
pub const ALLOWED_FIELDS: &[&str] = &[
    "work",
    "virtual",
    "id",
    "artist",
    "album",
    "genre",
    "tracknumber",
    "year",
    "albumartist",
    "composer",
    "created",
    "lastmodified",
    "inserted",
];

/// Stand-in rendered for a field that failed validation.
const NOT_FOUND: &str = "notfound";

/// Matches the `"template" % (fields)` shape of a format entry.
static STRUCTURE_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)^\s*"(.*)"\s*%\s*\(\s*(.*?)\s*,?\s*\)\s*$"#).unwrap());

/// Matches a bare quoted template with no field list.
static BARE_TEMPLATE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?s)^\s*"(.*)"\s*$"#).unwrap());

// ============================================================================
// Template AST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Field(String),
}

/// A parsed name format: literal text interleaved with field references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub segments: Vec<Segment>,
}

/// A named format together with the albumtype number allocated for it.
#[derive(Debug, Clone)]
pub struct Structure {
    pub name: String,
    pub number: i64,
    pub template: Template,
}

// ============================================================================
// Parsing
// ============================================================================

/// Resolve an underscore-prefixed placeholder through the lookup
/// dictionary, recursively, with a depth guard against cycles.
fn resolve_placeholder(field: &str, lookup: &FxHashMap<String, String>) -> String {
    let mut current = field.to_string();
    for _ in 0..8 {
        if !current.starts_with('_') {
            return current;
        }
        match lookup.get(&current) {
            Some(replacement) => current = replacement.trim().to_string(),
            None => return current,
        }
    }
    current
}

/// Validate a field name, reducing dotted names to their base field.
/// Unknown names become the `notfound` stand-in with a warning.
fn validate_field(field: &str, source: &str) -> String {
    let base = field.split('.').next().unwrap_or(field).trim();
    if ALLOWED_FIELDS.contains(&base) {
        base.to_string()
    } else {
        warn(&format!(
            "unknown field '{}' in name format '{}', using '{}'",
            field, source, NOT_FOUND
        ));
        NOT_FOUND.to_string()
    }
}

/// Parse a `"template" % (fields)` entry into a segment list.
///
/// Each `%s` in the template consumes the next field; a template with more
/// `%s` than fields renders `notfound` for the extras, and surplus fields
/// are ignored (both with a warning).
pub fn parse_template(source: &str, lookup: &FxHashMap<String, String>) -> Template {
    let (text, field_part) = if let Some(caps) = STRUCTURE_SHAPE.captures(source) {
        (
            caps.get(1).map(|m| m.as_str()).unwrap_or(""),
            caps.get(2).map(|m| m.as_str()).unwrap_or(""),
        )
    } else if let Some(caps) = BARE_TEMPLATE.captures(source) {
        (caps.get(1).map(|m| m.as_str()).unwrap_or(""), "")
    } else {
        warn(&format!("unparseable name format: {}", source));
        return Template {
            segments: vec![Segment::Literal(NOT_FOUND.to_string())],
        };
    };

    let fields: Vec<String> = field_part
        .split(',')
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(|f| validate_field(&resolve_placeholder(f, lookup), source))
        .collect();

    let mut segments = Vec::new();
    let mut field_iter = fields.iter();
    let mut placeholders_seen = 0usize;
    let parts: Vec<&str> = text.split("%s").collect();
    for (i, part) in parts.iter().enumerate() {
        if !part.is_empty() {
            segments.push(Segment::Literal((*part).to_string()));
        }
        if i + 1 < parts.len() {
            placeholders_seen += 1;
            match field_iter.next() {
                Some(f) => segments.push(Segment::Field(f.clone())),
                None => {
                    warn(&format!(
                        "name format '{}' has more placeholders than fields",
                        source
                    ));
                    segments.push(Segment::Field(NOT_FOUND.to_string()));
                }
            }
        }
    }
    if placeholders_seen < fields.len() {
        warn(&format!(
            "name format '{}' has more fields than placeholders, extras ignored",
            source
        ));
    }

    Template { segments }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Scalar bindings for one rendered combination.
#[derive(Debug, Clone, Copy, Default)]
pub struct Binding<'a> {
    pub artist: &'a str,
    pub albumartist: &'a str,
    pub composer: &'a str,
    pub genre: &'a str,
    pub work: &'a str,
    pub virtual_: &'a str,
    pub id: &'a str,
    pub album: &'a str,
    pub tracknumber: &'a str,
    pub year: &'a str,
    pub created: &'a str,
    pub lastmodified: &'a str,
    pub inserted: &'a str,
}

impl<'a> Binding<'a> {
    fn get(&self, field: &str) -> &'a str {
        match field {
            "artist" => self.artist,
            "albumartist" => self.albumartist,
            "composer" => self.composer,
            "genre" => self.genre,
            "work" => self.work,
            "virtual" => self.virtual_,
            "id" => self.id,
            "album" => self.album,
            "tracknumber" => self.tracknumber,
            "year" => self.year,
            "created" => self.created,
            "lastmodified" => self.lastmodified,
            "inserted" => self.inserted,
            _ => NOT_FOUND,
        }
    }
}

impl Template {
    /// Render the template against one binding.
    pub fn render(&self, binding: &Binding) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => out.push_str(binding.get(name)),
            }
        }
        out
    }
}

/// The multi-valued and scalar inputs of one track image, from which a
/// structure expands into display names.
#[derive(Debug, Clone, Default)]
pub struct ListBinding {
    pub artists: Vec<String>,
    pub albumartists: Vec<String>,
    pub composers: Vec<String>,
    pub genres: Vec<String>,
    pub works: Vec<String>,
    pub virtuals: Vec<String>,
    pub id: String,
    pub album: String,
    pub tracknumber: String,
    pub year: String,
    pub created: String,
    pub lastmodified: String,
    pub inserted: String,
}

/// Expand a template over the Cartesian product of the image's
/// multi-valued inputs, yielding each distinct trimmed display name.
/// Empty lists contribute a single blank value so a format referencing an
/// absent field still renders.
pub fn expand(template: &Template, lb: &ListBinding) -> Vec<String> {
    let artists = or_blank(&lb.artists);
    let albumartists = or_blank(&lb.albumartists);
    let composers = or_blank(&lb.composers);
    let genres = or_blank(&lb.genres);
    let works = or_blank(&lb.works);
    let virtuals = or_blank(&lb.virtuals);

    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut out = Vec::new();
    for artist in &artists {
        for albumartist in &albumartists {
            for composer in &composers {
                for genre in &genres {
                    for work in &works {
                        for virtual_ in &virtuals {
                            let binding = Binding {
                                artist,
                                albumartist,
                                composer,
                                genre,
                                work,
                                virtual_,
                                id: &lb.id,
                                album: &lb.album,
                                tracknumber: &lb.tracknumber,
                                year: &lb.year,
                                created: &lb.created,
                                lastmodified: &lb.lastmodified,
                                inserted: &lb.inserted,
                            };
                            let name = template.render(&binding).trim().to_string();
                            if seen.insert(name.clone()) {
                                out.push(name);
                            }
                        }
                    }
                }
            }
        }
    }
    out
}

fn or_blank(list: &[String]) -> Vec<String> {
    if list.is_empty() {
        vec![String::new()]
    } else {
        list.to_vec()
    }
}

// ============================================================================
// TESTS
// ============================================================================
