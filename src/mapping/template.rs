//! R2RML string templates
//!
//! A template such as `http://example.org/{dept}/{id}` is parsed once into
//! literal and column segments. `\{` and `\}` stand for literal braces.

use super::{MappingError, MappingResult};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Everything except the ASCII unreserved characters is percent-encoded when
/// a column value is embedded into an IRI.
const IRI_UNSAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Regex character class matching any output of [`iri_safe_escape`]
const IRI_SAFE_CLASS: &str = r"[A-Za-z0-9\-._~%]";

/// Apply R2RML IRI-safe escaping to a column value
pub fn iri_safe_escape(value: &str) -> String {
    utf8_percent_encode(value, IRI_UNSAFE).to_string()
}

/// Invert [`iri_safe_escape`].
///
/// Returns `None` when the text is not the canonical escaping of any string;
/// such text can never be produced from a column value.
pub fn iri_safe_unescape(text: &str) -> Option<String> {
    let decoded = percent_decode_str(text).decode_utf8().ok()?.into_owned();
    if iri_safe_escape(&decoded) == text {
        Some(decoded)
    } else {
        None
    }
}

/// True if `text` contains a character that [`iri_safe_escape`] never emits
pub fn contains_escaped_char(text: &str) -> bool {
    text.chars()
        .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '%')))
}

/// One piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateSegment {
    /// Literal text
    Literal(String),
    /// Placeholder for a column value
    Column(String),
}

/// A parsed R2RML template
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Template {
    source: String,
    segments: Vec<TemplateSegment>,
}

impl Template {
    /// Parse a template string
    pub fn parse(source: &str) -> MappingResult<Self> {
        static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
        let token_re = TOKEN_RE
            .get_or_init(|| Regex::new(r"\\([{}\\])|\{([^{}]*)\}|[{}]").expect("valid regex"));

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut last = 0;
        for cap in token_re.captures_iter(source) {
            let whole = match cap.get(0) {
                Some(m) => m,
                None => continue,
            };
            literal.push_str(&source[last..whole.start()]);
            last = whole.end();

            if let Some(escaped) = cap.get(1) {
                literal.push_str(escaped.as_str());
            } else if let Some(column) = cap.get(2) {
                let column = column.as_str();
                if column.is_empty() {
                    return Err(MappingError::InvalidTemplate(format!(
                        "empty column reference in '{}'",
                        source
                    )));
                }
                if !literal.is_empty() {
                    segments.push(TemplateSegment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(TemplateSegment::Column(column.to_string()));
            } else {
                return Err(MappingError::InvalidTemplate(format!(
                    "unbalanced brace at offset {} in '{}'",
                    whole.start(),
                    source
                )));
            }
        }
        literal.push_str(&source[last..]);
        if !literal.is_empty() {
            segments.push(TemplateSegment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The template as written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Parsed segments in order
    pub fn segments(&self) -> &[TemplateSegment] {
        &self.segments
    }

    /// Column names referenced by the template, in order of appearance
    pub fn columns(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                TemplateSegment::Column(c) => Some(c.as_str()),
                TemplateSegment::Literal(_) => None,
            })
            .collect()
    }

    /// Expand the template. Returns `None` if any referenced column is null.
    pub fn expand<F>(&self, mut lookup: F, escape: bool) -> Option<String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(text) => out.push_str(text),
                TemplateSegment::Column(column) => {
                    let value = lookup(column)?;
                    if escape {
                        out.push_str(&iri_safe_escape(&value));
                    } else {
                        out.push_str(&value);
                    }
                }
            }
        }
        Some(out)
    }

    /// Decide whether this template can expand to `text`.
    ///
    /// The literal segments must appear in `text` in order as prefix, infixes
    /// and suffix. With `escaped` set, the text between them must also be
    /// producible by IRI-safe escaping. Returns `true` when undecidable.
    pub fn can_produce(&self, text: &str, escaped: bool) -> bool {
        let column_class = if escaped {
            format!("{}*", IRI_SAFE_CLASS)
        } else {
            ".*?".to_string()
        };
        let mut pattern = String::from("(?s)^");
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(text) => pattern.push_str(&regex::escape(text)),
                TemplateSegment::Column(_) => pattern.push_str(&column_class),
            }
        }
        pattern.push('$');
        match Regex::new(&pattern) {
            Ok(re) => re.is_match(text),
            Err(_) => true,
        }
    }
}

impl TryFrom<String> for Template {
    type Error = MappingError;

    fn try_from(source: String) -> MappingResult<Self> {
        Template::parse(&source)
    }
}

impl From<Template> for String {
    fn from(template: Template) -> Self {
        template.source
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
