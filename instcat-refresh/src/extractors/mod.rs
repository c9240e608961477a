//! Field extraction cascade
//!
//! For each field, in declared order, strategies run in a fixed order and
//! the first non-empty candidate wins:
//!
//! 1. [`StructuredDataStrategy`]: embedded JSON-LD (or a JSON body)
//! 2. [`MetaTagStrategy`]: `<meta name|property=... content=...>`
//! 3. [`SelectorStrategy`]: `data-field` attribute, table header/cell,
//!    definition list, id/class element
//! 4. [`TextRegexStrategy`]: free-text patterns over the visible text
//!
//! No candidate means the field is left untouched for this source.

pub mod fields;
pub mod meta_tags;
pub mod selector_match;
pub mod structured_data;
pub mod text_regex;

pub use fields::{field_spec, FieldKind, FieldSpec, FIELDS};
pub use meta_tags::MetaTagStrategy;
pub use selector_match::SelectorStrategy;
pub use structured_data::StructuredDataStrategy;
pub use text_regex::TextRegexStrategy;

use regex::Regex;
use serde_json::Value;

use crate::models::{ExtractionMethod, FieldCandidate};

/// A fetched document prepared once for all strategies
#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub body: String,
    /// Parsed JSON-LD blocks, or the whole body for JSON responses
    pub json: Vec<Value>,
    /// `(name, content)` for every `<meta>` with a name or property, names lower-cased
    pub meta: Vec<(String, String)>,
    /// Visible text: tags, scripts, and styles removed, whitespace collapsed
    pub text: String,
}

/// One extraction technique
pub trait ExtractionStrategy: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    /// Raw value for `field`, or `None` when this strategy finds nothing
    fn attempt(&self, doc: &Document, field: &FieldSpec) -> Option<String>;
}

/// Compiled HTML helpers shared by document preparation
struct HtmlPatterns {
    json_ld: Regex,
    meta_tag: Regex,
    attribute: Regex,
    script_style: Regex,
    tag: Regex,
}

impl HtmlPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            json_ld: Regex::new(
                r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#,
            )?,
            meta_tag: Regex::new(r"(?is)<meta\s[^>]*>")?,
            attribute: Regex::new(r#"(?s)([A-Za-z_:.-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?,
            script_style: Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>")?,
            tag: Regex::new(r"(?s)<[^>]*>")?,
        })
    }
}

/// Ordered strategy list
pub struct ExtractionCascade {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    html: HtmlPatterns,
}

impl ExtractionCascade {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> instcat_common::Result<Self> {
        let html = HtmlPatterns::new().map_err(pattern_error)?;
        Ok(Self { strategies, html })
    }

    /// Cascade with the four built-in strategies in standard order
    pub fn with_default_strategies() -> instcat_common::Result<Self> {
        let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(StructuredDataStrategy::new()),
            Box::new(MetaTagStrategy::new()),
            Box::new(SelectorStrategy::new(FIELDS).map_err(pattern_error)?),
            Box::new(TextRegexStrategy::new(FIELDS).map_err(pattern_error)?),
        ];
        Self::new(strategies)
    }

    pub fn methods(&self) -> Vec<ExtractionMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    /// Prepare a fetched body for extraction
    pub fn document(&self, url: &str, body: &str, content_type: Option<&str>) -> Document {
        let is_json = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false);

        let mut json = Vec::new();
        if is_json {
            if let Ok(value) = serde_json::from_str::<Value>(body) {
                json.push(value);
            }
        } else {
            for caps in self.html.json_ld.captures_iter(body) {
                match serde_json::from_str::<Value>(caps[1].trim()) {
                    Ok(value) => json.push(value),
                    Err(e) => tracing::debug!(url, error = %e, "Skipping malformed JSON-LD block"),
                }
            }
        }

        let mut meta = Vec::new();
        if !is_json {
            for tag in self.html.meta_tag.find_iter(body) {
                let mut name = None;
                let mut content = None;
                for attr in self.html.attribute.captures_iter(tag.as_str()) {
                    let value = attr
                        .get(2)
                        .or_else(|| attr.get(3))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default();
                    match attr[1].to_ascii_lowercase().as_str() {
                        "name" | "property" | "itemprop" => name = Some(value.to_ascii_lowercase()),
                        "content" => content = Some(value),
                        _ => {}
                    }
                }
                if let (Some(name), Some(content)) = (name, content) {
                    meta.push((name, content));
                }
            }
        }

        let text = if is_json {
            String::new()
        } else {
            let without_code = self.html.script_style.replace_all(body, " ");
            let without_tags = self.html.tag.replace_all(&without_code, " ");
            collapse_whitespace(&decode_entities(&without_tags))
        };

        Document {
            url: url.to_string(),
            body: body.to_string(),
            json,
            meta,
            text,
        }
    }

    /// First non-empty candidate for one field
    pub fn extract_field(
        &self,
        doc: &Document,
        entity_id: &str,
        field: &FieldSpec,
    ) -> Option<FieldCandidate> {
        for strategy in &self.strategies {
            if let Some(raw) = strategy.attempt(doc, field) {
                let raw = raw.trim();
                if raw.is_empty() {
                    continue;
                }
                tracing::debug!(
                    entity_id,
                    field = field.name,
                    method = %strategy.method(),
                    raw_value = raw,
                    "Field candidate extracted"
                );
                return Some(FieldCandidate {
                    entity_id: entity_id.to_string(),
                    field_name: field.name.to_string(),
                    raw_value: raw.to_string(),
                    method: strategy.method(),
                    source_url: doc.url.clone(),
                });
            }
        }
        None
    }

    /// Candidates for every built-in field, in declared order
    pub fn extract_all(&self, doc: &Document, entity_id: &str) -> Vec<FieldCandidate> {
        FIELDS
            .iter()
            .filter_map(|field| self.extract_field(doc, entity_id, field))
            .collect()
    }
}

fn pattern_error(e: regex::Error) -> instcat_common::Error {
    instcat_common::Error::Internal(format!("Extraction pattern failed to compile: {}", e))
}

/// Replace the handful of entities that appear in catalog pages
pub(crate) fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&#37;", "%")
        .replace("&#36;", "$")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-insensitive label pattern with flexible inner whitespace
pub(crate) fn label_pattern(label: &str) -> String {
    label
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+")
}
