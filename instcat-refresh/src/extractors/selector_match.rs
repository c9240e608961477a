//! Selector and pattern matches
//!
//! Patterns tried in order for each field:
//! 1. Element carrying `data-field="<field name>"`
//! 2. Table row: header (or first cell) holding a field label, value in the next `<td>`
//! 3. Definition list: `<dt>` label, value in the following `<dd>`
//! 4. Element whose `id` or `class` token is the field name (snake or kebab case)

use regex::Regex;

use super::{collapse_whitespace, decode_entities, label_pattern, Document, ExtractionStrategy, FieldSpec};
use crate::models::ExtractionMethod;

pub struct SelectorStrategy {
    patterns: Vec<(&'static str, Vec<Regex>)>,
    tag: Regex,
}

impl SelectorStrategy {
    pub fn new(fields: &'static [FieldSpec]) -> Result<Self, regex::Error> {
        let mut patterns = Vec::with_capacity(fields.len());
        for field in fields {
            patterns.push((field.name, field_patterns(field)?));
        }
        Ok(Self {
            patterns,
            tag: Regex::new(r"(?s)<[^>]*>")?,
        })
    }

    fn clean(&self, fragment: &str) -> String {
        let text = self.tag.replace_all(fragment, " ");
        collapse_whitespace(&decode_entities(&text))
    }
}

fn field_patterns(field: &FieldSpec) -> Result<Vec<Regex>, regex::Error> {
    let name = regex::escape(field.name);
    let hyphenated = regex::escape(&field.hyphenated());
    let labels = field
        .labels
        .iter()
        .map(|l| label_pattern(l))
        .collect::<Vec<_>>()
        .join("|");
    // Optional wrapping tags around a label cell
    let wrap = r"(?:<[^>]+>\s*)*";

    Ok(vec![
        Regex::new(&format!(
            r#"(?is)<[a-z][a-z0-9]*\b[^>]*\bdata-field\s*=\s*["']{name}["'][^>]*>(.*?)</"#
        ))?,
        Regex::new(&format!(
            r"(?is)<t[hd]\b[^>]*>\s*{wrap}(?:{labels})\s*:?\s*{wrap}</t[hd]>\s*<td\b[^>]*>(.*?)</td>"
        ))?,
        Regex::new(&format!(
            r"(?is)<dt\b[^>]*>\s*{wrap}(?:{labels})\s*:?\s*{wrap}</dt>\s*<dd\b[^>]*>(.*?)</dd>"
        ))?,
        Regex::new(&format!(
            r#"(?is)<[a-z][a-z0-9]*\b[^>]*\b(?:id|class)\s*=\s*["'](?:[^"']*\s)?(?:{name}|{hyphenated})(?:\s[^"']*)?["'][^>]*>(.*?)</"#
        ))?,
    ])
}

impl ExtractionStrategy for SelectorStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::SelectorMatch
    }

    fn attempt(&self, doc: &Document, field: &FieldSpec) -> Option<String> {
        let (_, regexes) = self.patterns.iter().find(|(name, _)| *name == field.name)?;

        regexes.iter().find_map(|re| {
            re.captures_iter(&doc.body)
                .map(|caps| self.clean(&caps[1]))
                .find(|value| !value.is_empty())
        })
    }
}
