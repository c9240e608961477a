//! Free-text regular expressions
//!
//! Last resort: a field label followed, within a short gap containing no
//! digits, by a value shaped like the field's kind. Runs over the visible
//! text of the document, so markup between label and value is ignored.

use regex::Regex;

use super::{label_pattern, Document, ExtractionStrategy, FieldKind, FieldSpec};
use crate::models::ExtractionMethod;

const MONTH: &str = r"(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";

fn value_pattern(kind: FieldKind) -> String {
    match kind {
        FieldKind::Rate => r"\d{1,3}(?:\.\d+)?\s*%|0?\.\d+".to_string(),
        FieldKind::Decimal => r"\d{1,2}(?:\.\d+)?".to_string(),
        FieldKind::Integer => r"\d{1,3}(?:,\d{3})+|\d+".to_string(),
        FieldKind::Currency => {
            r"\$\s?\d{1,3}(?:,\d{3})+(?:\.\d{2})?|\$\s?\d+(?:\.\d{2})?".to_string()
        }
        FieldKind::Date => format!(
            r"{MONTH}\.?\s+\d{{1,2}},?\s+\d{{4}}|\d{{4}}-\d{{2}}-\d{{2}}|\d{{1,2}}/\d{{1,2}}/\d{{4}}"
        ),
    }
}

pub struct TextRegexStrategy {
    patterns: Vec<(&'static str, Regex)>,
}

impl TextRegexStrategy {
    pub fn new(fields: &'static [FieldSpec]) -> Result<Self, regex::Error> {
        let mut patterns = Vec::new();
        for field in fields {
            let value = value_pattern(field.kind);
            let labels = field
                .labels
                .iter()
                .map(|l| label_pattern(l))
                .collect::<Vec<_>>()
                .join("|");
            let re = Regex::new(&format!(r"(?i)\b(?:{labels})\b[^0-9$]{{0,30}}?({value})"))?;
            patterns.push((field.name, re));
        }
        Ok(Self { patterns })
    }
}

impl ExtractionStrategy for TextRegexStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::RegexMatch
    }

    fn attempt(&self, doc: &Document, field: &FieldSpec) -> Option<String> {
        let (_, re) = self.patterns.iter().find(|(name, _)| *name == field.name)?;
        re.captures(&doc.text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    }
}
