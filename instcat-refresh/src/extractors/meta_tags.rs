//! Document metadata tags
//!
//! Matches `<meta>` names (or `property`/`itemprop`) equal to the field name,
//! its hyphenated form, or one of the field's extra meta names.

use super::{Document, ExtractionStrategy, FieldSpec};
use crate::models::ExtractionMethod;

#[derive(Debug, Default)]
pub struct MetaTagStrategy;

impl MetaTagStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionStrategy for MetaTagStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::MetaTag
    }

    fn attempt(&self, doc: &Document, field: &FieldSpec) -> Option<String> {
        let hyphenated = field.hyphenated();
        doc.meta
            .iter()
            .find(|(name, content)| {
                !content.trim().is_empty()
                    && (name == field.name
                        || *name == hyphenated
                        || field.meta_names.iter().any(|m| m.eq_ignore_ascii_case(name)))
            })
            .map(|(_, content)| content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::field_spec;

    fn doc_with(meta: &[(&str, &str)]) -> Document {
        Document {
            url: "https://u.example.edu/".to_string(),
            body: String::new(),
            json: Vec::new(),
            meta: meta
                .iter()
                .map(|(n, c)| (n.to_string(), c.to_string()))
                .collect(),
            text: String::new(),
        }
    }

    #[test]
    fn test_matches_name_forms() {
        let strategy = MetaTagStrategy::new();
        let field = field_spec("tuition_in_state").unwrap();

        let doc = doc_with(&[("tuition-in-state", "$11,200")]);
        assert_eq!(strategy.attempt(&doc, field), Some("$11,200".to_string()));

        let doc = doc_with(&[("instcat:tuition_in_state", "11200")]);
        assert_eq!(strategy.attempt(&doc, field), Some("11200".to_string()));
    }

    #[test]
    fn test_ignores_unrelated_and_empty() {
        let strategy = MetaTagStrategy::new();
        let field = field_spec("acceptance_rate").unwrap();
        let doc = doc_with(&[("description", "6.8%"), ("acceptance_rate", " ")]);
        assert_eq!(strategy.attempt(&doc, field), None);
    }
}
