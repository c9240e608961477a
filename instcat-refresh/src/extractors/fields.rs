//! Built-in catalog fields
//!
//! Fields are listed in declared processing order. Each carries the hints
//! every extraction strategy needs: JSON keys, meta names, and the human
//! labels used in tables, definition lists, and prose.

use serde::{Deserialize, Serialize};

/// Value type of a field, deciding parsing and normalisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Fraction in [0, 1]; `%` values are divided by 100
    Rate,
    Decimal,
    /// Whole number
    Integer,
    /// Amount in dollars; `$` and `,` stripped
    Currency,
    /// Calendar date, normalised to `YYYY-MM-DD`
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Keys searched in embedded JSON / JSON-LD
    pub json_keys: &'static [&'static str],
    /// Extra `<meta>` names beyond the field name itself
    pub meta_names: &'static [&'static str],
    /// Human labels, matched case-insensitively
    pub labels: &'static [&'static str],
}

impl FieldSpec {
    /// `acceptance_rate` → `acceptance-rate`
    pub fn hyphenated(&self) -> String {
        self.name.replace('_', "-")
    }
}

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "acceptance_rate",
        kind: FieldKind::Rate,
        json_keys: &["acceptanceRate", "acceptance_rate", "admitRate"],
        meta_names: &["instcat:acceptance_rate"],
        labels: &["acceptance rate", "admission rate", "admit rate"],
    },
    FieldSpec {
        name: "graduation_rate_6yr",
        kind: FieldKind::Rate,
        json_keys: &["graduationRate6yr", "graduation_rate_6yr", "sixYearGraduationRate"],
        meta_names: &["instcat:graduation_rate_6yr"],
        labels: &[
            "6-year graduation rate",
            "six-year graduation rate",
            "6 year graduation rate",
        ],
    },
    FieldSpec {
        name: "graduation_rate_4yr",
        kind: FieldKind::Rate,
        json_keys: &["graduationRate4yr", "graduation_rate_4yr", "fourYearGraduationRate"],
        meta_names: &["instcat:graduation_rate_4yr"],
        labels: &[
            "4-year graduation rate",
            "four-year graduation rate",
            "4 year graduation rate",
        ],
    },
    FieldSpec {
        name: "retention_rate",
        kind: FieldKind::Rate,
        json_keys: &["retentionRate", "retention_rate"],
        meta_names: &["instcat:retention_rate"],
        labels: &["retention rate", "freshman retention rate", "first-year retention rate"],
    },
    FieldSpec {
        name: "average_gpa",
        kind: FieldKind::Decimal,
        json_keys: &["averageGpa", "average_gpa", "avgGPA"],
        meta_names: &["instcat:average_gpa"],
        labels: &["average gpa", "average high school gpa", "mean gpa"],
    },
    FieldSpec {
        name: "sat_average",
        kind: FieldKind::Integer,
        json_keys: &["satAverage", "sat_average", "averageSAT"],
        meta_names: &["instcat:sat_average"],
        labels: &["average sat", "sat average", "mean sat"],
    },
    FieldSpec {
        name: "act_average",
        kind: FieldKind::Integer,
        json_keys: &["actAverage", "act_average", "averageACT"],
        meta_names: &["instcat:act_average"],
        labels: &["average act", "act average", "mean act"],
    },
    FieldSpec {
        name: "tuition_in_state",
        kind: FieldKind::Currency,
        json_keys: &["tuitionInState", "tuition_in_state"],
        meta_names: &["instcat:tuition_in_state"],
        labels: &["in-state tuition", "tuition (in-state)", "resident tuition"],
    },
    FieldSpec {
        name: "tuition_out_of_state",
        kind: FieldKind::Currency,
        json_keys: &["tuitionOutOfState", "tuition_out_of_state"],
        meta_names: &["instcat:tuition_out_of_state"],
        labels: &[
            "out-of-state tuition",
            "tuition (out-of-state)",
            "non-resident tuition",
        ],
    },
    FieldSpec {
        name: "enrollment_total",
        kind: FieldKind::Integer,
        json_keys: &["enrollmentTotal", "enrollment_total", "numberOfStudents"],
        meta_names: &["instcat:enrollment_total"],
        labels: &["total enrollment", "enrollment", "total students"],
    },
    FieldSpec {
        name: "application_deadline",
        kind: FieldKind::Date,
        json_keys: &["applicationDeadline", "application_deadline"],
        meta_names: &["instcat:application_deadline"],
        labels: &["application deadline", "regular decision deadline", "deadline"],
    },
];

/// Look up a built-in field by name
pub fn field_spec(name: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_order() {
        let names: Vec<_> = FIELDS.iter().map(|f| f.name).collect();
        assert_eq!(names.first(), Some(&"acceptance_rate"));
        assert_eq!(names.last(), Some(&"application_deadline"));
        assert_eq!(names.len(), 11);
    }

    #[test]
    fn test_lookup() {
        assert_eq!(field_spec("average_gpa").map(|f| f.kind), Some(FieldKind::Decimal));
        assert!(field_spec("mascot").is_none());
        assert_eq!(
            field_spec("tuition_in_state").map(|f| f.hyphenated()),
            Some("tuition-in-state".to_string())
        );
    }
}
