use crate::errors::{Error, Result};
use crate::models::{Cardinality, CoercionStats, Identifier, Value};

use regex::Regex;

/// One node in the predicate algebra evaluated by the query engine.
///
/// Leaves test a single property key; `And`/`Or`/`Not` combine. Built
/// through the constructors below, which validate what can be validated
/// up front (`regex` compiles its pattern eagerly).
#[derive(Debug, Clone)]
pub enum Criterion {
    /// Some value of `key` equals `value` under coerced comparison.
    Exact { key: Identifier, value: Value },
    /// Some numeric-coerced value of `key` lies in the interval.
    Range {
        key: Identifier,
        lo: Option<Value>,
        hi: Option<Value>,
        lo_incl: bool,
        hi_incl: bool,
    },
    /// The key is present.
    Exists { key: Identifier },
    /// The key is absent.
    NotExists { key: Identifier },
    /// The string-coerced value contains `needle`.
    Contains {
        key: Identifier,
        needle: String,
        ignore_case: bool,
    },
    /// The string-coerced value matches the pattern.
    Regex { key: Identifier, pattern: Regex },
    And(Vec<Criterion>),
    Or(Vec<Criterion>),
    Not(Box<Criterion>),
    /// Some instance of `key` carries meta-property `meta_key = value`.
    MetaEq {
        key: Identifier,
        meta_key: Identifier,
        value: Value,
    },
    /// Some instance of `key` was declared with the given cardinality.
    CardinalityEq { key: Identifier, cardinality: Cardinality },
}

impl Criterion {
    pub fn exact<V: Into<Value>>(key: Identifier, value: V) -> Self {
        Criterion::Exact {
            key,
            value: value.into(),
        }
    }

    pub fn range(key: Identifier, lo: Option<Value>, hi: Option<Value>, lo_incl: bool, hi_incl: bool) -> Self {
        Criterion::Range {
            key,
            lo,
            hi,
            lo_incl,
            hi_incl,
        }
    }

    pub fn exists(key: Identifier) -> Self {
        Criterion::Exists { key }
    }

    pub fn not_exists(key: Identifier) -> Self {
        Criterion::NotExists { key }
    }

    pub fn contains<S: Into<String>>(key: Identifier, needle: S, ignore_case: bool) -> Self {
        Criterion::Contains {
            key,
            needle: needle.into(),
            ignore_case,
        }
    }

    /// Compiles `pattern` eagerly.
    ///
    /// # Errors
    /// Returns `InvalidArgument` when the pattern does not parse.
    pub fn regex(key: Identifier, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|err| Error::InvalidArgument(format!("bad pattern: {}", err)))?;
        Ok(Criterion::Regex { key, pattern })
    }

    pub fn and(criteria: Vec<Criterion>) -> Self {
        Criterion::And(criteria)
    }

    pub fn or(criteria: Vec<Criterion>) -> Self {
        Criterion::Or(criteria)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(criterion: Criterion) -> Self {
        Criterion::Not(Box::new(criterion))
    }

    pub fn meta_eq<V: Into<Value>>(key: Identifier, meta_key: Identifier, value: V) -> Self {
        Criterion::MetaEq {
            key,
            meta_key,
            value: value.into(),
        }
    }

    pub fn cardinality_eq(key: Identifier, cardinality: Cardinality) -> Self {
        Criterion::CardinalityEq { key, cardinality }
    }

    /// Whether a single value satisfies this leaf against its key. Only
    /// meaningful for the value-testing leaves; combinators and the
    /// presence/meta/cardinality leaves are handled by the executor, which
    /// sees the whole element.
    pub(crate) fn value_matches(&self, value: &Value, stats: &CoercionStats) -> bool {
        match self {
            Criterion::Exact { value: expected, .. } => super::coerced_eq(value, expected, stats),
            Criterion::Range {
                lo,
                hi,
                lo_incl,
                hi_incl,
                ..
            } => value_in_range(value, lo.as_ref(), hi.as_ref(), *lo_incl, *hi_incl, stats),
            Criterion::Contains { needle, ignore_case, .. } => {
                let s = value.to_string();
                if *ignore_case {
                    s.to_lowercase().contains(&needle.to_lowercase())
                } else {
                    s.contains(needle)
                }
            }
            Criterion::Regex { pattern, .. } => pattern.is_match(&value.to_string()),
            _ => false,
        }
    }
}

/// Whether a value's numeric coercion lies in the interval. Values with no
/// numeric view are skipped (the failure counter ticks) rather than
/// failing the query.
fn value_in_range(
    value: &Value,
    lo: Option<&Value>,
    hi: Option<&Value>,
    lo_incl: bool,
    hi_incl: bool,
    stats: &CoercionStats,
) -> bool {
    let v = match value.as_numeric_recorded(stats) {
        Some(v) => v,
        None => return false,
    };

    if let Some(lo) = lo.and_then(|lo| lo.as_numeric()) {
        if v < lo || (!lo_incl && v == lo) {
            return false;
        }
    }

    if let Some(hi) = hi.and_then(|hi| hi.as_numeric()) {
        if v > hi || (!hi_incl && v == hi) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::Criterion;
    use crate::models::{CoercionStats, Identifier, Value};

    fn key(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    #[test]
    fn should_reject_malformed_patterns() {
        assert!(Criterion::regex(key("name"), "ab(c").is_err());
        assert!(Criterion::regex(key("name"), "^ab.*c$").is_ok());
    }

    #[test]
    fn should_match_exact_values_with_coercion() {
        let stats = CoercionStats::default();
        let c = Criterion::exact(key("score"), 85i64);
        assert!(c.value_matches(&Value::from("85"), &stats));
        assert!(c.value_matches(&Value::I32(85), &stats));
        assert!(!c.value_matches(&Value::I32(84), &stats));
    }

    #[test]
    fn should_match_ranges_inclusively_and_exclusively() {
        let stats = CoercionStats::default();
        let c = Criterion::range(key("age"), Some(Value::I64(25)), Some(Value::I64(30)), true, false);
        assert!(c.value_matches(&Value::I64(25), &stats));
        assert!(c.value_matches(&Value::I64(28), &stats));
        assert!(!c.value_matches(&Value::I64(30), &stats));
        assert!(!c.value_matches(&Value::from("not-a-number"), &stats));
    }

    #[test]
    fn should_match_contains_case_insensitively() {
        let stats = CoercionStats::default();
        let sensitive = Criterion::contains(key("name"), "Ann", false);
        let insensitive = Criterion::contains(key("name"), "ann", true);
        assert!(!sensitive.value_matches(&Value::from("Joanne"), &stats));
        assert!(sensitive.value_matches(&Value::from("Anna"), &stats));
        assert!(insensitive.value_matches(&Value::from("JOANNE"), &stats));
    }

    #[test]
    fn should_match_regex_against_string_coercions() {
        let stats = CoercionStats::default();
        let c = Criterion::regex(key("zip"), "^94[0-9]{3}$").unwrap();
        assert!(c.value_matches(&Value::from("94103"), &stats));
        assert!(c.value_matches(&Value::I64(94103), &stats));
        assert!(!c.value_matches(&Value::from("10001"), &stats));
    }
}
