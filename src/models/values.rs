use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

/// A property value.
///
/// The variants are exactly the scalar universe of the snapshot format,
/// plus the null marker, which is only storable on graphs configured to
/// allow it. Derived equality is strict (same variant, same value);
/// comparisons in indices and queries go through [`coerced_eq`] and
/// [`coerced_cmp`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
}

impl Value {
    /// The scalar type marker used by the snapshot format.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The numeric view of this value, if it has one. Strings participate
    /// through parsing; booleans and nulls do not.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Value::I32(i) => Some(f64::from(*i)),
            Value::I64(i) => Some(*i as f64),
            Value::F32(f) => Some(f64::from(*f)),
            Value::F64(f) => Some(*f),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Null | Value::Bool(_) => None,
        }
    }

    /// Like [`Value::as_numeric`], but ticks the coercion counters: one
    /// attempt per call, one failure when no numeric view exists.
    pub fn as_numeric_recorded(&self, stats: &CoercionStats) -> Option<f64> {
        stats.record_attempt();
        let numeric = self.as_numeric();
        if numeric.is_none() {
            stats.record_failure();
        }
        numeric
    }

    /// The canonical coerced form of this value, used as the index key so
    /// that index equality is exactly coerced equality.
    pub fn coercion_key(&self) -> CoercionKey {
        match self {
            Value::Null => CoercionKey::Null,
            Value::Bool(b) => CoercionKey::Bool(*b),
            Value::I32(i) => CoercionKey::Int(i64::from(*i)),
            Value::I64(i) => CoercionKey::Int(*i),
            Value::F32(f) => float_key(f64::from(*f)),
            Value::F64(f) => float_key(*f),
            Value::String(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    CoercionKey::Int(i)
                } else if let Ok(f) = s.parse::<f64>() {
                    float_key(f)
                } else if let Ok(b) = s.parse::<bool>() {
                    CoercionKey::Bool(b)
                } else {
                    CoercionKey::Str(s.clone())
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I32(i) => write!(f, "{}", i),
            Value::I64(i) => write!(f, "{}", i),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::I32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::I64(i)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::F32(f)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::F64(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

fn float_key(f: f64) -> CoercionKey {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        CoercionKey::Int(f as i64)
    } else {
        CoercionKey::Float(normalize_float(f).to_bits())
    }
}

fn normalize_float(f: f64) -> f64 {
    if f.is_nan() {
        f64::NAN
    } else if f == 0.0 {
        0.0
    } else {
        f
    }
}

/// The canonical form a value coerces to, used to bucket index entries.
///
/// Numerics (and numeric-looking strings) collapse to `Int` when integral
/// or to normalized `Float` bits otherwise, `"true"`/`"false"` collapse to
/// `Bool`, and everything else stays a string. Buckets over-approximate
/// [`coerced_eq`]: every coerced-equal pair shares a key, but e.g. `"05"`
/// and `"5"` share one while comparing unequal, so index lookups re-check
/// candidates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoercionKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
}

/// Coerced equality.
///
/// Same-category pairs compare directly, numerics widen, a string against
/// a numeric or boolean compares through parsing, and anything left falls
/// back to string-form equality. Note the relation is not transitive
/// (`"05"` equals `5` equals `"5"`, yet `"05"` and `"5"` are two distinct
/// strings), which is why index buckets over-approximate and lookups
/// re-check against this function.
///
/// Side-effect free apart from the attempt/failure counters: an attempt is
/// recorded for every cross-category comparison, a failure when the pair
/// falls through to last-resort string-form comparison.
pub fn coerced_eq(a: &Value, b: &Value, stats: &CoercionStats) -> bool {
    // Same primitive category compares directly.
    match (a, b) {
        (Value::String(sa), Value::String(sb)) => return sa == sb,
        (Value::Bool(ba), Value::Bool(bb)) => return ba == bb,
        (Value::Null, _) | (_, Value::Null) => return a.is_null() && b.is_null(),
        _ => {}
    }

    if a.kind() != b.kind() {
        stats.record_attempt();
    }

    let (ka, kb) = (a.coercion_key(), b.coercion_key());
    if ka == kb {
        return true;
    }

    // Last resort: compare the string forms. Ordering never falls through
    // like this, only equality.
    if std::mem::discriminant(&ka) != std::mem::discriminant(&kb) {
        stats.record_failure();
        return a.to_string() == b.to_string();
    }

    false
}

/// Coerced ordering. Numerics (and numeric-looking strings) order by their
/// widened value; two non-numeric strings order lexically; every other
/// pairing has no defined order.
pub fn coerced_cmp(a: &Value, b: &Value, stats: &CoercionStats) -> Option<Ordering> {
    stats.record_attempt();

    if let (Some(fa), Some(fb)) = (a.as_numeric(), b.as_numeric()) {
        return fa.partial_cmp(&fb);
    }

    if let (Value::String(sa), Value::String(sb)) = (a, b) {
        return Some(sa.cmp(sb));
    }

    stats.record_failure();
    None
}

/// A totally-ordered key over numeric values, used by the range index.
/// Ascending by value; `-0.0` collapses into `0.0` so the two forms of
/// zero land on the same key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NumericKey(f64);

impl NumericKey {
    pub fn new(f: f64) -> Self {
        NumericKey(normalize_float(f))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl PartialEq for NumericKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for NumericKey {}

impl PartialOrd for NumericKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NumericKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Counters over coercion activity, readable through
/// `Graph::coercion_stats`. Each container owns its own pair; there is no
/// process-wide state.
#[derive(Debug, Default)]
pub struct CoercionStats {
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl CoercionStats {
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(AtomicOrdering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(AtomicOrdering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::{coerced_cmp, coerced_eq, CoercionKey, CoercionStats, NumericKey, Value};
    use std::cmp::Ordering;

    #[test]
    fn should_compare_same_category_directly() {
        let stats = CoercionStats::default();
        assert!(coerced_eq(&Value::I64(3), &Value::I64(3), &stats));
        assert!(!coerced_eq(&Value::String("a".into()), &Value::String("b".into()), &stats));
        assert!(coerced_eq(&Value::Null, &Value::Null, &stats));
    }

    #[test]
    fn should_widen_numerics() {
        let stats = CoercionStats::default();
        assert!(coerced_eq(&Value::I32(85), &Value::I64(85), &stats));
        assert!(coerced_eq(&Value::I64(85), &Value::F64(85.0), &stats));
        assert!(coerced_eq(&Value::F32(0.5), &Value::F64(0.5), &stats));
        assert!(!coerced_eq(&Value::I64(85), &Value::F64(85.5), &stats));
    }

    #[test]
    fn should_parse_strings_against_numerics_and_booleans() {
        let stats = CoercionStats::default();
        assert!(coerced_eq(&Value::String("85".into()), &Value::I64(85), &stats));
        assert!(coerced_eq(&Value::String("85.0".into()), &Value::I64(85), &stats));
        assert!(coerced_eq(&Value::String("true".into()), &Value::Bool(true), &stats));
        assert!(!coerced_eq(&Value::String("eighty-five".into()), &Value::I64(85), &stats));
        assert!(stats.attempts() > 0);
    }

    #[test]
    fn should_compare_string_pairs_directly() {
        let stats = CoercionStats::default();
        assert!(!coerced_eq(&Value::String("05".into()), &Value::String("5".into()), &stats));
        assert!(coerced_eq(&Value::String("05".into()), &Value::I64(5), &stats));
        assert!(coerced_eq(&Value::String("5".into()), &Value::I64(5), &stats));
    }

    #[test]
    fn should_never_equate_null_with_anything_else() {
        let stats = CoercionStats::default();
        assert!(!coerced_eq(&Value::Null, &Value::String("null".into()), &stats));
        assert!(!coerced_eq(&Value::Null, &Value::I64(0), &stats));
    }

    #[test]
    fn should_order_numerics_and_numeric_strings() {
        let stats = CoercionStats::default();
        assert_eq!(
            coerced_cmp(&Value::String("85".into()), &Value::I64(90), &stats),
            Some(Ordering::Less)
        );
        assert_eq!(coerced_cmp(&Value::F64(2.5), &Value::I32(2), &stats), Some(Ordering::Greater));
        assert_eq!(
            coerced_cmp(&Value::String("b".into()), &Value::String("a".into()), &stats),
            Some(Ordering::Greater)
        );
        assert_eq!(coerced_cmp(&Value::Bool(true), &Value::I64(1), &stats), None);
        assert_eq!(stats.failures(), 1);
    }

    #[test]
    fn should_collapse_coercion_keys() {
        assert_eq!(Value::I32(85).coercion_key(), Value::String("85".into()).coercion_key());
        assert_eq!(Value::F64(85.0).coercion_key(), Value::I64(85).coercion_key());
        assert_eq!(Value::String("true".into()).coercion_key(), CoercionKey::Bool(true));
        assert_ne!(Value::String("85.5".into()).coercion_key(), CoercionKey::Int(85));
    }

    #[test]
    fn should_collapse_zero_signs_in_numeric_keys() {
        assert_eq!(NumericKey::new(0.0), NumericKey::new(-0.0));
        assert!(NumericKey::new(1.0) > NumericKey::new(0.5));
    }
}
