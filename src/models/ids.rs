use std::collections::HashSet;
use std::fmt;

use crate::errors::{ValidationError, ValidationResult};
use crate::models::Value;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The identity of a vertex, edge, or vertex-property.
///
/// Allocated identifiers are always `Int`; the other forms only appear when
/// the caller supplies its own identifiers. Ordering is by variant, then by
/// value, which gives the stable id order snapshots are written in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElementId {
    Int(i64),
    String(String),
    Uuid(Uuid),
}

impl ElementId {
    /// Coerces a user-supplied property value into an element id.
    ///
    /// Integers map to `Int`; strings that parse as integers or UUIDs map
    /// to those forms, and any other non-empty string is kept verbatim.
    /// Floats are accepted when they hold an integral value.
    ///
    /// # Errors
    /// Returns a `ValidationError` for nulls, booleans, non-integral
    /// floats, and empty strings.
    pub fn coerce(value: &Value) -> ValidationResult<Self> {
        match value {
            Value::I32(i) => Ok(ElementId::Int(i64::from(*i))),
            Value::I64(i) => Ok(ElementId::Int(*i)),
            Value::F32(f) => coerce_float(f64::from(*f)),
            Value::F64(f) => coerce_float(*f),
            Value::String(s) => {
                if s.is_empty() {
                    Err(ValidationError::EmptyValue)
                } else if let Ok(i) = s.parse::<i64>() {
                    Ok(ElementId::Int(i))
                } else if let Ok(u) = Uuid::parse_str(s) {
                    Ok(ElementId::Uuid(u))
                } else {
                    Ok(ElementId::String(s.clone()))
                }
            }
            Value::Null | Value::Bool(_) => Err(ValidationError::InvalidValue),
        }
    }
}

fn coerce_float(f: f64) -> ValidationResult<ElementId> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Ok(ElementId::Int(f as i64))
    } else {
        Err(ValidationError::InvalidValue)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementId::Int(i) => write!(f, "{}", i),
            ElementId::String(s) => write!(f, "{}", s),
            ElementId::Uuid(u) => write!(f, "{}", u),
        }
    }
}

impl From<i64> for ElementId {
    fn from(i: i64) -> Self {
        ElementId::Int(i)
    }
}

impl From<&str> for ElementId {
    fn from(s: &str) -> Self {
        ElementId::String(s.to_string())
    }
}

impl From<Uuid> for ElementId {
    fn from(u: Uuid) -> Self {
        ElementId::Uuid(u)
    }
}

/// Issues monotonic identifiers for one element domain and remembers every
/// identifier that was ever retired, so that removal is distinguishable
/// from absence and retired ids are never reissued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdAllocator {
    next: i64,
    retired: HashSet<ElementId>,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self {
            next: 1,
            retired: HashSet::new(),
        }
    }
}

impl IdAllocator {
    /// Issues the next identifier.
    pub fn next(&mut self) -> ElementId {
        let id = self.next;
        self.next += 1;
        ElementId::Int(id)
    }

    /// Records a user-supplied identifier so the monotonic counter never
    /// issues it again.
    pub fn reserve(&mut self, id: &ElementId) {
        if let ElementId::Int(i) = id {
            if *i >= self.next {
                self.next = i + 1;
            }
        }
    }

    /// Retires an identifier after its element was removed.
    pub fn retire(&mut self, id: ElementId) {
        self.retired.insert(id);
    }

    /// Lifts retirement for an identifier whose identity is being taken
    /// over, as the snapshot importer's replace policy does.
    pub fn restore(&mut self, id: &ElementId) {
        self.retired.remove(id);
        self.reserve(id);
    }

    /// Whether the identifier belonged to an element that was removed.
    pub fn is_retired(&self, id: &ElementId) -> bool {
        self.retired.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::{ElementId, IdAllocator};
    use crate::models::Value;
    use uuid::Uuid;

    #[test]
    fn should_allocate_monotonically() {
        let mut alloc = IdAllocator::default();
        assert_eq!(alloc.next(), ElementId::Int(1));
        assert_eq!(alloc.next(), ElementId::Int(2));
    }

    #[test]
    fn should_skip_reserved_ids() {
        let mut alloc = IdAllocator::default();
        alloc.reserve(&ElementId::Int(10));
        assert_eq!(alloc.next(), ElementId::Int(11));
    }

    #[test]
    fn should_never_reissue_retired_ids() {
        let mut alloc = IdAllocator::default();
        let id = alloc.next();
        alloc.retire(id.clone());
        assert!(alloc.is_retired(&id));
        assert_ne!(alloc.next(), id);
    }

    #[test]
    fn should_coerce_ids() {
        assert_eq!(ElementId::coerce(&Value::I64(7)).unwrap(), ElementId::Int(7));
        assert_eq!(ElementId::coerce(&Value::I32(7)).unwrap(), ElementId::Int(7));
        assert_eq!(ElementId::coerce(&Value::F64(7.0)).unwrap(), ElementId::Int(7));
        assert_eq!(ElementId::coerce(&Value::String("7".to_string())).unwrap(), ElementId::Int(7));
        assert_eq!(
            ElementId::coerce(&Value::String("alpha".to_string())).unwrap(),
            ElementId::String("alpha".to_string())
        );

        let u = Uuid::parse_str("936da01f-9abd-4d9d-80c7-02af85c822a8").unwrap();
        assert_eq!(
            ElementId::coerce(&Value::String(u.to_string())).unwrap(),
            ElementId::Uuid(u)
        );

        assert!(ElementId::coerce(&Value::Null).is_err());
        assert!(ElementId::coerce(&Value::Bool(true)).is_err());
        assert!(ElementId::coerce(&Value::F64(7.5)).is_err());
        assert!(ElementId::coerce(&Value::String(String::new())).is_err());
    }

    #[test]
    fn should_order_ids_stably() {
        let mut ids = vec![
            ElementId::String("a".to_string()),
            ElementId::Int(2),
            ElementId::Int(1),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ElementId::Int(1),
                ElementId::Int(2),
                ElementId::String("a".to_string()),
            ]
        );
    }
}
