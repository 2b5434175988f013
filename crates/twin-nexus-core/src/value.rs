//! Resource value typing and coercion.
//!
//! Resource values are carried as [`serde_json::Value`]; the declared
//! [`ValueType`] of a resource constrains what a twin will store. Updates
//! whose payload does not already satisfy the declared type are coerced
//! before storage, so a southbound `"21.5"` lands as the `21.5` the schema
//! promised northbound consumers.

use crate::error::NexusError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scalar kind of a resource value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueKind {
    /// Boolean
    Bool,
    /// 64-bit signed integer
    Int,
    /// 64-bit float
    Float,
    /// UTF-8 string
    String,
    /// Point in time, stored as an RFC 3339 string
    Instant,
    /// Arbitrary structured value, stored as-is
    Object,
}

impl ValueKind {
    /// Infer the kind that best describes a JSON value.
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Int,
            Value::Number(_) => Self::Float,
            Value::String(_) => Self::String,
            _ => Self::Object,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Instant => "instant",
            Self::Object => "object",
        };
        write!(f, "{name}")
    }
}

/// Cardinality of a resource: a single value or an ordered collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cardinality {
    /// Exactly one value
    Scalar,
    /// An ordered collection, optionally bounded
    Many {
        /// Upper bound on the number of elements, if any
        bound: Option<usize>,
    },
}

/// Declared type of a resource: scalar kind plus cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueType {
    /// Element kind
    pub kind: ValueKind,
    /// Scalar or collection
    pub cardinality: Cardinality,
}

impl ValueType {
    /// A scalar of the given kind.
    #[must_use]
    pub fn scalar(kind: ValueKind) -> Self {
        Self {
            kind,
            cardinality: Cardinality::Scalar,
        }
    }

    /// An unbounded ordered collection of the given kind.
    #[must_use]
    pub fn many(kind: ValueKind) -> Self {
        Self {
            kind,
            cardinality: Cardinality::Many { bound: None },
        }
    }

    /// A bounded ordered collection of the given kind.
    #[must_use]
    pub fn bounded(kind: ValueKind, bound: usize) -> Self {
        Self {
            kind,
            cardinality: Cardinality::Many { bound: Some(bound) },
        }
    }

    /// Infer a type from a value, used when structure is minted implicitly
    /// on first data update.
    #[must_use]
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Array(items) => {
                let kind = items.first().map_or(ValueKind::Object, ValueKind::of);
                Self::many(kind)
            }
            other => Self::scalar(ValueKind::of(other)),
        }
    }

    /// Check whether a value already satisfies this type without coercion.
    #[must_use]
    pub fn is_satisfied_by(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self.cardinality {
            Cardinality::Scalar => kind_matches(self.kind, value),
            Cardinality::Many { bound } => match value {
                Value::Array(items) => {
                    bound.map_or(true, |b| items.len() <= b)
                        && items.iter().all(|v| kind_matches(self.kind, v))
                }
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cardinality {
            Cardinality::Scalar => write!(f, "{}", self.kind),
            Cardinality::Many { bound: None } => write!(f, "{}[]", self.kind),
            Cardinality::Many { bound: Some(b) } => write!(f, "{}[{b}]", self.kind),
        }
    }
}

fn kind_matches(kind: ValueKind, value: &Value) -> bool {
    match kind {
        ValueKind::Bool => value.is_boolean(),
        ValueKind::Int => value.as_i64().is_some(),
        ValueKind::Float => value.is_number(),
        ValueKind::String => value.is_string(),
        ValueKind::Instant => value
            .as_str()
            .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
        ValueKind::Object => true,
    }
}

/// Coerce a value to the declared type.
///
/// `Null` always passes through; for `Many` types a scalar payload is
/// wrapped into a single-element collection and each element is coerced
/// individually. The stored collection always replaces the previous one
/// wholesale, so an empty array is a valid way to clear a resource.
///
/// # Errors
///
/// Returns [`NexusError::Coercion`] if no lossless representation exists,
/// or [`NexusError::BoundExceeded`] when a bounded collection overflows.
pub fn coerce(resource: &str, value: Value, target: &ValueType) -> Result<Value, NexusError> {
    if value.is_null() || target.is_satisfied_by(&value) {
        return Ok(value);
    }
    match target.cardinality {
        Cardinality::Scalar => coerce_scalar(value, target.kind),
        Cardinality::Many { bound } => {
            let items = match value {
                Value::Array(items) => items,
                scalar => vec![scalar],
            };
            if let Some(bound) = bound {
                if items.len() > bound {
                    return Err(NexusError::BoundExceeded {
                        resource: resource.to_string(),
                        bound,
                    });
                }
            }
            let coerced = items
                .into_iter()
                .map(|item| coerce_scalar(item, target.kind))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(coerced))
        }
    }
}

fn coerce_scalar(value: Value, kind: ValueKind) -> Result<Value, NexusError> {
    let fail = |value: &Value| NexusError::Coercion {
        expected: kind.to_string(),
        value: value.to_string(),
    };
    match kind {
        ValueKind::Object => Ok(value),
        ValueKind::Bool => match &value {
            Value::Bool(_) => Ok(value),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(fail(&value)),
            },
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(fail(&value)),
            },
            _ => Err(fail(&value)),
        },
        ValueKind::Int => match &value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| {
                    // Whole floats only, and only where the cast is exact.
                    n.as_f64()
                        .filter(|f| {
                            f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64
                        })
                        .map(|f| f as i64)
                })
                .map(Value::from)
                .ok_or_else(|| fail(&value)),
            Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| fail(&value)),
            _ => Err(fail(&value)),
        },
        ValueKind::Float => match &value {
            Value::Number(n) => n.as_f64().map(Value::from).ok_or_else(|| fail(&value)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| fail(&value)),
            _ => Err(fail(&value)),
        },
        ValueKind::String => match value {
            Value::String(_) => Ok(value),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            other => Ok(Value::String(other.to_string())),
        },
        ValueKind::Instant => match &value {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Value::String(dt.with_timezone(&Utc).to_rfc3339()))
                .map_err(|_| fail(&value)),
            Value::Number(n) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .map(|dt| Value::String(dt.to_rfc3339()))
                .ok_or_else(|| fail(&value)),
            _ => Err(fail(&value)),
        },
    }
}

/// Render an instant as a JSON value the way [`coerce`] stores it.
#[must_use]
pub fn instant_value(instant: DateTime<Utc>) -> Value {
    Value::String(instant.to_rfc3339())
}

/// A value together with the timestamp of its observation.
///
/// The currency of the whiteboard: external pull/push handlers exchange
/// `TimedValue`s with the twin, and their timestamps run through the same
/// conflict gate as any other update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    /// The observed value, if any
    pub value: Option<Value>,
    /// When the value was observed
    pub timestamp: Option<DateTime<Utc>>,
}

impl TimedValue {
    /// A value observed at the given instant.
    #[must_use]
    pub fn new(value: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: Some(value),
            timestamp: Some(timestamp),
        }
    }

    /// An empty observation.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            value: None,
            timestamp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_satisfaction() {
        let ty = ValueType::scalar(ValueKind::Float);
        assert!(ty.is_satisfied_by(&json!(21.5)));
        assert!(ty.is_satisfied_by(&json!(21)));
        assert!(!ty.is_satisfied_by(&json!("21.5")));
        assert!(ty.is_satisfied_by(&Value::Null));
    }

    #[test]
    fn string_to_float_coercion() {
        let ty = ValueType::scalar(ValueKind::Float);
        assert_eq!(coerce("value", json!("21.5"), &ty).unwrap(), json!(21.5));
        assert!(coerce("value", json!("warm"), &ty).is_err());
    }

    #[test]
    fn scalar_wrapped_into_collection() {
        let ty = ValueType::many(ValueKind::Int);
        assert_eq!(coerce("value", json!(3), &ty).unwrap(), json!([3]));
        assert_eq!(coerce("value", json!(["4", 5]), &ty).unwrap(), json!([4, 5]));
    }

    #[test]
    fn empty_collection_is_valid() {
        let ty = ValueType::many(ValueKind::Float);
        assert!(ty.is_satisfied_by(&json!([])));
        assert_eq!(coerce("value", json!([]), &ty).unwrap(), json!([]));
    }

    #[test]
    fn bounded_collection_overflow() {
        let ty = ValueType::bounded(ValueKind::Int, 2);
        assert!(ty.is_satisfied_by(&json!([1, 2])));
        let err = coerce("value", json!([1, 2, 3]), &ty).unwrap_err();
        assert!(matches!(err, NexusError::BoundExceeded { bound: 2, .. }));
    }

    #[test]
    fn whole_float_to_int_coercion_respects_range() {
        let ty = ValueType::scalar(ValueKind::Int);
        assert_eq!(coerce("value", json!(42.0), &ty).unwrap(), json!(42));
        assert!(coerce("value", json!(42.5), &ty).is_err());
        // Out of i64 range: rejected rather than saturated.
        assert!(coerce("value", json!(1e30), &ty).is_err());
        assert!(coerce("value", json!(-1e30), &ty).is_err());
    }

    #[test]
    fn instant_from_epoch_millis() {
        let ty = ValueType::scalar(ValueKind::Instant);
        let coerced = coerce("started", json!(1_704_067_200_000_i64), &ty).unwrap();
        assert!(ty.is_satisfied_by(&coerced));
    }

    #[test]
    fn inference_from_payload() {
        assert_eq!(ValueType::infer(&json!(1.5)), ValueType::scalar(ValueKind::Float));
        assert_eq!(ValueType::infer(&json!([1, 2])), ValueType::many(ValueKind::Int));
        assert_eq!(
            ValueType::infer(&json!({"a": 1})),
            ValueType::scalar(ValueKind::Object)
        );
    }
}
