use std::fmt;

use serde::{Deserialize, Serialize};

/// A dynamically typed value, as stored in actor projections and in the
/// flat evaluation context.
///
/// Coercions follow the loose rules rule authors expect from effect
/// conditions: `null` is falsy and not a number, booleans count as 0/1,
/// numeric strings compare as numbers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// An absent value.
    #[default]
    Null,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit floating-point value.
    Number(f64),
    /// A text value.
    String(String),
    /// An ordered list of values.
    List(Vec<Value>),
}

impl Value {
    /// Truthiness of the value.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
        }
    }

    /// Numeric coercion. Values with no numeric meaning become `NaN`.
    pub fn as_number(&self) -> f64 {
        match self {
            Self::Null => f64::NAN,
            Self::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Number(n) => *n,
            Self::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    f64::NAN
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Self::List(_) => f64::NAN,
        }
    }

    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Loose equality: numbers compare numerically against numeric strings
    /// and booleans, strings compare case-sensitively, lists element-wise.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Self::List(_), _) | (_, Self::List(_)) => false,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (a, b) => {
                let (x, y) = (a.as_number(), b.as_number());
                !x.is_nan() && !y.is_nan() && x == y
            }
        }
    }

    /// Returns true if this value contains `needle`: list membership or
    /// substring match for strings.
    pub fn contains(&self, needle: &Value) -> bool {
        match self {
            Self::List(items) => items.iter().any(|item| item.loose_eq(needle)),
            Self::String(s) => match needle {
                Self::String(n) => s.contains(n.as_str()),
                other => s.contains(&other.to_string()),
            },
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Self::String(s) => write!(f, "{s}"),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
