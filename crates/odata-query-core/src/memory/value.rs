//! Dynamically typed field values for the in-memory evaluator.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use odata_query_model::{QueryError, QueryResult};
use uuid::Uuid;

/// A property value read from an in-memory item.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Absent or explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point.
    Float(f64),
    /// Text.
    String(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Instant with offset.
    DateTime(DateTime<FixedOffset>),
    /// Wall-clock time.
    Time(NaiveTime),
    /// GUID.
    Guid(Uuid),
}

/// Comparison class; values of different classes never compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueClass {
    Bool,
    Numeric,
    String,
    Date,
    DateTime,
    Time,
    Guid,
}

impl fmt::Display for ValueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "boolean",
            Self::Numeric => "number",
            Self::String => "string",
            Self::Date => "date",
            Self::DateTime => "date-time",
            Self::Time => "time",
            Self::Guid => "guid",
        })
    }
}

impl FieldValue {
    /// Returns `true` for [`FieldValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The text, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn class(&self) -> Option<ValueClass> {
        Some(match self {
            Self::Null => return None,
            Self::Bool(_) => ValueClass::Bool,
            Self::Int(_) | Self::UInt(_) | Self::Float(_) => ValueClass::Numeric,
            Self::String(_) => ValueClass::String,
            Self::Date(_) => ValueClass::Date,
            Self::DateTime(_) => ValueClass::DateTime,
            Self::Time(_) => ValueClass::Time,
            Self::Guid(_) => ValueClass::Guid,
        })
    }

    /// Integer value, if this is an integer that fits `i64`.
    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::UInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::UInt(n) => Some(*n as f64),
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Order two non-null values of the same class.
    ///
    /// Integers compare exactly across signedness; a float against an
    /// integer compares as floats. Nulls sort before everything else.
    ///
    /// # Errors
    ///
    /// Returns a type mismatch when the classes differ.
    pub fn try_cmp(&self, other: &Self) -> QueryResult<Ordering> {
        let ordering = match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::UInt(a), Self::UInt(b)) => a.cmp(b),
            (Self::Int(a), Self::UInt(b)) => i128::from(*a).cmp(&i128::from(*b)),
            (Self::UInt(a), Self::Int(b)) => i128::from(*a).cmp(&i128::from(*b)),
            (Self::Float(_), _) | (_, Self::Float(_))
                if self.class() == Some(ValueClass::Numeric)
                    && other.class() == Some(ValueClass::Numeric) =>
            {
                let (a, b) = (self.as_f64().unwrap_or(0.0), other.as_f64().unwrap_or(0.0));
                a.total_cmp(&b)
            }
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            (Self::Guid(a), Self::Guid(b)) => a.cmp(b),
            _ => {
                return Err(QueryError::type_mismatch(format!(
                    "cannot compare {} with {}",
                    describe(self),
                    describe(other)
                )));
            }
        };
        Ok(ordering)
    }
}

pub(crate) fn describe(value: &FieldValue) -> String {
    value
        .class()
        .map_or_else(|| "null".to_owned(), |c| c.to_string())
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::UInt(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTime(dt) => f.write_str(&dt.to_rfc3339()),
            Self::Time(t) => write!(f, "{t}"),
            Self::Guid(g) => write!(f, "{g}"),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => UInt,
    u16 => UInt,
    u32 => UInt,
    u64 => UInt,
    f32 => Float,
    f64 => Float,
    String => String,
    NaiveDate => Date,
    DateTime<FixedOffset> => DateTime,
    NaiveTime => Time,
    Uuid => Guid,
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Field access
// ---------------------------------------------------------------------------

/// Read access to the named properties of an item.
///
/// Return `None` for a name the item type does not have and
/// `Some(FieldValue::Null)` for a declared property whose value is null.
pub trait FieldAccessor {
    /// The value of property `name`.
    fn field(&self, name: &str) -> Option<FieldValue>;
}

impl<T: FieldAccessor + ?Sized> FieldAccessor for &T {
    fn field(&self, name: &str) -> Option<FieldValue> {
        (**self).field(name)
    }
}

impl<S: std::hash::BuildHasher> FieldAccessor for HashMap<String, FieldValue, S> {
    fn field(&self, name: &str) -> Option<FieldValue> {
        self.get(name).cloned()
    }
}

impl FieldAccessor for BTreeMap<String, FieldValue> {
    fn field(&self, name: &str) -> Option<FieldValue> {
        self.get(name).cloned()
    }
}
