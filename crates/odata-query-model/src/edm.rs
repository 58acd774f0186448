//! EDM primitive types.
//!
//! Only the primitive types that can appear as declared property types or as
//! literal types in query expressions are modeled. Structured and collection
//! types are expressed through navigation descriptors instead.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An EDM primitive type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdmType {
    /// `Edm.Boolean`
    #[serde(rename = "Edm.Boolean")]
    Boolean,
    /// `Edm.Byte` (unsigned 8-bit).
    #[serde(rename = "Edm.Byte")]
    Byte,
    /// `Edm.SByte`
    #[serde(rename = "Edm.SByte")]
    SByte,
    /// `Edm.Int16`
    #[serde(rename = "Edm.Int16")]
    Int16,
    /// `Edm.Int32`
    #[serde(rename = "Edm.Int32")]
    Int32,
    /// `Edm.Int64`
    #[serde(rename = "Edm.Int64")]
    Int64,
    /// `Edm.Single`
    #[serde(rename = "Edm.Single")]
    Single,
    /// `Edm.Double`
    #[serde(rename = "Edm.Double")]
    Double,
    /// `Edm.Decimal`
    #[serde(rename = "Edm.Decimal")]
    Decimal,
    /// `Edm.String`
    #[serde(rename = "Edm.String")]
    String,
    /// `Edm.Date`
    #[serde(rename = "Edm.Date")]
    Date,
    /// `Edm.DateTimeOffset`
    #[serde(rename = "Edm.DateTimeOffset")]
    DateTimeOffset,
    /// `Edm.TimeOfDay`
    #[serde(rename = "Edm.TimeOfDay")]
    TimeOfDay,
    /// `Edm.Guid`
    #[serde(rename = "Edm.Guid")]
    Guid,
    /// `Edm.Binary`
    #[serde(rename = "Edm.Binary")]
    Binary,
}

/// Coarse compatibility class used for type checking comparisons and sorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
    /// Booleans.
    Boolean,
    /// Any integer or floating-point type.
    Numeric,
    /// Strings.
    String,
    /// Calendar dates.
    Date,
    /// Instants with offset.
    DateTime,
    /// Wall-clock times.
    Time,
    /// GUIDs.
    Guid,
    /// Raw bytes.
    Binary,
}

impl EdmType {
    /// Every supported type, in declaration order.
    pub const ALL: [Self; 15] = [
        Self::Boolean,
        Self::Byte,
        Self::SByte,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::Single,
        Self::Double,
        Self::Decimal,
        Self::String,
        Self::Date,
        Self::DateTimeOffset,
        Self::TimeOfDay,
        Self::Guid,
        Self::Binary,
    ];

    /// The qualified EDM name, e.g. `Edm.Int32`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "Edm.Boolean",
            Self::Byte => "Edm.Byte",
            Self::SByte => "Edm.SByte",
            Self::Int16 => "Edm.Int16",
            Self::Int32 => "Edm.Int32",
            Self::Int64 => "Edm.Int64",
            Self::Single => "Edm.Single",
            Self::Double => "Edm.Double",
            Self::Decimal => "Edm.Decimal",
            Self::String => "Edm.String",
            Self::Date => "Edm.Date",
            Self::DateTimeOffset => "Edm.DateTimeOffset",
            Self::TimeOfDay => "Edm.TimeOfDay",
            Self::Guid => "Edm.Guid",
            Self::Binary => "Edm.Binary",
        }
    }

    /// The compatibility class of this type.
    #[must_use]
    pub fn class(self) -> TypeClass {
        match self {
            Self::Boolean => TypeClass::Boolean,
            Self::Byte
            | Self::SByte
            | Self::Int16
            | Self::Int32
            | Self::Int64
            | Self::Single
            | Self::Double
            | Self::Decimal => TypeClass::Numeric,
            Self::String => TypeClass::String,
            Self::Date => TypeClass::Date,
            Self::DateTimeOffset => TypeClass::DateTime,
            Self::TimeOfDay => TypeClass::Time,
            Self::Guid => TypeClass::Guid,
            Self::Binary => TypeClass::Binary,
        }
    }

    /// Returns `true` for integer types (usable as flag masks).
    #[must_use]
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            Self::Byte | Self::SByte | Self::Int16 | Self::Int32 | Self::Int64
        )
    }

    /// Returns `true` for any numeric type.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        self.class() == TypeClass::Numeric
    }
}

impl fmt::Display for EdmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdmType {
    type Err = String;

    /// Parses a qualified (`Edm.Int32`) or bare (`Int32`) type name, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare = s
            .strip_prefix("Edm.")
            .or_else(|| s.strip_prefix("edm."))
            .unwrap_or(s);
        Self::ALL
            .into_iter()
            .find(|t| t.as_str()[4..].eq_ignore_ascii_case(bare))
            .ok_or_else(|| format!("unknown EDM type '{s}'"))
    }
}

impl fmt::Display for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Numeric => "numeric",
            Self::String => "string",
            Self::Date => "date",
            Self::DateTime => "date-time",
            Self::Time => "time",
            Self::Guid => "guid",
            Self::Binary => "binary",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_qualified_and_bare_names() {
        assert_eq!("Edm.Int32".parse::<EdmType>().unwrap(), EdmType::Int32);
        assert_eq!("string".parse::<EdmType>().unwrap(), EdmType::String);
        assert_eq!(
            "edm.datetimeoffset".parse::<EdmType>().unwrap(),
            EdmType::DateTimeOffset
        );
        assert!("Edm.Geography".parse::<EdmType>().is_err());
    }

    #[test]
    fn test_should_classify_numeric_types() {
        assert_eq!(EdmType::Decimal.class(), TypeClass::Numeric);
        assert!(EdmType::Byte.is_integral());
        assert!(!EdmType::Double.is_integral());
        assert!(!EdmType::String.is_numeric());
    }

    #[test]
    fn test_should_deserialize_from_qualified_name() {
        let t: EdmType = serde_json::from_str("\"Edm.Guid\"").unwrap();
        assert_eq!(t, EdmType::Guid);
    }
}
