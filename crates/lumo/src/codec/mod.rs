// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resource representation codec.
//!
//! A resource value is an ordered list of typed [`Property`] values. Two wire
//! forms are supported:
//!
//! - [`text`]: `{"oc":[{"href":"/a/light","rep":{"power":100,"state":true}}]}`,
//!   keyed by property name, key order preserved.
//! - [`tlv`]: a record set of `(id, type tag, length, value)` records, keyed by
//!   numeric id.
//!
//! Checking that mandatory properties are present is the caller's job, see
//! [`Schema::require`].

use thiserror::Error;

pub mod text;
pub mod tlv;

/// Codec-level decode failure (a refinement of a bad request).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Record truncated: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Unknown type tag 0x{0:02x}")]
    UnknownTag(u8),

    #[error("Invalid length {len} for type tag 0x{tag:02x}")]
    InvalidLength { tag: u8, len: usize },

    #[error("Invalid boolean byte 0x{0:02x}")]
    InvalidBoolean(u8),

    #[error("String property is not valid UTF-8")]
    InvalidUtf8,

    #[error("Property {0} cannot be encoded in this form")]
    Unencodable(String),

    #[error("Malformed text payload: {0}")]
    Text(String),

    #[error("Payload too large: {0} bytes")]
    TooLarge(usize),

    #[error("Property {0} appears more than once")]
    DuplicateProperty(PropertyId),
}

/// Property identifier: a name (text form) or a numeric resource id (TLV form).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyId {
    Name(String),
    Numeric(u16),
}

impl std::fmt::Display for PropertyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(n) => write!(f, "{}", n),
            Self::Numeric(id) => write!(f, "{}", id),
        }
    }
}

impl From<&str> for PropertyId {
    fn from(s: &str) -> Self {
        Self::Name(s.to_owned())
    }
}

impl From<u16> for PropertyId {
    fn from(id: u16) -> Self {
        Self::Numeric(id)
    }
}

/// Supported property types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Integer,
    Boolean,
    String,
    Time,
    Opaque,
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Integer(i64),
    Boolean(bool),
    String(String),
    /// Seconds since the Unix epoch.
    Time(i64),
    Opaque(Vec<u8>),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            Self::Integer(_) => PropertyKind::Integer,
            Self::Boolean(_) => PropertyKind::Boolean,
            Self::String(_) => PropertyKind::String,
            Self::Time(_) => PropertyKind::Time,
            Self::Opaque(_) => PropertyKind::Opaque,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) | Self::Time(v) => Some(*v),
            _ => None,
        }
    }

    /// String view; opaque values are accepted when they hold UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Opaque(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
}

/// One `(id, value)` pair of a resource representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub id: PropertyId,
    pub value: PropertyValue,
}

impl Property {
    pub fn new(id: impl Into<PropertyId>, value: PropertyValue) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }

    pub fn integer(id: impl Into<PropertyId>, v: i64) -> Self {
        Self::new(id, PropertyValue::Integer(v))
    }

    pub fn boolean(id: impl Into<PropertyId>, v: bool) -> Self {
        Self::new(id, PropertyValue::Boolean(v))
    }

    pub fn string(id: impl Into<PropertyId>, v: impl Into<String>) -> Self {
        Self::new(id, PropertyValue::String(v.into()))
    }

    pub fn time(id: impl Into<PropertyId>, secs: i64) -> Self {
        Self::new(id, PropertyValue::Time(secs))
    }
}

/// Find a property by id.
pub fn find<'a>(properties: &'a [Property], id: &PropertyId) -> Option<&'a PropertyValue> {
    properties.iter().find(|p| p.id == *id).map(|p| &p.value)
}

/// Reject a property list that names the same id twice.
pub fn check_unique(properties: &[Property]) -> Result<(), CodecError> {
    for (i, property) in properties.iter().enumerate() {
        if properties[..i].iter().any(|earlier| earlier.id == property.id) {
            return Err(CodecError::DuplicateProperty(property.id.clone()));
        }
    }
    Ok(())
}

/// Per-object property schema: declared kinds plus the mandatory subset.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<(PropertyId, PropertyKind, bool)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, id: impl Into<PropertyId>, kind: PropertyKind) -> Self {
        self.fields.push((id.into(), kind, false));
        self
    }

    pub fn mandatory(mut self, id: impl Into<PropertyId>, kind: PropertyKind) -> Self {
        self.fields.push((id.into(), kind, true));
        self
    }

    /// Declared kind for `id`, if any.
    pub fn kind_of(&self, id: &PropertyId) -> Option<PropertyKind> {
        self.fields
            .iter()
            .find(|(fid, _, _)| fid == id)
            .map(|(_, kind, _)| *kind)
    }

    /// Verify every mandatory property is present.
    ///
    /// Returns the first missing id.
    pub fn require(&self, properties: &[Property]) -> Result<(), PropertyId> {
        for (id, _, mandatory) in &self.fields {
            if *mandatory && find(properties, id).is_none() {
                return Err(id.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_require() {
        let schema = Schema::new()
            .mandatory(0u16, PropertyKind::String)
            .mandatory(1u16, PropertyKind::String)
            .field(2u16, PropertyKind::Integer);

        let props = vec![Property::string(0u16, "48.85"), Property::string(1u16, "2.29")];
        assert!(schema.require(&props).is_ok());

        let missing = vec![Property::string(0u16, "48.85")];
        assert_eq!(schema.require(&missing), Err(PropertyId::Numeric(1)));
    }

    #[test]
    fn test_check_unique() {
        assert!(check_unique(&[Property::integer(0u16, 1), Property::integer(1u16, 1)]).is_ok());
        assert_eq!(
            check_unique(&[
                Property::boolean("state", true),
                Property::integer("power", 1),
                Property::boolean("state", false),
            ]),
            Err(CodecError::DuplicateProperty(PropertyId::Name("state".into())))
        );
    }

    #[test]
    fn test_value_views() {
        assert_eq!(PropertyValue::Time(5).as_i64(), Some(5));
        assert_eq!(PropertyValue::Opaque(b"abc".to_vec()).as_str(), Some("abc"));
        assert_eq!(PropertyValue::Integer(1).as_bool(), None);
    }
}
