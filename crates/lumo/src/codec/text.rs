// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Flat textual key/value form.
//!
//! ```text
//! {"oc":[{"href":"/a/light","rep":{"power":100,"name":"Soletta LAMP!","state":false}}]}
//! ```
//!
//! Keys are written in property order. Booleans are bare `true`/`false`,
//! integers and timestamps are unquoted numbers, strings are quoted, opaque
//! values are arrays of byte values. Without a [`Schema`] a number decodes as
//! an integer; pass one to recover timestamps and opaque strings.

use super::{check_unique, CodecError, Property, PropertyId, PropertyKind, PropertyValue, Schema};
use crate::message::ResourcePath;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

/// Decoded text representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representation {
    /// `href` member, absent in write payloads.
    pub href: Option<ResourcePath>,
    pub properties: Vec<Property>,
}

/// `rep` members in document order, repeated keys included.
struct Members(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for Members {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MembersVisitor;

        impl<'de> Visitor<'de> for MembersVisitor {
            type Value = Members;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a \"rep\" object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Members, A::Error> {
                let mut members = Vec::new();
                while let Some(member) = map.next_entry::<String, Value>()? {
                    members.push(member);
                }
                Ok(Members(members))
            }
        }

        deserializer.deserialize_map(MembersVisitor)
    }
}

#[derive(Deserialize)]
struct Element {
    href: Option<String>,
    rep: Option<Members>,
}

#[derive(Deserialize)]
struct Document {
    oc: Vec<Element>,
}

fn to_json(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Integer(v) | PropertyValue::Time(v) => Value::from(*v),
        PropertyValue::Boolean(b) => Value::Bool(*b),
        PropertyValue::String(s) => Value::String(s.clone()),
        PropertyValue::Opaque(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

fn from_json(key: &str, value: &Value, kind: Option<PropertyKind>) -> Result<PropertyValue, CodecError> {
    let unsupported = || CodecError::Text(format!("unsupported value for \"{}\": {}", key, value));

    match (value, kind) {
        (Value::Bool(b), None | Some(PropertyKind::Boolean)) => Ok(PropertyValue::Boolean(*b)),
        (Value::Number(n), None | Some(PropertyKind::Integer)) => {
            n.as_i64().map(PropertyValue::Integer).ok_or_else(unsupported)
        }
        (Value::Number(n), Some(PropertyKind::Time)) => {
            n.as_i64().map(PropertyValue::Time).ok_or_else(unsupported)
        }
        (Value::String(s), None | Some(PropertyKind::String)) => Ok(PropertyValue::String(s.clone())),
        (Value::String(s), Some(PropertyKind::Opaque)) => Ok(PropertyValue::Opaque(s.as_bytes().to_vec())),
        (Value::Array(items), None | Some(PropertyKind::Opaque)) => items
            .iter()
            .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect::<Option<Vec<u8>>>()
            .map(PropertyValue::Opaque)
            .ok_or_else(unsupported),
        _ => Err(unsupported()),
    }
}

/// Encode `properties` as the representation of the resource at `href`.
///
/// Pass `None` for `href` to build a write payload.
pub fn encode(href: Option<&ResourcePath>, properties: &[Property]) -> Result<Vec<u8>, CodecError> {
    check_unique(properties)?;
    let mut rep = Map::new();
    for property in properties {
        rep.insert(property.id.to_string(), to_json(&property.value));
    }

    let mut element = Map::new();
    if let Some(href) = href {
        element.insert("href".into(), Value::String(href.to_string()));
    }
    element.insert("rep".into(), Value::Object(rep));

    let mut root = Map::new();
    root.insert("oc".into(), Value::Array(vec![Value::Object(element)]));

    serde_json::to_vec(&Value::Object(root)).map_err(|e| CodecError::Text(e.to_string()))
}

/// Decode the first element of an `oc` array.
///
/// Bytes after the JSON document (for example padding) are ignored.
pub fn decode(bytes: &[u8]) -> Result<Representation, CodecError> {
    decode_with_schema(bytes, None)
}

/// Decode with per-property kind hints.
pub fn decode_with_schema(bytes: &[u8], schema: Option<&Schema>) -> Result<Representation, CodecError> {
    let document: Document = serde_json::Deserializer::from_slice(bytes)
        .into_iter::<Document>()
        .next()
        .ok_or_else(|| CodecError::Text("empty payload".into()))?
        .map_err(|e| CodecError::Text(e.to_string()))?;

    let element = document
        .oc
        .into_iter()
        .next()
        .ok_or_else(|| CodecError::Text("missing \"oc\" element".into()))?;
    let href = element.href.as_deref().map(ResourcePath::parse);
    let rep = element
        .rep
        .ok_or_else(|| CodecError::Text("missing \"rep\" object".into()))?;

    let properties = rep
        .0
        .iter()
        .map(|(key, value)| {
            let id = PropertyId::Name(key.clone());
            let kind = schema.and_then(|s| s.kind_of(&id));
            from_json(key, value, kind).map(|value| Property { id, value })
        })
        .collect::<Result<Vec<_>, _>>()?;
    check_unique(&properties)?;

    Ok(Representation { href, properties })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lamp(state: bool) -> Vec<Property> {
        vec![
            Property::integer("power", 100),
            Property::string("name", "Soletta LAMP!"),
            Property::boolean("state", state),
        ]
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        let bytes = encode(Some(&ResourcePath::parse("/a/light")), &lamp(false)).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"oc":[{"href":"/a/light","rep":{"power":100,"name":"Soletta LAMP!","state":false}}]}"#
        );
    }

    #[test]
    fn test_write_payload_without_href() {
        let bytes = encode(None, &[Property::boolean("state", true)]).unwrap();
        assert_eq!(
            String::from_utf8(bytes.clone()).unwrap(),
            r#"{"oc":[{"rep":{"state":true}}]}"#
        );
        let rep = decode(&bytes).unwrap();
        assert_eq!(rep.href, None);
        assert_eq!(rep.properties, vec![Property::boolean("state", true)]);
    }

    #[test]
    fn test_roundtrip_preserves_order() {
        let href = ResourcePath::parse("/a/light");
        let bytes = encode(Some(&href), &lamp(true)).unwrap();
        let rep = decode(&bytes).unwrap();
        assert_eq!(rep.href, Some(href));
        assert_eq!(rep.properties, lamp(true));
    }

    #[test]
    fn test_roundtrip_with_schema_recovers_kinds() {
        let props = vec![
            Property::time("seen", 1_700_000_000),
            Property::new("blob", PropertyValue::Opaque(vec![1, 2, 255])),
            Property::new("tag", PropertyValue::Opaque(b"abc".to_vec())),
        ];
        let schema = Schema::new()
            .field("seen", PropertyKind::Time)
            .field("blob", PropertyKind::Opaque)
            .field("tag", PropertyKind::Opaque);

        let bytes = encode(None, &props).unwrap();
        let rep = decode_with_schema(&bytes, Some(&schema)).unwrap();
        assert_eq!(rep.properties, props);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = encode(None, &[Property::boolean("state", false)]).unwrap();
        bytes.extend_from_slice(b"\0\0\0");
        assert!(decode(&bytes).is_ok());
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(decode(b"").is_err());
        assert!(decode(b"{\"oc\":[]}").is_err());
        assert!(decode(b"{\"oc\":[{\"href\":\"/a\"}]}").is_err());
        assert!(decode(b"{\"oc\":[{\"rep\":{\"x\":1.5}}]}").is_err());
        assert!(decode(b"{\"oc\":[{\"rep\":{\"x\":null}}]}").is_err());
        assert!(decode(b"{\"oc\":[{\"href\":5,\"rep\":{}}]}").is_err());
    }

    #[test]
    fn test_duplicate_property_rejected() {
        let twice = [Property::boolean("state", true), Property::boolean("state", false)];
        assert_eq!(
            encode(None, &twice),
            Err(CodecError::DuplicateProperty(PropertyId::Name("state".into())))
        );

        let bytes = br#"{"oc":[{"rep":{"state":true,"power":1,"state":false}}]}"#;
        assert_eq!(
            decode(bytes),
            Err(CodecError::DuplicateProperty(PropertyId::Name("state".into())))
        );
    }
}
