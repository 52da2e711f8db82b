// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tagged binary record form.
//!
//! A record set is a record count followed by that many records. Bytes after
//! the last counted record are ignored.
//!
//! ```text
//! record set:  +-------------+-----------+-----------+----
//!              | count (u16) | record 0  | record 1  | ...
//!              +-------------+-----------+-----------+----
//!
//! record:      +----------+---------+-------------+-----------------+
//!              | id (u16) | tag (1) | length (u16)| value (length B) |
//!              +----------+---------+-------------+-----------------+
//! ```
//!
//! All integers are big-endian. Integer and time values use the shortest of
//! 1, 2, 4 or 8 bytes that holds them. An instance record (tag `0x10`) wraps a
//! nested record set and is only accepted by [`decode_instances`].
//!
//! There is no embedded schema: consumers resolve ids against the object they
//! expect.

use super::{check_unique, CodecError, Property, PropertyId, PropertyValue};

pub const TAG_INTEGER: u8 = 0x01;
pub const TAG_BOOLEAN: u8 = 0x02;
pub const TAG_STRING: u8 = 0x03;
pub const TAG_TIME: u8 = 0x04;
pub const TAG_OPAQUE: u8 = 0x05;
pub const TAG_INSTANCE: u8 = 0x10;

/// Bytes before a record's value: id + tag + length.
const RECORD_HEADER_LEN: usize = 5;

/// Record set encoder over a growable buffer.
pub struct TlvEncoder {
    buf: Vec<u8>,
    count: u16,
}

impl TlvEncoder {
    pub fn new() -> Self {
        Self {
            buf: vec![0, 0],
            count: 0,
        }
    }

    fn record(&mut self, id: u16, tag: u8, value: &[u8]) -> Result<(), CodecError> {
        let len = u16::try_from(value.len()).map_err(|_| CodecError::TooLarge(value.len()))?;
        self.count = self
            .count
            .checked_add(1)
            .ok_or(CodecError::TooLarge(usize::from(u16::MAX) + 1))?;
        self.buf.reserve(RECORD_HEADER_LEN + value.len());
        self.buf.extend_from_slice(&id.to_be_bytes());
        self.buf.push(tag);
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(value);
        Ok(())
    }

    /// Encode one property. Only numeric ids are representable.
    pub fn encode_property(&mut self, property: &Property) -> Result<(), CodecError> {
        let id = match &property.id {
            PropertyId::Numeric(id) => *id,
            PropertyId::Name(name) => return Err(CodecError::Unencodable(name.clone())),
        };

        match &property.value {
            PropertyValue::Integer(v) => self.record(id, TAG_INTEGER, &encode_int(*v)),
            PropertyValue::Time(v) => self.record(id, TAG_TIME, &encode_int(*v)),
            PropertyValue::Boolean(b) => self.record(id, TAG_BOOLEAN, &[u8::from(*b)]),
            PropertyValue::String(s) => self.record(id, TAG_STRING, s.as_bytes()),
            PropertyValue::Opaque(bytes) => self.record(id, TAG_OPAQUE, bytes),
        }
    }

    /// Encode an instance record wrapping `properties`.
    pub fn encode_instance(&mut self, instance_id: u16, properties: &[Property]) -> Result<(), CodecError> {
        let nested = encode(properties)?;
        self.record(instance_id, TAG_INSTANCE, &nested)
    }

    /// Finish encoding and return the record set.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf[0..2].copy_from_slice(&self.count.to_be_bytes());
        self.buf
    }
}

impl Default for TlvEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Record set decoder.
pub struct TlvDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
    remaining: u16,
}

/// One raw record.
struct RawRecord<'a> {
    id: u16,
    tag: u8,
    value: &'a [u8],
}

impl<'a> TlvDecoder<'a> {
    /// Read the record set header.
    pub fn new(buf: &'a [u8]) -> Result<Self, CodecError> {
        let mut decoder = Self {
            buf,
            pos: 0,
            remaining: 0,
        };
        decoder.remaining = decoder.read_u16()?;
        Ok(decoder)
    }

    /// Records still to be read.
    pub fn remaining(&self) -> u16 {
        self.remaining
    }

    fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], CodecError> {
        let available = self.buf.len() - self.pos;
        if count > available {
            return Err(CodecError::Truncated {
                needed: count,
                available,
            });
        }
        let bytes = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn next_raw(&mut self) -> Result<Option<RawRecord<'a>>, CodecError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let id = self.read_u16()?;
        let tag = self.read_bytes(1)?[0];
        let len = usize::from(self.read_u16()?);
        let value = self.read_bytes(len)?;
        self.remaining -= 1;
        Ok(Some(RawRecord { id, tag, value }))
    }

    /// Decode the next property record, `None` once the counted records are read.
    pub fn next_property(&mut self) -> Result<Option<Property>, CodecError> {
        match self.next_raw()? {
            Some(raw) => decode_value(raw.tag, raw.value)
                .map(|value| Some(Property::new(raw.id, value))),
            None => Ok(None),
        }
    }
}

fn encode_int(v: i64) -> Vec<u8> {
    if let Ok(b) = i8::try_from(v) {
        b.to_be_bytes().to_vec()
    } else if let Ok(s) = i16::try_from(v) {
        s.to_be_bytes().to_vec()
    } else if let Ok(w) = i32::try_from(v) {
        w.to_be_bytes().to_vec()
    } else {
        v.to_be_bytes().to_vec()
    }
}

fn decode_int(tag: u8, bytes: &[u8]) -> Result<i64, CodecError> {
    match bytes.len() {
        1 => Ok(i64::from(i8::from_be_bytes([bytes[0]]))),
        2 => Ok(i64::from(i16::from_be_bytes([bytes[0], bytes[1]]))),
        4 => Ok(i64::from(i32::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]))),
        8 => {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            Ok(i64::from_be_bytes(arr))
        }
        len => Err(CodecError::InvalidLength { tag, len }),
    }
}

fn decode_value(tag: u8, bytes: &[u8]) -> Result<PropertyValue, CodecError> {
    match tag {
        TAG_INTEGER => decode_int(tag, bytes).map(PropertyValue::Integer),
        TAG_TIME => decode_int(tag, bytes).map(PropertyValue::Time),
        TAG_BOOLEAN => match bytes {
            [0] => Ok(PropertyValue::Boolean(false)),
            [1] => Ok(PropertyValue::Boolean(true)),
            [other] => Err(CodecError::InvalidBoolean(*other)),
            _ => Err(CodecError::InvalidLength {
                tag,
                len: bytes.len(),
            }),
        },
        TAG_STRING => std::str::from_utf8(bytes)
            .map(|s| PropertyValue::String(s.to_owned()))
            .map_err(|_| CodecError::InvalidUtf8),
        TAG_OPAQUE => Ok(PropertyValue::Opaque(bytes.to_vec())),
        other => Err(CodecError::UnknownTag(other)),
    }
}

/// Encode a flat property list as a record set.
pub fn encode(properties: &[Property]) -> Result<Vec<u8>, CodecError> {
    check_unique(properties)?;
    let mut encoder = TlvEncoder::new();
    for property in properties {
        encoder.encode_property(property)?;
    }
    Ok(encoder.finish())
}

/// Decode a flat record set, preserving record order and ids.
pub fn decode(buf: &[u8]) -> Result<Vec<Property>, CodecError> {
    let mut decoder = TlvDecoder::new(buf)?;
    let mut properties = Vec::with_capacity(usize::from(decoder.remaining()));
    while let Some(property) = decoder.next_property()? {
        properties.push(property);
    }
    check_unique(&properties)?;
    Ok(properties)
}

/// Encode several object instances, each as an instance record.
pub fn encode_instances(instances: &[(u16, Vec<Property>)]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = TlvEncoder::new();
    for (instance_id, properties) in instances {
        encoder.encode_instance(*instance_id, properties)?;
    }
    Ok(encoder.finish())
}

/// Decode a record set of instance records.
pub fn decode_instances(buf: &[u8]) -> Result<Vec<(u16, Vec<Property>)>, CodecError> {
    let mut decoder = TlvDecoder::new(buf)?;
    let mut instances = Vec::new();
    while let Some(raw) = decoder.next_raw()? {
        if raw.tag != TAG_INSTANCE {
            return Err(CodecError::UnknownTag(raw.tag));
        }
        instances.push((raw.id, decode(raw.value)?));
    }
    Ok(instances)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> Vec<Property> {
        vec![
            Property::string(0u16, "48.858093"),
            Property::string(1u16, "2.294694"),
            Property::time(5u16, 1_700_000_000),
        ]
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        let props = vec![
            Property::integer(0u16, -3),
            Property::integer(1u16, 70_000),
            Property::integer(2u16, i64::MIN),
            Property::boolean(3u16, true),
            Property::string(4u16, "Soletta LAMP!"),
            Property::time(5u16, 1_700_000_000),
            Property::new(6u16, PropertyValue::Opaque(vec![0xde, 0xad])),
        ];
        let bytes = encode(&props).unwrap();
        assert_eq!(decode(&bytes).unwrap(), props);
    }

    #[test]
    fn test_integer_uses_shortest_width() {
        let bytes = encode(&[Property::integer(9u16, 100)]).unwrap();
        // count(2) + id(2) + tag(1) + len(2) + 1 value byte
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[5..7], [0, 1]);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = encode(&location()).unwrap();
        bytes.extend_from_slice(b"garbage");
        assert_eq!(decode(&bytes).unwrap(), location());
    }

    #[test]
    fn test_length_past_end_fails() {
        let mut bytes = encode(&location()).unwrap();
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_fails() {
        // one record, id 0, tag 0x7f, len 0
        let bytes = [0, 1, 0, 0, 0x7f, 0, 0];
        assert_eq!(decode(&bytes), Err(CodecError::UnknownTag(0x7f)));
    }

    #[test]
    fn test_invalid_integer_width_fails() {
        let bytes = [0, 1, 0, 0, TAG_INTEGER, 0, 3, 1, 2, 3];
        assert_eq!(
            decode(&bytes),
            Err(CodecError::InvalidLength {
                tag: TAG_INTEGER,
                len: 3
            })
        );
    }

    #[test]
    fn test_named_property_unencodable() {
        let err = encode(&[Property::boolean("state", true)]).unwrap_err();
        assert_eq!(err, CodecError::Unencodable("state".into()));
    }

    #[test]
    fn test_empty_buffer_fails() {
        assert!(matches!(decode(&[]), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_instances_roundtrip() {
        let instances = vec![(0u16, location())];
        let bytes = encode_instances(&instances).unwrap();
        assert_eq!(decode_instances(&bytes).unwrap(), instances);
        // flat decode does not accept instance records
        assert_eq!(decode(&bytes), Err(CodecError::UnknownTag(TAG_INSTANCE)));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let twice = vec![Property::integer(0u16, 1), Property::integer(0u16, 2)];
        assert_eq!(encode(&twice), Err(CodecError::DuplicateProperty(PropertyId::Numeric(0))));
        assert!(encode_instances(&[(0, twice.clone())]).is_err());

        // hand-built record set from a peer that repeats an id
        let mut encoder = TlvEncoder::new();
        for property in &twice {
            encoder.encode_property(property).unwrap();
        }
        let bytes = encoder.finish();
        assert_eq!(decode(&bytes), Err(CodecError::DuplicateProperty(PropertyId::Numeric(0))));

        let mut encoder = TlvEncoder::new();
        encoder.record(3, TAG_INSTANCE, &bytes).unwrap();
        assert_eq!(
            decode_instances(&encoder.finish()),
            Err(CodecError::DuplicateProperty(PropertyId::Numeric(0)))
        );

        // the same id in two instances is fine
        let instances = vec![(0u16, vec![Property::integer(0u16, 1)]), (1, vec![Property::integer(0u16, 2)])];
        assert!(decode_instances(&encode_instances(&instances).unwrap()).is_ok());
    }
}
