// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Application-level message envelope.
//!
//! One UDP datagram carries exactly one JSON-encoded [`Message`]. The envelope
//! only models what the observe/notify state machines need: request/reply
//! correlation by [`Token`], observe registration, notification sequence
//! numbers and a reset for unknown observations.
//!
//! Wire example:
//! ```text
//! {"type":"request","token":7,"method":"get","path":"/a/light","observe":"register"}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hierarchical resource path (`/a/light`, `/6/0/1`).
///
/// A trailing empty segment (`/a/light/`) denotes a collection root and is
/// preserved through parsing and printing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// Parse a path. A leading `/` is optional.
    pub fn parse(path: &str) -> Self {
        if path.is_empty() {
            return Self::default();
        }
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        Self {
            segments: trimmed.split('/').map(str::to_owned).collect(),
        }
    }

    /// Build a path from individual segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True when the last segment is empty (collection root).
    pub fn is_collection(&self) -> bool {
        self.segments.last().is_some_and(String::is_empty)
    }

    /// Segment-wise prefix test. A trailing empty segment on `prefix` is ignored.
    pub fn starts_with(&self, prefix: &ResourcePath) -> bool {
        let mut wanted = prefix.segments.as_slice();
        if let Some((last, rest)) = wanted.split_last() {
            if last.is_empty() {
                wanted = rest;
            }
        }
        self.segments.len() >= wanted.len() && self.segments[..wanted.len()] == *wanted
    }

    /// Interpret every segment as a numeric id (`/6/0/1` -> `[6, 0, 1]`).
    pub fn numeric(&self) -> Option<Vec<u16>> {
        self.segments
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().ok())
            .collect()
    }

    /// Append a segment, returning the extended path.
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments: Vec<String> = self
            .segments
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect();
        segments.push(segment.into());
        Self { segments }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl From<String> for ResourcePath {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<&str> for ResourcePath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.to_string()
    }
}

/// Opaque request/reply correlation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub u32);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Per-node token allocator.
///
/// Owned by the component that sends requests; there is no process-wide
/// counter.
#[derive(Debug, Clone)]
pub struct TokenSource {
    next: u32,
}

impl TokenSource {
    /// Start at a random offset so restarted nodes do not reuse recent tokens.
    pub fn new() -> Self {
        Self::starting_at(fastrand::u32(..))
    }

    pub fn starting_at(first: u32) -> Self {
        Self { next: first }
    }

    /// Allocate a fresh token.
    pub fn next_token(&mut self) -> Token {
        let token = Token(self.next);
        self.next = self.next.wrapping_add(1);
        token
    }
}

impl Default for TokenSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

/// Observe option carried by a GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observe {
    Register,
    Deregister,
}

/// Payload representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    /// `{"oc":[{"href":...,"rep":{...}}]}`
    Text,
    /// Tagged binary records, see [`crate::codec::tlv`].
    Tlv,
    /// CoRE link format (`</1/0>,</6>`), used by registration.
    LinkFormat,
}

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Created,
    Deleted,
    Changed,
    Content,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    InternalServerError,
}

impl Status {
    /// CoAP-style `class.detail` code.
    pub fn code(self) -> &'static str {
        match self {
            Self::Created => "2.01",
            Self::Deleted => "2.02",
            Self::Changed => "2.04",
            Self::Content => "2.05",
            Self::BadRequest => "4.00",
            Self::NotFound => "4.04",
            Self::MethodNotAllowed => "4.05",
            Self::InternalServerError => "5.00",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Deleted | Self::Changed | Self::Content
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.code(), self)
    }
}

/// A request addressed to a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub token: Token,
    pub method: Method,
    pub path: ResourcePath,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observe: Option<Observe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ContentFormat>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_payload")]
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<ResourcePath>, token: Token) -> Self {
        Self {
            token,
            method,
            path: path.into(),
            query: Vec::new(),
            observe: None,
            format: None,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, format: ContentFormat, payload: Vec<u8>) -> Self {
        self.format = Some(format);
        self.payload = payload;
        self
    }

    pub fn with_observe(mut self, observe: Observe) -> Self {
        self.observe = Some(observe);
        self
    }

    pub fn with_query(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.query.push(format!("{}={}", key, value));
        self
    }

    /// Look up a `key=value` query parameter.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.iter().find_map(|q| {
            q.split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }

    /// Build an empty reply carrying this request's token.
    pub fn reply(&self, status: Status) -> Response {
        Response::new(self.token, status)
    }
}

/// A reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub token: Token,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ContentFormat>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_payload")]
    pub payload: Vec<u8>,
    /// Location of a created entity (registration, object instance).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<ResourcePath>,
    /// Observe sequence number when the reply also registers an observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
}

impl Response {
    pub fn new(token: Token, status: Status) -> Self {
        Self {
            token,
            status,
            format: None,
            payload: Vec::new(),
            location: None,
            sequence: None,
        }
    }

    pub fn with_payload(mut self, format: ContentFormat, payload: Vec<u8>) -> Self {
        self.format = Some(format);
        self.payload = payload;
        self
    }

    pub fn with_location(mut self, location: ResourcePath) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// A change notification pushed to an observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub token: Token,
    pub sequence: u32,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ContentFormat>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_payload")]
    pub payload: Vec<u8>,
}

/// Payload bytes travel as one standard base64 string.
mod base64_payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Datagram envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
    /// Sent by an observer that does not recognise a notification token.
    Reset { token: Token },
}

impl Message {
    pub fn token(&self) -> Token {
        match self {
            Self::Request(r) => r.token,
            Self::Response(r) => r.token,
            Self::Notification(n) => n.token,
            Self::Reset { token } => *token,
        }
    }

    /// Serialize to a datagram body.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parse a datagram body.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Self::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Self::Response(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Self::Notification(n)
    }
}

/// Observe sequence numbers are 24-bit serial numbers.
pub const SEQUENCE_MODULUS: u32 = 1 << 24;

/// True when `candidate` is newer than `last` under 24-bit serial arithmetic.
pub fn sequence_is_newer(last: u32, candidate: u32) -> bool {
    let diff = candidate.wrapping_sub(last) % SEQUENCE_MODULUS;
    diff != 0 && diff < SEQUENCE_MODULUS / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parse_and_display() {
        let p = ResourcePath::parse("/a/light");
        assert_eq!(p.segments(), &["a".to_string(), "light".to_string()]);
        assert_eq!(p.to_string(), "/a/light");
        assert!(!p.is_collection());

        let root = ResourcePath::parse("/a/light/");
        assert!(root.is_collection());
        assert_eq!(root.to_string(), "/a/light/");
        assert_ne!(root, p);
    }

    #[test]
    fn test_path_starts_with() {
        let p = ResourcePath::parse("/6/0/1");
        assert!(p.starts_with(&ResourcePath::parse("/6")));
        assert!(p.starts_with(&ResourcePath::parse("/6/0/")));
        assert!(!p.starts_with(&ResourcePath::parse("/6/1")));
        assert!(!ResourcePath::parse("/6").starts_with(&p));
    }

    #[test]
    fn test_path_numeric() {
        assert_eq!(ResourcePath::parse("/6/0/5").numeric(), Some(vec![6, 0, 5]));
        assert_eq!(ResourcePath::parse("/a/light").numeric(), None);
    }

    #[test]
    fn test_token_source_is_monotonic() {
        let mut tokens = TokenSource::starting_at(u32::MAX);
        assert_eq!(tokens.next_token(), Token(u32::MAX));
        assert_eq!(tokens.next_token(), Token(0));
    }

    #[test]
    fn test_request_serialize() {
        let req = Request::new(Method::Get, "/a/light", Token(7)).with_observe(Observe::Register);
        let json = String::from_utf8(Message::from(req.clone()).encode().unwrap()).unwrap();
        assert!(json.contains("\"type\":\"request\""));
        assert!(json.contains("\"path\":\"/a/light\""));
        assert!(json.contains("\"observe\":\"register\""));

        match Message::decode(json.as_bytes()).unwrap() {
            Message::Request(parsed) => assert_eq!(parsed, req),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_payload_is_base64() {
        let payload = br#"{"oc":[{"rep":{"state":true}}]}"#.to_vec();
        let resp = Response::new(Token(3), Status::Content).with_payload(ContentFormat::Text, payload.clone());
        let bytes = Message::from(resp.clone()).encode().unwrap();
        let json = String::from_utf8(bytes.clone()).unwrap();
        assert!(json.contains("\"payload\":\"eyJvYyI6W3sicmVwIjp7InN0YXRlIjp0cnVlfX1dfQ==\""));
        assert!(bytes.len() < 2 * payload.len() + 80);

        assert_eq!(Message::decode(&bytes).unwrap(), Message::Response(resp));
        assert!(Message::decode(br#"{"type":"reset","token":1}"#).is_ok());
        assert!(Message::decode(br#"{"type":"response","token":1,"status":"content","payload":"%%"}"#).is_err());
    }

    #[test]
    fn test_query_value() {
        let req = Request::new(Method::Post, "/rd", Token(1))
            .with_query("ep", "lwm2m-client")
            .with_query("lt", 60);
        assert_eq!(req.query_value("ep"), Some("lwm2m-client"));
        assert_eq!(req.query_value("lt"), Some("60"));
        assert_eq!(req.query_value("b"), None);
    }

    #[test]
    fn test_sequence_is_newer() {
        assert!(sequence_is_newer(1, 2));
        assert!(!sequence_is_newer(2, 2));
        assert!(!sequence_is_newer(5, 3));
        // wraps around the 24-bit space
        assert!(sequence_is_newer(SEQUENCE_MODULUS - 1, 0));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Content.code(), "2.05");
        assert_eq!(Status::MethodNotAllowed.code(), "4.05");
        assert!(Status::Created.is_success());
        assert!(!Status::BadRequest.is_success());
    }
}
