//! The transport-neutral message envelope (spec §3, §6).

use std::collections::HashMap;

use bytes::Bytes;

/// Well-known header keys (spec §6).
pub const HEADER_CORRELATION_ID: &str = "CorrelationId";
pub const HEADER_REPLY_TO: &str = "ReplyTo";
pub const HEADER_MESSAGE_TYPE: &str = "MessageType";
pub const HEADER_EXPIRES: &str = "Expires";
pub const HEADER_ORIGINATOR: &str = "Originator";

/// A header value: `string | int | long | bool` (spec §6).
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    String(String),
    Int(i32),
    Long(i64),
    Bool(bool),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            HeaderValue::Long(v) => Some(*v),
            HeaderValue::Int(v) => Some(*v as i64),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

impl From<i32> for HeaderValue {
    fn from(value: i32) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Long(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

/// Header map. Insertion order is not significant (spec §3).
pub type Headers = HashMap<String, HeaderValue>;

/// Transport-specific routing keys (e.g. partition key, shard hint).
///
/// Carried alongside the envelope but never interpreted by the core; only
/// the transport adapter understands what a given key means.
pub type RoutingAttributes = HashMap<String, String>;

/// Transport-neutral triple of (payload bytes, header map, routing keys).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub payload: Bytes,
    pub headers: Headers,
    pub routing: RoutingAttributes,
}

impl Envelope {
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            headers: Headers::new(),
            routing: RoutingAttributes::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.headers.get(HEADER_CORRELATION_ID).and_then(HeaderValue::as_str)
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.headers.get(HEADER_REPLY_TO).and_then(HeaderValue::as_str)
    }

    pub fn message_type(&self) -> Option<&str> {
        self.headers.get(HEADER_MESSAGE_TYPE).and_then(HeaderValue::as_str)
    }
}
