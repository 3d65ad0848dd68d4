//! BSP frame codec
//!
//! Pure encode/decode helpers shared by the session and the test appliance.
//! A frame on the wire is:
//!
//! ```text
//! [3 ASCII digits: header len][header len bytes of JSON][Content-Length bytes of body]
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;

use crate::error::{BspError, Result};
use crate::protocol::{RequestType, HEADER_PREFIX_LEN, MAX_BODY_SIZE, MAX_HEADER_LEN};

/// BSP control header.
///
/// `Content-Length` is always written as a decimal string; on decode both the
/// string and the number form are accepted and a missing field means `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(
        rename = "Request-Type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub request_type: Option<RequestType>,

    #[serde(
        rename = "Content-Length",
        default,
        serialize_with = "serialize_length",
        deserialize_with = "deserialize_length"
    )]
    pub content_length: usize,

    #[serde(rename = "ImageID", default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

impl Header {
    pub fn request(request_type: RequestType, content_length: usize) -> Self {
        Self {
            request_type: Some(request_type),
            content_length,
            image_id: None,
        }
    }

    pub fn with_image_id(mut self, id: impl Into<String>) -> Self {
        self.image_id = Some(id.into());
        self
    }

    /// Request-Type for contexts where it is mandatory (server side of a request).
    pub fn require_request_type(&self) -> Result<RequestType> {
        self.request_type
            .ok_or_else(|| BspError::Protocol("missing Request-Type".to_string()))
    }
}

fn serialize_length<S: Serializer>(len: &usize, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(len)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LengthRepr {
    Number(u64),
    Text(String),
}

fn deserialize_length<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<usize, D::Error> {
    match LengthRepr::deserialize(d)? {
        LengthRepr::Number(n) => usize::try_from(n).map_err(de::Error::custom),
        LengthRepr::Text(s) => s
            .trim()
            .parse::<usize>()
            .map_err(|_| de::Error::custom(format!("invalid Content-Length {:?}", s))),
    }
}

/// Build the 3-byte length prefix for a header of `len` bytes.
pub fn encode_header_length(len: usize) -> Result<[u8; HEADER_PREFIX_LEN]> {
    if len > MAX_HEADER_LEN {
        return Err(BspError::Encoding(format!(
            "header is {} bytes (max: {})",
            len, MAX_HEADER_LEN
        )));
    }
    let digits = format!("{:03}", len);
    let mut prefix = [0u8; HEADER_PREFIX_LEN];
    prefix.copy_from_slice(digits.as_bytes());
    Ok(prefix)
}

/// Parse the 3-byte length prefix.
pub fn decode_header_length(prefix: &[u8]) -> Result<usize> {
    if prefix.len() != HEADER_PREFIX_LEN {
        return Err(BspError::Framing(format!(
            "length prefix must be {} bytes, got {}",
            HEADER_PREFIX_LEN,
            prefix.len()
        )));
    }
    if !prefix.iter().all(u8::is_ascii_digit) {
        return Err(BspError::Framing(format!(
            "length prefix is not decimal: {:?}",
            String::from_utf8_lossy(prefix)
        )));
    }
    // Three ASCII digits always fit
    Ok(prefix
        .iter()
        .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0')))
}

/// Serialize a header and prepend its length prefix.
pub fn encode_header(header: &Header) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(header).map_err(|e| BspError::Encoding(e.to_string()))?;
    let prefix = encode_header_length(json.len())?;
    let mut out = Vec::with_capacity(HEADER_PREFIX_LEN + json.len());
    out.extend_from_slice(&prefix);
    out.extend_from_slice(&json);
    Ok(out)
}

/// Parse the JSON header block (without its prefix).
pub fn decode_header(json: &[u8]) -> Result<Header> {
    serde_json::from_slice(json).map_err(|e| BspError::Protocol(format!("bad header: {}", e)))
}

/// A declared body must be exactly Content-Length bytes.
pub fn check_content_length(header: &Header, body_len: usize) -> Result<()> {
    if header.content_length != body_len {
        return Err(BspError::Encoding(format!(
            "Content-Length {} does not match body of {} bytes",
            header.content_length, body_len
        )));
    }
    Ok(())
}

/// Encode a complete frame. The header's Content-Length must match the body.
pub fn encode_frame(header: &Header, body: &[u8]) -> Result<Vec<u8>> {
    check_content_length(header, body.len())?;
    let mut out = encode_header(header)?;
    out.extend_from_slice(body);
    Ok(out)
}

/// Validate a declared body length before allocating for it.
pub fn validate_body_size(size: usize) -> Result<()> {
    if size > MAX_BODY_SIZE {
        return Err(BspError::Framing(format!(
            "body too large: {} bytes (max: {})",
            size, MAX_BODY_SIZE
        )));
    }
    Ok(())
}

/// Image bodies travel as base64 text of the JPEG bytes.
pub fn encode_image_body(image: &[u8]) -> Vec<u8> {
    BASE64.encode(image).into_bytes()
}

/// Decode a bulk listing body into image IDs.
///
/// Accepts a JSON object of index -> ID (values are taken, keys ignored) or a
/// JSON array of IDs. Duplicates collapse to their first occurrence.
pub fn decode_listing(body: &[u8]) -> Result<Vec<String>> {
    let text = std::str::from_utf8(body)
        .map_err(|e| BspError::Protocol(format!("listing is not UTF-8: {}", e)))?;
    let value: serde_json::Value = serde_json::from_str(text)?;
    let items: Vec<serde_json::Value> = match value {
        serde_json::Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        serde_json::Value::Array(items) => items,
        other => {
            return Err(BspError::Protocol(format!(
                "listing must be an object or array, got {}",
                other
            )))
        }
    };

    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        match item {
            serde_json::Value::String(id) => {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
            other => {
                return Err(BspError::Protocol(format!(
                    "listing entry is not a string: {}",
                    other
                )))
            }
        }
    }
    Ok(ids)
}
