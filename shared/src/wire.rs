//! Length-prefixed wire framing for outbound attribute events
//!
//! Every attribute update handed to the connectivity engine is framed as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: protobuf AttributeEvent ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::limits::MAX_FRAME_SIZE;
use crate::{CapabilityKey, TypedValue};

/// Ordered list of strings (protobuf cannot repeat inside a oneof)
#[derive(Clone, PartialEq, Message)]
pub struct StringList {
    #[prost(string, repeated, tag = "1")]
    pub items: Vec<String>,
}

/// One attribute update as it travels to the cloud
#[derive(Clone, PartialEq, Message)]
pub struct AttributeEvent {
    #[prost(string, tag = "1")]
    pub component: String,

    #[prost(string, tag = "2")]
    pub capability: String,

    #[prost(string, tag = "3")]
    pub attribute: String,

    #[prost(oneof = "attribute_event::Value", tags = "4, 5, 6, 7, 8, 9")]
    pub value: Option<attribute_event::Value>,

    #[prost(string, optional, tag = "10")]
    pub unit: Option<String>,

    #[prost(uint64, tag = "11")]
    pub sequence_number: u64,
}

pub mod attribute_event {
    /// Tagged payload of an attribute event
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(sint64, tag = "4")]
        Integer(i64),
        #[prost(double, tag = "5")]
        Number(f64),
        #[prost(string, tag = "6")]
        String(::prost::alloc::string::String),
        #[prost(message, tag = "7")]
        StringArray(super::StringList),
        #[prost(bool, tag = "8")]
        Boolean(bool),
        /// Serialized JSON object
        #[prost(string, tag = "9")]
        JsonObject(::prost::alloc::string::String),
    }
}

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Invalid frame length prefix: {0}")]
    InvalidLength(u32),

    #[error("Attribute event carries no value")]
    MissingValue,

    #[error("Invalid JSON object payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON payload is not an object")]
    NotAnObject,

    #[error("Protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    EncodeError(#[from] prost::EncodeError),
}

impl AttributeEvent {
    /// Build an event for an already encoded value
    pub fn new(
        key: &CapabilityKey,
        attribute: impl Into<String>,
        value: &TypedValue,
        unit: Option<String>,
        sequence_number: u64,
    ) -> Result<Self, WireError> {
        use attribute_event::Value as Wire;

        let value = match value {
            TypedValue::Integer(i) => Wire::Integer(*i),
            TypedValue::Number(n) => Wire::Number(*n),
            TypedValue::String(s) => Wire::String(s.clone()),
            TypedValue::StringArray(items) => Wire::StringArray(StringList {
                items: items.clone(),
            }),
            TypedValue::Boolean(b) => Wire::Boolean(*b),
            TypedValue::JsonObject(map) => Wire::JsonObject(serde_json::to_string(map)?),
        };

        Ok(Self {
            component: key.component.clone(),
            capability: key.capability.clone(),
            attribute: attribute.into(),
            value: Some(value),
            unit,
            sequence_number,
        })
    }

    pub fn capability_key(&self) -> CapabilityKey {
        CapabilityKey::new(self.component.clone(), self.capability.clone())
    }

    /// Recover the tagged value carried by this event
    pub fn typed_value(&self) -> Result<TypedValue, WireError> {
        use attribute_event::Value as Wire;

        Ok(match self.value.as_ref().ok_or(WireError::MissingValue)? {
            Wire::Integer(i) => TypedValue::Integer(*i),
            Wire::Number(n) => TypedValue::Number(*n),
            Wire::String(s) => TypedValue::String(s.clone()),
            Wire::StringArray(list) => TypedValue::StringArray(list.items.clone()),
            Wire::Boolean(b) => TypedValue::Boolean(*b),
            Wire::JsonObject(raw) => match serde_json::from_str::<JsonValue>(raw)? {
                JsonValue::Object(map) => TypedValue::JsonObject(map),
                _ => return Err(WireError::NotAnObject),
            },
        })
    }
}

/// Encode an event into a length-prefixed byte buffer
pub fn encode_frame(event: &AttributeEvent) -> Result<Bytes, WireError> {
    let mut buf = BytesMut::new();
    encode_frame_into(event, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode an event directly into a provided buffer
pub fn encode_frame_into(event: &AttributeEvent, buf: &mut BytesMut) -> Result<(), WireError> {
    let msg_len = event.encoded_len();

    if msg_len > MAX_FRAME_SIZE as usize {
        return Err(WireError::FrameTooLarge(msg_len));
    }

    buf.reserve(4 + msg_len);
    buf.put_u32(msg_len as u32);
    event.encode(buf)?;

    Ok(())
}

/// Try to decode a length-prefixed event from a buffer
///
/// Returns:
/// - `Ok(Some(event))` if a complete frame was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<AttributeEvent>, WireError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let msg_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if msg_len > MAX_FRAME_SIZE {
        return Err(WireError::InvalidLength(msg_len));
    }

    let total_len = 4 + msg_len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    buf.advance(4);
    let msg_bytes = buf.split_to(msg_len as usize);

    Ok(Some(AttributeEvent::decode(msg_bytes)?))
}

/// Streaming decoder for a sequence of frames
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<AttributeEvent>, WireError> {
        decode_frame(&mut self.buffer)
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Convenience for building JSON object payloads in tests and tools
pub fn json_object(value: JsonValue) -> Result<Map<String, JsonValue>, WireError> {
    match value {
        JsonValue::Object(map) => Ok(map),
        _ => Err(WireError::NotAnObject),
    }
}
