//! AMF0 encoding for RTMP command messages
//!
//! Only the subset that shows up in client-side command traffic is
//! supported: numbers, booleans, strings, objects, null/undefined, ECMA and
//! strict arrays, and dates.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::{Result, RtmpError};

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;

const MAX_NESTING_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    /// Properties in wire order
    Object(Vec<(String, Amf0Value)>),
    Null,
    Undefined,
    EcmaArray(Vec<(String, Amf0Value)>),
    StrictArray(Vec<Amf0Value>),
    Date(f64),
}

impl Amf0Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Amf0Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Amf0Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Property lookup on objects and ECMA arrays.
    pub fn get(&self, key: &str) -> Option<&Amf0Value> {
        match self {
            Amf0Value::Object(props) | Amf0Value::EcmaArray(props) => {
                props.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Amf0Value::Number(n) => {
                buf.put_u8(MARKER_NUMBER);
                buf.put_f64(*n);
            }
            Amf0Value::Boolean(b) => {
                buf.put_u8(MARKER_BOOLEAN);
                buf.put_u8(u8::from(*b));
            }
            Amf0Value::String(s) if s.len() > u16::MAX as usize => {
                buf.put_u8(MARKER_LONG_STRING);
                buf.put_u32(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            Amf0Value::String(s) => {
                buf.put_u8(MARKER_STRING);
                write_utf8(buf, s);
            }
            Amf0Value::Object(props) => {
                buf.put_u8(MARKER_OBJECT);
                write_properties(buf, props);
            }
            Amf0Value::Null => buf.put_u8(MARKER_NULL),
            Amf0Value::Undefined => buf.put_u8(MARKER_UNDEFINED),
            Amf0Value::EcmaArray(props) => {
                buf.put_u8(MARKER_ECMA_ARRAY);
                buf.put_u32(props.len() as u32);
                write_properties(buf, props);
            }
            Amf0Value::StrictArray(items) => {
                buf.put_u8(MARKER_STRICT_ARRAY);
                buf.put_u32(items.len() as u32);
                for item in items {
                    item.encode(buf);
                }
            }
            Amf0Value::Date(ms) => {
                buf.put_u8(MARKER_DATE);
                buf.put_f64(*ms);
                buf.put_i16(0);
            }
        }
    }
}

/// Build an object value from `(key, value)` pairs.
pub fn object<const N: usize>(props: [(&str, Amf0Value); N]) -> Amf0Value {
    Amf0Value::Object(
        props
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

pub fn encode_all(values: &[Amf0Value]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);
    for value in values {
        value.encode(&mut buf);
    }
    buf.freeze()
}

pub fn decode_all(mut data: Bytes) -> Result<Vec<Amf0Value>> {
    let mut values = Vec::new();
    while data.has_remaining() {
        values.push(decode_value(&mut data, 0)?);
    }
    Ok(values)
}

fn write_utf8(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn write_properties(buf: &mut BytesMut, props: &[(String, Amf0Value)]) {
    for (key, value) in props {
        write_utf8(buf, key);
        value.encode(buf);
    }
    buf.put_u16(0);
    buf.put_u8(MARKER_OBJECT_END);
}

fn need(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(RtmpError::Amf(format!(
            "need {n} bytes, {} remaining",
            buf.remaining()
        )));
    }
    Ok(())
}

fn read_utf8(buf: &mut Bytes, len: usize) -> Result<String> {
    need(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|e| RtmpError::Amf(e.to_string()))
}

fn read_short_utf8(buf: &mut Bytes) -> Result<String> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    read_utf8(buf, len)
}

fn read_properties(buf: &mut Bytes, depth: usize) -> Result<Vec<(String, Amf0Value)>> {
    let mut props = Vec::new();
    loop {
        let key = read_short_utf8(buf)?;
        if key.is_empty() {
            need(buf, 1)?;
            if buf.get_u8() != MARKER_OBJECT_END {
                return Err(RtmpError::Amf("missing object end marker".into()));
            }
            return Ok(props);
        }
        let value = decode_value(buf, depth + 1)?;
        props.push((key, value));
    }
}

fn decode_value(buf: &mut Bytes, depth: usize) -> Result<Amf0Value> {
    if depth > MAX_NESTING_DEPTH {
        return Err(RtmpError::Amf("nesting too deep".into()));
    }
    need(buf, 1)?;
    let marker = buf.get_u8();

    let value = match marker {
        MARKER_NUMBER => {
            need(buf, 8)?;
            Amf0Value::Number(buf.get_f64())
        }
        MARKER_BOOLEAN => {
            need(buf, 1)?;
            Amf0Value::Boolean(buf.get_u8() != 0)
        }
        MARKER_STRING => Amf0Value::String(read_short_utf8(buf)?),
        MARKER_LONG_STRING => {
            need(buf, 4)?;
            let len = buf.get_u32() as usize;
            Amf0Value::String(read_utf8(buf, len)?)
        }
        MARKER_OBJECT => Amf0Value::Object(read_properties(buf, depth)?),
        MARKER_NULL => Amf0Value::Null,
        MARKER_UNDEFINED => Amf0Value::Undefined,
        MARKER_ECMA_ARRAY => {
            // the count is only a hint, the array is terminated like an object
            need(buf, 4)?;
            buf.advance(4);
            Amf0Value::EcmaArray(read_properties(buf, depth)?)
        }
        MARKER_STRICT_ARRAY => {
            need(buf, 4)?;
            let count = buf.get_u32() as usize;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(decode_value(buf, depth + 1)?);
            }
            Amf0Value::StrictArray(items)
        }
        MARKER_DATE => {
            need(buf, 10)?;
            let ms = buf.get_f64();
            buf.advance(2);
            Amf0Value::Date(ms)
        }
        other => return Err(RtmpError::Amf(format!("unsupported marker 0x{other:02x}"))),
    };

    Ok(value)
}
