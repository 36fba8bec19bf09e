//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! Every frame is a 4-byte big-endian body length followed by the body.
//! The body is a sequence of tagged fields, each introduced by a varint
//! key `(field << 3) | wire_type` with wire types 0 (varint), 1 (64-bit)
//! and 2 (length-delimited).
//!
//! ### Command Body
//! ```text
//! ┌──────────────────┬──────────────────────────────┐
//! │ 1: name (string) │ 2: repeated argument (string)│
//! └──────────────────┴──────────────────────────────┘
//! ```
//!
//! ### Response Body
//! - 1: err (string, empty = success)
//! - 2: nil flag (varint bool)
//! - 3: int64 (zigzag varint)
//! - 4: string
//! - 5: float64 (fixed 64-bit)
//! - 6: bytes
//! - 7: attributes (nested key/value struct)
//! - 8: repeated nested value
//!
//! Unknown trailing field numbers are skipped by wire type for forward
//! compatibility. A zero-length body is a protocol violation, never an
//! implicit nil.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::str::FromStr;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ClientError, Result};
use super::{AttrValue, Command, CommandKind, Response, Value};

/// Frame header size: 4-byte big-endian body length
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum frame body size (16 MB)
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;

// =============================================================================
// Varint / field primitives
// =============================================================================

fn put_uvarint(buf: &mut BytesMut, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

fn get_uvarint(buf: &mut &[u8]) -> Result<u64> {
    let mut value: u64 = 0;
    for shift in (0..64).step_by(7) {
        if !buf.has_remaining() {
            return Err(ClientError::Protocol("Truncated varint".to_string()));
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(ClientError::Protocol("Varint exceeds 64 bits".to_string()))
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn put_key(buf: &mut BytesMut, field: u32, wire: u8) {
    put_uvarint(buf, (u64::from(field) << 3) | u64::from(wire));
}

fn put_len_field(buf: &mut BytesMut, field: u32, bytes: &[u8]) {
    put_key(buf, field, WIRE_LEN);
    put_uvarint(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

fn get_len_prefixed<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = get_uvarint(buf)? as usize;
    if buf.remaining() < len {
        return Err(ClientError::Protocol(format!(
            "Truncated length-delimited field: expected {} bytes, got {}",
            len,
            buf.remaining()
        )));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn get_string(buf: &mut &[u8]) -> Result<String> {
    let bytes = get_len_prefixed(buf)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ClientError::Protocol("Invalid UTF-8 in string field".to_string()))
}

/// Skip one field of the given wire type. Used for unknown trailing tags.
fn skip_field(buf: &mut &[u8], wire: u8) -> Result<()> {
    match wire {
        WIRE_VARINT => {
            get_uvarint(buf)?;
        }
        WIRE_FIXED64 => {
            if buf.remaining() < 8 {
                return Err(ClientError::Protocol("Truncated 64-bit field".to_string()));
            }
            buf.advance(8);
        }
        WIRE_LEN => {
            get_len_prefixed(buf)?;
        }
        other => {
            return Err(ClientError::Protocol(format!(
                "Unknown wire type: {other}"
            )))
        }
    }
    Ok(())
}

fn expect_wire(field: u32, wire: u8, expected: u8) -> Result<()> {
    if wire != expected {
        return Err(ClientError::Protocol(format!(
            "Field {field} has wire type {wire}, expected {expected}"
        )));
    }
    Ok(())
}

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

/// Encode a command to a length-framed record
///
/// Format: body_len (4, big-endian) + tagged body
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut body = BytesMut::new();
    put_len_field(&mut body, 1, command.kind.as_str().as_bytes());
    for arg in &command.args {
        put_len_field(&mut body, 2, arg.as_bytes());
    }

    frame(&body)
}

/// Decode a length-framed command record
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    let mut body = unframe(bytes)?;

    let mut name: Option<String> = None;
    let mut args = Vec::new();

    while body.has_remaining() {
        let key = get_uvarint(&mut body)?;
        let field = (key >> 3) as u32;
        let wire = (key & 0x7) as u8;
        match field {
            1 => {
                expect_wire(field, wire, WIRE_LEN)?;
                name = Some(get_string(&mut body)?);
            }
            2 => {
                expect_wire(field, wire, WIRE_LEN)?;
                args.push(get_string(&mut body)?);
            }
            _ => skip_field(&mut body, wire)?,
        }
    }

    let name =
        name.ok_or_else(|| ClientError::Protocol("Command frame has no name".to_string()))?;
    Ok(Command {
        kind: CommandKind::from_str(&name)?,
        args,
    })
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to a length-framed record
///
/// The client only decodes responses; encoding exists for the CLI echo
/// path and for in-process test servers.
pub fn encode_response(response: &Response) -> Vec<u8> {
    let mut body = BytesMut::new();

    if !response.err.is_empty() {
        put_len_field(&mut body, 1, response.err.as_bytes());
    }

    match &response.value {
        Some(Value::Nil) => {
            put_key(&mut body, 2, WIRE_VARINT);
            put_uvarint(&mut body, 1);
        }
        Some(Value::Int(i)) => {
            put_key(&mut body, 3, WIRE_VARINT);
            put_uvarint(&mut body, zigzag(*i));
        }
        Some(Value::Str(s)) => put_len_field(&mut body, 4, s.as_bytes()),
        Some(Value::Float(f)) => {
            put_key(&mut body, 5, WIRE_FIXED64);
            body.put_u64(f.to_bits());
        }
        Some(Value::Bytes(b)) => put_len_field(&mut body, 6, b),
        None => {}
    }

    if let Some(attrs) = &response.attrs {
        let encoded = encode_struct(attrs);
        put_len_field(&mut body, 7, &encoded);
    }

    for item in &response.list {
        let encoded = encode_attr_value(item);
        put_len_field(&mut body, 8, &encoded);
    }

    frame(&body)
}

/// Decode a length-framed response record
///
/// Fails with a protocol error on truncation, an unknown wire type, or a
/// zero-length body.
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let mut body = unframe(bytes)?;

    let mut response = Response::default();

    while body.has_remaining() {
        let key = get_uvarint(&mut body)?;
        let field = (key >> 3) as u32;
        let wire = (key & 0x7) as u8;
        match field {
            1 => {
                expect_wire(field, wire, WIRE_LEN)?;
                response.err = get_string(&mut body)?;
            }
            2 => {
                expect_wire(field, wire, WIRE_VARINT)?;
                if get_uvarint(&mut body)? != 0 {
                    response.value = Some(Value::Nil);
                }
            }
            3 => {
                expect_wire(field, wire, WIRE_VARINT)?;
                response.value = Some(Value::Int(unzigzag(get_uvarint(&mut body)?)));
            }
            4 => {
                expect_wire(field, wire, WIRE_LEN)?;
                response.value = Some(Value::Str(get_string(&mut body)?));
            }
            5 => {
                expect_wire(field, wire, WIRE_FIXED64)?;
                if body.remaining() < 8 {
                    return Err(ClientError::Protocol(
                        "Truncated float64 field".to_string(),
                    ));
                }
                response.value = Some(Value::Float(f64::from_bits(body.get_u64())));
            }
            6 => {
                expect_wire(field, wire, WIRE_LEN)?;
                response.value = Some(Value::Bytes(get_len_prefixed(&mut body)?.to_vec()));
            }
            7 => {
                expect_wire(field, wire, WIRE_LEN)?;
                let nested = get_len_prefixed(&mut body)?;
                response.attrs = Some(decode_struct(nested)?);
            }
            8 => {
                expect_wire(field, wire, WIRE_LEN)?;
                let nested = get_len_prefixed(&mut body)?;
                response.list.push(decode_attr_value(nested)?);
            }
            _ => skip_field(&mut body, wire)?,
        }
    }

    Ok(response)
}

// =============================================================================
// Nested struct / value encoding
// =============================================================================

fn encode_struct(map: &BTreeMap<String, AttrValue>) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for (key, value) in map {
        let mut entry = BytesMut::new();
        put_len_field(&mut entry, 1, key.as_bytes());
        put_len_field(&mut entry, 2, &encode_attr_value(value));
        put_len_field(&mut buf, 1, &entry);
    }
    buf.to_vec()
}

fn decode_struct(bytes: &[u8]) -> Result<BTreeMap<String, AttrValue>> {
    let mut buf = bytes;
    let mut map = BTreeMap::new();

    while buf.has_remaining() {
        let key = get_uvarint(&mut buf)?;
        let field = (key >> 3) as u32;
        let wire = (key & 0x7) as u8;
        if field != 1 {
            skip_field(&mut buf, wire)?;
            continue;
        }
        expect_wire(field, wire, WIRE_LEN)?;
        let mut entry = get_len_prefixed(&mut buf)?;

        let mut name: Option<String> = None;
        let mut value = AttrValue::Null;
        while entry.has_remaining() {
            let key = get_uvarint(&mut entry)?;
            let field = (key >> 3) as u32;
            let wire = (key & 0x7) as u8;
            match field {
                1 => {
                    expect_wire(field, wire, WIRE_LEN)?;
                    name = Some(get_string(&mut entry)?);
                }
                2 => {
                    expect_wire(field, wire, WIRE_LEN)?;
                    value = decode_attr_value(get_len_prefixed(&mut entry)?)?;
                }
                _ => skip_field(&mut entry, wire)?,
            }
        }

        let name = name
            .ok_or_else(|| ClientError::Protocol("Struct entry has no key".to_string()))?;
        map.insert(name, value);
    }

    Ok(map)
}

fn encode_attr_value(value: &AttrValue) -> Vec<u8> {
    let mut buf = BytesMut::new();
    match value {
        AttrValue::Null => {
            put_key(&mut buf, 1, WIRE_VARINT);
            put_uvarint(&mut buf, 0);
        }
        AttrValue::Float(f) => {
            put_key(&mut buf, 2, WIRE_FIXED64);
            buf.put_u64(f.to_bits());
        }
        AttrValue::Str(s) => put_len_field(&mut buf, 3, s.as_bytes()),
        AttrValue::Bool(b) => {
            put_key(&mut buf, 4, WIRE_VARINT);
            put_uvarint(&mut buf, u64::from(*b));
        }
        AttrValue::Map(m) => put_len_field(&mut buf, 5, &encode_struct(m)),
        AttrValue::List(items) => {
            for item in items {
                put_len_field(&mut buf, 6, &encode_attr_value(item));
            }
        }
    }
    buf.to_vec()
}

fn decode_attr_value(bytes: &[u8]) -> Result<AttrValue> {
    let mut buf = bytes;
    let mut value = AttrValue::Null;
    let mut list: Vec<AttrValue> = Vec::new();

    while buf.has_remaining() {
        let key = get_uvarint(&mut buf)?;
        let field = (key >> 3) as u32;
        let wire = (key & 0x7) as u8;
        match field {
            1 => {
                expect_wire(field, wire, WIRE_VARINT)?;
                get_uvarint(&mut buf)?;
                value = AttrValue::Null;
            }
            2 => {
                expect_wire(field, wire, WIRE_FIXED64)?;
                if buf.remaining() < 8 {
                    return Err(ClientError::Protocol(
                        "Truncated float64 field".to_string(),
                    ));
                }
                value = AttrValue::Float(f64::from_bits(buf.get_u64()));
            }
            3 => {
                expect_wire(field, wire, WIRE_LEN)?;
                value = AttrValue::Str(get_string(&mut buf)?);
            }
            4 => {
                expect_wire(field, wire, WIRE_VARINT)?;
                value = AttrValue::Bool(get_uvarint(&mut buf)? != 0);
            }
            5 => {
                expect_wire(field, wire, WIRE_LEN)?;
                value = AttrValue::Map(decode_struct(get_len_prefixed(&mut buf)?)?);
            }
            6 => {
                expect_wire(field, wire, WIRE_LEN)?;
                list.push(decode_attr_value(get_len_prefixed(&mut buf)?)?);
            }
            _ => skip_field(&mut buf, wire)?,
        }
    }

    if list.is_empty() {
        Ok(value)
    } else {
        Ok(AttrValue::List(list))
    }
}

// =============================================================================
// Framing
// =============================================================================

fn frame(body: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    message.extend_from_slice(&(body.len() as u32).to_be_bytes());
    message.extend_from_slice(body);
    message
}

/// Strip and validate the outer length frame, returning the body
fn unframe(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(ClientError::Protocol(format!(
            "Incomplete frame header: expected {} bytes, got {}",
            FRAME_HEADER_SIZE,
            bytes.len()
        )));
    }

    let body_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;

    if body_len == 0 {
        return Err(ClientError::Protocol(
            "Zero-length frame body".to_string(),
        ));
    }
    if body_len > MAX_FRAME_SIZE as usize {
        return Err(ClientError::Protocol(format!(
            "Frame body too large: {} bytes (max {})",
            body_len, MAX_FRAME_SIZE
        )));
    }

    let total_len = FRAME_HEADER_SIZE + body_len;
    if bytes.len() < total_len {
        return Err(ClientError::Protocol(format!(
            "Incomplete frame body: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    Ok(&bytes[FRAME_HEADER_SIZE..total_len])
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one complete raw frame (header + body) from a stream
///
/// Blocks until a full frame is received or an error occurs.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let body_len = u32::from_be_bytes(header) as usize;
    if body_len == 0 {
        return Err(ClientError::Protocol(
            "Zero-length frame body".to_string(),
        ));
    }
    if body_len > MAX_FRAME_SIZE as usize {
        return Err(ClientError::Protocol(format!(
            "Frame body too large: {} bytes (max {})",
            body_len, MAX_FRAME_SIZE
        )));
    }

    let mut frame = vec![0u8; FRAME_HEADER_SIZE + body_len];
    frame[..FRAME_HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut frame[FRAME_HEADER_SIZE..])?;

    Ok(frame)
}

/// Read and decode the next response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    let frame = read_frame(reader)?;
    decode_response(&frame)
}

/// Read and decode the next command from a stream
pub fn read_command<R: Read>(reader: &mut R) -> Result<Command> {
    let frame = read_frame(reader)?;
    decode_command(&frame)
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    let bytes = encode_command(command);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let bytes = encode_response(response);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
