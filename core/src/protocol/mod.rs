//! The Tau wire protocol.
//!
//! Every frame is a 10-byte header followed by a length-prefixed payload:
//!
//! ```text
//! 0..3   magic 'T','A','U'
//! 3      version (1)
//! 4      opcode
//! 5      flags (reserved, written as 0)
//! 6..10  payload length, u32 big-endian, capped at 4 MiB
//! ```
//!
//! All multi-byte integers on the wire are big-endian; floats are IEEE-754
//! binary64 bit-cast to u64. Labels and transform names are exactly 32
//! bytes, NUL-padded.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::storage::{Label, LABEL_LEN};

/// Frame magic, the first three header bytes.
pub const MAGIC: [u8; 3] = *b"TAU";

/// Protocol version.
pub const VERSION: u8 = 1;

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 10;

/// Upper bound on a frame payload.
pub const MAX_PAYLOAD_LEN: usize = 4 * 1024 * 1024;

/// Frame opcodes; requests and responses share the enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Connect = 0x01,
    Disconnect = 0x02,
    Ping = 0x03,
    Pong = 0x04,
    CreateSeries = 0x10,
    DropSeries = 0x11,
    Append = 0x20,
    QueryPoint = 0x30,
    CreateLens = 0x40,
    DropLens = 0x41,
    QueryLens = 0x42,
    ComposeLens = 0x43,
    ListLenses = 0x44,
    Ok = 0xF0,
    Err = 0xFF,
}

impl OpCode {
    pub fn from_u8(raw: u8) -> Option<OpCode> {
        let op = match raw {
            0x01 => OpCode::Connect,
            0x02 => OpCode::Disconnect,
            0x03 => OpCode::Ping,
            0x04 => OpCode::Pong,
            0x10 => OpCode::CreateSeries,
            0x11 => OpCode::DropSeries,
            0x20 => OpCode::Append,
            0x30 => OpCode::QueryPoint,
            0x40 => OpCode::CreateLens,
            0x41 => OpCode::DropLens,
            0x42 => OpCode::QueryLens,
            0x43 => OpCode::ComposeLens,
            0x44 => OpCode::ListLenses,
            0xF0 => OpCode::Ok,
            0xFF => OpCode::Err,
            _ => return None,
        };
        Some(op)
    }
}

/// Application status codes carried in ERR payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0,
    BadMagic = 1,
    BadVersion = 2,
    BadOpcode = 3,
    PayloadTooLarge = 4,
    NotAuthenticated = 5,
    AuthFailed = 6,
    SeriesNotFound = 7,
    SeriesAlreadyExists = 8,
    InvalidPayload = 9,
    InternalError = 10,
    OutOfOrder = 11,
    LensNotFound = 12,
    LensAlreadyExists = 13,
}

/// Header decode failures. Fatal to the connection.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad frame magic")]
    BadMagic,

    #[error("unsupported protocol version {0}")]
    BadVersion(u8),

    #[error("unknown opcode {0:#04x}")]
    BadOpcode(u8),

    #[error("payload length {0} exceeds limit")]
    PayloadTooLarge(u32),
}

impl FrameError {
    /// The status code reported to the peer before closing.
    pub fn status(&self) -> Status {
        match self {
            FrameError::BadMagic => Status::BadMagic,
            FrameError::BadVersion(_) => Status::BadVersion,
            FrameError::BadOpcode(_) => Status::BadOpcode,
            FrameError::PayloadTooLarge(_) => Status::PayloadTooLarge,
        }
    }
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub opcode: OpCode,
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn new(opcode: OpCode, payload_len: u32) -> Self {
        FrameHeader { opcode, payload_len }
    }
}

/// Encodes a header into its 10-byte wire form.
pub fn encode_header(header: FrameHeader) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[..3].copy_from_slice(&MAGIC);
    buf[3] = VERSION;
    buf[4] = header.opcode as u8;
    buf[5] = 0;
    BigEndian::write_u32(&mut buf[6..10], header.payload_len);
    buf
}

/// Decodes and validates a 10-byte header.
pub fn decode_header(buf: &[u8; HEADER_LEN]) -> Result<FrameHeader, FrameError> {
    if buf[..3] != MAGIC {
        return Err(FrameError::BadMagic);
    }
    if buf[3] != VERSION {
        return Err(FrameError::BadVersion(buf[3]));
    }
    let opcode = OpCode::from_u8(buf[4]).ok_or(FrameError::BadOpcode(buf[4]))?;
    let payload_len = BigEndian::read_u32(&buf[6..10]);
    if payload_len as usize > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(payload_len));
    }
    Ok(FrameHeader { opcode, payload_len })
}

/// Reads the 32-byte label at `offset`.
fn label_at(payload: &[u8], offset: usize) -> Option<Label> {
    let bytes: [u8; LABEL_LEN] = payload.get(offset..offset + LABEL_LEN)?.try_into().ok()?;
    Some(Label::from_bytes(bytes))
}

/// Parses a bare label payload (CREATE_SERIES, DROP_SERIES, DROP_LENS,
/// QUERY response routing).
pub fn parse_label(payload: &[u8]) -> Option<Label> {
    if payload.len() != LABEL_LEN {
        return None;
    }
    label_at(payload, 0)
}

/// Parses an APPEND payload: label, timestamp, value.
pub fn parse_append(payload: &[u8]) -> Option<(Label, i64, f64)> {
    if payload.len() != LABEL_LEN + 8 + 8 {
        return None;
    }
    let label = label_at(payload, 0)?;
    let ts = BigEndian::read_i64(&payload[LABEL_LEN..LABEL_LEN + 8]);
    let value = f64::from_bits(BigEndian::read_u64(&payload[LABEL_LEN + 8..LABEL_LEN + 16]));
    Some((label, ts, value))
}

/// Parses a QUERY_POINT / QUERY_LENS payload: label, timestamp.
pub fn parse_query(payload: &[u8]) -> Option<(Label, i64)> {
    if payload.len() != LABEL_LEN + 8 {
        return None;
    }
    let label = label_at(payload, 0)?;
    let ts = BigEndian::read_i64(&payload[LABEL_LEN..LABEL_LEN + 8]);
    Some((label, ts))
}

/// Parses a CREATE_LENS payload: lens label, source label, transform name.
pub fn parse_create_lens(payload: &[u8]) -> Option<(Label, Label, [u8; LABEL_LEN])> {
    if payload.len() != LABEL_LEN * 3 {
        return None;
    }
    let label = label_at(payload, 0)?;
    let source = label_at(payload, LABEL_LEN)?;
    let transform: [u8; LABEL_LEN] = payload[LABEL_LEN * 2..].try_into().ok()?;
    Some((label, source, transform))
}

/// Parses a COMPOSE_LENS payload: new label, first lens, second lens.
pub fn parse_compose_lens(payload: &[u8]) -> Option<(Label, Label, Label)> {
    if payload.len() != LABEL_LEN * 3 {
        return None;
    }
    Some((
        label_at(payload, 0)?,
        label_at(payload, LABEL_LEN)?,
        label_at(payload, LABEL_LEN * 2)?,
    ))
}

/// Encodes a point-query response: a found flag, then the value when found.
pub fn encode_query_response(value: Option<f64>) -> Vec<u8> {
    match value {
        Some(v) => {
            let mut payload = vec![0u8; 9];
            payload[0] = 1;
            BigEndian::write_u64(&mut payload[1..9], v.to_bits());
            payload
        }
        None => vec![0u8],
    }
}

/// Encodes a LIST_LENSES response: the labels concatenated.
pub fn encode_label_list(labels: &[Label]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(labels.len() * LABEL_LEN);
    for label in labels {
        payload.extend_from_slice(label.as_bytes());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let ops = [
            OpCode::Connect,
            OpCode::Disconnect,
            OpCode::Ping,
            OpCode::Pong,
            OpCode::CreateSeries,
            OpCode::DropSeries,
            OpCode::Append,
            OpCode::QueryPoint,
            OpCode::CreateLens,
            OpCode::DropLens,
            OpCode::QueryLens,
            OpCode::ComposeLens,
            OpCode::ListLenses,
            OpCode::Ok,
            OpCode::Err,
        ];
        for opcode in ops {
            for len in [0u32, 1, 32, MAX_PAYLOAD_LEN as u32] {
                let header = FrameHeader::new(opcode, len);
                let decoded = decode_header(&encode_header(header)).unwrap();
                assert_eq!(decoded, header);
            }
        }
    }

    #[test]
    fn connect_frame_bytes() {
        let encoded = encode_header(FrameHeader::new(OpCode::Connect, 32));
        assert_eq!(
            encoded,
            [0x54, 0x41, 0x55, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x20]
        );
    }

    #[test]
    fn decode_rejects_bad_frames() {
        let good = encode_header(FrameHeader::new(OpCode::Ping, 0));

        let mut bad = good;
        bad[0] = b'X';
        assert_eq!(decode_header(&bad), Err(FrameError::BadMagic));

        let mut bad = good;
        bad[3] = 2;
        assert_eq!(decode_header(&bad), Err(FrameError::BadVersion(2)));

        let mut bad = good;
        bad[4] = 0x7E;
        assert_eq!(decode_header(&bad), Err(FrameError::BadOpcode(0x7E)));

        let mut bad = good;
        BigEndian::write_u32(&mut bad[6..10], MAX_PAYLOAD_LEN as u32 + 1);
        assert!(matches!(
            decode_header(&bad),
            Err(FrameError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn append_payload_round_trip() {
        let label = Label::from_name("temperature_c").unwrap();
        let mut payload = Vec::new();
        payload.extend_from_slice(label.as_bytes());
        payload.extend_from_slice(&1000i64.to_be_bytes());
        payload.extend_from_slice(&22.5f64.to_bits().to_be_bytes());

        let (got_label, ts, value) = parse_append(&payload).unwrap();
        assert_eq!(got_label, label);
        assert_eq!(ts, 1000);
        assert_eq!(value, 22.5);

        assert!(parse_append(&payload[..40]).is_none());
    }

    #[test]
    fn query_response_encoding() {
        // Example from the wire contract: found, value 23.1.
        assert_eq!(
            encode_query_response(Some(23.1)),
            vec![0x01, 0x40, 0x37, 0x19, 0x99, 0x99, 0x99, 0x99, 0x9A]
        );
        // And the basic scenario value 22.5.
        assert_eq!(
            encode_query_response(Some(22.5)),
            vec![0x01, 0x40, 0x36, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(encode_query_response(None), vec![0x00]);
    }

    #[test]
    fn lens_payload_parsing() {
        let lens = Label::from_name("altitude_ft").unwrap();
        let source = Label::from_name("altitude_m").unwrap();
        let mut transform = [0u8; LABEL_LEN];
        transform[.."meters_to_feet".len()].copy_from_slice(b"meters_to_feet");

        let mut payload = Vec::new();
        payload.extend_from_slice(lens.as_bytes());
        payload.extend_from_slice(source.as_bytes());
        payload.extend_from_slice(&transform);

        let (l, s, t) = parse_create_lens(&payload).unwrap();
        assert_eq!(l, lens);
        assert_eq!(s, source);
        assert_eq!(t, transform);

        let (l, a, b) = parse_compose_lens(&payload).unwrap();
        assert_eq!(l, lens);
        assert_eq!(a, source);
        assert_eq!(b, Label::from_bytes(transform));
    }

    #[test]
    fn label_list_encoding() {
        let a = Label::from_name("a").unwrap();
        let b = Label::from_name("b").unwrap();
        let payload = encode_label_list(&[a, b]);
        assert_eq!(payload.len(), 64);
        assert_eq!(&payload[..32], a.as_bytes());
        assert_eq!(&payload[32..], b.as_bytes());
    }
}
