// src/core/protocol/resp_frame.rs

//! Implements the RESP (REdis Serialization Protocol) frame structure and the
//! corresponding `Encoder` and `Decoder` used by the store client.

use crate::core::MoonshipError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF (Carriage Return, Line Feed) sequence used to terminate lines in RESP.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Limits applied to replies so a misbehaving peer cannot exhaust memory or stack.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;
const MAX_RECURSION_DEPTH: usize = 256;

/// An enum representing a single frame in the RESP protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Builds a command frame: an array of bulk strings, command name first.
    pub fn command<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Bytes>,
    {
        RespFrame::Array(
            parts
                .into_iter()
                .map(|part| RespFrame::BulkString(part.into()))
                .collect(),
        )
    }

    /// A convenience method to encode a frame into a `Vec<u8>`.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, MoonshipError> {
        let mut buf = BytesMut::new();
        RespFrameCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }

    /// Returns the command name of a command frame, upper-cased.
    pub fn command_name(&self) -> Option<String> {
        match self {
            RespFrame::Array(parts) => match parts.first() {
                Some(RespFrame::BulkString(name)) => {
                    Some(String::from_utf8_lossy(name).to_ascii_uppercase())
                }
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespFrame::Null | RespFrame::NullArray)
    }

    /// Converts a string-like reply into an owned `String`. `Null` becomes `None`.
    pub fn into_string(self) -> Result<Option<String>, MoonshipError> {
        match self {
            RespFrame::BulkString(b) => Ok(Some(String::from_utf8(b.to_vec())?)),
            RespFrame::SimpleString(s) => Ok(Some(s)),
            RespFrame::Null => Ok(None),
            RespFrame::Error(e) => Err(MoonshipError::from_store_reply(&e)),
            other => Err(MoonshipError::Protocol(format!(
                "expected a string reply, got {other:?}"
            ))),
        }
    }

    /// Converts an array reply of strings into a `Vec<String>`.
    pub fn into_string_vec(self) -> Result<Vec<String>, MoonshipError> {
        match self {
            RespFrame::Array(items) => items
                .into_iter()
                .map(|item| {
                    item.into_string()?.ok_or_else(|| {
                        MoonshipError::Protocol("unexpected null array element".into())
                    })
                })
                .collect(),
            RespFrame::NullArray => Ok(Vec::new()),
            RespFrame::Error(e) => Err(MoonshipError::from_store_reply(&e)),
            other => Err(MoonshipError::Protocol(format!(
                "expected an array reply, got {other:?}"
            ))),
        }
    }

    /// Turns an error frame into `Err`, passing every other frame through.
    pub fn into_result(self) -> Result<RespFrame, MoonshipError> {
        match self {
            RespFrame::Error(e) => Err(MoonshipError::from_store_reply(&e)),
            other => Ok(other),
        }
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespFrame`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = MoonshipError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            RespFrame::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Integer(i) => {
                dst.extend_from_slice(b":");
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BulkString(b) => {
                dst.extend_from_slice(b"$");
                dst.extend_from_slice(b.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => {
                dst.extend_from_slice(b"$-1\r\n");
            }
            RespFrame::NullArray => {
                dst.extend_from_slice(b"*-1\r\n");
            }
            RespFrame::Array(arr) => {
                dst.extend_from_slice(b"*");
                dst.extend_from_slice(arr.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = MoonshipError;

    /// Decodes one `RespFrame`, returning `Ok(None)` until a complete frame is buffered.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut bytes = &src[..];
        match self.decode_recursive(&mut bytes, 0) {
            Ok(frame) => {
                let len = src.len() - bytes.len();
                src.advance(len);
                Ok(Some(frame))
            }
            Err(MoonshipError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl RespFrameCodec {
    fn decode_recursive(&self, bytes: &mut &[u8], depth: usize) -> Result<RespFrame, MoonshipError> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(MoonshipError::Protocol(
                "RESP recursion depth limit exceeded".to_string(),
            ));
        }

        if bytes.is_empty() {
            return Err(MoonshipError::IncompleteData);
        }

        match bytes[0] {
            b'+' => self.parse_simple_string(bytes),
            b'-' => self.parse_error(bytes),
            b':' => self.parse_integer(bytes),
            b'$' => self.parse_bulk_string(bytes),
            b'*' => self.parse_array(bytes, depth),
            other => Err(MoonshipError::Protocol(format!(
                "unexpected RESP type byte 0x{other:02x}"
            ))),
        }
    }

    /// Returns the next line (without CRLF) and advances past it.
    fn parse_line<'a>(&self, bytes: &mut &'a [u8]) -> Result<&'a [u8], MoonshipError> {
        if let Some(pos) = find_crlf(bytes) {
            let line = &bytes[..pos];
            *bytes = &bytes[pos + CRLF_LEN..];
            Ok(line)
        } else {
            Err(MoonshipError::IncompleteData)
        }
    }

    fn parse_length(&self, line: &[u8]) -> Result<isize, MoonshipError> {
        String::from_utf8_lossy(line)
            .parse::<isize>()
            .map_err(|_| MoonshipError::Protocol("invalid RESP length".to_string()))
    }

    fn parse_simple_string(&self, bytes: &mut &[u8]) -> Result<RespFrame, MoonshipError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        Ok(RespFrame::SimpleString(
            String::from_utf8_lossy(line).to_string(),
        ))
    }

    fn parse_error(&self, bytes: &mut &[u8]) -> Result<RespFrame, MoonshipError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        Ok(RespFrame::Error(String::from_utf8_lossy(line).to_string()))
    }

    fn parse_integer(&self, bytes: &mut &[u8]) -> Result<RespFrame, MoonshipError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        let i = String::from_utf8_lossy(line)
            .parse::<i64>()
            .map_err(|_| MoonshipError::Protocol("invalid RESP integer".to_string()))?;
        Ok(RespFrame::Integer(i))
    }

    /// Parses a Bulk String (e.g., `$5\r\nhello\r\n`).
    fn parse_bulk_string(&self, bytes: &mut &[u8]) -> Result<RespFrame, MoonshipError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        let str_len = self.parse_length(line)?;

        if str_len == -1 {
            return Ok(RespFrame::Null);
        }
        if str_len < 0 || str_len as usize > MAX_BULK_STRING_SIZE {
            return Err(MoonshipError::Protocol("invalid bulk string length".into()));
        }

        let str_len = str_len as usize;
        if bytes.len() < str_len + CRLF_LEN {
            return Err(MoonshipError::IncompleteData);
        }
        if &bytes[str_len..str_len + CRLF_LEN] != CRLF {
            return Err(MoonshipError::Protocol(
                "bulk string is not terminated by CRLF".into(),
            ));
        }

        let data = Bytes::copy_from_slice(&bytes[..str_len]);
        *bytes = &bytes[str_len + CRLF_LEN..];
        Ok(RespFrame::BulkString(data))
    }

    /// Parses an Array (e.g., `*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n`).
    fn parse_array(&self, bytes: &mut &[u8], depth: usize) -> Result<RespFrame, MoonshipError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        let arr_len = self.parse_length(line)?;

        if arr_len == -1 {
            return Ok(RespFrame::NullArray);
        }
        if arr_len < 0 || arr_len as usize > MAX_FRAME_ELEMENTS {
            return Err(MoonshipError::Protocol("invalid array length".into()));
        }

        let arr_len = arr_len as usize;
        let mut frames = Vec::with_capacity(arr_len.min(64));
        for _ in 0..arr_len {
            frames.push(self.decode_recursive(bytes, depth + 1)?);
        }
        Ok(RespFrame::Array(frames))
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|window| window == CRLF)
}
