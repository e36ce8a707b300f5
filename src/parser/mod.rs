use std::fmt;

use bytes::{BufMut, BytesMut};

/// Commands are a single array of scalars; anything nested deeper is refused.
pub const MAX_DEPTH: usize = 4;
/// Largest bulk string payload accepted from a client.
pub const MAX_BULK_LEN: usize = 1024 * 1024;
/// Largest element count accepted in one array.
pub const MAX_ARRAY_LEN: usize = 1024;

/// A single RESP2 frame, used both for decoded requests and encoded replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RESPOutput {
    Array(Vec<RESPOutput>),
    BulkString(String),
    SimpleString(String),
    Error(String),
    Integer(i64),
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserError {
    IncompleteInput,
    UnsupportedType(u8),
    InvalidLength,
    InvalidInteger,
    InvalidUtf8,
    MissingCRLF,
    TooDeep,
    TooLarge,
}

// Implement Display for ParserError
impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserError::IncompleteInput => write!(f, "Incomplete input"),
            ParserError::UnsupportedType(b) => write!(f, "Unsupported type byte {:?}", *b as char),
            ParserError::InvalidLength => write!(f, "Invalid length"),
            ParserError::InvalidInteger => write!(f, "Invalid integer"),
            ParserError::InvalidUtf8 => write!(f, "Invalid UTF-8"),
            ParserError::MissingCRLF => write!(f, "CRLF not found after payload"),
            ParserError::TooDeep => write!(f, "Arrays nested more than {} deep", MAX_DEPTH),
            ParserError::TooLarge => write!(f, "Frame exceeds size limits"),
        }
    }
}

// Implement Error for ParserError
impl std::error::Error for ParserError {}

pub type ParserCRLFResult<'a> = Result<(&'a [u8], &'a [u8]), ParserError>;

pub type ParserResult<'a> = Result<(RESPOutput, &'a [u8]), ParserError>;

pub struct Parser {}

impl Parser {
    /// Decodes one frame from the front of `input`, returning it with the
    /// unconsumed remainder. `IncompleteInput` means more bytes are needed.
    pub fn parse(input: &[u8]) -> ParserResult {
        Parser::parse_frame(input, 0)
    }

    fn parse_frame(input: &[u8], depth: usize) -> ParserResult {
        let (symbol, payload) = input.split_first().ok_or(ParserError::IncompleteInput)?;

        match symbol {
            b'*' => Parser::parse_array(payload, depth + 1),
            b'$' => Parser::parse_bulk_string(payload),
            b'+' => {
                Parser::parse_line(payload).map(|(s, rem)| (RESPOutput::SimpleString(s), rem))
            }
            b'-' => Parser::parse_line(payload).map(|(s, rem)| (RESPOutput::Error(s), rem)),
            b':' => {
                Parser::parse_integer(payload).map(|(i, rem)| (RESPOutput::Integer(i), rem))
            }
            other => Err(ParserError::UnsupportedType(*other)),
        }
    }

    fn parse_array(payload: &[u8], depth: usize) -> ParserResult {
        // *<number of elements>\r\n<element 1>...<element N>
        if depth > MAX_DEPTH {
            return Err(ParserError::TooDeep);
        }
        let (count, mut remaining) = Parser::parse_integer(payload)?;
        if count == -1 {
            return Ok((RESPOutput::Null, remaining));
        }
        let count = usize::try_from(count).map_err(|_| ParserError::InvalidLength)?;
        if count > MAX_ARRAY_LEN {
            return Err(ParserError::TooLarge);
        }

        let mut elements = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let (element, rem) = Parser::parse_frame(remaining, depth)?;
            elements.push(element);
            remaining = rem;
        }

        Ok((RESPOutput::Array(elements), remaining))
    }

    fn parse_bulk_string(payload: &[u8]) -> ParserResult {
        // $<number of bytes>\r\n<string data>\r\n
        let (length, rem) = Parser::parse_integer(payload)?;
        if length == -1 {
            return Ok((RESPOutput::Null, rem));
        }
        let length = usize::try_from(length).map_err(|_| ParserError::InvalidLength)?;
        if length > MAX_BULK_LEN {
            return Err(ParserError::TooLarge);
        }

        if rem.len() < length + 2 {
            return Err(ParserError::IncompleteInput);
        }
        let (data, rem) = rem.split_at(length);
        let rem = rem.strip_prefix(b"\r\n").ok_or(ParserError::MissingCRLF)?;
        let s = String::from_utf8(data.to_vec()).map_err(|_| ParserError::InvalidUtf8)?;

        Ok((RESPOutput::BulkString(s), rem))
    }

    fn parse_integer(payload: &[u8]) -> Result<(i64, &[u8]), ParserError> {
        let (line, rem) = Parser::parse_line(payload)?;
        let value = line.parse().map_err(|_| ParserError::InvalidInteger)?;
        Ok((value, rem))
    }

    fn parse_line(payload: &[u8]) -> Result<(String, &[u8]), ParserError> {
        let (line, rem) = Parser::parse_until_crlf(payload)?;
        let line = std::str::from_utf8(line).map_err(|_| ParserError::InvalidUtf8)?;
        Ok((line.to_string(), rem))
    }

    fn parse_until_crlf(input: &[u8]) -> ParserCRLFResult {
        input
            .windows(2)
            .position(|pair| pair == b"\r\n")
            .map(|index| (&input[..index], &input[index + 2..]))
            .ok_or(ParserError::IncompleteInput)
    }
}

impl RESPOutput {
    pub fn bulk(s: impl Into<String>) -> Self {
        RESPOutput::BulkString(s.into())
    }

    pub fn error(message: impl fmt::Display) -> Self {
        RESPOutput::Error(format!("ERR {}", message))
    }

    /// Appends the wire form of this frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            RESPOutput::SimpleString(s) => {
                buf.put_u8(b'+');
                put_simple(buf, s);
            }
            RESPOutput::Error(s) => {
                buf.put_u8(b'-');
                put_simple(buf, s);
            }
            RESPOutput::Integer(i) => {
                buf.put_u8(b':');
                put_line(buf, &i.to_string());
            }
            RESPOutput::BulkString(s) => {
                buf.put_u8(b'$');
                put_line(buf, &s.len().to_string());
                put_line(buf, s);
            }
            RESPOutput::Null => buf.put_slice(b"$-1\r\n"),
            RESPOutput::Array(elements) => {
                buf.put_u8(b'*');
                put_line(buf, &elements.len().to_string());
                for element in elements {
                    element.encode(buf);
                }
            }
        }
    }
}

fn put_line(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_slice(b"\r\n");
}

// Simple strings and errors cannot carry line breaks.
fn put_simple(buf: &mut BytesMut, s: &str) {
    let flattened = s.replace(['\r', '\n'], " ");
    put_line(buf, &flattened);
}
