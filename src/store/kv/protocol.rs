//! The wire protocol of the networked KV engine.
//!
//! A minimal length-prefixed binary framing over a TCP stream. Every request
//! carries an opcode, a key, and an optional value blob; responses are
//! tagged. All integers are little-endian `u32`. The protocol dictates
//! nothing about blob contents: values are opaque `compress(serialize(v))`
//! byte strings to the engine.

use std::io::{self, Read, Write};

const OP_GET: u8 = 1;
const OP_SET: u8 = 2;
const OP_RPUSH: u8 = 3;
const OP_LRANGE: u8 = 4;
const OP_TYPE: u8 = 5;
const OP_PING: u8 = 6;

const RESP_OK: u8 = 0;
const RESP_NIL: u8 = 1;
const RESP_VALUE: u8 = 2;
const RESP_VALUES: u8 = 3;
const RESP_KIND: u8 = 4;
const RESP_PONG: u8 = 5;
const RESP_ERROR: u8 = 6;

/// The native type of a stored key.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValueKind {
    /// The key does not exist.
    None,
    /// A single value written with `SET`.
    Value,
    /// A list built with `RPUSH`.
    List,
}

impl ValueKind {
    fn to_wire(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Value => 1,
            Self::List => 2,
        }
    }

    fn from_wire(byte: u8) -> io::Result<Self> {
        match byte {
            0 => Ok(Self::None),
            1 => Ok(Self::Value),
            2 => Ok(Self::List),
            _ => Err(invalid_data("unknown value kind")),
        }
    }
}

/// A client request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    /// Fetch the value at a key.
    Get(String),
    /// Store a value at a key, overwriting.
    Set(String, Vec<u8>),
    /// Push a value onto the list at a key, creating the list on first push.
    Rpush(String, Vec<u8>),
    /// Fetch every element of the list at a key, in push order.
    Lrange(String),
    /// Report the native type of a key.
    Type(String),
    /// Liveness probe.
    Ping,
}

/// A server response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    /// The operation succeeded with nothing to return.
    Ok,
    /// The requested key does not exist.
    Nil,
    /// A single value.
    Value(Vec<u8>),
    /// A list of values in push order.
    Values(Vec<Vec<u8>>),
    /// The native type of a key.
    Kind(ValueKind),
    /// Reply to [`Request::Ping`].
    Pong,
    /// The operation failed server-side.
    Error(String),
}

fn invalid_data(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}

fn write_blob<W: Write>(writer: &mut W, blob: &[u8]) -> io::Result<()> {
    let len = u32::try_from(blob.len()).map_err(|_| invalid_data("blob too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(blob)
}

fn read_blob<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let mut blob = vec![0u8; u32::from_le_bytes(len) as usize];
    reader.read_exact(&mut blob)?;
    Ok(blob)
}

fn read_string<R: Read>(reader: &mut R) -> io::Result<String> {
    String::from_utf8(read_blob(reader)?).map_err(|_| invalid_data("invalid UTF-8"))
}

/// Write one request frame.
///
/// # Errors
///
/// Returns an [`io::Error`] if the stream write fails.
pub fn write_request<W: Write>(writer: &mut W, request: &Request) -> io::Result<()> {
    let (op, key, value) = match request {
        Request::Get(key) => (OP_GET, key.as_str(), None),
        Request::Set(key, value) => (OP_SET, key.as_str(), Some(value)),
        Request::Rpush(key, value) => (OP_RPUSH, key.as_str(), Some(value)),
        Request::Lrange(key) => (OP_LRANGE, key.as_str(), None),
        Request::Type(key) => (OP_TYPE, key.as_str(), None),
        Request::Ping => (OP_PING, "", None),
    };
    writer.write_all(&[op])?;
    write_blob(writer, key.as_bytes())?;
    write_blob(writer, value.map_or(&[][..], Vec::as_slice))?;
    writer.flush()
}

/// Read one request frame. `Ok(None)` signals a clean end of stream.
///
/// # Errors
///
/// Returns an [`io::Error`] on a malformed frame or failed read.
pub fn read_request<R: Read>(reader: &mut R) -> io::Result<Option<Request>> {
    let mut op = [0u8; 1];
    match reader.read_exact(&mut op) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let key = read_string(reader)?;
    let value = read_blob(reader)?;
    let request = match op[0] {
        OP_GET => Request::Get(key),
        OP_SET => Request::Set(key, value),
        OP_RPUSH => Request::Rpush(key, value),
        OP_LRANGE => Request::Lrange(key),
        OP_TYPE => Request::Type(key),
        OP_PING => Request::Ping,
        _ => return Err(invalid_data("unknown opcode")),
    };
    Ok(Some(request))
}

/// Write one response frame.
///
/// # Errors
///
/// Returns an [`io::Error`] if the stream write fails.
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> io::Result<()> {
    match response {
        Response::Ok => writer.write_all(&[RESP_OK])?,
        Response::Nil => writer.write_all(&[RESP_NIL])?,
        Response::Value(value) => {
            writer.write_all(&[RESP_VALUE])?;
            write_blob(writer, value)?;
        }
        Response::Values(values) => {
            writer.write_all(&[RESP_VALUES])?;
            let count =
                u32::try_from(values.len()).map_err(|_| invalid_data("too many values"))?;
            writer.write_all(&count.to_le_bytes())?;
            for value in values {
                write_blob(writer, value)?;
            }
        }
        Response::Kind(kind) => writer.write_all(&[RESP_KIND, kind.to_wire()])?,
        Response::Pong => writer.write_all(&[RESP_PONG])?,
        Response::Error(message) => {
            writer.write_all(&[RESP_ERROR])?;
            write_blob(writer, message.as_bytes())?;
        }
    }
    writer.flush()
}

/// Read one response frame.
///
/// # Errors
///
/// Returns an [`io::Error`] on a malformed frame or failed read.
pub fn read_response<R: Read>(reader: &mut R) -> io::Result<Response> {
    let mut tag = [0u8; 1];
    reader.read_exact(&mut tag)?;
    match tag[0] {
        RESP_OK => Ok(Response::Ok),
        RESP_NIL => Ok(Response::Nil),
        RESP_VALUE => Ok(Response::Value(read_blob(reader)?)),
        RESP_VALUES => {
            let mut count = [0u8; 4];
            reader.read_exact(&mut count)?;
            let count = u32::from_le_bytes(count) as usize;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(read_blob(reader)?);
            }
            Ok(Response::Values(values))
        }
        RESP_KIND => {
            let mut kind = [0u8; 1];
            reader.read_exact(&mut kind)?;
            Ok(Response::Kind(ValueKind::from_wire(kind[0])?))
        }
        RESP_PONG => Ok(Response::Pong),
        RESP_ERROR => Ok(Response::Error(read_string(reader)?)),
        _ => Err(invalid_data("unknown response tag")),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn request_frames() {
        let requests = vec![
            Request::Get("k".to_string()),
            Request::Set("a/b".to_string(), vec![1, 2, 3]),
            Request::Rpush("list".to_string(), vec![]),
            Request::Lrange("list".to_string()),
            Request::Type("k".to_string()),
            Request::Ping,
        ];
        let mut buffer = Vec::new();
        for request in &requests {
            write_request(&mut buffer, request).unwrap();
        }
        let mut cursor = Cursor::new(buffer);
        for request in &requests {
            assert_eq!(read_request(&mut cursor).unwrap().as_ref(), Some(request));
        }
        assert_eq!(read_request(&mut cursor).unwrap(), None);
    }

    #[test]
    fn response_frames() {
        let responses = vec![
            Response::Ok,
            Response::Nil,
            Response::Value(vec![9; 100]),
            Response::Values(vec![vec![1], vec![], vec![2, 3]]),
            Response::Kind(ValueKind::List),
            Response::Pong,
            Response::Error("boom".to_string()),
        ];
        let mut buffer = Vec::new();
        for response in &responses {
            write_response(&mut buffer, response).unwrap();
        }
        let mut cursor = Cursor::new(buffer);
        for response in &responses {
            assert_eq!(&read_response(&mut cursor).unwrap(), response);
        }
    }

    #[test]
    fn malformed_frames() {
        assert!(read_response(&mut Cursor::new(vec![99])).is_err());
        assert!(read_request(&mut Cursor::new(vec![0, 1])).is_err());
    }
}
