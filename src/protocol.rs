//! Wire protocol for distkv
//!
//! Requests and responses are binary bodies carried in length-prefixed frames.
//! A frame is a 4-byte big-endian length followed by exactly that many bytes,
//! so a message never depends on how the stream happens to be chunked.
//!
//! Request body:  `op:u8 | key_len:u32 | key | value_len:u32 | value`
//! Response body: `status:u8 | error_len:u32 | error | value_len:u32 | value`
//!
//! Bodies are parsed with nom without copying until the final owned message.

use crate::error::{DistKvError, Result};
use nom::{
    combinator::{all_consuming, map, map_res},
    multi::length_data,
    number::complete::{be_u32, be_u8},
    sequence::tuple,
    IResult,
};
use std::io;
use std::str;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame body accepted in either direction
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const OP_GET: u8 = 0;
const OP_PUT: u8 = 1;

/// Operation requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Put,
    /// Any op code the server does not know. Kept so the handler can answer
    /// with an invalid-operation failure instead of dropping the connection.
    Unknown(u8),
}

impl Operation {
    pub fn code(&self) -> u8 {
        match self {
            Operation::Get => OP_GET,
            Operation::Put => OP_PUT,
            Operation::Unknown(code) => *code,
        }
    }
}

impl From<u8> for Operation {
    fn from(code: u8) -> Self {
        match code {
            OP_GET => Operation::Get,
            OP_PUT => Operation::Put,
            other => Operation::Unknown(other),
        }
    }
}

/// Outcome flag carried by every response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    fn code(&self) -> u8 {
        match self {
            Status::Success => 0,
            Status::Failure => 1,
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = DistKvError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Status::Success),
            1 => Ok(Status::Failure),
            other => Err(DistKvError::Protocol(format!("unknown status code {}", other))),
        }
    }
}

/// A single client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub op: Operation,
}

impl Request {
    pub fn get(key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            value: Vec::new(),
            op: Operation::Get,
        }
    }

    pub fn put(key: &[u8], value: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            value: value.to_vec(),
            op: Operation::Put,
        }
    }

    /// Serialize the request body (without the frame header)
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(9 + self.key.len() + self.value.len());
        buf.push(self.op.code());
        put_bytes(&mut buf, &self.key)?;
        put_bytes(&mut buf, &self.value)?;
        Ok(buf)
    }
}

/// A single server response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub error: String,
    pub value: Vec<u8>,
}

impl Response {
    pub fn success(value: Vec<u8>) -> Self {
        Self {
            status: Status::Success,
            error: String::new(),
            value,
        }
    }

    /// Failure response carrying the error's message
    pub fn failure(err: &DistKvError) -> Self {
        Self {
            status: Status::Failure,
            error: err.to_string(),
            value: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Serialize the response body (without the frame header)
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(9 + self.error.len() + self.value.len());
        buf.push(self.status.code());
        put_bytes(&mut buf, self.error.as_bytes())?;
        put_bytes(&mut buf, &self.value)?;
        Ok(buf)
    }
}

fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| DistKvError::Encode(format!("field of {} bytes is too large", data.len())))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(data);
    Ok(())
}

/// Parse a complete request body
pub fn decode_request(body: &[u8]) -> Result<Request> {
    let (_, request) = all_consuming(request_parser)(body)?;
    Ok(request)
}

/// Parse a complete response body
pub fn decode_response(body: &[u8]) -> Result<Response> {
    let (_, response) = all_consuming(response_parser)(body)?;
    Ok(response)
}

fn request_parser(input: &[u8]) -> IResult<&[u8], Request> {
    map(
        tuple((be_u8, length_data(be_u32), length_data(be_u32))),
        |(op, key, value): (u8, &[u8], &[u8])| Request {
            key: key.to_vec(),
            value: value.to_vec(),
            op: Operation::from(op),
        },
    )(input)
}

fn response_parser(input: &[u8]) -> IResult<&[u8], Response> {
    map(
        tuple((
            map_res(be_u8, Status::try_from),
            map_res(length_data(be_u32), str::from_utf8),
            length_data(be_u32),
        )),
        |(status, error, value): (Status, &str, &[u8])| Response {
            status,
            error: error.to_string(),
            value: value.to_vec(),
        },
    )(input)
}

/// Read one frame body. Returns `None` when the peer closed the stream
/// before starting a new frame; a close part-way through a frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header[..1]).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    match reader.read_exact(&mut header[1..]).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(DistKvError::Protocol("stream ended inside a frame header".to_string()))
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(DistKvError::Protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Write one frame: length header, body, flush
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(DistKvError::Encode(format!(
            "frame of {} bytes exceeds limit of {}",
            body.len(),
            MAX_FRAME_LEN
        )));
    }

    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_put_request() {
        let body = Request::put(b"mykey", b"myvalue").encode().unwrap();
        assert_eq!(body[0], OP_PUT);
        assert_eq!(&body[1..5], &5u32.to_be_bytes());

        let request = decode_request(&body).unwrap();
        assert_eq!(request.op, Operation::Put);
        assert_eq!(request.key, b"mykey");
        assert_eq!(request.value, b"myvalue");
    }

    #[test]
    fn test_unknown_op_is_preserved() {
        let mut body = Request::get(b"k").encode().unwrap();
        body[0] = 42;
        let request = decode_request(&body).unwrap();
        assert_eq!(request.op, Operation::Unknown(42));
        assert_eq!(request.op.code(), 42);
    }

    #[test]
    fn test_malformed_request_rejected() {
        let body = Request::put(b"key", b"value").encode().unwrap();

        // Truncated value
        assert!(matches!(
            decode_request(&body[..body.len() - 1]),
            Err(DistKvError::Protocol(_))
        ));

        // Trailing garbage
        let mut padded = body.clone();
        padded.push(0xff);
        assert!(matches!(decode_request(&padded), Err(DistKvError::Protocol(_))));

        assert!(decode_request(&[]).is_err());
    }

    #[test]
    fn test_response_serialization() {
        let response = Response::success(b"test".to_vec());
        assert_eq!(decode_response(&response.encode().unwrap()).unwrap(), response);

        let response = Response::failure(&DistKvError::KeyNotFound);
        let decoded = decode_response(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.status, Status::Failure);
        assert_eq!(decoded.error, "this key does not exist");
        assert!(decoded.value.is_empty());
    }

    #[test]
    fn test_bad_status_rejected() {
        let mut body = Response::success(Vec::new()).encode().unwrap();
        body[0] = 7;
        assert!(decode_response(&body).is_err());
    }

    #[tokio::test]
    async fn test_frame_survives_split_writes() {
        // A tiny pipe buffer forces the body to arrive across many reads
        let (mut client, mut server) = tokio::io::duplex(8);
        let body = Request::put(b"split", &[7u8; 100]).encode().unwrap();
        let expected = body.clone();

        let writer = tokio::spawn(async move {
            write_frame(&mut client, &body).await.unwrap();
            write_frame(&mut client, b"second").await.unwrap();
        });

        let first = read_frame(&mut server).await.unwrap().unwrap();
        let second = read_frame(&mut server).await.unwrap().unwrap();
        writer.await.unwrap();

        assert_eq!(first, expected);
        assert_eq!(second, b"second");
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_header_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0]).await.unwrap();
        drop(client);

        assert!(matches!(
            read_frame(&mut server).await,
            Err(DistKvError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 9, 1, 2]).await.unwrap();
        drop(client);

        assert!(read_frame(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        client.write_all(&header).await.unwrap();

        assert!(matches!(
            read_frame(&mut server).await,
            Err(DistKvError::Protocol(_))
        ));
    }
}
