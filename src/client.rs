//! Client library for connecting to a distkv server
//!
//! Used by end users and by the leader's replica workers, which push
//! replicated writes to followers through the same GET/PUT protocol.

use crate::error::{DistKvError, Result};
use crate::protocol::{decode_response, read_frame, write_frame, Request, Response};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;

/// Client for connecting to a distkv server
pub struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: BufWriter<tokio::net::tcp::OwnedWriteHalf>,
}

impl Client {
    /// Connect to a distkv server
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let reader = BufReader::new(read_half);
        let writer = BufWriter::new(write_half);

        Ok(Self { reader, writer })
    }

    /// Send a raw request and receive the server's response
    pub async fn send_request(&mut self, request: &Request) -> Result<Response> {
        let body = request.encode()?;
        write_frame(&mut self.writer, &body).await?;

        let body = read_frame(&mut self.reader).await?.ok_or_else(|| {
            DistKvError::Protocol("connection closed before a response arrived".to_string())
        })?;
        decode_response(&body)
    }

    /// Store `value` under `key`
    pub async fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let response = self.send_request(&Request::put(key, value)).await?;
        into_result(response).map(|_| ())
    }

    /// Fetch the value stored under `key`
    pub async fn get(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        let response = self.send_request(&Request::get(key)).await?;
        into_result(response)
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Map a response onto the caller-facing result, turning known failure
/// messages back into their error kinds.
fn into_result(response: Response) -> Result<Vec<u8>> {
    if response.is_success() {
        return Ok(response.value);
    }

    if response.error == DistKvError::KeyNotFound.to_string() {
        Err(DistKvError::KeyNotFound)
    } else if response.error == DistKvError::InvalidOperation.to_string() {
        Err(DistKvError::InvalidOperation)
    } else {
        Err(DistKvError::Server(response.error))
    }
}
