//! Request/response exchange over a byte stream.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{self, Instant};
use tracing::{debug, trace};
use crate::constants::*;
use crate::errors::*;
use crate::num_utils::hex_dump;
use crate::protocol;

/// Writes requests and collects responses of a known length.
///
/// The module is often reached through adapters which don't preserve inter-frame silence, so
/// the end of a response is determined by its expected length only. Reception is an explicit
/// polling loop: every attempt waits at most one read slice, an attempt which yields nothing
/// uses up one of the idle tries, and the whole reception is also capped by a deadline.
pub struct Transport<T> {
    io: T,
    buf: Vec<u8>,
    slice: Duration,
    idle_tries: u32,
    deadline: Duration
}

impl<T> Transport<T>
    where T: AsyncRead + AsyncWrite + Unpin
{
    pub fn new (io: T) -> Self {
        Transport {
            io,
            buf: Vec::with_capacity (64),
            slice: Duration::from_millis (RX_SLICE_MS),
            idle_tries: RX_IDLE_TRIES,
            deadline: Duration::from_millis (RX_DEADLINE_MS)
        }
    }

    /// Overrides the retry budget.
    pub fn with_budget (mut self, slice: Duration, idle_tries: u32, deadline: Duration) -> Self {
        self.slice = slice;
        self.idle_tries = idle_tries;
        self.deadline = deadline;
        self
    }

    /// Sends `request` and returns the raw response once `expected` bytes have arrived.
    ///
    /// Bytes already waiting in the stream belong to an earlier, abandoned exchange and are
    /// discarded before the request goes out. An exception response from the module ends the
    /// reception early; more than `expected` bytes is an error. The returned frame is not
    /// validated.
    pub async fn transact (&mut self, request: &[u8], expected: usize) -> Result<&[u8]> {
        self.drain().await?;
        trace!("tx: {}", hex_dump (request));
        self.buf.clear();
        self.io.write_all (request).await?;
        self.io.flush().await?;
        self.receive (expected).await?;
        trace!("rx: {}", hex_dump (&self.buf));
        if self.buf.len() > expected {
            bail!(ErrorKind::UnexpectedResponse (hex_dump (&self.buf)));
        }
        Ok(&self.buf)
    }

    /// Reads and drops whatever can be read without waiting.
    async fn drain (&mut self) -> Result<()> {
        let mut chunk = [0_u8; RX_CHUNK];
        loop {
            match time::timeout (Duration::ZERO, self.io.read (&mut chunk)).await {
                Ok(Ok(0)) | Err(_) => return Ok(()),
                Ok(Ok(read)) => debug!("dropped stale rx: {}", hex_dump (&chunk[..read])),
                Ok(Err(error)) => return Err(error.into())
            }
        }
    }

    async fn receive (&mut self, expected: usize) -> Result<()> {
        let deadline = Instant::now() + self.deadline;
        let mut idle = 0;
        let mut chunk = [0_u8; RX_CHUNK];
        while self.buf.len() < expected && !protocol::is_exception (&self.buf) {
            if idle >= self.idle_tries || Instant::now() >= deadline {
                bail!(ErrorKind::Timeout (self.buf.len(), expected));
            }
            match time::timeout (self.slice, self.io.read (&mut chunk)).await {
                Ok(Ok(0)) => {
                    // stream reports no data at all; don't spin on it
                    idle += 1;
                    time::sleep (self.slice).await;
                },
                Ok(Ok(read)) => self.buf.extend_from_slice (&chunk[..read]),
                Ok(Err(error)) => return Err(error.into()),
                Err(_) => idle += 1
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn fast<T: AsyncRead + AsyncWrite + Unpin> (io: T) -> Transport<T> {
        Transport::new (io).with_budget (Duration::from_millis (5), 4, Duration::from_secs (1))
    }

    #[tokio::test]
    async fn collects_fragmented_response() {
        let (client, mut module) = duplex (64);
        let mut transport = fast (client);
        let request = protocol::write_request (1, REGISTER_USET, 500);
        let echo = request;
        tokio::spawn (async move {
            let mut received = [0_u8; 8];
            module.read_exact (&mut received).await.unwrap();
            module.write_all (&echo[..3]).await.unwrap();
            time::sleep (Duration::from_millis (2)).await;
            module.write_all (&echo[3..]).await.unwrap();
        });
        let response = transport.transact (&request, 8).await.unwrap();
        assert_eq!(response, &request[..]);
    }

    #[tokio::test]
    async fn stale_bytes_are_dropped_before_a_request() {
        let (client, mut module) = duplex (64);
        let mut transport = fast (client);
        let stale = protocol::write_request (1, REGISTER_USET, 500);
        module.write_all (&stale).await.unwrap();
        let request = protocol::write_request (1, REGISTER_USET, 700);
        tokio::spawn (async move {
            let mut received = [0_u8; 8];
            module.read_exact (&mut received).await.unwrap();
            module.write_all (&received).await.unwrap();
        });
        let response = transport.transact (&request, 8).await.unwrap();
        assert_eq!(response, &request[..]);
    }

    #[tokio::test]
    async fn overlong_response_is_rejected() {
        let (client, mut module) = duplex (64);
        let mut transport = fast (client);
        let request = protocol::write_request (1, REGISTER_ISET, 1000);
        tokio::spawn (async move {
            let mut received = [0_u8; 8];
            module.read_exact (&mut received).await.unwrap();
            let mut reply = received.to_vec();
            reply.extend_from_slice (&received);
            module.write_all (&reply).await.unwrap();
        });
        match *transport.transact (&request, 8).await.unwrap_err().kind() {
            ErrorKind::UnexpectedResponse (_) => {},
            ref other => panic!("unexpected {:?}", other)
        }
    }

    #[tokio::test]
    async fn times_out_when_module_is_silent() {
        let (client, _module) = duplex (64);
        let mut transport = fast (client);
        let request = protocol::read_request (1, 0, 9);
        let error = transport.transact (&request, 23).await.unwrap_err();
        match *error.kind() {
            ErrorKind::Timeout (0, 23) => {},
            ref other => panic!("unexpected {:?}", other)
        }
    }
}
