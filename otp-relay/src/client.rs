// File:    client.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: A relay client speaking the line protocol: register, send, receive.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

use bytes::BytesMut;
use otp_core::WireError;
use otp_core::wire::{self, DataFrame};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Errors raised by [`RelayClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket failure.
    #[error("relay connection failed: {0}")]
    Io(#[from] std::io::Error),
    /// The relay sent something that is not a valid line.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The relay refused the registration with this reply.
    #[error("relay refused registration: {0}")]
    Rejected(String),
    /// The relay closed the connection.
    #[error("relay closed the connection")]
    Closed,
}

/// A line received from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A payload forwarded from another peer.
    Message {
        /// The identifier the payload came from.
        sender: String,
        /// The payload, untouched by the relay.
        payload: String,
    },
    /// A relay notice such as `Recipient 'carol' not found.`.
    Notice(String),
}

impl Inbound {
    fn parse(line: String) -> Self {
        match DataFrame::parse(&line) {
            Ok(frame) => Self::Message {
                sender: frame.peer.to_owned(),
                payload: frame.payload.to_owned(),
            },
            Err(_) => Self::Notice(line),
        }
    }
}

/// A registered connection to a relay.
#[derive(Debug)]
pub struct RelayClient {
    id: String,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    buf: BytesMut,
}

impl RelayClient {
    /// Connects and registers as `id`.
    ///
    /// # Errors
    ///
    /// [`ClientError::Rejected`] with the relay's reply if the identifier is
    /// invalid or taken, or a transport error.
    pub async fn connect<A: ToSocketAddrs>(addr: A, id: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            id: id.to_owned(),
            reader,
            writer,
            buf: BytesMut::with_capacity(4096),
        };

        client.write_line(id).await?;
        match client.next_line().await? {
            Some(reply) if reply == wire::REPLY_CONNECTED => Ok(client),
            Some(reply) => Err(ClientError::Rejected(reply)),
            None => Err(ClientError::Closed),
        }
    }

    /// The identifier this client registered as.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ClientError> {
        let mut out = Vec::new();
        wire::encode_line(line, &mut out);
        self.writer.write_all(&out).await?;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<String>, ClientError> {
        loop {
            if let Some(line) = wire::try_decode_line(&mut self.buf, wire::MAX_FRAME_LEN)? {
                return Ok(Some(line));
            }
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Sends `payload` to `recipient`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket write fails.
    pub async fn send(&mut self, recipient: &str, payload: &str) -> Result<(), ClientError> {
        self.write_line(&DataFrame::render(recipient, payload)).await
    }

    /// Waits for the next line from the relay. `None` once the relay closed
    /// the connection.
    ///
    /// # Errors
    ///
    /// Returns an error on socket failure or an undecodable line.
    pub async fn recv(&mut self) -> Result<Option<Inbound>, ClientError> {
        Ok(self.next_line().await?.map(Inbound::parse))
    }

    /// Stops sending and collects whatever the relay still has to say
    /// before it closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error on socket failure.
    pub async fn close(mut self) -> Result<Vec<Inbound>, ClientError> {
        self.writer.shutdown().await?;
        let mut rest = Vec::new();
        while let Some(inbound) = self.recv().await? {
            rest.push(inbound);
        }
        Ok(rest)
    }
}
