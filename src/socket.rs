//! Helpers to simplify work with UdpSocket.

use crate::{
    action::HandlerError,
    message::{Message, MAX_DATAGRAM_SIZE},
    SocketTrait,
};
use async_trait::async_trait;
use std::{io, net::SocketAddr};
use tokio::net::UdpSocket;

pub(crate) struct Socket(Box<dyn SocketTrait + Send + Sync + 'static>, SocketAddr);

impl Socket {
    pub fn new<S: SocketTrait + Send + Sync + 'static>(inner: S) -> io::Result<Self> {
        let inner = Box::new(inner);
        let local_addr = inner.local_addr()?;
        Ok(Self(inner, local_addr))
    }

    pub(crate) async fn send(&self, message: &Message, addr: SocketAddr) -> Result<(), HandlerError> {
        log::trace!("{}: Sending to {addr:?} {message:?}", self.1);

        let bytes = message.encode()?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(HandlerError::MessageTooLarge(bytes.len()));
        }

        // Note: if the socket fails to send the entire buffer, then there is no point in trying to
        // send the rest (no node will attempt to reassemble two or more datagrams into a
        // meaningful message).
        self.0.send_to(&bytes, &addr).await?;
        Ok(())
    }

    /// Receive the next well formed message. Malformed datagrams are logged and skipped.
    ///
    /// This function is cancel safe: https://docs.rs/tokio/1.12.0/tokio/net/struct.UdpSocket.html#cancel-safety-6
    pub(crate) async fn recv(&mut self) -> io::Result<(Message, SocketAddr)> {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (size, addr) = self.0.recv_from(&mut buffer).await?;
            match Message::decode(&buffer[0..size]) {
                Ok(message) => {
                    log::trace!("{}: Received from {addr:?} {message:?}", self.1);
                    return Ok((message, addr));
                }
                Err(error) => {
                    log::warn!(
                        "{}: Failed to decode incoming message from {addr:?}: {error}",
                        self.1
                    );
                }
            }
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.1
    }
}

#[async_trait]
impl SocketTrait for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: &SocketAddr) -> io::Result<()> {
        UdpSocket::send_to(self, buf, target).await.map(|_| ())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}
