//! Implementation of a Chord distributed hash table peer.
//!
//! Nodes hash their address onto a ring of `2^m` identifiers and own the keys that fall between
//! their predecessor and themselves. Membership is maintained by a periodic stabilization protocol
//! and lookups are sped up by a finger table. Everything runs over plain UDP datagrams.

mod action;
mod chord_dht;
mod client;
mod compact;
mod error;
mod handler;
mod id;
mod message;
mod routing;
mod socket;
mod storage;

pub use crate::action::State;
pub use crate::chord_dht::{ChordDht, DhtBuilder, DEFAULT_MAX_HOPS, DEFAULT_TIMEOUT};
pub use crate::client::{Client, NackReason, Reply};
pub use crate::error::{ClientError, Error};
pub use crate::id::{contains, contains_open, BitsError, Id, IdSpace, DEFAULT_BITS, MAX_BITS};
pub use crate::routing::node::NodeRef;

use async_trait::async_trait;
use std::{io, net::SocketAddr};

/// Datagram socket the DHT runs on. Implemented for [`tokio::net::UdpSocket`].
#[async_trait]
pub trait SocketTrait {
    async fn send_to(&self, buf: &[u8], target: &SocketAddr) -> io::Result<()>;
    async fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}
