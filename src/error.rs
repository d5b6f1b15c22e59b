use crate::{
    client::NackReason,
    id::{BitsError, Id},
    routing::node::NodeRef,
};
use std::{io, time::Duration};
use thiserror::Error;

/// Failure to start a node. Nothing is left running when one of these is returned.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to bind socket")]
    Bind(#[source] io::Error),
    #[error("invalid bootstrap address {addr:?}")]
    InvalidBootstrap {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("bootstrap address {0:?} has no address of the socket's ip version")]
    UnresolvedBootstrap(String),
    #[error(transparent)]
    InvalidBits(#[from] BitsError),
    #[error("node id {id} does not fit a {bits}-bit ring")]
    IdOutOfRange { id: Id, bits: u8 },
    #[error("socket error")]
    Socket(#[from] io::Error),
}

/// Failure of a [`Client`](crate::Client) request.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No reply arrived in time. The request may still have been executed.
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("request rejected by {owner}: {reason:?}")]
    Rejected { reason: NackReason, owner: NodeRef },
    #[error("message of {0} bytes exceeds the 1024 byte datagram limit")]
    MessageTooLarge(usize),
    #[error("failed to encode request")]
    Encode(#[source] serde_bencode::Error),
    #[error("socket error")]
    Socket(#[from] io::Error),
}
